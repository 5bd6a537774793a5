//! The canonical envelope every TARS worker wraps its MQTT payloads in:
//! `{id, type, ts, source, correlate, data}`. See the workspace's external
//! interfaces documentation for the wire format this mirrors.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use time::OffsetDateTime;

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Generates a process-unique envelope id. Not globally unique across
/// processes or time -- the invariant the data model requires is "unique per
/// publish", which a monotonic counter plus a random suffix satisfies without
/// pulling in a UUID/ULID dependency the rest of the workspace doesn't use.
pub fn new_id() -> String {
	let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
	let salt: u32 = rand::random();
	format!("{:08x}{:08x}", sequence, salt)
}

/// A fully decoded envelope, generic over its `data` payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
	pub id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(with = "time::serde::rfc3339")]
	pub ts: OffsetDateTime,
	pub source: String,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub correlate: Option<String>,
	pub data: T,
}

impl<T> Envelope<T> {
	pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: T) -> Self {
		Self {
			id: new_id(),
			event_type: event_type.into(),
			ts: OffsetDateTime::now_utc(),
			source: source.into(),
			correlate: None,
			data,
		}
	}

	pub fn correlated(mut self, id: impl Into<String>) -> Self {
		self.correlate = Some(id.into());
		self
	}
}

impl<T: Serialize> Envelope<T> {
	pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(self)
	}
}

/// The envelope with `data` left undecoded, used to peek at the envelope
/// metadata (`id`/`type`/`ts`/`source`/`correlate`) before committing to a
/// concrete payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
	pub id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(with = "time::serde::rfc3339")]
	pub ts: OffsetDateTime,
	pub source: String,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub correlate: Option<String>,
	pub data: serde_json::Value,
}

/// Accepts either a fully-formed [`Envelope<T>`] or a bare payload that is
/// the `data` field directly. Every consumer topic in the workspace decodes
/// through this type: publishers that skip the envelope wrapper are still
/// handled correctly rather than dropped as malformed.
#[derive(Debug, Clone)]
pub enum BareOrEnveloped<T> {
	Enveloped(Envelope<T>),
	/// A bare payload decoded with no envelope wrapper, paired with an id
	/// synthesized at decode time (never observed on the wire, since a bare
	/// payload has none of its own).
	Bare { data: T, id: String },
}

impl<T: DeserializeOwned> BareOrEnveloped<T> {
	pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
		if let Ok(raw) = serde_json::from_slice::<RawEnvelope>(payload) {
			if let Ok(data) = serde_json::from_value::<T>(raw.data.clone()) {
				return Ok(Self::Enveloped(Envelope {
					id: raw.id,
					event_type: raw.event_type,
					ts: raw.ts,
					source: raw.source,
					correlate: raw.correlate,
					data,
				}));
			}
		}

		serde_json::from_slice::<T>(payload).map(|data| Self::Bare { data, id: new_id() })
	}

	/// The typed payload, regardless of whether it arrived wrapped.
	pub fn into_data(self) -> T {
		match self {
			Self::Enveloped(envelope) => envelope.data,
			Self::Bare { data, .. } => data,
		}
	}

	/// The envelope's own `id` field -- what a response must set as its
	/// `correlate` field to answer this request, per the data model's
	/// `R.correlate == Q.id` invariant. For a bare payload, a fresh id is
	/// synthesized at decode time since none was ever observed on the wire.
	pub fn id(&self) -> &str {
		match self {
			Self::Enveloped(envelope) => &envelope.id,
			Self::Bare { id, .. } => id,
		}
	}

	/// The correlation id carried by the envelope, if any. Bare payloads
	/// never carry one.
	pub fn correlate(&self) -> Option<&str> {
		match self {
			Self::Enveloped(envelope) => envelope.correlate.as_deref(),
			Self::Bare { .. } => None,
		}
	}

	/// The originating source, falling back to `"unknown"` for bare
	/// payloads per the documented fallback behavior.
	pub fn source(&self) -> &str {
		match self {
			Self::Enveloped(envelope) => &envelope.source,
			Self::Bare { .. } => "unknown",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Ping {
		n: u32,
	}

	#[test]
	fn round_trips_enveloped_payload() {
		let envelope = Envelope::new("ping", "tars-wake", Ping { n: 3 }).correlated("abc123");
		let id = envelope.id.clone();
		let bytes = envelope.to_json_bytes().unwrap();

		let decoded = BareOrEnveloped::<Ping>::decode(&bytes).unwrap();
		assert_eq!(decoded.id(), id);
		assert_eq!(decoded.correlate(), Some("abc123"));
		assert_eq!(decoded.source(), "tars-wake");
		assert_eq!(decoded.into_data(), Ping { n: 3 });
	}

	#[test]
	fn falls_back_to_bare_payload() {
		let bytes = serde_json::to_vec(&Ping { n: 9 }).unwrap();

		let decoded = BareOrEnveloped::<Ping>::decode(&bytes).unwrap();
		assert!(!decoded.id().is_empty());
		assert_eq!(decoded.correlate(), None);
		assert_eq!(decoded.source(), "unknown");
		assert_eq!(decoded.into_data(), Ping { n: 9 });
	}

	#[test]
	fn generates_unique_ids() {
		let a = new_id();
		let b = new_id();
		assert_ne!(a, b);
	}
}
