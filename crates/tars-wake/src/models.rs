//! Wire payloads exchanged on the wake/mic/tts topics.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeEventType {
	Wake,
	Interrupt,
	Timeout,
	Resume,
	Cancelled,
	Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeEvent {
	#[serde(rename = "type")]
	pub event_type: WakeEventType,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub confidence: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub energy: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tts_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cause: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub ts: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicAction {
	Mute,
	Unmute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicCommand {
	pub action: MicAction,
	pub reason: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsAction {
	Pause,
	Resume,
	Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsControl {
	pub action: TtsAction,
	pub reason: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
}

/// Mirrors the producer side of `tts/status`: `event` is one of
/// `speaking_start`, `speaking_end`, `paused`, `resumed`, `stopped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsStatus {
	pub event: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub utt_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
	pub ok: bool,
	pub version: &'static str,
	#[serde(with = "time::serde::rfc3339")]
	pub ts: OffsetDateTime,
}

impl HealthPayload {
	pub fn ok_now() -> Self {
		Self {
			ok: true,
			version: env!("CARGO_PKG_VERSION"),
			ts: OffsetDateTime::now_utc(),
		}
	}
}
