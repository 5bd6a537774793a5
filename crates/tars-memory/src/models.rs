//! Wire payloads exchanged on the memory/character/stt/tts topics. Each
//! worker crate in this workspace owns its own copy of the topic schemas it
//! speaks (only the envelope/QoS/filter primitives are shared, via
//! `tars-proto`) -- these mirror `tars-llm`'s `MemoryQuery`/`MemoryResults`
//! field-for-field so the two services agree on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub event: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub err: Option<String>,
	pub version: &'static str,
	#[serde(with = "time::serde::rfc3339")]
	pub ts: OffsetDateTime,
}

impl HealthPayload {
	pub fn ready() -> Self {
		Self::new(true, Some("ready".to_string()), None)
	}

	pub fn error(err: String) -> Self {
		Self::new(false, None, Some(err))
	}

	fn new(ok: bool, event: Option<String>, err: Option<String>) -> Self {
		Self {
			ok,
			event,
			err,
			version: env!("CARGO_PKG_VERSION"),
			ts: OffsetDateTime::now_utc(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
	#[default]
	Hybrid,
	Recent,
	Similarity,
}

/// `memory/query`. `text` is the only field a caller is required to set;
/// `top_k`/`retrieval_strategy` fall back to this service's own configured
/// defaults when omitted, matching the original's "use my own TOP_K/
/// RAG_STRATEGY if the request didn't say" behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
	#[serde(default)]
	pub id: String,
	pub text: String,
	#[serde(default)]
	pub top_k: Option<usize>,
	#[serde(default)]
	pub retrieval_strategy: Option<RetrievalStrategy>,
	#[serde(default)]
	pub max_tokens: Option<u32>,
	#[serde(default)]
	pub include_context: bool,
	#[serde(default)]
	pub context_window: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryResults {
	pub query: String,
	pub k: usize,
	#[serde(default)]
	pub results: Vec<MemoryResultEntry>,
	#[serde(default)]
	pub total_tokens: u32,
	#[serde(default)]
	pub strategy_used: RetrievalStrategy,
	#[serde(default)]
	pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
	Target,
	Previous,
	Next,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResultEntry {
	pub document: Value,
	pub score: f32,
	#[serde(default)]
	pub timestamp: Option<String>,
	pub context_type: ContextType,
	#[serde(default)]
	pub token_count: u32,
}

/// `stt/final`.
#[derive(Debug, Clone, Deserialize)]
pub struct SttFinal {
	#[serde(default = "default_true")]
	pub is_final: bool,
	pub text: Option<String>,
}

fn default_true() -> bool {
	true
}

/// `tts/say`.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsSay {
	pub text: String,
}

/// `{ name, description, systemprompt, traits, voice, meta, scenario,
/// personality_notes, example_interactions }` -- the full persona record
/// this service loads from `character.toml` and owns for the rest of the
/// fleet (`tars-llm` only ever reads a narrower projection of this).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterSnapshot {
	#[serde(default)]
	pub message_id: String,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub systemprompt: Option<String>,
	#[serde(default)]
	pub traits: Map<String, Value>,
	#[serde(default)]
	pub voice: Map<String, Value>,
	#[serde(default)]
	pub meta: Map<String, Value>,
	#[serde(default)]
	pub scenario: Map<String, Value>,
	#[serde(default)]
	pub personality_notes: Map<String, Value>,
	#[serde(default)]
	pub example_interactions: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterSection {
	pub section: String,
	pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterGetRequest {
	#[serde(default)]
	pub section: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterTraitUpdate {
	#[serde(rename = "trait")]
	pub trait_name: String,
	pub value: Value,
}
