//! Wire payloads exchanged on the llm/character/tool/tts topics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	System,
	User,
	Assistant,
	Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
	pub role: Role,
	pub content: String,
	/// Set only on `role: Tool` messages, linking a result back to the
	/// `ToolCall.id` that requested it (the OpenAI wire format's
	/// `tool_call_id` field).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
}

impl ConversationMessage {
	pub fn user(content: impl Into<String>) -> Self {
		Self {
			role: Role::User,
			content: content.into(),
			tool_call_id: None,
		}
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self {
			role: Role::Assistant,
			content: content.into(),
			tool_call_id: None,
		}
	}
}

/// `llm/request`: unchanged from the data model -- `params` carries
/// free-form per-request overrides (`model`, `max_tokens`, `temperature`,
/// `top_p`) that fall back to configured defaults when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
	pub id: String,
	#[serde(default)]
	pub message_id: Option<String>,
	pub text: String,
	#[serde(default)]
	pub stream: bool,
	#[serde(default)]
	pub use_rag: Option<bool>,
	#[serde(default)]
	pub rag_k: Option<usize>,
	#[serde(default)]
	pub system: Option<String>,
	#[serde(default)]
	pub params: HashMap<String, serde_json::Value>,
	#[serde(default)]
	pub conversation_history: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
	pub id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reply: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub provider: String,
	pub model: String,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub tokens: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStreamDelta {
	pub id: String,
	pub seq: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delta: Option<String>,
	pub done: bool,
	pub provider: String,
	pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSay {
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionCall {
	pub name: String,
	/// JSON-encoded arguments, same as the OpenAI tool-call wire shape.
	pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
	pub id: String,
	pub function: ToolFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
	#[serde(rename = "type")]
	pub kind: String,
	pub function: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRegistry {
	#[serde(default)]
	pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
	pub call_id: String,
	pub name: String,
	pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallResult {
	pub call_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
	#[default]
	Hybrid,
	Recent,
	Similarity,
}

/// `memory/query`: matches the memory service's richer contract (spec.md
/// §4.4) rather than a bare text+top_k pair, so query-time knobs
/// (`rag_strategy`, `rag_max_tokens`, context expansion) round-trip intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
	pub id: String,
	pub text: String,
	pub top_k: usize,
	#[serde(default)]
	pub retrieval_strategy: RetrievalStrategy,
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
	#[serde(default)]
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

/// A single hit. `document` is a free-form object -- ingested transcripts
/// and TTS utterances carry different fields, so this pipeline only ever
/// reads `text` out of it (see `document_text`) rather than a fixed shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResultEntry {
	pub document: serde_json::Value,
	#[serde(default)]
	pub score: f32,
	#[serde(default)]
	pub timestamp: Option<String>,
	pub context_type: ContextType,
	#[serde(default)]
	pub token_count: u32,
}

/// Extracts display text from a free-form memory document, mirroring the
/// original's `_extract_text_from_doc` field-preference order.
pub fn document_text(document: &serde_json::Value) -> Option<String> {
	let map = document.as_object()?;
	let mut parts = Vec::new();
	if let Some(v) = map.get("user_input").and_then(|v| v.as_str()) {
		parts.push(v.to_string());
	}
	if let Some(v) = map.get("bot_response").and_then(|v| v.as_str()) {
		parts.push(v.to_string());
	}
	if let Some(v) = map.get("text").and_then(|v| v.as_str()) {
		parts.push(v.to_string());
	}
	if !parts.is_empty() {
		return Some(parts.join(" "));
	}
	let fallback: Vec<String> = map.values().filter_map(|v| v.as_str().map(str::to_string)).collect();
	(!fallback.is_empty()).then(|| fallback.join(" "))
}
