//! Environment-sourced configuration, mirroring the lenient int/float/bool
//! parsing every TARS worker uses (booleans accept `1|true|yes|on`,
//! case-insensitively).

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagStrategy {
	Hybrid,
	Recent,
	Similarity,
}

impl RagStrategy {
	fn parse(value: &str) -> Self {
		match value.to_lowercase().as_str() {
			"recent" => Self::Recent,
			"similarity" => Self::Similarity,
			_ => Self::Hybrid,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub mqtt_url: String,
	pub client_id: String,

	pub llm_model: String,
	pub llm_max_tokens: u32,
	pub llm_temperature: f32,
	pub llm_top_p: f32,
	pub llm_ctx_window: u32,

	pub rag_enabled: bool,
	pub rag_top_k: usize,
	pub rag_prompt_template: String,
	pub rag_max_tokens: u32,
	pub rag_include_context: bool,
	pub rag_context_window: usize,
	pub rag_strategy: RagStrategy,
	pub rag_dynamic_prompts: bool,

	pub tool_calling_enabled: bool,

	pub llm_tts_stream: bool,
	pub stream_min_chars: usize,
	pub stream_max_chars: usize,
	pub stream_boundary_chars: String,

	pub health_topic: String,
	pub health_interval_sec: f64,

	pub topic_llm_request: String,
	pub topic_llm_response: String,
	pub topic_llm_stream: String,
	pub topic_tts_say: String,
	pub topic_memory_query: String,
	pub topic_memory_results: String,
	pub topic_character_current: String,
	pub topic_character_get: String,
	pub topic_character_result: String,
	pub topic_tools_registry: String,
	pub topic_tool_call_request: String,
	pub topic_tool_call_result: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			mqtt_url: String::from("mqtt://127.0.0.1:1883"),
			client_id: String::from("llm-worker"),
			llm_model: String::from("gpt-4o-mini"),
			llm_max_tokens: 256,
			llm_temperature: 0.7,
			llm_top_p: 1.0,
			llm_ctx_window: 8192,
			rag_enabled: false,
			rag_top_k: 5,
			rag_prompt_template: String::from(
				"You are TARS. Use the following context to answer the user.\nContext:\n{context}\n\nUser: {user}\nAssistant:",
			),
			rag_max_tokens: 2000,
			rag_include_context: true,
			rag_context_window: 1,
			rag_strategy: RagStrategy::Hybrid,
			rag_dynamic_prompts: true,
			tool_calling_enabled: false,
			llm_tts_stream: false,
			stream_min_chars: 60,
			stream_max_chars: 240,
			stream_boundary_chars: String::from(".!?;:"),
			health_topic: String::from("system/health/llm"),
			health_interval_sec: 15.0,
			topic_llm_request: String::from("llm/request"),
			topic_llm_response: String::from("llm/response"),
			topic_llm_stream: String::from("llm/stream"),
			topic_tts_say: String::from("tts/say"),
			topic_memory_query: String::from("memory/query"),
			topic_memory_results: String::from("memory/results"),
			topic_character_current: String::from("system/character/current"),
			topic_character_get: String::from("character/get"),
			topic_character_result: String::from("character/result"),
			topic_tools_registry: String::from("llm/tools/registry"),
			topic_tool_call_request: String::from("llm/tool.call.request"),
			topic_tool_call_result: String::from("llm/tool.call.result"),
		}
	}
}

impl Config {
	pub fn from_env() -> Self {
		let default = Self::default();
		Self {
			mqtt_url: env_str("MQTT_URL", &default.mqtt_url),
			client_id: env_str("LLM_CLIENT_ID", &default.client_id),
			llm_model: env_str("LLM_MODEL", &default.llm_model),
			llm_max_tokens: env_int("LLM_MAX_TOKENS", default.llm_max_tokens),
			llm_temperature: env_float("LLM_TEMPERATURE", default.llm_temperature as f64) as f32,
			llm_top_p: env_float("LLM_TOP_P", default.llm_top_p as f64) as f32,
			llm_ctx_window: env_int("LLM_CTX_WINDOW", default.llm_ctx_window),
			rag_enabled: env_bool("RAG_ENABLED", default.rag_enabled),
			rag_top_k: env_int("RAG_TOP_K", default.rag_top_k as u32) as usize,
			rag_prompt_template: env_str("RAG_PROMPT_TEMPLATE", &default.rag_prompt_template),
			rag_max_tokens: env_int("RAG_MAX_TOKENS", default.rag_max_tokens),
			rag_include_context: env_bool("RAG_INCLUDE_CONTEXT", default.rag_include_context),
			rag_context_window: env_int("RAG_CONTEXT_WINDOW", default.rag_context_window as u32) as usize,
			rag_strategy: RagStrategy::parse(&env_str("RAG_STRATEGY", "hybrid")),
			rag_dynamic_prompts: env_bool("RAG_DYNAMIC_PROMPTS", default.rag_dynamic_prompts),
			tool_calling_enabled: env_bool("TOOL_CALLING_ENABLED", default.tool_calling_enabled),
			llm_tts_stream: env_bool("LLM_TTS_STREAM", default.llm_tts_stream),
			stream_min_chars: env_int("STREAM_MIN_CHARS", default.stream_min_chars as u32) as usize,
			stream_max_chars: env_int("STREAM_MAX_CHARS", default.stream_max_chars as u32) as usize,
			stream_boundary_chars: env_str("STREAM_BOUNDARY_CHARS", &default.stream_boundary_chars),
			health_topic: env_str("TOPIC_HEALTH", &default.health_topic),
			health_interval_sec: env_float("LLM_HEALTH_INTERVAL_SEC", default.health_interval_sec).max(1.0),
			topic_llm_request: env_str("TOPIC_LLM_REQUEST", &default.topic_llm_request),
			topic_llm_response: env_str("TOPIC_LLM_RESPONSE", &default.topic_llm_response),
			topic_llm_stream: env_str("TOPIC_LLM_STREAM", &default.topic_llm_stream),
			topic_tts_say: env_str("TOPIC_TTS_SAY", &default.topic_tts_say),
			topic_memory_query: env_str("TOPIC_MEMORY_QUERY", &default.topic_memory_query),
			topic_memory_results: env_str("TOPIC_MEMORY_RESULTS", &default.topic_memory_results),
			topic_character_current: env_str("TOPIC_CHARACTER_CURRENT", &default.topic_character_current),
			topic_character_get: env_str("TOPIC_CHARACTER_GET", &default.topic_character_get),
			topic_character_result: env_str("TOPIC_CHARACTER_RESULT", &default.topic_character_result),
			topic_tools_registry: env_str("TOPIC_TOOLS_REGISTRY", &default.topic_tools_registry),
			topic_tool_call_request: env_str("TOPIC_TOOL_CALL_REQUEST", &default.topic_tool_call_request),
			topic_tool_call_result: env_str("TOPIC_TOOL_CALL_RESULT", &default.topic_tool_call_result),
		}
	}
}

fn env_str(key: &str, default: &str) -> String {
	env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_int(key: &str, default: u32) -> u32 {
	env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_float(key: &str, default: f64) -> f64 {
	env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
	match env::var(key) {
		Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
		Err(_) => default,
	}
}
