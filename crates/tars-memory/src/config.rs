//! Environment-sourced configuration, matching the lenient int/float/bool
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

	pub fn as_retrieval_strategy(self) -> crate::models::RetrievalStrategy {
		match self {
			Self::Recent => crate::models::RetrievalStrategy::Recent,
			Self::Similarity => crate::models::RetrievalStrategy::Similarity,
			Self::Hybrid => crate::models::RetrievalStrategy::Hybrid,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub mqtt_url: String,
	pub client_id: String,

	pub memory_dir: String,
	pub memory_file: String,

	pub rag_strategy: RagStrategy,
	pub top_k: usize,
	pub embed_dim: usize,

	pub character_name: String,
	pub character_dir: String,

	pub health_topic: String,
	pub health_interval_sec: f64,

	pub topic_stt_final: String,
	pub topic_tts_say: String,
	pub topic_query: String,
	pub topic_results: String,
	pub topic_char_get: String,
	pub topic_char_result: String,
	pub topic_char_current: String,
	pub topic_char_update: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			mqtt_url: String::from("mqtt://127.0.0.1:1883"),
			client_id: String::from("memory-worker"),
			memory_dir: String::from("/data"),
			memory_file: String::from("memory.json.gz"),
			rag_strategy: RagStrategy::Hybrid,
			top_k: 5,
			embed_dim: 256,
			character_name: String::from("TARS"),
			character_dir: String::from("/config/characters"),
			health_topic: String::from("system/health/memory"),
			health_interval_sec: 15.0,
			topic_stt_final: String::from("stt/final"),
			topic_tts_say: String::from("tts/say"),
			topic_query: String::from("memory/query"),
			topic_results: String::from("memory/results"),
			topic_char_get: String::from("character/get"),
			topic_char_result: String::from("character/result"),
			topic_char_current: String::from("system/character/current"),
			topic_char_update: String::from("character/update"),
		}
	}
}

impl Config {
	pub fn from_env() -> Self {
		let default = Self::default();
		Self {
			mqtt_url: env_str("MQTT_URL", &default.mqtt_url),
			client_id: env_str("MEMORY_CLIENT_ID", &default.client_id),
			memory_dir: env_str("MEMORY_DIR", &default.memory_dir),
			memory_file: env_str("MEMORY_FILE", &default.memory_file),
			rag_strategy: RagStrategy::parse(&env_str("RAG_STRATEGY", "hybrid")),
			top_k: env_int("MEMORY_TOP_K", default.top_k as u32) as usize,
			embed_dim: env_int("MEMORY_EMBED_DIM", default.embed_dim as u32) as usize,
			character_name: env_str("CHARACTER_NAME", &default.character_name),
			character_dir: env_str("CHARACTER_DIR", &default.character_dir),
			health_topic: env_str("TOPIC_MEMORY_HEALTH", &default.health_topic),
			health_interval_sec: env_float("MEMORY_HEALTH_INTERVAL_SEC", default.health_interval_sec).max(1.0),
			topic_stt_final: env_str("TOPIC_STT_FINAL", &default.topic_stt_final),
			topic_tts_say: env_str("TOPIC_TTS_SAY", &default.topic_tts_say),
			topic_query: env_str("TOPIC_MEMORY_QUERY", &default.topic_query),
			topic_results: env_str("TOPIC_MEMORY_RESULTS", &default.topic_results),
			topic_char_get: env_str("TOPIC_CHARACTER_GET", &default.topic_char_get),
			topic_char_result: env_str("TOPIC_CHARACTER_RESULT", &default.topic_char_result),
			topic_char_current: env_str("TOPIC_CHARACTER_CURRENT", &default.topic_char_current),
			topic_char_update: env_str("TOPIC_CHARACTER_UPDATE", &default.topic_char_update),
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
