//! Orchestrates the `llm/request` → provider → `llm/stream`/`llm/response`
//! pipeline. Grounded on the newer tree's `LLMService`/`MessageRouter`
//! (`service.py`, `handlers/message_router.py`): one subscription-dispatch
//! loop for shared state (character, tool registry, pending correlations),
//! with each inbound request spawned onto its own task since requests share
//! no mutable state beyond the `Arc`-wrapped collaborators below.

use crate::character::CharacterStore;
use crate::config::Config;
use crate::models::{
	ConversationMessage, HealthPayload, LlmRequest, LlmResponse, LlmStreamDelta, MemoryResults, ToolCallResult, ToolRegistry, TtsSay,
};
use crate::prompt;
use crate::provider::{ChatCompletionProvider, ProviderRequest};
use crate::rag::RagHandler;
use crate::tools::{self, ToolExecutor};
use futures_core::Stream as _;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tars_mqtt::{Client, FilterBuf, QoS};
use tars_proto::{BareOrEnveloped, Envelope};

const SOURCE: &str = "llm-worker";

struct Shared {
	config: Config,
	character: CharacterStore,
	tools: ToolExecutor,
	rag: RagHandler,
	provider: Box<dyn ChatCompletionProvider>,
}

pub struct LlmService {
	client: Client,
	shared: Arc<Shared>,
}

impl LlmService {
	pub fn new(config: Config, client: Client, provider: Box<dyn ChatCompletionProvider>) -> Self {
		let shared = Arc::new(Shared {
			config,
			character: CharacterStore::new(),
			tools: ToolExecutor::new(),
			rag: RagHandler::new(),
			provider,
		});
		Self { client, shared }
	}

	pub async fn run(self) -> tars_mqtt::Result<()> {
		let config = &self.shared.config;
		self.publish_health().await;

		let mut request_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(config.topic_llm_request.clone())?, QoS::AtLeastOnce)])
			.await?;
		let mut character_current_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(config.topic_character_current.clone())?, QoS::AtLeastOnce)])
			.await?;
		let mut character_result_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(config.topic_character_result.clone())?, QoS::AtLeastOnce)])
			.await?;

		let mut memory_results_sub = if config.rag_enabled {
			Some(
				self.client
					.subscribe(vec![(FilterBuf::new(config.topic_memory_results.clone())?, QoS::AtLeastOnce)])
					.await?,
			)
		} else {
			None
		};

		let (mut tools_registry_sub, mut tool_result_sub) = if config.tool_calling_enabled {
			(
				Some(
					self.client
						.subscribe(vec![(FilterBuf::new(config.topic_tools_registry.clone())?, QoS::AtLeastOnce)])
						.await?,
				),
				Some(
					self.client
						.subscribe(vec![(FilterBuf::new(config.topic_tool_call_result.clone())?, QoS::AtLeastOnce)])
						.await?,
				),
			)
		} else {
			(None, None)
		};

		let mut health_ticker = tokio::time::interval(Duration::from_secs_f64(config.health_interval_sec));
		health_ticker.tick().await;

		loop {
			tokio::select! {
				msg = request_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.dispatch_request(msg.payload);
				}
				msg = character_current_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_character_payload(&msg.payload);
				}
				msg = character_result_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_character_payload(&msg.payload);
				}
				msg = recv_opt(&mut memory_results_sub) => {
					let Some(msg) = msg else { continue; };
					self.handle_memory_results(&msg.payload);
				}
				msg = recv_opt(&mut tools_registry_sub) => {
					let Some(msg) = msg else { continue; };
					self.handle_tools_registry(&msg.payload);
				}
				msg = recv_opt(&mut tool_result_sub) => {
					let Some(msg) = msg else { continue; };
					self.handle_tool_result(&msg.payload);
				}
				_ = health_ticker.tick() => {
					self.publish_health().await;
				}
			}
		}
	}

	fn dispatch_request(&self, payload: bytes::Bytes) {
		let decoded = match BareOrEnveloped::<LlmRequest>::decode(&payload) {
			Ok(decoded) => decoded,
			Err(error) => {
				tracing::warn!(%error, "invalid llm/request payload");
				return;
			}
		};
		// R.correlate must echo Q's own envelope id, not Q's own correlate field.
		let is_bare = matches!(decoded, BareOrEnveloped::Bare { .. });
		let envelope_id = decoded.id().to_string();
		let request = decoded.into_data();
		if request.text.trim().is_empty() {
			tracing::debug!(id = %request.id, "dropping llm/request with empty text");
			return;
		}

		let correlation_id = if is_bare && !request.id.is_empty() { request.id.clone() } else { envelope_id };
		let shared = self.shared.clone();
		let client = self.client.clone();
		tokio::spawn(async move {
			handle_request(shared, client, request, correlation_id).await;
		});
	}

	fn handle_character_payload(&self, payload: &[u8]) {
		let Ok(decoded) = BareOrEnveloped::<serde_json::Value>::decode(payload) else {
			tracing::warn!("invalid character payload");
			return;
		};
		let value = decoded.into_data();

		match value {
			serde_json::Value::Object(map) if map.contains_key("section") && map.contains_key("value") => {
				let section = map.get("section").and_then(|v| v.as_str()).unwrap_or_default().to_string();
				let update_value = map.get("value").cloned().unwrap_or(serde_json::Value::Null);
				self.shared.character.update_section(&section, update_value);
			}
			serde_json::Value::Object(map) if map.contains_key("name") => {
				if let Ok(snapshot) = serde_json::from_value(serde_json::Value::Object(map)) {
					self.shared.character.replace(snapshot);
				}
			}
			serde_json::Value::Object(map) => self.shared.character.merge(map),
			_ => tracing::warn!("character payload was neither a snapshot nor a section update"),
		}
	}

	fn handle_memory_results(&self, payload: &[u8]) {
		let Ok(decoded) = BareOrEnveloped::<MemoryResults>::decode(payload) else {
			tracing::warn!("invalid memory/results payload");
			return;
		};
		let Some(correlation_id) = decoded.correlate().map(str::to_string) else {
			tracing::warn!("memory/results payload missing correlation id");
			return;
		};
		self.shared.rag.handle_results(&correlation_id, decoded.into_data());
	}

	fn handle_tools_registry(&self, payload: &[u8]) {
		let Ok(decoded) = BareOrEnveloped::<ToolRegistry>::decode(payload) else {
			tracing::warn!("invalid llm/tools/registry payload");
			return;
		};
		self.shared.tools.load_registry(decoded.into_data().tools);
	}

	fn handle_tool_result(&self, payload: &[u8]) {
		let Ok(decoded) = BareOrEnveloped::<ToolCallResult>::decode(payload) else {
			tracing::warn!("invalid llm/tool.call.result payload");
			return;
		};
		self.shared.tools.resolve(decoded.into_data());
	}

	async fn publish_health(&self) {
		let envelope = Envelope::new("llm.health", SOURCE, HealthPayload::ok_now());
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self
				.client
				.publish(self.shared.config.health_topic.clone(), bytes, QoS::AtLeastOnce, true)
				.await;
		}
	}
}

/// Awaits `sub.recv()` when `sub` is `Some`, otherwise never resolves --
/// lets `tokio::select!` uniformly skip branches for topics this instance
/// never subscribed to (RAG/tool-calling disabled).
async fn recv_opt(sub: &mut Option<tars_mqtt::Subscription>) -> Option<tars_mqtt::Message> {
	match sub {
		Some(sub) => sub.recv().await,
		None => std::future::pending().await,
	}
}

async fn handle_request(shared: Arc<Shared>, client: Client, request: LlmRequest, correlation_id: String) {
	let config = &shared.config;

	let model = param_str(&request.params, "model").unwrap_or_else(|| config.llm_model.clone());
	let max_tokens = param_u32(&request.params, "max_tokens").unwrap_or(config.llm_max_tokens);
	let temperature = param_f32(&request.params, "temperature").unwrap_or(config.llm_temperature);
	let top_p = param_f32(&request.params, "top_p").unwrap_or(config.llm_top_p);

	let system = shared.character.build_system_prompt(request.system.as_deref());

	let use_rag = request.use_rag.unwrap_or(config.rag_enabled);
	let rag_context = if use_rag {
		let top_k = request.rag_k.unwrap_or(config.rag_top_k);
		shared
			.rag
			.query(&client, config, &config.topic_memory_query, &request.text, top_k, &correlation_id)
			.await
	} else {
		String::new()
	};

	let (messages, _allocation) = prompt::assemble(config, system.as_deref(), &request.conversation_history, &request.text, &rag_context);

	let provider_request = ProviderRequest {
		messages,
		system: system.clone(),
		model: model.clone(),
		max_tokens,
		temperature,
		top_p,
	};

	if request.stream && shared.provider.supports_streaming() {
		run_streaming(&shared, &client, &provider_request, &correlation_id).await;
	} else {
		run_non_streaming(&shared, &client, provider_request, &correlation_id).await;
	}
}

async fn run_streaming(shared: &Arc<Shared>, client: &Client, provider_request: &ProviderRequest, correlation_id: &str) {
	let mut deltas = match shared.provider.stream(provider_request).await {
		Ok(stream) => stream,
		Err(error) => {
			tracing::warn!(%error, "provider stream failed, falling back to non-streaming");
			run_non_streaming(shared, client, provider_request.clone(), correlation_id).await;
			return;
		}
	};

	let config = &shared.config;
	let mut seq: u64 = 0;
	let mut full_text = String::new();
	let mut chunker = shared.config.llm_tts_stream.then(|| SentenceChunker::new_from_config(config));

	while let Some(delta) = std::future::poll_fn(|cx| Pin::new(&mut deltas).poll_next(cx)).await {
		full_text.push_str(&delta.text);
		publish_stream_delta(client, config, correlation_id, seq, Some(delta.text.clone()), false, shared.provider.as_ref(), provider_request).await;
		seq += 1;

		if let Some(chunker) = chunker.as_mut() {
			for chunk in chunker.push(&delta.text) {
				publish_tts_say(client, config, chunk).await;
			}
		}
	}

	if let Some(chunker) = chunker {
		if let Some(tail) = chunker.finish() {
			publish_tts_say(client, config, tail).await;
		}
	}

	publish_stream_delta(client, config, correlation_id, seq, None, true, shared.provider.as_ref(), provider_request).await;

	let response = LlmResponse {
		id: correlation_id.to_string(),
		reply: Some(full_text),
		error: None,
		provider: shared.provider.name().to_string(),
		model: provider_request.model.clone(),
		tokens: Default::default(),
	};
	publish_response(client, config, response).await;
}

async fn run_non_streaming(shared: &Arc<Shared>, client: &Client, provider_request: ProviderRequest, correlation_id: &str) {
	let config = &shared.config;

	let response = match shared.provider.complete(&provider_request).await {
		Ok(response) => response,
		Err(error) => {
			let response = LlmResponse {
				id: correlation_id.to_string(),
				reply: None,
				error: Some(error.to_string()),
				provider: shared.provider.name().to_string(),
				model: provider_request.model.clone(),
				tokens: Default::default(),
			};
			publish_response(client, config, response).await;
			return;
		}
	};

	if config.tool_calling_enabled && !response.tool_calls.is_empty() {
		let results = shared.tools.execute_calls(client, &config.topic_tool_call_request, &response.tool_calls).await;

		let mut follow_up_messages = provider_request.messages.clone();
		follow_up_messages.push(ConversationMessage::assistant(response.text.clone()));
		follow_up_messages.extend(tools::format_tool_messages(&results));

		let follow_up_request = ProviderRequest {
			messages: follow_up_messages,
			..provider_request.clone()
		};

		match shared.provider.complete(&follow_up_request).await {
			Ok(follow_up) => {
				let llm_response = LlmResponse {
					id: correlation_id.to_string(),
					reply: Some(follow_up.text),
					error: None,
					provider: shared.provider.name().to_string(),
					model: provider_request.model.clone(),
					tokens: follow_up.usage,
				};
				publish_response(client, config, llm_response).await;
			}
			Err(error) => {
				let llm_response = LlmResponse {
					id: correlation_id.to_string(),
					reply: None,
					error: Some(error.to_string()),
					provider: shared.provider.name().to_string(),
					model: provider_request.model.clone(),
					tokens: Default::default(),
				};
				publish_response(client, config, llm_response).await;
			}
		}
		return;
	}

	let llm_response = LlmResponse {
		id: correlation_id.to_string(),
		reply: Some(response.text),
		error: None,
		provider: shared.provider.name().to_string(),
		model: provider_request.model.clone(),
		tokens: response.usage,
	};
	publish_response(client, config, llm_response).await;
}

async fn publish_stream_delta(
	client: &Client,
	config: &Config,
	correlation_id: &str,
	seq: u64,
	delta: Option<String>,
	done: bool,
	provider: &dyn ChatCompletionProvider,
	provider_request: &ProviderRequest,
) {
	let payload = LlmStreamDelta {
		id: correlation_id.to_string(),
		seq,
		delta,
		done,
		provider: provider.name().to_string(),
		model: provider_request.model.clone(),
	};
	let envelope = Envelope::new("llm.stream", SOURCE, payload).correlated(correlation_id.to_string());
	if let Ok(bytes) = envelope.to_json_bytes() {
		let _ = client.publish(config.topic_llm_stream.clone(), bytes, QoS::AtLeastOnce, false).await;
	}
}

async fn publish_response(client: &Client, config: &Config, response: LlmResponse) {
	let correlation_id = response.id.clone();
	let envelope = Envelope::new("llm.response", SOURCE, response).correlated(correlation_id);
	if let Ok(bytes) = envelope.to_json_bytes() {
		let _ = client.publish(config.topic_llm_response.clone(), bytes, QoS::AtLeastOnce, false).await;
	}
}

async fn publish_tts_say(client: &Client, config: &Config, text: String) {
	if text.trim().is_empty() {
		return;
	}
	let envelope = Envelope::new("tts.say", SOURCE, TtsSay { text });
	if let Ok(bytes) = envelope.to_json_bytes() {
		let _ = client.publish(config.topic_tts_say.clone(), bytes, QoS::AtLeastOnce, false).await;
	}
}

fn param_str(params: &std::collections::HashMap<String, serde_json::Value>, key: &str) -> Option<String> {
	params.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn param_u32(params: &std::collections::HashMap<String, serde_json::Value>, key: &str) -> Option<u32> {
	params.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
}

fn param_f32(params: &std::collections::HashMap<String, serde_json::Value>, key: &str) -> Option<f32> {
	params.get(key).and_then(|v| v.as_f64()).map(|v| v as f32)
}

/// Buffers streamed text and yields complete sentences (or, failing that,
/// `stream_max_chars`-sized slices) suitable for `tts/say`. Flushing only
/// once the buffer reaches `stream_min_chars` avoids forwarding tiny,
/// choppy fragments on every delta.
struct SentenceChunker {
	buffer: String,
	min_chars: usize,
	max_chars: usize,
	boundary_chars: Vec<char>,
}

impl SentenceChunker {
	fn new(min_chars: usize, max_chars: usize, boundary_chars: &str) -> Self {
		Self {
			buffer: String::new(),
			min_chars,
			max_chars,
			boundary_chars: boundary_chars.chars().collect(),
		}
	}

	fn new_from_config(config: &Config) -> Self {
		Self::new(config.stream_min_chars, config.stream_max_chars, &config.stream_boundary_chars)
	}

	fn push(&mut self, delta: &str) -> Vec<String> {
		self.buffer.push_str(delta);
		let mut chunks = Vec::new();

		loop {
			if self.buffer.len() < self.min_chars && self.buffer.len() <= self.max_chars {
				break;
			}

			let boundary = self
				.buffer
				.char_indices()
				.skip_while(|(idx, _)| *idx < self.min_chars.min(self.buffer.len()))
				.find(|(_, c)| self.boundary_chars.contains(c))
				.map(|(idx, c)| idx + c.len_utf8());

			let cut = match boundary {
				Some(idx) if idx <= self.max_chars => idx,
				_ if self.buffer.len() > self.max_chars => self.max_chars,
				_ => break,
			};

			let remainder = self.buffer.split_off(cut);
			chunks.push(std::mem::replace(&mut self.buffer, remainder));
		}

		chunks
	}

	fn finish(self) -> Option<String> {
		(!self.buffer.trim().is_empty()).then_some(self.buffer)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chunker_flushes_on_sentence_boundary_past_min_chars() {
		let mut chunker = SentenceChunker::new(5, 100, ".!?");
		let chunks = chunker.push("Hi. This is a longer sentence that ends here.");
		assert_eq!(chunks, vec!["Hi. This is a longer sentence that ends here."]);
	}

	#[test]
	fn chunker_does_not_flush_short_fragments_without_boundary() {
		let mut chunker = SentenceChunker::new(20, 100, ".!?");
		let chunks = chunker.push("short");
		assert!(chunks.is_empty());
	}

	#[test]
	fn chunker_force_flushes_past_max_chars() {
		let mut chunker = SentenceChunker::new(5, 10, ".!?");
		let chunks = chunker.push("no punctuation here at all");
		assert!(!chunks.is_empty());
		assert!(chunks[0].len() <= 10);
	}

	#[test]
	fn chunker_finish_returns_remaining_tail() {
		let mut chunker = SentenceChunker::new(100, 200, ".!?");
		chunker.push("leftover text");
		assert_eq!(chunker.finish(), Some("leftover text".to_string()));
	}
}
