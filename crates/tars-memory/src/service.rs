//! Orchestrates `memory/query`/`character/*`/ingestion handling. Grounded on
//! `memory_worker/service.py`'s `MemoryService`: one subscription-dispatch
//! loop, since every handler here touches the same corpus and character
//! state and the original itself processes these messages one at a time
//! off a single `asyncio` event loop.

use crate::character::CharacterStore;
use crate::config::Config;
use crate::corpus::{self, Corpus};
use crate::embedder::{embed_async, Embedder};
use crate::models::{
	CharacterGetRequest, CharacterSection, CharacterSnapshot, CharacterTraitUpdate, ContextType, HealthPayload, MemoryQuery, MemoryResultEntry,
	MemoryResults, RetrievalStrategy, SttFinal, TtsSay,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tars_mqtt::{Client, FilterBuf, QoS};
use tars_proto::{BareOrEnveloped, Envelope};

const SOURCE: &str = "memory-worker";

pub struct MemoryService {
	config: Config,
	client: Client,
	embedder: Arc<dyn Embedder>,
	corpus: Mutex<Corpus>,
	database_path: PathBuf,
	character: CharacterStore,
}

impl MemoryService {
	pub fn new(config: Config, client: Client, embedder: Arc<dyn Embedder>) -> Self {
		let database_path = PathBuf::from(&config.memory_dir).join(&config.memory_file);
		let mut corpus = Corpus::load(&database_path).ok().flatten().unwrap_or_default();
		reconcile_embedding_dim(&mut corpus, embedder.as_ref());

		let character = CharacterStore::load(&config);

		Self {
			config,
			client,
			embedder,
			corpus: Mutex::new(corpus),
			database_path,
			character,
		}
	}

	pub async fn run(self) -> tars_mqtt::Result<()> {
		self.publish_health(HealthPayload::ready(), true).await;
		self.publish_character_current().await;

		let mut query_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.topic_query.clone())?, QoS::AtLeastOnce)])
			.await?;
		let mut char_get_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.topic_char_get.clone())?, QoS::AtLeastOnce)])
			.await?;
		let mut char_update_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.topic_char_update.clone())?, QoS::AtLeastOnce)])
			.await?;
		let mut stt_final_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.topic_stt_final.clone())?, QoS::AtLeastOnce)])
			.await?;
		let mut tts_say_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.topic_tts_say.clone())?, QoS::AtLeastOnce)])
			.await?;

		let mut health_ticker = tokio::time::interval(Duration::from_secs_f64(self.config.health_interval_sec));
		health_ticker.tick().await;

		loop {
			tokio::select! {
				msg = query_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_query(&msg.payload).await;
				}
				msg = char_get_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_char_get(&msg.payload).await;
				}
				msg = char_update_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_char_update(&msg.payload).await;
				}
				msg = stt_final_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_ingest_stt(&msg.payload).await;
				}
				msg = tts_say_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					self.handle_ingest_tts(&msg.payload).await;
				}
				_ = health_ticker.tick() => {
					self.publish_health(HealthPayload::ready(), false).await;
				}
			}
		}
	}

	// --- memory/query ---

	async fn handle_query(&self, payload: &[u8]) {
		let decoded = match BareOrEnveloped::<MemoryQuery>::decode(payload) {
			Ok(decoded) => decoded,
			Err(error) => {
				tracing::warn!(%error, "invalid memory/query payload");
				return;
			}
		};
		// R.correlate must echo Q's own envelope id, not Q's own correlate field.
		let is_bare = matches!(decoded, BareOrEnveloped::Bare { .. });
		let envelope_id = decoded.id().to_string();
		let query = decoded.into_data();

		if query.text.trim().is_empty() {
			tracing::info!("ignored empty memory/query message");
			return;
		}

		let correlation_id = if is_bare && !query.id.is_empty() { query.id.clone() } else { envelope_id };
		let results = self.run_query(&query).await;

		tracing::info!(
			targets = results.k,
			total = results.results.len(),
			tokens = results.total_tokens,
			truncated = results.truncated,
			"memory_query_answered"
		);

		self.publish_results(results, &correlation_id).await;
	}

	async fn run_query(&self, query: &MemoryQuery) -> MemoryResults {
		let query_embedding = embed_async(self.embedder.clone(), vec![query.text.clone()]).await;
		let query_embedding = query_embedding.into_iter().next().unwrap_or_default();

		let top_k = query.top_k.unwrap_or(self.config.top_k).max(1);
		let strategy = query.retrieval_strategy.unwrap_or_else(|| self.config.rag_strategy.as_retrieval_strategy());

		let (mut hits, strategy_used) = {
			let corpus = self.corpus.lock().unwrap();
			match strategy {
				RetrievalStrategy::Recent => (recent_hits(&corpus, top_k, query.max_tokens), RetrievalStrategy::Recent),
				RetrievalStrategy::Similarity => {
					let ranked = corpus.query_similarity(&query_embedding, top_k);
					(to_target_hits(&corpus, &ranked), RetrievalStrategy::Similarity)
				}
				RetrievalStrategy::Hybrid => {
					let hits = if let Some(max_tokens) = query.max_tokens {
						token_bounded_hybrid_hits(&corpus, &query_embedding, &query.text, top_k, max_tokens)
					} else {
						let ranked = corpus.query_hybrid(&query_embedding, &query.text, top_k);
						to_target_hits(&corpus, &ranked)
					};
					(hits, RetrievalStrategy::Hybrid)
				}
			}
		};

		let mut truncated = false;
		if query.include_context && query.context_window > 0 && !hits.is_empty() {
			let corpus = self.corpus.lock().unwrap();
			let target_indices: Vec<usize> = hits.iter().filter_map(|(idx, _)| *idx).collect();
			let mut context_hits = context_window_hits(&corpus, &target_indices, query.context_window);

			if let Some(max_tokens) = query.max_tokens {
				let used_tokens: u32 = hits.iter().map(|(_, entry)| entry.token_count).sum();
				let remaining = max_tokens.saturating_sub(used_tokens);
				let mut kept = Vec::new();
				let mut spent = 0u32;
				for (idx, entry) in context_hits.drain(..) {
					if spent + entry.token_count <= remaining {
						spent += entry.token_count;
						kept.push((idx, entry));
					} else {
						truncated = true;
						break;
					}
				}
				context_hits = kept;
			}

			let mut merged = context_hits;
			merged.append(&mut hits);
			hits = merged;
		}

		let total_tokens: u32 = hits.iter().map(|(_, entry)| entry.token_count).sum();
		if let Some(max_tokens) = query.max_tokens {
			if total_tokens >= max_tokens {
				truncated = true;
			}
		}

		let k = hits.iter().filter(|(_, entry)| entry.context_type == ContextType::Target).count();
		MemoryResults {
			query: query.text.clone(),
			k,
			results: hits.into_iter().map(|(_, entry)| entry).collect(),
			total_tokens,
			strategy_used,
			truncated,
		}
	}

	async fn publish_results(&self, results: MemoryResults, correlation_id: &str) {
		let envelope = Envelope::new("memory.results", SOURCE, results).correlated(correlation_id.to_string());
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.topic_results.clone(), bytes, QoS::AtLeastOnce, false).await;
		}
	}

	// --- character/get, character/update ---

	async fn handle_char_get(&self, payload: &[u8]) {
		let decoded = match BareOrEnveloped::<CharacterGetRequest>::decode(payload) {
			Ok(decoded) => decoded,
			Err(_) => BareOrEnveloped::Bare {
				data: CharacterGetRequest::default(),
				id: tars_proto::new_id(),
			},
		};
		// `CharacterGetRequest` carries no id field of its own, so the
		// envelope's own id (synthesized for a bare request) is all there is.
		let correlation_id = decoded.id().to_string();
		let request = decoded.into_data();
		let snapshot = self.character.snapshot();

		match request.section {
			None => {
				let envelope = Envelope::new("character.result", SOURCE, (*snapshot).clone()).correlated(correlation_id);
				self.publish_char_result(envelope).await;
			}
			Some(section) => {
				let value = section_value(&snapshot, &section);
				let payload = CharacterSection { section, value };
				let envelope = Envelope::new("character.result", SOURCE, payload).correlated(correlation_id);
				self.publish_char_result(envelope).await;
			}
		}
	}

	async fn publish_char_result<T: serde::Serialize>(&self, envelope: Envelope<T>) {
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.topic_char_result.clone(), bytes, QoS::AtMostOnce, false).await;
		}
	}

	async fn handle_char_update(&self, payload: &[u8]) {
		let Ok(data) = BareOrEnveloped::<Value>::decode(payload).map(BareOrEnveloped::into_data) else {
			tracing::warn!("invalid character/update payload");
			return;
		};
		let Some(object) = data.as_object() else {
			tracing::warn!("character/update payload was not an object");
			return;
		};

		if object.get("action").and_then(Value::as_str) == Some("reset_traits") {
			self.character.reset();
			tracing::info!("character_traits_reset");
			self.publish_character_current().await;
			return;
		}

		if object.get("section").and_then(Value::as_str) == Some("traits") {
			if let Ok(update) = serde_json::from_value::<CharacterTraitUpdate>(data.clone()) {
				self.character.set_trait(&update.trait_name, update.value);
				tracing::info!(trait_name = %update.trait_name, "character_trait_updated");
				self.publish_character_current().await;
				return;
			}
		}

		tracing::debug!("unhandled character/update format");
	}

	async fn publish_character_current(&self) {
		let snapshot = self.character.snapshot();
		let correlation_id = snapshot.message_id.clone();
		let envelope = Envelope::new("character.current", SOURCE, (*snapshot).clone()).correlated(correlation_id);
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.topic_char_current.clone(), bytes, QoS::AtLeastOnce, true).await;
		}
	}

	// --- ingestion ---

	async fn handle_ingest_stt(&self, payload: &[u8]) {
		let Ok(decoded) = BareOrEnveloped::<SttFinal>::decode(payload) else {
			return;
		};
		let transcript = decoded.into_data();
		let Some(text) = transcript.text.filter(|t| !t.trim().is_empty()) else {
			return;
		};
		if !transcript.is_final {
			return;
		}

		let mut fields = serde_json::Map::new();
		fields.insert("text".to_string(), Value::String(text.clone()));
		fields.insert("is_final".to_string(), Value::Bool(true));
		self.ingest(fields, text).await;
	}

	async fn handle_ingest_tts(&self, payload: &[u8]) {
		let Ok(decoded) = BareOrEnveloped::<TtsSay>::decode(payload) else {
			return;
		};
		let say = decoded.into_data();
		if say.text.trim().is_empty() {
			return;
		}

		let mut fields = serde_json::Map::new();
		fields.insert("text".to_string(), Value::String(say.text.clone()));
		self.ingest(fields, say.text).await;
	}

	async fn ingest(&self, mut fields: serde_json::Map<String, Value>, text: String) {
		if let Ok(ts) = time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339) {
			fields.insert("timestamp".to_string(), Value::String(ts));
		}

		let embedding = corpus::embed_for_ingest(self.embedder.clone(), text).await;
		let count = {
			let mut corpus = self.corpus.lock().unwrap();
			corpus.push(fields, embedding);
			corpus.len()
		};

		let corpus_snapshot_len = count;
		let path = self.database_path.clone();
		let snapshot = self.corpus.lock().unwrap().clone();
		let saved = tokio::task::spawn_blocking(move || snapshot.save(&path)).await;

		match saved {
			Ok(Ok(())) => tracing::debug!(total = corpus_snapshot_len, "indexed document"),
			Ok(Err(error)) => tracing::debug!(%error, "failed to persist memory db after ingest"),
			Err(error) => tracing::debug!(%error, "persist task panicked"),
		}
	}

	async fn publish_health(&self, payload: HealthPayload, retain: bool) {
		let envelope = Envelope::new("memory.health", SOURCE, payload);
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.health_topic.clone(), bytes, QoS::AtLeastOnce, retain).await;
		}
	}
}

fn reconcile_embedding_dim(corpus: &mut Corpus, embedder: &dyn Embedder) {
	let Some(current_dim) = corpus.vector_dim() else {
		return;
	};
	let probe_dim = embedder.embed_one("dim_check").len();
	tracing::info!(current_dim, probe_dim, docs = corpus.len(), "memory vectors loaded");
	if current_dim == probe_dim {
		return;
	}
	tracing::info!(current_dim, probe_dim, docs = corpus.len(), "embedding dim changed, re-embedding corpus");
	corpus.reembed_all(embedder);
}

fn estimate_tokens(text: &str) -> u32 {
	let words = text.split_whitespace().count() as f32;
	(words * 1.3) as u32
}

fn make_entry(corpus: &Corpus, idx: usize, score: f32, context_type: ContextType) -> MemoryResultEntry {
	let doc = &corpus.documents()[idx];
	let text = corpus::doc_to_text(&doc.fields);
	let timestamp = doc.fields.get("timestamp").and_then(Value::as_str).map(str::to_string);
	MemoryResultEntry {
		document: Value::Object(doc.fields.clone()),
		score,
		timestamp,
		context_type,
		token_count: estimate_tokens(&text),
	}
}

fn to_target_hits(corpus: &Corpus, ranked: &[(usize, f32)]) -> Vec<(Option<usize>, MemoryResultEntry)> {
	ranked
		.iter()
		.map(|(idx, score)| (Some(*idx), make_entry(corpus, *idx, *score, ContextType::Target)))
		.collect()
}

fn recent_hits(corpus: &Corpus, top_k: usize, max_tokens: Option<u32>) -> Vec<(Option<usize>, MemoryResultEntry)> {
	if let Some(max_tokens) = max_tokens {
		let mut used = 0u32;
		let mut hits = Vec::new();
		for idx in corpus.recent_indices(top_k * 4) {
			let entry = make_entry(corpus, idx, 1.0, ContextType::Target);
			if used + entry.token_count > max_tokens && !hits.is_empty() {
				break;
			}
			used += entry.token_count;
			hits.push((Some(idx), entry));
		}
		hits.reverse();
		hits
	} else {
		corpus
			.recent_indices(top_k)
			.into_iter()
			.map(|idx| (Some(idx), make_entry(corpus, idx, 1.0, ContextType::Target)))
			.rev()
			.collect()
	}
}

/// Hybrid retrieval with a token budget: widen the candidate pool, then
/// accumulate by score until the budget would be exceeded.
fn token_bounded_hybrid_hits(corpus: &Corpus, query_embedding: &[f32], query_text: &str, top_k: usize, max_tokens: u32) -> Vec<(Option<usize>, MemoryResultEntry)> {
	let candidates = corpus.query_hybrid(query_embedding, query_text, top_k * 2);
	let mut used = 0u32;
	let mut hits = Vec::new();
	for (idx, score) in candidates {
		let entry = make_entry(corpus, idx, score, ContextType::Target);
		if used + entry.token_count > max_tokens && !hits.is_empty() {
			break;
		}
		used += entry.token_count;
		hits.push((Some(idx), entry));
		if hits.len() >= top_k {
			break;
		}
	}
	hits
}

fn context_window_hits(corpus: &Corpus, target_indices: &[usize], window: usize) -> Vec<(Option<usize>, MemoryResultEntry)> {
	let total = corpus.documents().len();
	let mut hits = Vec::new();
	for &idx in target_indices {
		for i in idx.saturating_sub(window)..idx {
			hits.push((Some(i), make_entry(corpus, i, 0.0, ContextType::Previous)));
		}
		for i in (idx + 1)..total.min(idx + window + 1) {
			hits.push((Some(i), make_entry(corpus, i, 0.0, ContextType::Next)));
		}
	}
	hits
}

fn section_value(snapshot: &CharacterSnapshot, section: &str) -> Value {
	let as_value = serde_json::to_value(snapshot).unwrap_or(Value::Null);
	match as_value.get(section) {
		Some(value) => value.clone(),
		None => {
			let available: Vec<Value> = as_value
				.as_object()
				.map(|obj| obj.keys().map(|k| Value::String(k.clone())).collect())
				.unwrap_or_default();
			serde_json::json!({ "error": format!("unknown section '{section}'"), "available": available })
		}
	}
}
