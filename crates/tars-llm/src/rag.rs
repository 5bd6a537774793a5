//! Non-blocking RAG queries against the memory service, correlated by
//! envelope id. Grounded on `llm_worker/handlers/rag.py`'s future-per-query
//! pattern, reimplemented over `tars_mqtt::correlation::CorrelationRegistry`.

use crate::config::Config;
use crate::models::{document_text, MemoryQuery, MemoryResults, RetrievalStrategy};
use std::sync::Mutex;
use std::time::Duration;
use tars_mqtt::correlation::CorrelationRegistry;

const RAG_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct RagHandler {
	pending: Mutex<CorrelationRegistry<MemoryResults>>,
}

impl RagHandler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Publishes a `memory/query` envelope and waits up to 5s for the
	/// correlated `memory/results` response, returning the joined context
	/// snippets. Timeout or any publish failure yields an empty context
	/// rather than failing the request, per the documented neutral result.
	pub async fn query(
		&self,
		client: &tars_mqtt::Client,
		config: &Config,
		topic: &str,
		text: &str,
		top_k: usize,
		correlation_id: &str,
	) -> String {
		let registration = self.pending.lock().unwrap().register(correlation_id.to_string());

		let query = MemoryQuery {
			id: correlation_id.to_string(),
			text: text.to_string(),
			top_k,
			retrieval_strategy: match config.rag_strategy {
				crate::config::RagStrategy::Hybrid => RetrievalStrategy::Hybrid,
				crate::config::RagStrategy::Recent => RetrievalStrategy::Recent,
				crate::config::RagStrategy::Similarity => RetrievalStrategy::Similarity,
			},
			max_tokens: (config.rag_max_tokens > 0).then_some(config.rag_max_tokens),
			include_context: config.rag_include_context,
			context_window: config.rag_context_window,
		};
		let envelope = tars_proto::Envelope::new("memory.query", "llm-worker", query).correlated(correlation_id.to_string());

		let Ok(bytes) = envelope.to_json_bytes() else {
			self.pending.lock().unwrap().cancel(correlation_id);
			return String::new();
		};

		if client
			.publish(topic.to_string(), bytes, tars_mqtt::QoS::AtLeastOnce, false)
			.await
			.is_err()
		{
			self.pending.lock().unwrap().cancel(correlation_id);
			tracing::warn!(correlation_id, "rag_query_publish_failed");
			return String::new();
		}

		match tokio::time::timeout(RAG_QUERY_TIMEOUT, registration.receiver).await {
			Ok(Ok(results)) => join_snippets(&results),
			_ => {
				tracing::warn!(correlation_id, "rag_query_timeout");
				String::new()
			}
		}
	}

	/// Resolves a pending query from a `memory/results` envelope whose
	/// `correlate` matches a registered id. Results with no matching pending
	/// query (including ones that already timed out) are dropped silently.
	pub fn handle_results(&self, correlation_id: &str, results: MemoryResults) {
		self.pending.lock().unwrap().resolve(correlation_id, results);
	}
}

fn join_snippets(results: &MemoryResults) -> String {
	results
		.results
		.iter()
		.filter_map(|entry| document_text(&entry.document))
		.collect::<Vec<_>>()
		.join("\n")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::models::{ContextType, MemoryResultEntry};

	#[test]
	fn joins_document_text_snippets() {
		let results = MemoryResults {
			results: vec![
				MemoryResultEntry {
					document: serde_json::json!({"text": "a"}),
					score: 0.9,
					timestamp: None,
					context_type: ContextType::Target,
					token_count: 1,
				},
				MemoryResultEntry {
					document: serde_json::json!({"text": "b"}),
					score: 0.8,
					timestamp: None,
					context_type: ContextType::Target,
					token_count: 1,
				},
			],
			..Default::default()
		};
		assert_eq!(join_snippets(&results), "a\nb");
	}

	#[tokio::test]
	async fn resolving_without_a_pending_query_is_a_noop() {
		let handler = RagHandler::new();
		handler.handle_results("missing", MemoryResults::default());
	}
}
