mod support;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use support::{base_config, base_options, Broker};
use tars_llm::models::{LlmRequest, LlmResponse, LlmStreamDelta, ToolCall, ToolCallResult, ToolFunctionCall};
use tars_llm::provider::{ChatCompletionProvider, EchoProvider, ProviderError, ProviderRequest, ProviderResponse};
use tars_llm::service::LlmService;
use tars_proto::Envelope;
use tokio::net::TcpListener;

fn decode_envelope<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Envelope<T> {
	serde_json::from_slice(payload).unwrap()
}

fn request(id: &str, text: &str, stream: bool) -> Vec<u8> {
	serde_json::to_vec(&LlmRequest {
		id: id.to_string(),
		message_id: None,
		text: text.to_string(),
		stream,
		use_rag: None,
		rag_k: None,
		system: None,
		params: Default::default(),
		conversation_history: Vec::new(),
	})
	.unwrap()
}

/// Every `llm/stream` delta's `seq` increases by one, deltas carry text until
/// the final one (`done: true`, `delta: None`), and the trailing `llm/response`
/// carries the full concatenated text under the same correlation id.
#[tokio::test]
async fn stream_deltas_are_monotonic_and_response_follows() {
	let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let config = base_config(port);

	let (client, _handle) = tars_mqtt::client(base_options(port, &config.client_id));
	let service = LlmService::new(config.clone(), client, Box::new(EchoProvider));
	let run = tokio::spawn(async move {
		let _ = service.run().await;
	});

	let mut broker = Broker::accept(&listener).await;
	broker.handshake().await;
	broker.expect_publish_on(&config.health_topic, &[]).await;
	broker.expect_subscribes(3).await;

	broker.send(&config.topic_llm_request, request("req-1", "one two", true)).await;

	let mut last_seq = None;
	loop {
		let received = broker.expect_publish_on(&config.topic_llm_stream, &[]).await;
		let envelope = decode_envelope::<LlmStreamDelta>(&received.payload);
		assert_eq!(envelope.correlate.as_deref(), Some("req-1"));

		if let Some(previous) = last_seq {
			assert_eq!(envelope.data.seq, previous + 1, "stream sequence must be strictly monotonic");
		} else {
			assert_eq!(envelope.data.seq, 0);
		}
		last_seq = Some(envelope.data.seq);

		if envelope.data.done {
			assert!(envelope.data.delta.is_none());
			break;
		}
		assert!(envelope.data.delta.is_some());
	}

	let received = broker.expect_publish_on(&config.topic_llm_response, &[]).await;
	let envelope = decode_envelope::<LlmResponse>(&received.payload);
	assert_eq!(envelope.correlate.as_deref(), Some("req-1"));
	assert_eq!(envelope.data.reply.as_deref(), Some("one two"));
	assert!(envelope.data.error.is_none());

	run.abort();
}

/// A `memory/query` that never gets a `memory/results` reply times out after
/// its fixed window and falls back to an empty context rather than failing
/// the request -- the response still carries the model's answer.
#[tokio::test]
async fn rag_query_timeout_falls_back_to_empty_context() {
	let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let config = tars_llm::config::Config { rag_enabled: true, ..base_config(port) };

	let (client, _handle) = tars_mqtt::client(base_options(port, &config.client_id));
	let service = LlmService::new(config.clone(), client, Box::new(EchoProvider));
	let run = tokio::spawn(async move {
		let _ = service.run().await;
	});

	let mut broker = Broker::accept(&listener).await;
	broker.handshake().await;
	broker.expect_publish_on(&config.health_topic, &[]).await;
	broker.expect_subscribes(4).await;

	broker.send(&config.topic_llm_request, request("req-2", "plain question", false)).await;

	// Observe the query but never answer it, forcing the RAG handler's
	// internal timeout.
	let query = broker.expect_publish_on(&config.topic_memory_query, &[]).await;
	assert_eq!(query.topic, config.topic_memory_query);

	let received =
		tokio::time::timeout(Duration::from_secs(8), broker.expect_publish_on(&config.topic_llm_response, &[])).await.unwrap();
	let envelope = decode_envelope::<LlmResponse>(&received.payload);
	assert_eq!(envelope.data.reply.as_deref(), Some("plain question"));
	assert!(envelope.data.error.is_none());

	run.abort();
}

#[derive(Default)]
struct ToolCallingProvider {
	calls: AtomicUsize,
}

#[async_trait]
impl ChatCompletionProvider for ToolCallingProvider {
	fn name(&self) -> &'static str {
		"tool-test"
	}

	async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
		if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
			Ok(ProviderResponse {
				text: "let me check".to_string(),
				usage: Default::default(),
				tool_calls: vec![ToolCall { id: "call-1".to_string(), function: ToolFunctionCall { name: "search".to_string(), arguments: "{}".to_string() } }],
			})
		} else {
			Ok(ProviderResponse { text: "final answer".to_string(), usage: Default::default(), tool_calls: Vec::new() })
		}
	}
}

/// A tool call in the first completion is dispatched over MQTT, and once its
/// result lands on `llm/tool.call.result` the follow-up completion's answer
/// (not the first call's placeholder text) is what reaches `llm/response`.
#[tokio::test]
async fn tool_call_round_trip_drives_follow_up_completion() {
	let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let config = tars_llm::config::Config { tool_calling_enabled: true, ..base_config(port) };

	let (client, _handle) = tars_mqtt::client(base_options(port, &config.client_id));
	let service = LlmService::new(config.clone(), client, Box::new(ToolCallingProvider::default()));
	let run = tokio::spawn(async move {
		let _ = service.run().await;
	});

	let mut broker = Broker::accept(&listener).await;
	broker.handshake().await;
	broker.expect_publish_on(&config.health_topic, &[]).await;
	broker.expect_subscribes(5).await;

	broker.send(&config.topic_llm_request, request("req-3", "search something", false)).await;

	let call = broker.expect_publish_on(&config.topic_tool_call_request, &[]).await;
	let envelope = decode_envelope::<serde_json::Value>(&call.payload);
	assert_eq!(envelope.data["call_id"], "call-1");

	broker
		.send(
			&config.topic_tool_call_result,
			serde_json::to_vec(&ToolCallResult { call_id: "call-1".to_string(), content: Some("3 results found".to_string()), error: None }).unwrap(),
		)
		.await;

	let received = broker.expect_publish_on(&config.topic_llm_response, &[]).await;
	let envelope = decode_envelope::<LlmResponse>(&received.payload);
	assert_eq!(envelope.data.reply.as_deref(), Some("final answer"), "must carry the follow-up completion, not the tool-call placeholder");

	run.abort();
}
