//! MCP tool-call dispatch. Grounded on `llm_worker/handlers/tools.py`'s
//! one-future-per-call-id pattern, reimplemented over
//! `tars_mqtt::correlation::CorrelationRegistry` instead of a hand-rolled
//! `asyncio.Future` map.

use crate::models::{ToolCall, ToolCallRequest, ToolCallResult, ToolDescriptor};
use std::sync::Mutex;
use std::time::Duration;
use tars_mqtt::correlation::CorrelationRegistry;

const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct ToolExecutor {
	tools: Mutex<Vec<ToolDescriptor>>,
	pending: Mutex<CorrelationRegistry<ToolCallResult>>,
}

impl ToolExecutor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn load_registry(&self, tools: Vec<ToolDescriptor>) {
		tracing::info!(count = tools.len(), "tool_registry_loaded");
		*self.tools.lock().unwrap() = tools;
	}

	pub fn has_tools(&self) -> bool {
		!self.tools.lock().unwrap().is_empty()
	}

	pub fn tools(&self) -> Vec<ToolDescriptor> {
		self.tools.lock().unwrap().clone()
	}

	/// Resolves a pending call keyed by `call_id`, delivered off
	/// `llm/tool.call.result`. A result with no matching pending call is
	/// logged and dropped (the original's "missing call_id" branch, widened
	/// to "unknown call_id").
	pub fn resolve(&self, result: ToolCallResult) {
		let resolved = self.pending.lock().unwrap().resolve(&result.call_id, result.clone());
		if !resolved {
			tracing::warn!(call_id = %result.call_id, "tool_call_result_unmatched");
		}
	}

	/// Dispatches every call concurrently, publishing one
	/// `llm/tool.call.request` envelope per call and waiting up to 30s per
	/// call on the correlated result. A call that never resolves yields a
	/// synthetic error result rather than failing the whole batch.
	pub async fn execute_calls(
		&self,
		client: &tars_mqtt::Client,
		topic: &str,
		calls: &[ToolCall],
	) -> Vec<ToolCallResult> {
		let mut results = Vec::with_capacity(calls.len());
		for call in calls {
			results.push(self.execute_one(client, topic, call).await);
		}
		results
	}

	async fn execute_one(&self, client: &tars_mqtt::Client, topic: &str, call: &ToolCall) -> ToolCallResult {
		let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);
		let request = ToolCallRequest {
			call_id: call.id.clone(),
			name: call.function.name.clone(),
			arguments,
		};

		let registration = self.pending.lock().unwrap().register(call.id.clone());

		let envelope = tars_proto::Envelope::new("llm.tool_call.request", "llm-worker", request);
		let Ok(bytes) = envelope.to_json_bytes() else {
			self.pending.lock().unwrap().cancel(&call.id);
			return ToolCallResult {
				call_id: call.id.clone(),
				content: None,
				error: Some("failed to encode tool call request".to_string()),
			};
		};

		if client
			.publish(topic.to_string(), bytes, tars_mqtt::QoS::AtLeastOnce, false)
			.await
			.is_err()
		{
			self.pending.lock().unwrap().cancel(&call.id);
			return ToolCallResult {
				call_id: call.id.clone(),
				content: None,
				error: Some("failed to publish tool call request".to_string()),
			};
		}

		match tokio::time::timeout(TOOL_CALL_TIMEOUT, registration.receiver).await {
			Ok(Ok(result)) => result,
			_ => {
				tracing::warn!(call_id = %call.id, "tool_call_timeout");
				ToolCallResult {
					call_id: call.id.clone(),
					content: None,
					error: Some(format!("Tool execution timeout ({}s)", TOOL_CALL_TIMEOUT.as_secs())),
				}
			}
		}
	}
}

/// Formats tool results as `role: "tool"` chat messages, keyed by
/// `tool_call_id`, per the original's `format_tool_messages`.
pub fn format_tool_messages(results: &[ToolCallResult]) -> Vec<crate::models::ConversationMessage> {
	results
		.iter()
		.map(|result| crate::models::ConversationMessage {
			role: crate::models::Role::Tool,
			content: result.error.clone().or_else(|| result.content.clone()).unwrap_or_default(),
			tool_call_id: Some(result.call_id.clone()),
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registry_starts_empty() {
		let executor = ToolExecutor::new();
		assert!(!executor.has_tools());
	}

	#[test]
	fn format_tool_messages_prefers_error_over_content() {
		let results = vec![ToolCallResult {
			call_id: "c1".to_string(),
			content: Some("ignored".to_string()),
			error: Some("boom".to_string()),
		}];
		let messages = format_tool_messages(&results);
		assert_eq!(messages[0].content, "boom");
	}
}
