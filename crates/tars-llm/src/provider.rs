//! The provider boundary: `ChatCompletionProvider` is the opaque collaborator
//! named by the spec (real OpenAI/Whisper-class adapters are out of scope).
//! `EchoProvider` is a deterministic stand-in, grounded on the original's
//! `providers/base.py` abstract base, that exists only so this crate is
//! runnable and testable standalone.

use crate::models::{ConversationMessage, Role};
use async_trait::async_trait;
use futures_core::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Debug, Clone)]
pub struct ProviderRequest {
	pub messages: Vec<ConversationMessage>,
	pub system: Option<String>,
	pub model: String,
	pub max_tokens: u32,
	pub temperature: f32,
	pub top_p: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
	pub text: String,
	pub usage: HashMap<String, serde_json::Value>,
	pub tool_calls: Vec<crate::models::ToolCall>,
}

#[derive(Debug, Clone)]
pub struct ProviderDelta {
	pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
	#[error("provider credentials missing: {0}")]
	MissingCredentials(String),
	#[error("provider request failed: {0}")]
	RequestFailed(String),
}

pub type BoxDeltaStream = Pin<Box<dyn Stream<Item = ProviderDelta> + Send>>;

#[async_trait]
pub trait ChatCompletionProvider: Send + Sync {
	fn name(&self) -> &'static str;

	fn supports_streaming(&self) -> bool {
		false
	}

	async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

	async fn stream(&self, request: &ProviderRequest) -> Result<BoxDeltaStream, ProviderError> {
		let _ = request;
		Err(ProviderError::RequestFailed(format!("{} does not support streaming", self.name())))
	}
}

/// Streams its last user turn back word-by-word and echoes it verbatim for
/// `complete`. Deterministic and credential-free, standing in for the real
/// model adapters the spec scopes out.
#[derive(Debug, Default)]
pub struct EchoProvider;

/// A pre-split word list drained one item per poll. Every item is already
/// available, so `poll_next` never needs to register a waker.
struct WordStream {
	words: std::collections::VecDeque<String>,
}

impl Stream for WordStream {
	type Item = ProviderDelta;

	fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Poll::Ready(self.words.pop_front().map(|text| ProviderDelta { text }))
	}
}

fn last_user_turn(messages: &[ConversationMessage]) -> String {
	messages
		.iter()
		.rev()
		.find(|m| m.role == Role::User)
		.map(|m| m.content.clone())
		.unwrap_or_default()
}

#[async_trait]
impl ChatCompletionProvider for EchoProvider {
	fn name(&self) -> &'static str {
		"echo"
	}

	fn supports_streaming(&self) -> bool {
		true
	}

	async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
		Ok(ProviderResponse {
			text: last_user_turn(&request.messages),
			usage: HashMap::new(),
			tool_calls: Vec::new(),
		})
	}

	async fn stream(&self, request: &ProviderRequest) -> Result<BoxDeltaStream, ProviderError> {
		let text = last_user_turn(&request.messages);
		let words = text
			.split_whitespace()
			.enumerate()
			.map(|(i, w)| if i == 0 { w.to_string() } else { format!(" {w}") })
			.collect();
		Ok(Box::pin(WordStream { words }))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures_core::Stream as _;

	fn req(text: &str) -> ProviderRequest {
		ProviderRequest {
			messages: vec![ConversationMessage {
				role: Role::User,
				content: text.to_string(),
				tool_call_id: None,
			}],
			system: None,
			model: "echo".to_string(),
			max_tokens: 64,
			temperature: 0.0,
			top_p: 1.0,
		}
	}

	#[tokio::test]
	async fn complete_echoes_last_user_turn() {
		let provider = EchoProvider;
		let response = provider.complete(&req("hello there")).await.unwrap();
		assert_eq!(response.text, "hello there");
	}

	#[tokio::test]
	async fn stream_yields_words_in_order() {
		let provider = EchoProvider;
		let mut stream = provider.stream(&req("one two three")).await.unwrap();

		let mut collected = String::new();
		while let Some(delta) = std::future::poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)).await {
			collected.push_str(&delta.text);
		}
		assert_eq!(collected, "one two three");
	}
}
