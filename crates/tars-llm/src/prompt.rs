//! Prompt assembly: merging RAG context and conversation history into the
//! message list handed to the provider. Two modes selected by
//! `RAG_DYNAMIC_PROMPTS` (spec.md §4.3 "Prompt assembly"): a static mode that
//! always includes the full history, and a token-aware mode that budgets
//! context and history against a rough per-request token reserve.

use crate::config::Config;
use crate::models::{ConversationMessage, Role};

/// Crude `len/4` heuristic, matching the original's `_estimate_tokens` (kept
/// exactly rather than pulling in a tokenizer crate the corpus never uses).
fn estimate_tokens(text: &str) -> u32 {
	(text.len() as u32) / 4
}

fn apply_template(template: &str, context: &str, user: &str) -> String {
	template.replace("{context}", context).replace("{user}", user)
}

/// Builds the final message list (history + the user's turn, RAG context
/// folded into the user turn via the configured template) and reports how
/// the token budget was allocated, when in dynamic mode, for observability.
pub fn assemble(
	config: &Config,
	system: Option<&str>,
	history: &[ConversationMessage],
	user_text: &str,
	rag_context: &str,
) -> (Vec<ConversationMessage>, Option<TokenAllocation>) {
	if !config.rag_dynamic_prompts {
		let prompt = if rag_context.is_empty() {
			user_text.to_string()
		} else {
			apply_template(&config.rag_prompt_template, rag_context, user_text)
		};
		let mut messages = history.to_vec();
		messages.push(ConversationMessage::user(prompt));
		return (messages, None);
	}

	// Dynamic, token-aware path: reserve ~300 tokens of headroom plus the
	// system prompt, split the remainder between RAG context and history.
	const RESPONSE_RESERVE_TOKENS: u32 = 300;
	let system_tokens = system.map(estimate_tokens).unwrap_or(0);
	let reserved = RESPONSE_RESERVE_TOKENS + system_tokens;
	let remainder = config.llm_ctx_window.saturating_sub(reserved);

	let rag_budget = (remainder / 2).min(config.rag_max_tokens);
	let (context_used, context_tokens) = truncate_to_budget(rag_context, rag_budget);

	let history_budget = remainder.saturating_sub(context_tokens);
	let (included_history, history_tokens) = select_history_within_budget(history, history_budget);

	let prompt = if context_used.is_empty() {
		user_text.to_string()
	} else {
		apply_template(&config.rag_prompt_template, &context_used, user_text)
	};

	let mut messages = included_history;
	messages.push(ConversationMessage::user(prompt));

	(
		messages,
		Some(TokenAllocation {
			context_tokens,
			history_tokens,
			reserved_tokens: reserved,
		}),
	)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAllocation {
	pub context_tokens: u32,
	pub history_tokens: u32,
	pub reserved_tokens: u32,
}

fn truncate_to_budget(text: &str, budget: u32) -> (String, u32) {
	if budget == 0 || text.is_empty() {
		return (String::new(), 0);
	}
	let max_chars = (budget as usize) * 4;
	if text.len() <= max_chars {
		(text.to_string(), estimate_tokens(text))
	} else {
		let truncated: String = text.chars().take(max_chars).collect();
		let tokens = estimate_tokens(&truncated);
		(truncated, tokens)
	}
}

/// Walks history newest-first, inserting until the budget would be
/// exceeded, then restores chronological order.
fn select_history_within_budget(history: &[ConversationMessage], budget: u32) -> (Vec<ConversationMessage>, u32) {
	let mut used = 0u32;
	let mut picked = Vec::new();
	for message in history.iter().rev() {
		let cost = estimate_tokens(&message.content);
		if used + cost > budget {
			break;
		}
		used += cost;
		picked.push(message.clone());
	}
	picked.reverse();
	(picked, used)
}
