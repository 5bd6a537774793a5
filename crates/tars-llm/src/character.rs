//! Persona state backing system-prompt assembly. The character snapshot
//! arrives retained on `system/character/current` (and incrementally via
//! `character/result`); every `llm/request` handler reads the latest whole
//! snapshot but only the subscription handlers below ever mutate it, so
//! `ArcSwap` gives readers a lock-free copy-on-write view.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// `{ name, description, systemprompt, traits: { ... }, voice: { ... }, meta: { ... } }`.
/// `voice` is unused by this pipeline but carried through for completeness
/// since the memory service publishes it as part of the same snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterSnapshot {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub systemprompt: Option<String>,
	#[serde(default)]
	pub traits: BTreeMap<String, Value>,
	#[serde(default)]
	pub voice: Option<Value>,
	#[serde(default)]
	pub meta: Map<String, Value>,
}

impl CharacterSnapshot {
	fn description_or_meta(&self) -> Option<String> {
		self.description
			.clone()
			.or_else(|| self.meta.get("description").and_then(Value::as_str).map(str::to_string))
	}
}

pub struct CharacterStore {
	current: ArcSwap<CharacterSnapshot>,
}

impl Default for CharacterStore {
	fn default() -> Self {
		Self {
			current: ArcSwap::from_pointee(CharacterSnapshot::default()),
		}
	}
}

impl CharacterStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> Arc<CharacterSnapshot> {
		self.current.load_full()
	}

	/// Replaces the whole snapshot (`system/character/current`, or a
	/// `character/result` full payload carrying `name`).
	pub fn replace(&self, snapshot: CharacterSnapshot) {
		tracing::info!(name = ?snapshot.name, "character_updated");
		self.current.store(Arc::new(snapshot));
	}

	/// Rewrites a single section (`{"section": "...", "value": ...}`
	/// payload shape).
	pub fn update_section(&self, section: &str, value: Value) {
		let mut next = (**self.current.load()).clone();
		match section {
			"name" => next.name = value.as_str().map(str::to_string),
			"description" => next.description = value.as_str().map(str::to_string),
			"systemprompt" => next.systemprompt = value.as_str().map(str::to_string),
			"voice" => next.voice = Some(value),
			"traits" => {
				if let Value::Object(map) = value {
					next.traits = map.into_iter().collect();
				}
			}
			other => {
				next.meta.insert(other.to_string(), value);
			}
		}
		tracing::info!(section, "character_section_updated");
		self.current.store(Arc::new(next));
	}

	/// Merges a partial object into the snapshot's `meta` bag -- the
	/// original's catch-all branch for payloads that are neither a full
	/// snapshot nor a `{section, value}` pair.
	pub fn merge(&self, partial: Map<String, Value>) {
		let mut next = (**self.current.load()).clone();
		next.meta.extend(partial);
		tracing::info!("character_partially_updated");
		self.current.store(Arc::new(next));
	}

	/// Builds the effective system prompt: character persona first (its own
	/// `systemprompt` if set, else a traits/description-derived fallback),
	/// then the caller-supplied override appended after a blank line.
	pub fn build_system_prompt(&self, base_system: Option<&str>) -> Option<String> {
		let snapshot = self.current.load();
		let persona = Self::persona_from(&snapshot);

		match (base_system, persona) {
			(Some(base), Some(persona)) => Some(format!("{persona}\n\n{base}")),
			(Some(base), None) => Some(base.to_string()),
			(None, persona) => persona,
		}
	}

	fn persona_from(snapshot: &CharacterSnapshot) -> Option<String> {
		if snapshot.name.is_none() && snapshot.systemprompt.is_none() && snapshot.traits.is_empty() {
			return None;
		}

		let name = snapshot.name.clone().unwrap_or_else(|| "Assistant".to_string());
		let sys_prompt = snapshot.systemprompt.as_deref().unwrap_or("").trim();
		let desc = snapshot.description_or_meta();

		let mut parts = Vec::new();
		if !sys_prompt.is_empty() {
			parts.push(sys_prompt.to_string());
		}

		if !snapshot.traits.is_empty() {
			let trait_pairs: Vec<String> = snapshot
				.traits
				.iter()
				.map(|(k, v)| format!("{k}: {}", value_to_plain(v)))
				.collect();
			let mut trait_line = format!("You are {name}. Traits: {}.", trait_pairs.join("; "));
			if let Some(desc) = &desc {
				trait_line = format!("{trait_line} {desc}").trim().to_string();
			}
			parts.push(trait_line);
		} else if sys_prompt.is_empty() {
			let mut fallback = format!("You are {name}.");
			if let Some(desc) = &desc {
				fallback = format!("{fallback} {desc}").trim().to_string();
			}
			parts.push(fallback);
		}

		let persona = parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("\n");
		(!persona.trim().is_empty()).then_some(persona)
	}
}

fn value_to_plain(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

/// Built-in persona used until the first `system/character/current` or
/// `character/result` snapshot arrives -- the pipeline still answers
/// requests rather than failing them (DESIGN NOTES' "tolerate the first
/// request lacking it" branch).
pub const FALLBACK_NAME: &str = "TARS";
pub const FALLBACK_SYSTEM_PROMPT: &str = "You are TARS.";
