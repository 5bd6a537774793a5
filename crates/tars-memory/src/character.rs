//! Owns the character persona: loads `character.toml` at startup, serves
//! `character/get`, and applies `character/update` trait edits, publishing
//! the whole snapshot retained on `system/character/current` after every
//! change. `ArcSwap` gives readers (the publish path) a lock-free
//! copy-on-write view, matching `tars-llm`'s `CharacterStore`.

use crate::config::Config;
use crate::models::CharacterSnapshot;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub struct CharacterStore {
	config_dir: String,
	config_name: String,
	current: ArcSwap<CharacterSnapshot>,
}

impl CharacterStore {
	/// Loads `{character_dir}/{character_name}/character.toml`, falling back
	/// to a bare `{name}`-only snapshot if the file is missing or malformed.
	pub fn load(config: &Config) -> Self {
		let snapshot = Self::load_from_disk(&config.character_dir, &config.character_name);
		Self {
			config_dir: config.character_dir.clone(),
			config_name: config.character_name.clone(),
			current: ArcSwap::from_pointee(snapshot),
		}
	}

	pub fn snapshot(&self) -> Arc<CharacterSnapshot> {
		self.current.load_full()
	}

	/// Reloads from `character.toml`, discarding any in-memory trait edits
	/// (the `reset_traits` action).
	pub fn reset(&self) {
		let snapshot = Self::load_from_disk(&self.config_dir, &self.config_name);
		tracing::info!(traits = snapshot.traits.len(), "character_reset_from_disk");
		self.current.store(Arc::new(snapshot));
	}

	pub fn set_trait(&self, trait_name: &str, value: Value) {
		let mut next = (**self.current.load()).clone();
		next.traits.insert(trait_name.to_string(), value);
		self.current.store(Arc::new(next));
	}

	fn load_from_disk(character_dir: &str, character_name: &str) -> CharacterSnapshot {
		let path = Path::new(character_dir).join(character_name).join("character.toml");
		match std::fs::read_to_string(&path) {
			Ok(contents) => Self::parse_toml(&contents, character_name).unwrap_or_else(|error| {
				tracing::error!(%error, path = %path.display(), "failed to parse character.toml");
				bare_snapshot(character_name)
			}),
			Err(error) => {
				tracing::warn!(%error, path = %path.display(), "character.toml not found");
				bare_snapshot(character_name)
			}
		}
	}

	fn parse_toml(contents: &str, fallback_name: &str) -> Result<CharacterSnapshot, toml::de::Error> {
		let document: toml::Value = toml::from_str(contents)?;

		let info = document.get("info").and_then(toml::Value::as_table);
		let name = info
			.and_then(|t| t.get("name"))
			.and_then(toml::Value::as_str)
			.unwrap_or(fallback_name)
			.to_string();
		let description = info.and_then(|t| t.get("description")).and_then(toml::Value::as_str).map(str::to_string);
		let systemprompt = info.and_then(|t| t.get("systemprompt")).and_then(toml::Value::as_str).map(str::to_string);

		let traits = table_section(&document, "traits");
		let voice = table_section(&document, "voice");
		let meta = table_section(&document, "meta");
		let scenario = table_section(&document, "scenario");
		let personality_notes = table_section(&document, "personality_notes");
		let example_interactions = table_section(&document, "example_interactions");

		let trait_count = traits.len();
		let snapshot = CharacterSnapshot {
			message_id: tars_proto::new_id(),
			name,
			description,
			systemprompt,
			traits,
			voice,
			meta,
			scenario,
			personality_notes,
			example_interactions,
		};
		tracing::info!(name = %snapshot.name, traits = trait_count, "character_loaded");
		Ok(snapshot)
	}
}

fn table_section(document: &toml::Value, key: &str) -> serde_json::Map<String, Value> {
	document
		.get(key)
		.and_then(toml::Value::as_table)
		.map(|table| {
			table
				.iter()
				.filter_map(|(k, v)| toml_to_json(v).map(|json| (k.clone(), json)))
				.collect()
		})
		.unwrap_or_default()
}

fn toml_to_json(value: &toml::Value) -> Option<Value> {
	serde_json::to_value(value).ok()
}

fn bare_snapshot(name: &str) -> CharacterSnapshot {
	CharacterSnapshot {
		message_id: tars_proto::new_id(),
		name: name.to_string(),
		..Default::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_character_toml_falls_back_to_bare_name() {
		let snapshot = CharacterStore::load_from_disk("/nonexistent/dir", "TARS");
		assert_eq!(snapshot.name, "TARS");
		assert!(snapshot.traits.is_empty());
	}

	#[test]
	fn parses_info_traits_and_voice_sections() {
		let toml = r#"
			[info]
			name = "CASE"
			description = "a droll robot"
			systemprompt = "Be terse."

			[traits]
			humor = 70

			[voice]
			pitch = "low"
		"#;
		let snapshot = CharacterStore::parse_toml(toml, "TARS").unwrap();
		assert_eq!(snapshot.name, "CASE");
		assert_eq!(snapshot.systemprompt.as_deref(), Some("Be terse."));
		assert_eq!(snapshot.traits.get("humor"), Some(&Value::from(70)));
		assert_eq!(snapshot.voice.get("pitch"), Some(&Value::String("low".to_string())));
	}
}
