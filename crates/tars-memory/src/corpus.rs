//! The document store: a flat `Vec<Document>` with a vector embedding per
//! document and a BM25-style lexical index recomputed at query time. Grounds
//! the original's `HyperDB` (vector + BM25 "hybrid" retrieval over a
//! pickled, gzip-persisted corpus) without a dedicated vector-index crate --
//! the corpus sizes this service deals with (a single user's conversation
//! history) make linear scan over a few thousand documents cheap enough that
//! an incremental index would be unjustified complexity.

use crate::embedder::{tokenize, Embedder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
	pub fields: Map<String, Value>,
	pub embedding: Vec<f32>,
	pub tokens: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Corpus {
	documents: Vec<Document>,
}

impl Corpus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.documents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.documents.is_empty()
	}

	pub fn documents(&self) -> &[Document] {
		&self.documents
	}

	pub fn push(&mut self, fields: Map<String, Value>, embedding: Vec<f32>) {
		let text = doc_to_text(&fields);
		self.documents.push(Document {
			fields,
			embedding,
			tokens: tokenize(&text),
		});
	}

	/// The embedding width currently stored, or `None` for an empty corpus.
	pub fn vector_dim(&self) -> Option<usize> {
		self.documents.first().map(|doc| doc.embedding.len())
	}

	/// Re-embeds every document with `embedder`, used when the persisted
	/// vector width no longer matches a freshly probed embedding dimension.
	pub fn reembed_all(&mut self, embedder: &dyn Embedder) {
		for doc in self.documents.iter_mut() {
			let text = doc_to_text(&doc.fields);
			doc.embedding = embedder.embed_one(&text);
		}
	}

	/// Cosine similarity against every document, returning the `top_k`
	/// highest-scoring indices.
	pub fn query_similarity(&self, query_embedding: &[f32], top_k: usize) -> Vec<(usize, f32)> {
		let mut scored: Vec<(usize, f32)> = self
			.documents
			.iter()
			.enumerate()
			.map(|(idx, doc)| (idx, cosine(query_embedding, &doc.embedding)))
			.collect();
		scored.sort_by(|a, b| b.1.total_cmp(&a.1));
		scored.truncate(top_k);
		scored
	}

	/// Combines min-max normalized cosine similarity with a min-max
	/// normalized BM25 lexical score, weighted equally.
	pub fn query_hybrid(&self, query_embedding: &[f32], query_text: &str, top_k: usize) -> Vec<(usize, f32)> {
		if self.documents.is_empty() {
			return Vec::new();
		}

		let cosine_scores: Vec<f32> = self.documents.iter().map(|doc| cosine(query_embedding, &doc.embedding)).collect();
		let bm25_scores = self.bm25_scores(query_text);

		let cosine_norm = min_max_normalize(&cosine_scores);
		let bm25_norm = min_max_normalize(&bm25_scores);

		let mut scored: Vec<(usize, f32)> = (0..self.documents.len())
			.map(|idx| (idx, 0.5 * cosine_norm[idx] + 0.5 * bm25_norm[idx]))
			.collect();
		scored.sort_by(|a, b| b.1.total_cmp(&a.1));
		scored.truncate(top_k);
		scored
	}

	/// Indices of the most recently ingested documents, newest first.
	pub fn recent_indices(&self, top_k: usize) -> Vec<usize> {
		(0..self.documents.len()).rev().take(top_k).collect()
	}

	fn bm25_scores(&self, query_text: &str) -> Vec<f32> {
		let query_tokens = tokenize(query_text);
		let n = self.documents.len() as f32;
		let avg_len = self.documents.iter().map(|d| d.tokens.len() as f32).sum::<f32>() / n.max(1.0);

		self.documents
			.iter()
			.map(|doc| {
				let doc_len = doc.tokens.len() as f32;
				query_tokens
					.iter()
					.map(|term| {
						let df = self.documents.iter().filter(|d| d.tokens.iter().any(|t| t == term)).count() as f32;
						if df == 0.0 {
							return 0.0;
						}
						let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
						let tf = doc.tokens.iter().filter(|t| *t == term).count() as f32;
						idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len.max(1.0)))
					})
					.sum()
			})
			.collect()
	}

	pub fn save(&self, path: &Path) -> std::io::Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_vec(self)?;
		let file = std::fs::File::create(path)?;
		let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
		encoder.write_all(&json)?;
		encoder.finish()?;
		Ok(())
	}

	pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
		if !path.exists() {
			return Ok(None);
		}
		let file = std::fs::File::open(path)?;
		let mut decoder = flate2::read::GzDecoder::new(file);
		let mut json = Vec::new();
		decoder.read_to_end(&mut json)?;
		Ok(Some(serde_json::from_slice(&json)?))
	}
}

/// Offloads a batch ingest (tokenize + embed) to a blocking-pool thread.
pub async fn embed_for_ingest(embedder: Arc<dyn Embedder>, text: String) -> Vec<f32> {
	tokio::task::spawn_blocking(move || embedder.embed_one(&text)).await.unwrap_or_default()
}

/// Mirrors the original's `_doc_to_text`/`_extract_text_from_doc` field
/// preference order: prefer `user_input`+`bot_response`, then `text`, else
/// join every string-valued field.
pub fn doc_to_text(fields: &Map<String, Value>) -> String {
	let mut parts = Vec::new();
	if let Some(v) = fields.get("user_input").and_then(Value::as_str) {
		parts.push(v.to_string());
	}
	if let Some(v) = fields.get("bot_response").and_then(Value::as_str) {
		parts.push(v.to_string());
	}
	if let Some(v) = fields.get("text").and_then(Value::as_str) {
		parts.push(v.to_string());
	}
	if !parts.is_empty() {
		return parts.join(" ");
	}
	fields.values().filter_map(Value::as_str).collect::<Vec<_>>().join(" ")
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm_a == 0.0 || norm_b == 0.0 {
		0.0
	} else {
		dot / (norm_a * norm_b)
	}
}

fn min_max_normalize(values: &[f32]) -> Vec<f32> {
	let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
	let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
	if !min.is_finite() || !max.is_finite() || (max - min).abs() < f32::EPSILON {
		return vec![0.0; values.len()];
	}
	values.iter().map(|v| (v - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::embedder::HashingEmbedder;

	fn doc(text: &str) -> Map<String, Value> {
		let mut map = Map::new();
		map.insert("text".to_string(), Value::String(text.to_string()));
		map
	}

	#[test]
	fn hybrid_query_ranks_lexical_match_first() {
		let embedder = HashingEmbedder::new(32);
		let mut corpus = Corpus::new();
		corpus.push(doc("the weather today is sunny and warm"), embedder.embed_one("the weather today is sunny and warm"));
		corpus.push(doc("my favorite food is pizza"), embedder.embed_one("my favorite food is pizza"));

		let query = "what is the weather like";
		let results = corpus.query_hybrid(&embedder.embed_one(query), query, 2);
		assert_eq!(results[0].0, 0);
	}

	#[test]
	fn recent_indices_are_newest_first() {
		let embedder = HashingEmbedder::new(16);
		let mut corpus = Corpus::new();
		corpus.push(doc("first"), embedder.embed_one("first"));
		corpus.push(doc("second"), embedder.embed_one("second"));
		corpus.push(doc("third"), embedder.embed_one("third"));

		assert_eq!(corpus.recent_indices(2), vec![2, 1]);
	}

	#[test]
	fn save_and_load_round_trips() {
		let embedder = HashingEmbedder::new(8);
		let mut corpus = Corpus::new();
		corpus.push(doc("hello"), embedder.embed_one("hello"));

		let dir = std::env::temp_dir().join(format!("tars-memory-test-{:p}", &corpus));
		let path = dir.join("memory.json.gz");
		corpus.save(&path).unwrap();

		let loaded = Corpus::load(&path).unwrap().unwrap();
		assert_eq!(loaded.len(), 1);
		assert_eq!(loaded.vector_dim(), Some(8));

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn doc_to_text_prefers_named_fields_over_raw_join() {
		let mut map = Map::new();
		map.insert("user_input".to_string(), Value::String("hi".to_string()));
		map.insert("bot_response".to_string(), Value::String("hello".to_string()));
		map.insert("other".to_string(), Value::String("ignored-if-named-present".to_string()));
		assert_eq!(doc_to_text(&map), "hi hello");
	}
}
