//! Text embedding. `HashingEmbedder` stands in for the original's
//! `sentence-transformers` model: a fixed-dimension feature-hashing vector
//! with no model download, offering the same "normalized float vector per
//! document" contract the retrieval code needs. Embedding is CPU-bound, so
//! callers run it through [`embed_async`] to keep it off the event loop.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub trait Embedder: Send + Sync {
	fn dimension(&self) -> usize;
	fn embed_one(&self, text: &str) -> Vec<f32>;

	fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
		texts.iter().map(|text| self.embed_one(text)).collect()
	}
}

/// Deterministic bag-of-tokens hashing embedder (`DefaultHasher::new()` uses
/// fixed keys, so repeated calls within and across runs of this binary
/// produce the same vector for the same text -- required for the dimension
/// reconciliation probe to be meaningful).
pub struct HashingEmbedder {
	dim: usize,
}

impl HashingEmbedder {
	pub fn new(dim: usize) -> Self {
		Self { dim: dim.max(1) }
	}
}

impl Embedder for HashingEmbedder {
	fn dimension(&self) -> usize {
		self.dim
	}

	fn embed_one(&self, text: &str) -> Vec<f32> {
		let mut vector = vec![0f32; self.dim];
		for token in tokenize(text) {
			let mut hasher = DefaultHasher::new();
			token.hash(&mut hasher);
			let hash = hasher.finish();
			let bucket = (hash % self.dim as u64) as usize;
			let sign = if (hash >> 1) & 1 == 0 { 1.0 } else { -1.0 };
			vector[bucket] += sign;
		}
		normalize(&mut vector);
		vector
	}
}

pub fn tokenize(text: &str) -> Vec<String> {
	text.to_lowercase()
		.split(|c: char| !c.is_alphanumeric())
		.filter(|token| !token.is_empty())
		.map(str::to_string)
		.collect()
}

fn normalize(vector: &mut [f32]) {
	let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
	if norm > 0.0 {
		for value in vector.iter_mut() {
			*value /= norm;
		}
	}
}

/// Offloads embedding onto a blocking-pool thread, mirroring the original's
/// `asyncio.to_thread`/dedicated-executor split between the event loop and
/// CPU-bound encoding.
pub async fn embed_async(embedder: Arc<dyn Embedder>, texts: Vec<String>) -> Vec<Vec<f32>> {
	match tokio::task::spawn_blocking(move || embedder.embed(&texts)).await {
		Ok(vectors) => vectors,
		Err(error) => {
			tracing::error!(%error, "embedding task panicked");
			Vec::new()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn embeddings_are_normalized() {
		let embedder = HashingEmbedder::new(32);
		let vector = embedder.embed_one("the quick brown fox");
		let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
		assert!((norm - 1.0).abs() < 1e-5 || norm == 0.0);
	}

	#[test]
	fn same_text_embeds_identically() {
		let embedder = HashingEmbedder::new(64);
		assert_eq!(embedder.embed_one("hello world"), embedder.embed_one("hello world"));
	}

	#[test]
	fn empty_text_embeds_to_zero_vector() {
		let embedder = HashingEmbedder::new(16);
		assert_eq!(embedder.embed_one(""), vec![0.0; 16]);
	}
}
