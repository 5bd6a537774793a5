//! A registry turning "publish a request, await a correlated response on
//! another topic" into an ordinary awaitable. Backs both the LLM pipeline's
//! RAG queries (5s timeout) and tool calls (30s timeout), and the memory
//! service's own outbound correlations.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct CorrelationRegistry<T> {
	pending: HashMap<String, oneshot::Sender<T>>,
	deadlines: BTreeMap<Instant, String>,
}

impl<T> Default for CorrelationRegistry<T> {
	fn default() -> Self {
		Self {
			pending: HashMap::new(),
			deadlines: BTreeMap::new(),
		}
	}
}

#[derive(Debug)]
pub struct Registration<T> {
	pub id: String,
	pub receiver: oneshot::Receiver<T>,
}

impl<T> CorrelationRegistry<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a pending correlation, returning the receiver half the
	/// caller should await (ideally under `tokio::time::timeout`).
	pub fn register(&mut self, id: impl Into<String>) -> Registration<T> {
		let id = id.into();
		self.sweep_expired();

		let (tx, rx) = oneshot::channel();
		self.pending.insert(id.clone(), tx);
		self.deadlines.insert(Instant::now(), id.clone());

		Registration { id, receiver: rx }
	}

	/// Resolves a pending correlation by id. Returns `true` if a waiter was
	/// found (and possibly already timed out and dropped its receiver).
	pub fn resolve(&mut self, id: &str, value: T) -> bool {
		self.sweep_expired();
		match self.pending.remove(id) {
			Some(tx) => {
				let _ = tx.send(value);
				true
			}
			None => false,
		}
	}

	/// Cancels a pending correlation without resolving it; the receiver
	/// observes `RecvError`.
	pub fn cancel(&mut self, id: &str) {
		self.pending.remove(id);
	}

	pub fn pending_count(&self) -> usize {
		self.pending.len()
	}

	/// Drops registrations older than `max_age`. Called opportunistically on
	/// every register/resolve so long-abandoned entries (callers that gave
	/// up without cancelling) don't leak memory.
	fn sweep_expired(&mut self) {
		const MAX_AGE: Duration = Duration::from_secs(120);
		let cutoff = Instant::now() - MAX_AGE;
		let stale: Vec<_> = self
			.deadlines
			.range(..cutoff)
			.map(|(instant, id)| (*instant, id.clone()))
			.collect();

		for (instant, id) in stale {
			self.deadlines.remove(&instant);
			self.pending.remove(&id);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn resolves_registered_correlation() {
		let mut registry = CorrelationRegistry::<u32>::new();
		let registration = registry.register("req-1");
		assert!(registry.resolve("req-1", 42));

		let value = registration.receiver.await.unwrap();
		assert_eq!(value, 42);
	}

	#[tokio::test]
	async fn unresolved_correlation_errors_on_cancel() {
		let mut registry = CorrelationRegistry::<u32>::new();
		let registration = registry.register("req-1");
		registry.cancel("req-1");

		assert!(registration.receiver.await.is_err());
	}

	#[tokio::test]
	async fn resolve_of_unknown_id_is_a_noop() {
		let mut registry = CorrelationRegistry::<u32>::new();
		assert!(!registry.resolve("missing", 1));
	}
}
