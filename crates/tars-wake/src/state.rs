use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsState {
	Idle,
	Speaking,
	Paused,
}

/// Bookkeeping for a wake detection that arrived while TTS was speaking: the
/// utterance being interrupted, when the interrupt window opened, and when
/// it expires if no cancel phrase or STT final arrives first.
#[derive(Debug, Clone)]
pub struct InterruptContext {
	pub tts_id: Option<String>,
	pub started_at: Instant,
	pub deadline: Instant,
}
