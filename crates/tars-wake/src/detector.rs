//! The wake-word model itself is an opaque collaborator out of scope for this
//! workspace (it would be an ONNX/RKNN inference engine in production). What
//! matters here is the boundary: frames in, detections out, with a retrigger
//! guard so a sustained loud sound doesn't fire repeatedly.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionResult {
	pub confidence: f32,
	pub energy: f32,
}

pub trait WakeDetector: Send {
	/// Feeds one frame of normalized float32 samples (`[-1.0, 1.0)`) captured
	/// at `sample_rate()`. Returns `Some` when the frame crosses the
	/// detector's trigger condition.
	fn process_frame(&mut self, frame: &[f32], now: Instant) -> Option<DetectionResult>;

	fn frame_samples(&self) -> usize;

	fn sample_rate(&self) -> u32;
}

/// Deterministic stand-in for a trained wake-word model: fires whenever the
/// frame's mean absolute amplitude crosses `threshold`, subject to a
/// `min_retrigger` cooldown so one loud frame doesn't produce a burst of
/// detections.
#[derive(Debug)]
pub struct ThresholdDetector {
	threshold: f32,
	frame_samples: usize,
	sample_rate: u32,
	min_retrigger: Duration,
	last_fired: Option<Instant>,
}

impl ThresholdDetector {
	pub fn new(threshold: f32, frame_samples: usize, sample_rate: u32, min_retrigger: Duration) -> Self {
		Self {
			threshold,
			frame_samples,
			sample_rate,
			min_retrigger,
			last_fired: None,
		}
	}
}

impl WakeDetector for ThresholdDetector {
	fn process_frame(&mut self, frame: &[f32], now: Instant) -> Option<DetectionResult> {
		if frame.is_empty() {
			return None;
		}

		let energy = frame.iter().map(|s| s.abs()).sum::<f32>() / frame.len() as f32;
		if energy < self.threshold {
			return None;
		}

		if let Some(last) = self.last_fired {
			if now.duration_since(last) < self.min_retrigger {
				return None;
			}
		}

		self.last_fired = Some(now);
		Some(DetectionResult {
			confidence: (energy / (self.threshold.max(f32::EPSILON) * 2.0)).min(1.0),
			energy,
		})
	}

	fn frame_samples(&self) -> usize {
		self.frame_samples
	}

	fn sample_rate(&self) -> u32 {
		self.sample_rate
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn frame_of(amplitude: f32, len: usize) -> Vec<f32> {
		vec![amplitude; len]
	}

	#[test]
	fn fires_above_threshold() {
		let mut detector = ThresholdDetector::new(0.5, 160, 16_000, Duration::from_secs(1));
		let now = Instant::now();
		assert!(detector.process_frame(&frame_of(0.1, 160), now).is_none());
		assert!(detector.process_frame(&frame_of(0.9, 160), now).is_some());
	}

	#[test]
	fn respects_retrigger_guard() {
		let mut detector = ThresholdDetector::new(0.5, 160, 16_000, Duration::from_millis(500));
		let t0 = Instant::now();
		assert!(detector.process_frame(&frame_of(0.9, 160), t0).is_some());
		assert!(detector.process_frame(&frame_of(0.9, 160), t0 + Duration::from_millis(100)).is_none());
		assert!(detector.process_frame(&frame_of(0.9, 160), t0 + Duration::from_millis(600)).is_some());
	}
}
