use std::ops::Range;
use std::time::Duration;
use tokio::time;

/// Exponential backoff between reconnect attempts, bounded to a range. The
/// first `wait_and_increase_with` call never sleeps, so the initial
/// connection attempt is immediate.
#[derive(Debug)]
pub struct HoldOff {
	range: Range<Duration>,
	current: Duration,
	waited_once: bool,
}

impl HoldOff {
	pub fn new(range: Range<Duration>) -> Self {
		Self {
			current: range.start,
			range,
			waited_once: false,
		}
	}

	/// Sleeps for the current delay (skipped on the very first call), then
	/// grows the delay with `f` for next time, clamped to the configured
	/// range.
	pub async fn wait_and_increase_with(&mut self, f: impl FnOnce(Duration) -> Duration) {
		if self.waited_once {
			time::sleep(self.current).await;
		}
		self.waited_once = true;
		self.increase_with(f);
	}

	/// Grows the current delay with `f`, clamped to the configured range.
	pub fn increase_with(&mut self, f: impl FnOnce(Duration) -> Duration) {
		let next = f(self.current);
		self.current = next.clamp(self.range.start, self.range.end);
	}

	/// Resets the delay to the range minimum, called after a successful
	/// connection.
	pub fn reset(&mut self) {
		self.current = self.range.start;
		self.waited_once = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn first_wait_does_not_sleep() {
		let mut holdoff = HoldOff::new(Duration::from_millis(50)..Duration::from_secs(5));
		let start = time::Instant::now();
		holdoff.wait_and_increase_with(|d| d * 2).await;
		assert_eq!(start.elapsed(), Duration::ZERO);
	}

	#[test]
	fn increase_clamps_to_range_max() {
		let mut holdoff = HoldOff::new(Duration::from_millis(50)..Duration::from_millis(200));
		for _ in 0..10 {
			holdoff.increase_with(|d| d * 2);
		}
		assert_eq!(holdoff.current, Duration::from_millis(200));
	}

	#[test]
	fn reset_returns_to_minimum() {
		let mut holdoff = HoldOff::new(Duration::from_millis(50)..Duration::from_millis(200));
		holdoff.increase_with(|d| d * 4);
		holdoff.reset();
		assert_eq!(holdoff.current, Duration::from_millis(50));
	}
}
