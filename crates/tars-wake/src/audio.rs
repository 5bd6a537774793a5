//! Client for the STT audio fan-out Unix socket: fixed-size int16 PCM frames,
//! normalized to float32 in `[-1.0, 1.0)`, with reconnect backoff so a
//! restarting fan-out producer doesn't take this service down with it.

use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::UnixStream;

const SAMPLE_SCALE: f32 = 1.0 / 32768.0;

pub struct AudioFanoutClient {
	socket_path: PathBuf,
	samples_per_chunk: usize,
	reconnect_initial_delay: Duration,
	reconnect_max_delay: Duration,
	stream: Option<BufReader<UnixStream>>,
	backoff: Duration,
}

impl AudioFanoutClient {
	pub fn new(socket_path: PathBuf, samples_per_chunk: usize) -> Self {
		let reconnect_initial_delay = Duration::from_millis(500);
		Self {
			socket_path,
			samples_per_chunk,
			reconnect_initial_delay,
			reconnect_max_delay: Duration::from_secs(5),
			stream: None,
			backoff: reconnect_initial_delay,
		}
	}

	/// Blocks until one full frame of `samples_per_chunk` samples is
	/// available, reconnecting with exponential backoff if the socket isn't
	/// there yet or drops mid-stream. Returns `None` only if `close()` was
	/// never called but the caller should treat a `None` the same way: stop
	/// pulling frames.
	pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
		loop {
			if self.stream.is_none() {
				match UnixStream::connect(&self.socket_path).await {
					Ok(stream) => {
						tracing::info!(path = %self.socket_path.display(), "connected to audio fan-out");
						self.stream = Some(BufReader::new(stream));
						self.backoff = self.reconnect_initial_delay;
					}
					Err(error) => {
						tracing::warn!(path = %self.socket_path.display(), %error, "audio fan-out connect failed, retrying");
						tokio::time::sleep(self.backoff).await;
						self.backoff = (self.backoff * 2).min(self.reconnect_max_delay);
						continue;
					}
				}
			}

			let stream = self.stream.as_mut().expect("checked above");
			let mut buf = vec![0u8; self.samples_per_chunk * 2];
			match stream.read_exact(&mut buf).await {
				Ok(_) => {
					let samples = buf
						.chunks_exact(2)
						.map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 * SAMPLE_SCALE)
						.collect();
					return Some(samples);
				}
				Err(error) => {
					tracing::warn!(%error, "audio fan-out stream ended, reconnecting");
					self.stream = None;
					tokio::time::sleep(self.backoff).await;
					self.backoff = (self.backoff * 2).min(self.reconnect_max_delay);
				}
			}
		}
	}
}
