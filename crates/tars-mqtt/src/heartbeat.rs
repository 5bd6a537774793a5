//! Application-level keepalive, independent of the MQTT protocol's own
//! PINGREQ/PINGRESP. Every worker process publishes a small JSON heartbeat to
//! its own `system/keepalive/<client_id>` topic; a watchdog here forces a
//! reconnect if publishes keep failing, on the theory that a broker-level
//! problem the protocol keep-alive hasn't noticed yet is best handled by
//! dropping and re-establishing the connection.

use crate::registry::keepalive_topic;
use crate::{Client, QoS};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MISSED_THRESHOLD: u32 = 3;

#[derive(Debug, Serialize)]
struct HeartbeatPayload {
	ok: bool,
	event: &'static str,
	#[serde(with = "time::serde::rfc3339")]
	timestamp: OffsetDateTime,
}

impl HeartbeatPayload {
	fn now() -> Self {
		Self {
			ok: true,
			event: "heartbeat",
			timestamp: OffsetDateTime::now_utc(),
		}
	}
}

#[derive(Debug)]
pub struct HeartbeatHandle {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl HeartbeatHandle {
	/// Spawns the periodic publish loop.
	pub fn spawn(client: Client, client_id: String, interval: Duration) -> Self {
		let cancel = CancellationToken::new();
		let task = tokio::spawn(run(client, client_id, interval, cancel.clone()));
		Self { cancel, task }
	}

	pub fn stop(self) {
		self.cancel.cancel();
		self.task.abort();
	}
}

async fn run(client: Client, client_id: String, interval: Duration, cancel: CancellationToken) {
	let topic = keepalive_topic(&client_id);
	let mut ticker = tokio::time::interval(interval);
	ticker.tick().await;
	let mut missed = 0u32;

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = ticker.tick() => {
				let Ok(payload) = serde_json::to_vec(&HeartbeatPayload::now()) else { continue; };

				// A QoS 0 publish resolves as soon as the client task's
				// command loop picks it up, not when the broker sees it, so a
				// connection wedged before that point (e.g. stuck waiting on
				// a ConnAck that never arrives) would otherwise hang this
				// future forever instead of ever registering as missed.
				let publish = client.publish(topic.clone(), payload, QoS::AtMostOnce, false);
				match tokio::time::timeout(interval, publish).await {
					Ok(Ok(())) => missed = 0,
					Ok(Err(_)) | Err(_) => {
						missed += 1;
						tracing::warn!(missed, %client_id, "heartbeat publish failed");
						if missed >= MISSED_THRESHOLD {
							tracing::error!(%client_id, "missed {MISSED_THRESHOLD} heartbeats in a row, forcing reconnect");
							let _ = client.force_reconnect();
							missed = 0;
						}
					}
				}
			}
		}
	}
}
