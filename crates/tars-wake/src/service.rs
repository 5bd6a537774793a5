//! The half-duplex wake arbitration state machine: owns `tts_state` and the
//! active interrupt window, and is the only place that mutates either, so
//! every transition below runs to completion before the next external event
//! (a detection, a `tts/status` update, an `stt/final`) is handled.

use crate::audio::AudioFanoutClient;
use crate::config::Config;
use crate::detector::{DetectionResult, WakeDetector};
use crate::models::{
	HealthPayload, MicAction, MicCommand, TtsAction, TtsControl, TtsStatus, WakeEvent, WakeEventType,
};
use crate::state::{InterruptContext, TtsState};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tars_mqtt::{Client, FilterBuf, QoS};
use tars_proto::{BareOrEnveloped, Envelope};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;

const SOURCE: &str = "wake-activation";

fn cancel_phrases() -> &'static HashSet<&'static str> {
	static CELL: OnceLock<HashSet<&'static str>> = OnceLock::new();
	CELL.get_or_init(|| {
		[
			"cancel",
			"cancel it",
			"cancel that",
			"cancel please",
			"stop",
			"stop it",
			"stop that",
			"never mind",
			"never mind that",
			"nevermind",
		]
		.into_iter()
		.collect()
	})
}

fn normalize_phrase(text: &str) -> String {
	let cleaned: String = text
		.to_lowercase()
		.chars()
		.map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
		.collect();
	cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, serde::Deserialize)]
struct SttFinalPayload {
	#[serde(default = "default_true")]
	is_final: bool,
	text: Option<String>,
}

fn default_true() -> bool {
	true
}

pub struct WakeActivationService {
	config: Config,
	client: Client,
	tts_state: TtsState,
	tts_utt_id: Option<String>,
	active_interrupt: Option<InterruptContext>,
	session_counter: u64,
	idle_deadline: Option<TokioInstant>,
	idle_session: Option<u64>,
	interrupt_deadline: Option<TokioInstant>,
}

impl WakeActivationService {
	pub fn new(config: Config, client: Client) -> Self {
		Self {
			config,
			client,
			tts_state: TtsState::Idle,
			tts_utt_id: None,
			active_interrupt: None,
			session_counter: 0,
			idle_deadline: None,
			idle_session: None,
			interrupt_deadline: None,
		}
	}

	/// Runs the service until the process is asked to shut down. Spawns the
	/// audio/detector inference loop as a separate task (it has no shared
	/// mutable state with the arbitration logic beyond a channel of
	/// detections) and drives everything else -- health heartbeat,
	/// `tts/status`, `stt/final`, and the idle/interrupt timers -- from one
	/// select loop so only one event is ever handled at a time.
	pub async fn run(mut self, mut detector: Box<dyn WakeDetector>) -> tars_mqtt::Result<()> {
		if self.config.wait_for_stt_health {
			self.wait_for_stt_health().await;
		}

		self.publish_health().await;

		let tts_status_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.tts_status_topic.clone())?, QoS::AtLeastOnce)])
			.await?;
		let stt_final_sub = self
			.client
			.subscribe(vec![(FilterBuf::new(self.config.stt_final_topic.clone())?, QoS::AtLeastOnce)])
			.await?;

		let (detections_tx, mut detections_rx) = mpsc::channel::<DetectionResult>(8);
		let audio_path = self.config.audio_fanout_path.clone();
		let frame_samples = detector.frame_samples();
		tokio::spawn(async move {
			let mut audio = AudioFanoutClient::new(audio_path, frame_samples);
			loop {
				let Some(frame) = audio.next_frame().await else {
					return;
				};
				if let Some(result) = detector.process_frame(&frame, Instant::now()) {
					if detections_tx.send(result).await.is_err() {
						return;
					}
				}
			}
		});

		let mut tts_status_sub = tts_status_sub;
		let mut stt_final_sub = stt_final_sub;
		let mut health_ticker = tokio::time::interval(Duration::from_secs_f64(self.config.health_interval_sec));
		health_ticker.tick().await;

		loop {
			tokio::select! {
				Some(result) = detections_rx.recv() => {
					self.handle_detection(result).await?;
				}
				msg = tts_status_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					match BareOrEnveloped::<TtsStatus>::decode(&msg.payload) {
						Ok(decoded) => self.handle_tts_status(decoded.into_data()).await,
						Err(error) => tracing::warn!(%error, "invalid tts/status payload"),
					}
				}
				msg = stt_final_sub.recv() => {
					let Some(msg) = msg else { return Ok(()); };
					match BareOrEnveloped::<SttFinalPayload>::decode(&msg.payload) {
						Ok(decoded) => self.handle_stt_final(decoded.into_data()).await?,
						Err(error) => tracing::debug!(%error, "invalid stt/final payload"),
					}
				}
				_ = health_ticker.tick() => {
					self.publish_health().await;
				}
				_ = sleep_until_opt(self.idle_deadline) => {
					self.idle_deadline = None;
					let session = self.idle_session.take();
					self.fire_idle_timeout(session).await;
				}
				_ = sleep_until_opt(self.interrupt_deadline) => {
					self.interrupt_deadline = None;
					self.fire_interrupt_timeout().await;
				}
			}
		}
	}

	async fn publish_health(&self) {
		let envelope = Envelope::new("wake.health", SOURCE, HealthPayload::ok_now());
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.health_topic.clone(), bytes, QoS::AtLeastOnce, true).await;
		}
	}

	async fn publish_wake_event(&self, event: WakeEvent) {
		let envelope = Envelope::new("wake.event", SOURCE, event.clone());
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.wake_event_topic.clone(), bytes, QoS::AtLeastOnce, false).await;
		}
		tracing::info!(?event, "published wake event");
	}

	async fn send_mic_command(&self, command: MicCommand) {
		let envelope = Envelope::new("mic.control", SOURCE, command);
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.mic_control_topic.clone(), bytes, QoS::AtLeastOnce, false).await;
		}
	}

	async fn send_tts_command(&self, command: TtsControl) {
		let envelope = Envelope::new("tts.control", SOURCE, command);
		if let Ok(bytes) = envelope.to_json_bytes() {
			let _ = self.client.publish(self.config.tts_control_topic.clone(), bytes, QoS::AtLeastOnce, false).await;
		}
	}

	fn idle_timeout_ms(&self) -> Option<u64> {
		self.config.idle_timeout().map(|d| d.as_millis() as u64)
	}

	fn next_session_id(&mut self) -> u64 {
		self.session_counter += 1;
		self.session_counter
	}

	async fn handle_detection(&mut self, result: DetectionResult) -> tars_mqtt::Result<()> {
		let confidence = result.confidence.clamp(0.0, 1.0);
		let session_id = self.next_session_id();
		if self.tts_state == TtsState::Speaking {
			self.handle_interrupt_detection(result, confidence, session_id).await;
		} else {
			self.handle_standard_wake(result, confidence, session_id).await;
		}
		Ok(())
	}

	async fn handle_standard_wake(&mut self, result: DetectionResult, confidence: f32, session_id: u64) {
		self.cancel_interrupt_timer();
		self.active_interrupt = None;

		let event = WakeEvent {
			event_type: WakeEventType::Wake,
			confidence: Some(confidence),
			energy: Some(result.energy),
			tts_id: None,
			cause: Some("wake_phrase".into()),
			ts: OffsetDateTime::now_utc(),
		};
		self.publish_wake_event(event).await;

		let ttl_ms = self.idle_timeout_ms();
		self.send_mic_command(MicCommand {
			action: MicAction::Unmute,
			reason: "wake".into(),
			ttl_ms,
		})
		.await;

		tracing::info!(session_id, %confidence, energy = %result.energy, ?ttl_ms, "wake_detected");
		self.schedule_idle_timeout(session_id);
	}

	async fn handle_interrupt_detection(&mut self, result: DetectionResult, confidence: f32, session_id: u64) {
		let tts_id = self.tts_utt_id.clone();

		let event = WakeEvent {
			event_type: WakeEventType::Interrupt,
			confidence: Some(confidence),
			energy: Some(result.energy),
			tts_id: tts_id.clone(),
			cause: Some("double_wake".into()),
			ts: OffsetDateTime::now_utc(),
		};
		self.publish_wake_event(event).await;

		let ttl_ms = self.idle_timeout_ms();
		self.send_mic_command(MicCommand {
			action: MicAction::Unmute,
			reason: "wake".into(),
			ttl_ms,
		})
		.await;

		self.send_tts_command(TtsControl {
			action: TtsAction::Pause,
			reason: "wake_interrupt".into(),
			id: tts_id.clone(),
		})
		.await;

		self.tts_state = TtsState::Paused;
		let window = self.config.interrupt_window().unwrap_or(Duration::from_millis(100));
		let now = Instant::now();
		self.active_interrupt = Some(InterruptContext {
			tts_id: tts_id.clone(),
			started_at: now,
			deadline: now + window,
		});
		self.start_interrupt_timer();

		tracing::info!(session_id, %confidence, energy = %result.energy, ?tts_id, ?ttl_ms, "wake_interrupt");
		self.schedule_idle_timeout(session_id);
	}

	async fn handle_tts_status(&mut self, status: TtsStatus) {
		let utt_id = status.utt_id.filter(|s| !s.is_empty());
		match status.event.as_str() {
			"speaking_start" | "resumed" => {
				self.tts_state = TtsState::Speaking;
				self.tts_utt_id = utt_id;
				self.cancel_interrupt_timer();
				self.active_interrupt = None;
			}
			"paused" => {
				self.tts_state = TtsState::Paused;
				if let Some(id) = utt_id {
					self.tts_utt_id = Some(id);
				}
			}
			"speaking_end" | "stopped" => {
				self.tts_state = TtsState::Idle;
				self.tts_utt_id = None;
				self.active_interrupt = None;
				self.cancel_interrupt_timer();
			}
			_ => {}
		}
	}

	async fn handle_stt_final(&mut self, payload: SttFinalPayload) -> tars_mqtt::Result<()> {
		if self.active_interrupt.is_none() {
			return Ok(());
		}
		if !payload.is_final {
			return Ok(());
		}
		let Some(text) = payload.text.as_deref().filter(|t| !t.trim().is_empty()) else {
			return Ok(());
		};
		let normalized = normalize_phrase(text);
		if normalized.is_empty() {
			return Ok(());
		}

		if cancel_phrases().contains(normalized.as_str()) {
			self.handle_interrupt_cancel(normalized).await;
		} else {
			self.resolve_interrupt_with_speech();
		}
		Ok(())
	}

	async fn handle_interrupt_cancel(&mut self, phrase: String) {
		let Some(context) = self.active_interrupt.clone() else {
			return;
		};
		self.cancel_interrupt_timer();

		self.send_tts_command(TtsControl {
			action: TtsAction::Stop,
			reason: "wake_cancel".into(),
			id: context.tts_id.clone(),
		})
		.await;

		let event = WakeEvent {
			event_type: WakeEventType::Cancelled,
			confidence: None,
			energy: None,
			tts_id: context.tts_id.clone(),
			cause: Some("cancel".into()),
			ts: OffsetDateTime::now_utc(),
		};
		self.publish_wake_event(event).await;

		tracing::info!(tts_id = ?context.tts_id, %phrase, "interrupt_cancelled");
		self.active_interrupt = None;
		self.tts_state = TtsState::Idle;
		self.tts_utt_id = None;
	}

	fn resolve_interrupt_with_speech(&mut self) {
		let Some(context) = self.active_interrupt.take() else {
			return;
		};
		self.cancel_interrupt_timer();
		tracing::info!(tts_id = ?context.tts_id, "interrupt_resolved_by_speech");
		self.tts_state = TtsState::Paused;
		self.tts_utt_id = None;
	}

	fn schedule_idle_timeout(&mut self, session_id: u64) {
		self.idle_deadline = None;
		self.idle_session = None;
		if let Some(timeout) = self.config.idle_timeout() {
			self.idle_deadline = Some(TokioInstant::now() + timeout);
			self.idle_session = Some(session_id);
		}
	}

	async fn fire_idle_timeout(&mut self, session_id: Option<u64>) {
		let context = self.active_interrupt.clone();
		let tts_id = context.as_ref().and_then(|c| c.tts_id.clone());

		let event = WakeEvent {
			event_type: WakeEventType::Timeout,
			confidence: None,
			energy: None,
			tts_id: tts_id.clone(),
			cause: Some("silence".into()),
			ts: OffsetDateTime::now_utc(),
		};
		self.publish_wake_event(event).await;

		let resumed = context.is_some();
		if context.is_some() {
			self.cancel_interrupt_timer();
			self.send_tts_command(TtsControl {
				action: TtsAction::Resume,
				reason: "wake_timeout".into(),
				id: tts_id.clone(),
			})
			.await;
			self.active_interrupt = None;
			self.tts_state = TtsState::Speaking;
			self.tts_utt_id = tts_id.clone();
		} else {
			self.tts_state = TtsState::Idle;
			self.tts_utt_id = None;
		}

		tracing::info!(?session_id, ?tts_id, resumed, "idle_timeout_triggered");
	}

	fn start_interrupt_timer(&mut self) {
		self.interrupt_deadline = None;
		if let Some(context) = &self.active_interrupt {
			self.interrupt_deadline = Some(TokioInstant::now() + context.deadline.saturating_duration_since(context.started_at));
		}
	}

	fn cancel_interrupt_timer(&mut self) {
		self.interrupt_deadline = None;
	}

	async fn fire_interrupt_timeout(&mut self) {
		let Some(context) = self.active_interrupt.take() else {
			return;
		};

		let event = WakeEvent {
			event_type: WakeEventType::Resume,
			confidence: None,
			energy: None,
			tts_id: context.tts_id.clone(),
			cause: Some("timeout".into()),
			ts: OffsetDateTime::now_utc(),
		};
		self.publish_wake_event(event).await;

		self.send_tts_command(TtsControl {
			action: TtsAction::Resume,
			reason: "wake_resume".into(),
			id: context.tts_id.clone(),
		})
		.await;

		self.tts_state = TtsState::Speaking;
		tracing::info!(tts_id = ?context.tts_id, "interrupt_timeout_triggered");
	}

	async fn wait_for_stt_health(&mut self) {
		tracing::info!(topic = %self.config.stt_health_topic, "waiting for stt health");

		let Ok(filter) = FilterBuf::new(self.config.stt_health_topic.clone()) else {
			return;
		};
		let Ok(mut sub) = self.client.subscribe(vec![(filter, QoS::AtLeastOnce)]).await else {
			return;
		};

		#[derive(serde::Deserialize)]
		struct Health {
			ok: bool,
		}

		let timeout = Duration::from_secs_f64(self.config.stt_health_timeout_sec);
		let received = tokio::time::timeout(timeout, async {
			loop {
				let Some(msg) = sub.recv().await else {
					return false;
				};
				if let Ok(decoded) = BareOrEnveloped::<Health>::decode(&msg.payload) {
					if decoded.into_data().ok {
						return true;
					}
				}
			}
		})
		.await
		.unwrap_or(false);

		if !received {
			tracing::warn!(
				timeout_sec = self.config.stt_health_timeout_sec,
				"stt health not received within timeout, starting anyway"
			);
		}

		tokio::time::sleep(Duration::from_secs(2)).await;
	}
}

async fn sleep_until_opt(deadline: Option<TokioInstant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalizes_cancel_phrases() {
		assert_eq!(normalize_phrase("Cancel, please!"), "cancel please");
		assert_eq!(normalize_phrase("  Never   Mind  "), "never mind");
	}

	#[test]
	fn recognizes_cancel_phrase_set() {
		assert!(cancel_phrases().contains("stop it"));
		assert!(!cancel_phrases().contains("play some music"));
	}
}
