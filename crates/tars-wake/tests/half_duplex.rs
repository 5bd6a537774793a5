mod support;

use std::time::Duration;
use support::{base_config, base_options, temp_socket_path, Broker};
use tars_proto::BareOrEnveloped;
use tars_wake::detector::{DetectionResult, WakeDetector};
use tars_wake::models::{MicCommand, TtsControl, WakeEvent, WakeEventType};
use tars_wake::service::WakeActivationService;
use tokio::net::{TcpListener, UnixListener};

/// Fires exactly one detection on its first frame, then never again --
/// standing in for a trained wake-word model so tests can drive the
/// arbitration state machine without real audio inference.
struct OneShotDetector {
	fired: bool,
}

impl OneShotDetector {
	fn new() -> Self {
		Self { fired: false }
	}
}

impl WakeDetector for OneShotDetector {
	fn process_frame(&mut self, _frame: &[f32], _now: std::time::Instant) -> Option<DetectionResult> {
		if self.fired {
			return None;
		}
		self.fired = true;
		Some(DetectionResult { confidence: 0.9, energy: 0.8 })
	}

	fn frame_samples(&self) -> usize {
		160
	}

	fn sample_rate(&self) -> u32 {
		16_000
	}
}

async fn start(
	name: &str,
	config_overrides: impl FnOnce(tars_wake::config::Config) -> tars_wake::config::Config,
) -> (Broker, UnixListener, tokio::task::JoinHandle<()>) {
	let mqtt_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let mqtt_port = mqtt_listener.local_addr().unwrap().port();
	let audio_path = temp_socket_path(name);
	let audio_listener = UnixListener::bind(&audio_path).unwrap();

	let config = config_overrides(base_config(mqtt_port, audio_path));
	let (client, _handle) = tars_mqtt::client(base_options(mqtt_port, &config.client_id));
	let service = WakeActivationService::new(config, client);

	let run = tokio::spawn(async move {
		let _ = service.run(Box::new(OneShotDetector::new())).await;
	});

	let broker = Broker::accept(&mqtt_listener).await;
	(broker, audio_listener, run)
}

/// Writes one frame of silence down the audio fan-out socket. `OneShotDetector`
/// ignores the actual samples, so the content doesn't matter -- only that a
/// frame of the right size arrives.
async fn trigger_detection(audio_listener: &UnixListener) {
	use tokio::io::AsyncWriteExt;
	let (mut stream, _) = audio_listener.accept().await.unwrap();
	stream.write_all(&[0u8; 160 * 2]).await.unwrap();
	// Hold the connection open; the detector task blocks on its next read,
	// which is fine since it only ever needed the one frame.
	std::mem::forget(stream);
}

fn decode_wake_event(payload: &[u8]) -> WakeEvent {
	BareOrEnveloped::<WakeEvent>::decode(payload).unwrap().into_data()
}

fn decode_mic_command(payload: &[u8]) -> MicCommand {
	BareOrEnveloped::<MicCommand>::decode(payload).unwrap().into_data()
}

fn decode_tts_control(payload: &[u8]) -> TtsControl {
	BareOrEnveloped::<TtsControl>::decode(payload).unwrap().into_data()
}

/// A standard wake (no TTS in progress) unmutes the mic and, absent any
/// follow-up speech, lets the idle timeout fire and return the session to
/// idle -- without ever touching TTS control.
#[tokio::test]
async fn standard_wake_runs_to_idle_timeout() {
	let (mut broker, audio_listener, run) = start("standard-wake", |config| tars_wake::config::Config {
		idle_timeout_sec: 0.05,
		..config
	})
	.await;

	broker.handshake().await;
	broker.expect_publish_on("system/health/wake-activation", &[]).await;
	broker.expect_subscribe().await;
	broker.expect_subscribe().await;

	trigger_detection(&audio_listener).await;

	let wake = decode_wake_event(&broker.expect_publish_on("wake/event", &[]).await.payload);
	assert_eq!(wake.event_type, WakeEventType::Wake);
	assert_eq!(wake.cause.as_deref(), Some("wake_phrase"));
	assert!(wake.tts_id.is_none());

	let mic = decode_mic_command(&broker.expect_publish_on("wake/mic", &[]).await.payload);
	assert!(matches!(mic.action, tars_wake::models::MicAction::Unmute));

	let timeout = decode_wake_event(&broker.expect_publish_on("wake/event", &[]).await.payload);
	assert_eq!(timeout.event_type, WakeEventType::Timeout);
	assert!(timeout.tts_id.is_none(), "a standard wake has no interrupt context to resume");

	run.abort();
}

/// A wake while TTS is speaking pauses it instead of unmuting blind, and a
/// recognized cancel phrase on `stt/final` stops the utterance for good
/// rather than letting it resume.
#[tokio::test]
async fn interrupt_then_cancel_phrase_stops_tts() {
	let (mut broker, audio_listener, run) = start("interrupt-cancel", |config| tars_wake::config::Config {
		idle_timeout_sec: 5.0,
		interrupt_window_sec: 5.0,
		..config
	})
	.await;

	broker.handshake().await;
	broker.expect_publish_on("system/health/wake-activation", &[]).await;
	broker.expect_subscribe().await;
	broker.expect_subscribe().await;

	broker.send("tts/status", serde_json::to_vec(&serde_json::json!({"event": "speaking_start", "utt_id": "utt-1"})).unwrap()).await;

	trigger_detection(&audio_listener).await;

	let wake = decode_wake_event(&broker.expect_publish_on("wake/event", &["system/health/wake-activation"]).await.payload);
	assert_eq!(wake.event_type, WakeEventType::Interrupt);
	assert_eq!(wake.tts_id.as_deref(), Some("utt-1"));

	decode_mic_command(&broker.expect_publish_on("wake/mic", &[]).await.payload);

	let pause = decode_tts_control(&broker.expect_publish_on("tts/control", &[]).await.payload);
	assert!(matches!(pause.action, tars_wake::models::TtsAction::Pause));
	assert_eq!(pause.id.as_deref(), Some("utt-1"));

	broker
		.send("stt/final", serde_json::to_vec(&serde_json::json!({"is_final": true, "text": "cancel"})).unwrap())
		.await;

	let stop = decode_tts_control(&broker.expect_publish_on("tts/control", &[]).await.payload);
	assert!(matches!(stop.action, tars_wake::models::TtsAction::Stop));
	assert_eq!(stop.id.as_deref(), Some("utt-1"));

	let cancelled = decode_wake_event(&broker.expect_publish_on("wake/event", &[]).await.payload);
	assert_eq!(cancelled.event_type, WakeEventType::Cancelled);
	assert_eq!(cancelled.tts_id.as_deref(), Some("utt-1"));

	run.abort();
}

/// Absent any speech during the interrupt window, TTS resumes on its own once
/// the window elapses.
#[tokio::test]
async fn interrupt_timeout_resumes_tts() {
	let (mut broker, audio_listener, run) = start("interrupt-timeout", |config| tars_wake::config::Config {
		idle_timeout_sec: 5.0,
		interrupt_window_sec: 0.05,
		..config
	})
	.await;

	broker.handshake().await;
	broker.expect_publish_on("system/health/wake-activation", &[]).await;
	broker.expect_subscribe().await;
	broker.expect_subscribe().await;

	broker.send("tts/status", serde_json::to_vec(&serde_json::json!({"event": "speaking_start", "utt_id": "utt-2"})).unwrap()).await;

	trigger_detection(&audio_listener).await;

	decode_wake_event(&broker.expect_publish_on("wake/event", &["system/health/wake-activation"]).await.payload);
	decode_mic_command(&broker.expect_publish_on("wake/mic", &[]).await.payload);
	decode_tts_control(&broker.expect_publish_on("tts/control", &[]).await.payload);

	let resume_event = decode_wake_event(&broker.expect_publish_on("wake/event", &[]).await.payload);
	assert_eq!(resume_event.event_type, WakeEventType::Resume);
	assert_eq!(resume_event.tts_id.as_deref(), Some("utt-2"));

	let resume_cmd = decode_tts_control(&broker.expect_publish_on("tts/control", &[]).await.payload);
	assert!(matches!(resume_cmd.action, tars_wake::models::TtsAction::Resume));
	assert_eq!(resume_cmd.id.as_deref(), Some("utt-2"));

	run.abort();
}
