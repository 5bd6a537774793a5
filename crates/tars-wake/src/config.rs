//! Environment-sourced configuration, mirroring the lenient int/float/bool
//! parsing every TARS worker uses (booleans accept `1|true|yes|on`,
//! case-insensitively).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
	pub mqtt_url: String,
	pub client_id: String,

	pub audio_fanout_path: PathBuf,
	pub sample_rate: u32,
	pub samples_per_chunk: usize,

	pub wake_detection_threshold: f32,
	pub min_retrigger_sec: f64,

	pub interrupt_window_sec: f64,
	pub idle_timeout_sec: f64,

	pub health_topic: String,
	pub health_interval_sec: f64,

	pub wake_event_topic: String,
	pub mic_control_topic: String,
	pub tts_control_topic: String,
	pub tts_status_topic: String,
	pub stt_final_topic: String,

	pub stt_health_topic: String,
	pub wait_for_stt_health: bool,
	pub stt_health_timeout_sec: f64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			mqtt_url: String::from("mqtt://127.0.0.1:1883"),
			client_id: String::from("wake-activation"),
			audio_fanout_path: PathBuf::from("/tmp/tars/audio-fanout.sock"),
			sample_rate: 16_000,
			samples_per_chunk: 1_600,
			wake_detection_threshold: 0.55,
			min_retrigger_sec: 1.0,
			interrupt_window_sec: 2.5,
			idle_timeout_sec: 3.0,
			health_topic: String::from("system/health/wake-activation"),
			health_interval_sec: 15.0,
			wake_event_topic: String::from("wake/event"),
			mic_control_topic: String::from("wake/mic"),
			tts_control_topic: String::from("tts/control"),
			tts_status_topic: String::from("tts/status"),
			stt_final_topic: String::from("stt/final"),
			stt_health_topic: String::from("system/health/tars-stt"),
			wait_for_stt_health: true,
			stt_health_timeout_sec: 30.0,
		}
	}
}

impl Config {
	pub fn from_env() -> Self {
		let default = Self::default();
		Self {
			mqtt_url: env_str("MQTT_URL", &default.mqtt_url),
			client_id: env_str("WAKE_CLIENT_ID", &default.client_id),
			audio_fanout_path: PathBuf::from(env_str(
				"WAKE_AUDIO_FANOUT",
				default.audio_fanout_path.to_string_lossy().as_ref(),
			)),
			sample_rate: env_int("WAKE_SAMPLE_RATE", default.sample_rate),
			samples_per_chunk: env_int("WAKE_SAMPLES_PER_CHUNK", default.samples_per_chunk as u32) as usize,
			wake_detection_threshold: env_float("WAKE_DETECTION_THRESHOLD", default.wake_detection_threshold as f64) as f32,
			min_retrigger_sec: env_float("WAKE_MIN_RETRIGGER_SEC", default.min_retrigger_sec),
			interrupt_window_sec: env_float("WAKE_INTERRUPT_WINDOW_SEC", default.interrupt_window_sec),
			idle_timeout_sec: env_float("WAKE_IDLE_TIMEOUT_SEC", default.idle_timeout_sec),
			health_topic: env_str("WAKE_HEALTH_TOPIC", &default.health_topic),
			health_interval_sec: env_float("WAKE_HEALTH_INTERVAL_SEC", default.health_interval_sec).max(1.0),
			wake_event_topic: env_str("WAKE_EVENT_TOPIC", &default.wake_event_topic),
			mic_control_topic: env_str("WAKE_MIC_TOPIC", &default.mic_control_topic),
			tts_control_topic: env_str("WAKE_TTS_TOPIC", &default.tts_control_topic),
			tts_status_topic: env_str("WAKE_TTS_STATUS_TOPIC", &default.tts_status_topic),
			stt_final_topic: env_str("WAKE_STT_FINAL_TOPIC", &default.stt_final_topic),
			stt_health_topic: env_str("WAKE_STT_HEALTH_TOPIC", &default.stt_health_topic),
			wait_for_stt_health: env_bool("WAKE_WAIT_FOR_STT_HEALTH", default.wait_for_stt_health),
			stt_health_timeout_sec: env_float("WAKE_STT_HEALTH_TIMEOUT_SEC", default.stt_health_timeout_sec),
		}
	}

	pub fn idle_timeout(&self) -> Option<Duration> {
		(self.idle_timeout_sec > 0.0).then(|| Duration::from_secs_f64(self.idle_timeout_sec))
	}

	pub fn interrupt_window(&self) -> Option<Duration> {
		(self.interrupt_window_sec > 0.0).then(|| Duration::from_secs_f64(self.interrupt_window_sec))
	}
}

fn env_str(key: &str, default: &str) -> String {
	env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_int(key: &str, default: u32) -> u32 {
	env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_float(key: &str, default: f64) -> f64 {
	env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
	match env::var(key) {
		Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
		Err(_) => default,
	}
}
