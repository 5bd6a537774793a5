use clap::Parser;
use std::time::Duration;
use tars_mqtt::Options;
use tars_wake::config::Config;
use tars_wake::detector::ThresholdDetector;
use tars_wake::service::WakeActivationService;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	setup_tracing()?;

	let arguments = Arguments::parse();
	let config = Config::from_env();
	let client_id = arguments.id.unwrap_or_else(|| config.client_id.clone());

	let mut options = Options::from_url(&config.mqtt_url, client_id)?;
	options.heartbeat_interval = Duration::from_secs_f64(config.health_interval_sec);

	let (client, handle) = tars_mqtt::client(options);

	let detector = Box::new(ThresholdDetector::new(
		config.wake_detection_threshold,
		config.samples_per_chunk,
		config.sample_rate,
		Duration::from_secs_f64(config.min_retrigger_sec),
	));

	let service = WakeActivationService::new(config, client);
	tokio::select! {
		result = service.run(detector) => result?,
		result = handle => { result??; }
	}

	Ok(())
}

fn setup_tracing() -> Result<(), SetGlobalDefaultError> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::INFO.into())
		.with_env_var("WAKE_LOG")
		.try_from_env();

	let subscriber = tracing_subscriber::fmt()
		.with_file(true)
		.with_target(false)
		.with_env_filter(filter.unwrap_or_default())
		.finish();

	tracing::subscriber::set_global_default(subscriber)
}

#[derive(Debug, Parser)]
#[clap(version, author)]
struct Arguments {
	/// ID to use for this client, overriding WAKE_CLIENT_ID.
	#[arg(long, short = 'i', env = "WAKE_ID")]
	id: Option<String>,
}
