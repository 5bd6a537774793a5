use clap::Parser;
use std::time::Duration;
use tars_llm::config::Config;
use tars_llm::provider::EchoProvider;
use tars_llm::service::LlmService;
use tars_mqtt::Options;
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

	let service = LlmService::new(config, client, Box::new(EchoProvider));
	tokio::select! {
		result = service.run() => result?,
		result = handle => { result??; }
	}

	Ok(())
}

fn setup_tracing() -> Result<(), SetGlobalDefaultError> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::INFO.into())
		.with_env_var("LLM_LOG")
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
	/// ID to use for this client, overriding LLM_CLIENT_ID.
	#[arg(long, short = 'i', env = "LLM_ID")]
	id: Option<String>,
}
