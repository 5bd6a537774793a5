//! # tars-mqtt
//!
//! The reusable substrate every TARS worker process links against: a
//! reconnecting async MQTT client built around an actor task, a topic/event
//! registry mapping domain event names to their MQTT topics, a deduplication
//! cache, and a correlation registry used to turn the request/response
//! conventions of the bus (RAG queries, tool calls) into ordinary futures.

mod client;
mod command;
mod connection;
pub mod correlation;
pub mod dedup;
mod heartbeat;
pub mod registry;
mod state;
mod task;

pub use client::{Client, ClientError, Message, Subscription};
pub use heartbeat::HeartbeatHandle;
pub use tars_proto::{FilterBuf, PacketId, QoS};

use std::time::Duration;
use tars_proto::{Credentials as _ProtoCreds, Will as _ProtoWill};
use tokio::task::JoinHandle;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Connection and session options for a [`Client`], grounded on the field
/// names of the MQTT client this workspace's workers all embed.
#[derive(Debug, Clone)]
pub struct Options {
	pub host: String,
	pub port: u16,
	pub tls: bool,
	pub keep_alive: u16,
	pub clean_session: bool,
	pub client_id: String,
	pub credentials: Option<Credentials>,
	pub will: Option<Will>,

	/// Time-to-live for entries in the inbound dedup cache. Dedup is
	/// disabled unless this and [`Options::dedup_max_entries`] are both
	/// non-zero.
	pub dedup_ttl: Duration,
	pub dedup_max_entries: usize,

	/// Interval between application-level heartbeat publishes to
	/// `system/keepalive/<client_id>`. Three consecutive missed publishes
	/// force a reconnect. Zero disables the heartbeat loop entirely.
	pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Credentials {
	pub username: String,
	pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Will {
	pub topic: String,
	pub payload: bytes::Bytes,
	pub qos: QoS,
	pub retain: bool,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			host: String::from("127.0.0.1"),
			port: 1883,
			tls: false,
			keep_alive: 60,
			clean_session: true,
			client_id: String::new(),
			credentials: None,
			will: None,
			dedup_ttl: Duration::ZERO,
			dedup_max_entries: 0,
			heartbeat_interval: Duration::from_secs(15),
		}
	}
}

impl Options {
	/// Parses `mqtt://host[:port]` or `mqtts://host[:port]` into the host,
	/// port and tls fields of an [`Options`], matching the `MQTT_URL`
	/// configuration contract every worker exposes.
	pub fn from_url(url: &str, client_id: impl Into<String>) -> Result<Self> {
		let (scheme, rest) = url.split_once("://").ok_or("missing scheme in MQTT_URL")?;
		let tls = match scheme {
			"mqtt" => false,
			"mqtts" => true,
			other => return Err(format!("unsupported MQTT_URL scheme: {other}").into()),
		};

		let (host, port) = match rest.split_once(':') {
			Some((host, port)) => (host.to_string(), port.parse::<u16>()?),
			None => (rest.to_string(), if tls { 8883 } else { 1883 }),
		};

		Ok(Self {
			host,
			port,
			tls,
			client_id: client_id.into(),
			..Default::default()
		})
	}
}

pub(crate) fn into_proto_credentials(c: Credentials) -> _ProtoCreds {
	_ProtoCreds {
		username: c.username,
		password: c.password,
	}
}

pub(crate) fn into_proto_will(w: Will) -> _ProtoWill {
	_ProtoWill {
		topic: w.topic,
		payload: w.payload,
		qos: w.qos,
		retain: w.retain,
	}
}

/// Spawns the client task and returns a [`Client`] handle to it. The
/// returned `JoinHandle` resolves once the client shuts down, either because
/// [`Client::disconnect`] was called or every clone of the handle (and every
/// [`Subscription`]) was dropped.
///
/// Also spawns the application-level heartbeat loop when
/// [`Options::heartbeat_interval`] is non-zero, supervised alongside the
/// client task rather than left detached: it's stopped the moment the
/// client task itself returns.
pub fn client(options: Options) -> (Client, JoinHandle<Result<()>>) {
	let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
	let client = Client::new(tx);

	let heartbeat_interval = options.heartbeat_interval;
	let client_id = options.client_id.clone();
	let heartbeat_client = client.clone();

	let handle = tokio::spawn(async move {
		let heartbeat = (heartbeat_interval > Duration::ZERO)
			.then(|| crate::heartbeat::HeartbeatHandle::spawn(heartbeat_client, client_id, heartbeat_interval));

		let result = task::client_task(options, rx).await;
		if let Some(heartbeat) = heartbeat {
			heartbeat.stop();
		}
		result
	});

	(client, handle)
}
