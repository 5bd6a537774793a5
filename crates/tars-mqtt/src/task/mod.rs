mod holdoff;

use crate::command::{Command, CommandRx};
use crate::connection::Connection;
use crate::state::State;
use crate::{into_proto_credentials, into_proto_will, Options};
use holdoff::HoldOff;
use std::time::Duration;
use tars_proto::{ConnAck, Connect, Packet};
use tokio::{
	io::{AsyncRead, AsyncWrite},
	net::TcpStream,
	time::{self, Instant},
};

const HOLDOFF_MIN: Duration = Duration::from_millis(50);
const HOLDOFF_MAX: Duration = Duration::from_secs(30);

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send {}
impl AsyncReadWrite for TcpStream {}
#[cfg(feature = "tls")]
impl AsyncReadWrite for tokio_rustls::client::TlsStream<TcpStream> {}

#[tracing::instrument(skip(options, rx), err)]
pub async fn client_task(options: Options, mut rx: CommandRx) -> crate::Result<()> {
	let connect: Packet = Connect {
		client_id: options.client_id.clone(),
		keep_alive: options.keep_alive,
		clean_session: options.clean_session,
		credentials: options.credentials.clone().map(into_proto_credentials),
		will: options.will.clone().map(into_proto_will),
		..Default::default()
	}
	.into();

	let keep_alive_duration = Duration::from_secs(options.keep_alive.max(1) as u64);
	let dedup = crate::dedup::DedupCache::new(options.dedup_ttl, options.dedup_max_entries);
	let mut client_state = State::new(dedup);
	let mut holdoff = HoldOff::new(HOLDOFF_MIN..HOLDOFF_MAX.min(keep_alive_duration.max(HOLDOFF_MIN)));

	loop {
		holdoff.wait_and_increase_with(|delay| delay * 2).await;
		tracing::debug!(?holdoff, "connecting");

		let Ok(stream) = TcpStream::connect((options.host.as_str(), options.port)).await else {
			tracing::warn!(host = %options.host, port = options.port, "failed to connect");
			continue;
		};
		let _ = stream.set_nodelay(true);

		let mut connection = match open_connection(stream, &options).await {
			Ok(connection) => connection,
			Err(error) => {
				tracing::warn!(%error, "failed to establish transport");
				continue;
			}
		};

		if connection.write_packet(&connect).await.is_err() {
			continue;
		}

		let mut resubscribe_packets = match wait_for_connack(&mut connection, keep_alive_duration).await {
			Ok(ConnAckResult::Continue { session_present }) => {
				tracing::info!(session_present, "connected");
				holdoff.reset();
				client_state.connected(session_present)
			}
			Ok(ConnAckResult::Timeout) => {
				tracing::warn!("timeout waiting for ConnAck");
				continue;
			}
			Err(error) => {
				tracing::error!(%error, "connect rejected");
				continue;
			}
		};

		let mut resubscribe_failed = false;
		for packet in resubscribe_packets.drain(..) {
			if connection.write_packet(&packet).await.is_err() {
				resubscribe_failed = true;
				break;
			}
			match connection.read_packet().await {
				Ok(Some(suback @ Packet::SubAck(_))) => {
					if let Err(error) = client_state.process_incoming_packet(suback).await {
						tracing::error!(%error, "failed to process resubscribe SubAck");
						resubscribe_failed = true;
						break;
					}
				}
				_ => {
					tracing::error!("failed to read SubAck during resubscribe");
					holdoff.increase_with(|delay| delay * 4);
					resubscribe_failed = true;
					break;
				}
			}
		}
		if resubscribe_failed {
			continue;
		}

		let mut keep_alive = time::interval(keep_alive_duration);
		let _ = keep_alive.tick().await;
		let mut awaiting_pingresp = false;

		loop {
			tokio::select! {
				command = rx.recv() => {
					let Some(command) = command else {
						tracing::warn!("command channel closed, ending client task");
						return Ok(());
					};
					tracing::trace!(?command, "processing command");

					if let Command::Shutdown = command {
						let _ = connection.write_packet(&Packet::Disconnect).await;
						return Ok(());
					}

					if let Command::Reconnect = command {
						tracing::warn!("forced reconnect requested");
						let _ = connection.write_packet(&Packet::Disconnect).await;
						break;
					}

					if let Some(packet) = client_state.process_client_command(command) {
						if connection.write_packet(&packet).await.is_err() {
							break;
						}
					}
				}
				packet = connection.read_packet() => {
					let packet = match packet {
						Ok(Some(packet)) => packet,
						Ok(None) => {
							tracing::warn!("connection reset by peer");
							break;
						}
						Err(error) => {
							tracing::warn!(%error, "read error");
							break;
						}
					};

					if matches!(packet, Packet::PingResp) {
						awaiting_pingresp = false;
						continue;
					}

					match client_state.process_incoming_packet(packet).await {
						Ok(Some(reply)) => {
							if connection.write_packet(&reply).await.is_err() {
								break;
							}
						}
						Ok(None) => {}
						Err(error) => {
							tracing::error!(%error, "protocol error, reconnecting");
							break;
						}
					}
				}
				_ = keep_alive.tick() => {
					if awaiting_pingresp {
						tracing::warn!("no PingResp since last keep-alive tick, reconnecting");
						break;
					}
					awaiting_pingresp = true;
					if connection.write_packet(&Packet::PingReq).await.is_err() {
						break;
					}
				}
			}
		}
	}
}

enum ConnAckResult {
	Continue { session_present: bool },
	Timeout,
}

async fn wait_for_connack<T: AsyncRead + AsyncWrite + Unpin>(
	connection: &mut Connection<T>,
	timeout: Duration,
) -> crate::Result<ConnAckResult> {
	let mut timeout = time::interval_at(Instant::now() + timeout, timeout);
	tokio::select! {
		packet = connection.read_packet() => {
			match packet? {
				Some(Packet::ConnAck(ConnAck { session_present, code })) if code == 0 => {
					Ok(ConnAckResult::Continue { session_present })
				}
				Some(Packet::ConnAck(_)) => Err("connect rejected by broker".into()),
				Some(_) => Err("protocol error: expected ConnAck".into()),
				None => Ok(ConnAckResult::Timeout),
			}
		}
		_ = timeout.tick() => Ok(ConnAckResult::Timeout),
	}
}

#[cfg(feature = "tls")]
async fn open_connection(stream: TcpStream, options: &Options) -> crate::Result<Connection<Box<dyn AsyncReadWrite + Unpin>>> {
	if options.tls {
		use std::sync::Arc;
		use tokio_rustls::{rustls::ServerName, TlsConnector};

		let connector = TlsConnector::from(Arc::new(tls::client_config()));
		let server_name = ServerName::try_from(options.host.as_str()).map_err(|_| "invalid DNS name for TLS")?;
		let stream = connector.connect(server_name, stream).await?;
		Ok(Connection::new(Box::new(stream), 8 * 1024))
	} else {
		Ok(Connection::new(Box::new(stream), 8 * 1024))
	}
}

#[cfg(not(feature = "tls"))]
async fn open_connection(stream: TcpStream, options: &Options) -> crate::Result<Connection<Box<dyn AsyncReadWrite + Unpin>>> {
	if options.tls {
		return Err("TLS requested but the \"tls\" feature is disabled".into());
	}
	Ok(Connection::new(Box::new(stream), 8 * 1024))
}

#[cfg(feature = "tls")]
mod tls {
	use tokio_rustls::rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};

	pub fn client_config() -> ClientConfig {
		let mut roots = RootCertStore::empty();
		roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
			OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
		}));

		ClientConfig::builder()
			.with_safe_defaults()
			.with_root_certificates(roots)
			.with_no_client_auth()
	}
}
