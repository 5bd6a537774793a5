//! Shared fixtures for tars-wake's integration tests: a hand-rolled
//! broker-side framing layer built only on tars-proto's public wire codec,
//! plus an `Options`/`Config` pair pointed at loopback endpoints.

use bytes::{Buf, BytesMut};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tars_proto::{FilterBuf, Packet, PacketError, PubAck, Publish, QoS, SubAck};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn read_packet(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<Option<Packet>> {
	loop {
		let mut cursor = Cursor::new(&buffer[..]);
		match Packet::check(&mut cursor) {
			Ok(extent) => {
				cursor.set_position(0);
				let packet = Packet::parse(&mut cursor)?;
				buffer.advance(extent as usize);
				return Ok(Some(packet));
			}
			Err(PacketError::Incomplete) => {}
			Err(error) => return Err(Box::new(error)),
		}

		if 0 == stream.read_buf(buffer).await? {
			return Ok(None);
		}
	}
}

async fn write_packet(stream: &mut TcpStream, packet: &Packet) -> Result<()> {
	let mut buf = BytesMut::new();
	packet.serialize_to_bytes(&mut buf).map_err(|error| format!("{error:?}"))?;
	stream.write_all(&buf).await?;
	stream.flush().await?;
	Ok(())
}

/// A decoded application-level publish, with the QoS 1 ack (if any) already
/// sent by the time it's handed back.
pub struct Received {
	pub topic: String,
	pub payload: bytes::Bytes,
	pub qos: QoS,
}

/// Fake broker, speaking just enough MQTT to drive a worker's client through
/// its handshake and then let a test script its publishes and subscriptions.
pub struct Broker {
	stream: TcpStream,
	buffer: BytesMut,
}

impl Broker {
	pub async fn accept(listener: &TcpListener) -> Self {
		let (stream, _) = listener.accept().await.unwrap();
		Self { stream, buffer: BytesMut::with_capacity(4 * 1024) }
	}

	/// Reads the Connect and replies with a non-resuming ConnAck.
	pub async fn handshake(&mut self) {
		match self.next_packet().await {
			Some(Packet::Connect(_)) => {}
			other => panic!("expected Connect, got {other:?}"),
		}
		self.send_connack().await;
	}

	pub async fn send_connack(&mut self) {
		write_packet(
			&mut self.stream,
			&Packet::ConnAck(tars_proto::ConnAck { session_present: false, code: 0 }),
		)
		.await
		.unwrap();
	}

	async fn next_packet(&mut self) -> Option<Packet> {
		read_packet(&mut self.stream, &mut self.buffer).await.unwrap()
	}

	/// Reads one Subscribe request (single filter) and acks it, returning the
	/// requested filter.
	pub async fn expect_subscribe(&mut self) -> FilterBuf {
		match self.next_packet().await {
			Some(Packet::Subscribe(subscribe)) => {
				assert_eq!(subscribe.filters.len(), 1, "test broker only handles single-filter subscribes");
				let (filter, qos) = subscribe.filters[0].clone();
				write_packet(&mut self.stream, &Packet::SubAck(SubAck { id: subscribe.id, result: vec![Some(qos)] }))
					.await
					.unwrap();
				filter
			}
			other => panic!("expected Subscribe, got {other:?}"),
		}
	}

	/// Reads one Publish, acking it immediately if it's QoS 1.
	pub async fn expect_publish(&mut self) -> Received {
		match self.next_packet().await {
			Some(Packet::Publish(Publish::AtMostOnce { retain: _, topic, payload })) => {
				Received { topic, payload, qos: QoS::AtMostOnce }
			}
			Some(Packet::Publish(Publish::AtLeastOnce { id, retain: _, duplicate: _, topic, payload })) => {
				write_packet(&mut self.stream, &Packet::PubAck(PubAck { id })).await.unwrap();
				Received { topic, payload, qos: QoS::AtLeastOnce }
			}
			other => panic!("expected Publish, got {other:?}"),
		}
	}

	/// Reads and acks publishes until one lands on `topic`, asserting every
	/// intervening publish's topic is in `expected_others` (used to skip past
	/// the periodic health publish without hiding an unexpected one).
	pub async fn expect_publish_on(&mut self, topic: &str, expected_others: &[&str]) -> Received {
		loop {
			let received = self.expect_publish().await;
			if received.topic == topic {
				return received;
			}
			assert!(
				expected_others.contains(&received.topic.as_str()),
				"unexpected publish on {} while waiting for {topic}",
				received.topic
			);
		}
	}

	/// Pushes a bare (un-enveloped) QoS 0 publish to the client, as a test
	/// driver standing in for another worker.
	pub async fn send(&mut self, topic: &str, payload: Vec<u8>) {
		write_packet(
			&mut self.stream,
			&Packet::Publish(Publish::AtMostOnce { retain: false, topic: topic.to_string(), payload: payload.into() }),
		)
		.await
		.unwrap();
	}
}

pub fn base_options(port: u16, client_id: &str) -> tars_mqtt::Options {
	tars_mqtt::Options {
		host: "127.0.0.1".into(),
		port,
		client_id: client_id.into(),
		keep_alive: 60,
		heartbeat_interval: Duration::ZERO,
		..Default::default()
	}
}

pub fn base_config(mqtt_port: u16, audio_path: PathBuf) -> tars_wake::config::Config {
	tars_wake::config::Config {
		mqtt_url: format!("mqtt://127.0.0.1:{mqtt_port}"),
		client_id: "wake-test".into(),
		audio_fanout_path: audio_path,
		wait_for_stt_health: false,
		health_interval_sec: 3600.0,
		..Default::default()
	}
}

pub fn temp_socket_path(name: &str) -> PathBuf {
	let unique = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
	std::env::temp_dir().join(format!("tars-wake-test-{name}-{unique}-{}.sock", std::process::id()))
}
