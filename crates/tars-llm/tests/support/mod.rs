//! Shared fixtures for tars-llm's integration tests: a hand-rolled
//! broker-side framing layer built only on tars-proto's public wire codec.

use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;
use std::time::Duration;
use tars_proto::{Packet, PacketError, PubAck, Publish, QoS, SubAck};
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

pub struct Received {
	pub topic: String,
	pub payload: Bytes,
}

pub struct Broker {
	stream: TcpStream,
	buffer: BytesMut,
}

impl Broker {
	pub async fn accept(listener: &TcpListener) -> Self {
		let (stream, _) = listener.accept().await.unwrap();
		Self { stream, buffer: BytesMut::with_capacity(4 * 1024) }
	}

	pub async fn handshake(&mut self) {
		match self.next_packet().await {
			Some(Packet::Connect(_)) => {}
			other => panic!("expected Connect, got {other:?}"),
		}
		write_packet(&mut self.stream, &Packet::ConnAck(tars_proto::ConnAck { session_present: false, code: 0 }))
			.await
			.unwrap();
	}

	async fn next_packet(&mut self) -> Option<Packet> {
		read_packet(&mut self.stream, &mut self.buffer).await.unwrap()
	}

	/// Reads and acks `count` Subscribe requests, in whatever order the
	/// service issues them.
	pub async fn expect_subscribes(&mut self, count: usize) {
		for _ in 0..count {
			match self.next_packet().await {
				Some(Packet::Subscribe(subscribe)) => {
					let result = subscribe.filters.iter().map(|(_, qos)| Some(*qos)).collect();
					write_packet(&mut self.stream, &Packet::SubAck(SubAck { id: subscribe.id, result })).await.unwrap();
				}
				other => panic!("expected Subscribe, got {other:?}"),
			}
		}
	}

	pub async fn expect_publish(&mut self) -> Received {
		match self.next_packet().await {
			Some(Packet::Publish(Publish::AtMostOnce { retain: _, topic, payload })) => Received { topic, payload },
			Some(Packet::Publish(Publish::AtLeastOnce { id, retain: _, duplicate: _, topic, payload })) => {
				write_packet(&mut self.stream, &Packet::PubAck(PubAck { id })).await.unwrap();
				Received { topic, payload }
			}
			other => panic!("expected Publish, got {other:?}"),
		}
	}

	/// Reads and acks publishes until one lands on `topic`, asserting every
	/// intervening publish's topic is in `expected_others`.
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

pub fn base_config(mqtt_port: u16) -> tars_llm::config::Config {
	tars_llm::config::Config {
		mqtt_url: format!("mqtt://127.0.0.1:{mqtt_port}"),
		client_id: "llm-test".into(),
		health_interval_sec: 3600.0,
		..Default::default()
	}
}
