//! Shared fixtures for tars-mqtt's integration tests: a hand-rolled
//! broker-side framing layer built only on tars-proto's public wire codec
//! (the crate's own `Connection` type is private), plus an `Options` builder
//! pointed at a loopback listener.

use bytes::{Buf, BytesMut};
use std::io::Cursor;
use std::time::Duration;
use tars_proto::{Packet, PacketError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Reads a single packet from a raw broker-side socket, growing `buffer` with
/// whatever's needed. Mirrors `tars_mqtt::connection::Connection::read_packet`
/// closely enough to exercise the same wire format, without reaching into the
/// crate's private framing.
pub async fn read_packet(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<Option<Packet>> {
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

pub async fn write_packet(stream: &mut TcpStream, packet: &Packet) -> Result<()> {
	let mut buf = BytesMut::new();
	packet
		.serialize_to_bytes(&mut buf)
		.map_err(|error| format!("{error:?}"))?;
	stream.write_all(&buf).await?;
	stream.flush().await?;
	Ok(())
}

/// Bare-bones client options pointed at a loopback broker, with the
/// heartbeat disabled by default so tests opt into it explicitly.
pub fn base_options(port: u16) -> tars_mqtt::Options {
	tars_mqtt::Options {
		host: "127.0.0.1".into(),
		port,
		client_id: "test-client".into(),
		keep_alive: 60,
		heartbeat_interval: Duration::ZERO,
		..Default::default()
	}
}
