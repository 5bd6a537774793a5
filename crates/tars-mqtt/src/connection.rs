use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tars_proto::{Packet, PacketError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames [`Packet`]s over any `AsyncRead`/`AsyncWrite` transport (plain TCP
/// or a TLS stream). Owns the read buffer so partial reads across multiple
/// `poll`s are assembled transparently.
#[derive(Debug)]
pub struct Connection<T> {
	stream: T,
	buffer: BytesMut,
}

impl<T> Connection<T> {
	pub fn new(stream: T, capacity: usize) -> Self {
		Self {
			stream,
			buffer: BytesMut::with_capacity(capacity),
		}
	}

	fn parse_packet(&mut self) -> Result<Option<Packet>, PacketError> {
		use PacketError::Incomplete;

		let mut cursor = Cursor::new(&self.buffer[..]);
		match Packet::check(&mut cursor) {
			Ok(extent) => {
				cursor.set_position(0);
				let packet = Packet::parse(&mut cursor)?;
				self.buffer.advance(extent as usize);
				Ok(Some(packet))
			}
			Err(Incomplete) => Ok(None),
			Err(error) => Err(error),
		}
	}
}

impl<T: AsyncRead + Unpin> Connection<T> {
	/// Reads a single [`Packet`] from the stream, returning `Ok(None)` on a
	/// clean peer shutdown between packets.
	pub async fn read_packet(&mut self) -> crate::Result<Option<Packet>> {
		loop {
			if let Some(packet) = self.parse_packet()? {
				tracing::trace!(?packet, "received packet");
				return Ok(Some(packet));
			}

			if 0 == self.stream.read_buf(&mut self.buffer).await? {
				if self.buffer.is_empty() {
					return Ok(None);
				} else {
					return Err("connection reset by peer".into());
				}
			}
		}
	}
}

impl<T: AsyncWrite + Unpin> Connection<T> {
	pub async fn write_packet(&mut self, packet: &Packet) -> crate::Result<()> {
		let mut buf = BytesMut::new();
		packet
			.serialize_to_bytes(&mut buf)
			.map_err(|e| format!("{e:?}"))?;

		self.stream.write_all(&buf).await?;
		self.stream.flush().await?;

		tracing::trace!(?packet, "wrote packet");
		Ok(())
	}

	pub async fn flush(&mut self) -> crate::Result<()> {
		Ok(self.stream.flush().await?)
	}
}
