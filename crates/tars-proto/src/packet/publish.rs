use super::{get_id, get_slice, get_str, put_slice, put_str, put_u16, put_u8, put_var, Error, WriteError};
use crate::{PacketId, QoS};
use bytes::{Buf, BufMut, Bytes};
use core::fmt;
use std::io;

const HEADER: u8 = 0x30;
const FLAG_RETAIN: u8 = 0x01;
const FLAG_DUPLICATE: u8 = 0x08;
const MASK_QOS: u8 = 0x06;

/// A Publish packet. TARS only ever produces [`Publish::AtMostOnce`] (plain
/// telemetry) and [`Publish::AtLeastOnce`] (acknowledged commands/events) --
/// QoS 2 is not part of the protocol this workspace speaks.
pub enum Publish {
	AtMostOnce {
		retain: bool,
		topic: String,
		payload: Bytes,
	},
	AtLeastOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: String,
		payload: Bytes,
	},
}

#[derive(Debug)]
pub struct PubAck {
	pub id: PacketId,
}

impl Publish {
	pub fn parse(payload: &[u8], flags: u8) -> Result<Self, Error> {
		let mut cursor = io::Cursor::new(payload);
		let retain = flags & FLAG_RETAIN == FLAG_RETAIN;
		let duplicate = flags & FLAG_DUPLICATE == FLAG_DUPLICATE;
		let qos: QoS = ((flags & MASK_QOS) >> 1).try_into()?;

		let topic = String::from(get_str(&mut cursor)?);

		match qos {
			QoS::AtMostOnce => {
				if duplicate {
					return Err(Error::MalformedPacket(
						"duplicate flag must be 0 for Publish packets with QoS of AtMostOnce",
					));
				}
				let remaining = cursor.remaining();
				let payload = Bytes::from(get_slice(&mut cursor, remaining)?.to_vec());
				Ok(Self::AtMostOnce { retain, topic, payload })
			}
			QoS::AtLeastOnce => {
				let id = get_id(&mut cursor)?;
				let remaining = cursor.remaining();
				let payload = Bytes::from(get_slice(&mut cursor, remaining)?.to_vec());
				Ok(Self::AtLeastOnce {
					id,
					retain,
					duplicate,
					topic,
					payload,
				})
			}
		}
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), WriteError> {
		match self {
			Self::AtMostOnce { retain, topic, payload } => {
				let flags = retain.then_some(FLAG_RETAIN).unwrap_or(0) | (QoS::AtMostOnce as u8) << 1;
				put_u8(dst, HEADER | flags)?;
				put_var(dst, 2 + topic.len() + payload.len())?;
				put_str(dst, topic)?;
				put_slice(dst, payload)?;
			}
			Self::AtLeastOnce {
				id,
				retain,
				duplicate,
				topic,
				payload,
			} => {
				let flags = retain.then_some(FLAG_RETAIN).unwrap_or(0)
					| duplicate.then_some(FLAG_DUPLICATE).unwrap_or(0)
					| (QoS::AtLeastOnce as u8) << 1;
				put_u8(dst, HEADER | flags)?;
				put_var(dst, 4 + topic.len() + payload.len())?;
				put_str(dst, topic)?;
				put_u16(dst, id.get())?;
				put_slice(dst, payload)?;
			}
		}

		Ok(())
	}

	#[inline(always)]
	pub fn topic(&self) -> &str {
		match self {
			Self::AtMostOnce { topic, .. } => topic,
			Self::AtLeastOnce { topic, .. } => topic,
		}
	}

	#[inline(always)]
	pub fn payload(&self) -> &Bytes {
		match self {
			Self::AtMostOnce { payload, .. } => payload,
			Self::AtLeastOnce { payload, .. } => payload,
		}
	}

	#[inline(always)]
	pub fn qos(&self) -> QoS {
		match self {
			Self::AtMostOnce { .. } => QoS::AtMostOnce,
			Self::AtLeastOnce { .. } => QoS::AtLeastOnce,
		}
	}

	#[inline(always)]
	pub fn retain(&self) -> bool {
		match self {
			Self::AtMostOnce { retain, .. } => *retain,
			Self::AtLeastOnce { retain, .. } => *retain,
		}
	}

	/// The packet ID. Always `None` for [`Publish::AtMostOnce`].
	#[inline(always)]
	pub fn id(&self) -> Option<PacketId> {
		match self {
			Self::AtMostOnce { .. } => None,
			Self::AtLeastOnce { id, .. } => Some(*id),
		}
	}

	#[inline(always)]
	pub fn duplicate(&self) -> bool {
		match self {
			Self::AtMostOnce { .. } => false,
			Self::AtLeastOnce { duplicate, .. } => *duplicate,
		}
	}
}

impl fmt::Debug for Publish {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publish")
			.field("id", &self.id())
			.field("qos", &self.qos())
			.field("retain", &self.retain())
			.field("duplicate", &self.duplicate())
			.field("topic", &self.topic())
			.field("payload_len", &self.payload().len())
			.finish()
	}
}

impl PubAck {
	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), WriteError> {
		put_u8(dst, 0x40)?;
		put_var(dst, 2)?;
		put_u16(dst, self.id.get())?;
		Ok(())
	}
}
