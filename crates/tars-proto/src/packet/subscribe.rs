use super::{get_id, get_str, get_u8, put_str, put_u16, put_u8, put_var, Error, WriteError};
use crate::{FilterBuf, PacketId, QoS};
use bytes::{Buf, BufMut};
use std::io;

#[derive(Debug)]
pub struct Subscribe {
	pub id: PacketId,
	pub filters: Vec<(FilterBuf, QoS)>,
}

#[derive(Debug)]
pub struct SubAck {
	pub id: PacketId,
	pub result: Vec<Option<QoS>>,
}

#[derive(Debug)]
pub struct Unsubscribe {
	pub id: PacketId,
	pub filters: Vec<FilterBuf>,
}

#[derive(Debug)]
pub struct UnsubAck {
	pub id: PacketId,
}

impl Subscribe {
	pub fn parse(payload: &[u8]) -> Result<Self, Error> {
		let mut cursor = io::Cursor::new(payload);
		let id = get_id(&mut cursor)?;

		let mut filters = Vec::new();
		while cursor.has_remaining() {
			let filter = get_str(&mut cursor)?;
			let qos: QoS = get_u8(&mut cursor)?.try_into()?;
			filters.push((FilterBuf::new(filter)?, qos));
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), WriteError> {
		put_u8(dst, 0x82)?;

		let len = 2 + self
			.filters
			.iter()
			.fold(0usize, |acc, (filter, _)| acc + 2 + filter.len() + 1);

		put_var(dst, len)?;
		put_u16(dst, self.id.get())?;
		for (filter, qos) in &self.filters {
			put_str(dst, filter.as_str())?;
			put_u8(dst, *qos as u8)?;
		}

		Ok(())
	}
}

impl SubAck {
	pub fn parse(payload: &[u8]) -> Result<Self, Error> {
		let mut cursor = io::Cursor::new(payload);
		let id = get_id(&mut cursor)?;

		let mut result = Vec::new();
		while cursor.has_remaining() {
			let return_code = get_u8(&mut cursor)?;
			let qos: Option<QoS> = match return_code.try_into() {
				Ok(qos) => Some(qos),
				Err(_) => {
					if return_code == 0x80 {
						None
					} else {
						return Err(Error::MalformedPacket("invalid return code in SubAck"));
					}
				}
			};
			result.push(qos);
		}

		Ok(Self { id, result })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), WriteError> {
		put_u8(dst, 0x90)?;

		let len = 2 + self.result.len();

		put_var(dst, len)?;
		put_u16(dst, self.id.get())?;
		for qos in &self.result {
			put_u8(dst, qos.map(|qos| qos as u8).unwrap_or(0x80))?;
		}

		Ok(())
	}
}

impl Unsubscribe {
	pub fn parse(payload: &[u8]) -> Result<Self, Error> {
		let mut cursor = io::Cursor::new(payload);
		let id = get_id(&mut cursor)?;

		let mut filters = Vec::new();
		while cursor.has_remaining() {
			let filter = get_str(&mut cursor)?;
			filters.push(FilterBuf::new(filter)?);
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), WriteError> {
		put_u8(dst, 0xa2)?;

		let len = 2 + self
			.filters
			.iter()
			.fold(0usize, |acc, filter| acc + 2 + filter.len());

		put_var(dst, len)?;
		put_u16(dst, self.id.get())?;
		for filter in &self.filters {
			put_str(dst, filter.as_str())?;
		}

		Ok(())
	}
}

impl UnsubAck {
	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), WriteError> {
		put_u8(dst, 0xb0)?;
		put_var(dst, 2)?;
		put_u16(dst, self.id.get())?;
		Ok(())
	}
}
