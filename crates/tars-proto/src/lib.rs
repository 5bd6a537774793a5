//! # tars-proto
//!
//! Wire-level building blocks shared by every TARS worker process: the MQTT
//! v3.1.1 packet codec, topic filter matching, and the envelope JSON format
//! that wraps every payload published on the bus.

pub mod envelope;
mod filter;
pub mod packet;
mod qos;

pub use self::{
	envelope::{BareOrEnveloped, Envelope, RawEnvelope},
	filter::{Filter, FilterBuf, FilterError, Match},
	packet::{
		ConnAck, Connect, Credentials, Error as PacketError, Packet, PacketType, PubAck, Publish,
		SubAck, Subscribe, UnsubAck, Unsubscribe, Will, WriteError,
	},
	qos::{InvalidQoS, QoS},
};

pub type PacketId = std::num::NonZeroU16;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
