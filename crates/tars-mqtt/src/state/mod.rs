//! Client-side protocol state: tracks in-flight Subscribe/Unsubscribe/Publish
//! exchanges and turns incoming packets into completed commands or errors.
//! Owned entirely by the client task; nothing here crosses a task boundary
//! except through the `Command`/`Publish` channels it was handed.

mod publish;
mod subscriptions;

pub use publish::{IncomingPublishManager, OutgoingPublishManager};
pub use subscriptions::SubscriptionsManager;

use crate::command::Command;
use crate::dedup::DedupCache;
use std::fmt;
use tars_proto::{Packet, PacketType, Publish};

#[derive(Debug)]
pub enum StateError {
	/// An ack arrived with no matching pending request.
	Unsolicited(PacketType),
	/// The peer violated the protocol in a way that isn't recoverable.
	ProtocolError(&'static str),
	/// A QoS 1 publish could not be handed to its subscriber in time; the
	/// caller should not ack it so the broker redelivers.
	DeliveryFailure(Publish),
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Unsolicited(ty) => write!(f, "unsolicited {ty:?}"),
			Self::ProtocolError(msg) => write!(f, "protocol error: {msg}"),
			Self::DeliveryFailure(publish) => write!(f, "delivery failure for {}", publish.topic()),
		}
	}
}

impl std::error::Error for StateError {}

/// Aggregates the client's view of in-flight protocol exchanges.
#[derive(Debug)]
pub struct State {
	subscriptions: SubscriptionsManager,
	incoming: IncomingPublishManager,
	outgoing: OutgoingPublishManager,
}

impl State {
	pub fn new(dedup: DedupCache) -> Self {
		Self {
			subscriptions: SubscriptionsManager::default(),
			incoming: IncomingPublishManager::new(dedup),
			outgoing: OutgoingPublishManager::default(),
		}
	}

	/// Turns a command from the `Client` handle into the packet that should
	/// be written to the broker, if any (a `Shutdown` command produces none).
	pub fn process_client_command(&mut self, command: Command) -> Option<Packet> {
		match command {
			Command::Publish(cmd) => self.outgoing.handle_publish_command(cmd),
			Command::Subscribe(cmd) => self.subscriptions.handle_subscribe_command(cmd),
			Command::Unsubscribe(cmd) => self.subscriptions.handle_unsubscribe_command(cmd),
			Command::Reconnect | Command::Shutdown => None,
		}
	}

	/// Processes a packet read from the broker, returning a packet to write
	/// back (a PubAck, typically) if one is called for.
	pub async fn process_incoming_packet(&mut self, packet: Packet) -> Result<Option<Packet>, StateError> {
		match packet {
			Packet::Publish(publish) => self.incoming.handle_publish(&self.subscriptions, publish).await,
			Packet::PubAck(puback) => {
				self.outgoing.handle_puback(puback)?;
				Ok(None)
			}
			Packet::SubAck(suback) => {
				self.subscriptions.handle_suback(suback)?;
				Ok(None)
			}
			Packet::UnsubAck(unsuback) => {
				self.subscriptions.handle_unsuback(unsuback)?;
				Ok(None)
			}
			Packet::PingResp => Ok(None),
			other => Err(StateError::Unsolicited(other.packet_type())),
		}
	}

	/// Called once a CONNACK confirms the session. When `session_present` is
	/// false the broker has forgotten any prior subscriptions, so every
	/// currently active filter must be re-requested, one Subscribe packet per
	/// owning subscriber channel.
	pub fn connected(&mut self, session_present: bool) -> Vec<Packet> {
		if session_present {
			Vec::new()
		} else {
			self.subscriptions.generate_resubscribe()
		}
	}
}
