use super::subscriptions::SubscriptionsManager;
use crate::command::{PublishCommand, ResponseTx};
use crate::dedup::DedupCache;
use std::collections::HashMap;
use std::num::NonZeroU16;
use std::time::Duration;
use tars_proto::{Packet, PacketId, PacketType, PubAck, Publish, QoS};
use tokio::sync::mpsc::error::SendTimeoutError;

const DELIVERY_TIMEOUT: Duration = Duration::from_millis(250);

/// Handles Publish packets arriving from the broker: dedup, dispatch to the
/// matching subscription channel, and PubAck generation for QoS 1.
#[derive(Debug)]
pub struct IncomingPublishManager {
	dedup: DedupCache,
}

impl IncomingPublishManager {
	pub fn new(dedup: DedupCache) -> Self {
		Self { dedup }
	}

	pub async fn handle_publish(
		&mut self,
		subscriptions: &SubscriptionsManager,
		publish: Publish,
	) -> Result<Option<Packet>, super::StateError> {
		let dedup_key = format!("{}:{:x?}", publish.topic(), publish.payload());
		if self.dedup.check_and_insert(dedup_key) {
			tracing::debug!(topic = publish.topic(), "dropped duplicate publish");
			return Ok(publish.id().map(|id| PubAck { id }.into()));
		}

		let channel = subscriptions.find_publish_channel(publish.topic());

		let Some(channel) = channel else {
			tracing::debug!(topic = publish.topic(), "no subscriber for topic");
			return Ok(None);
		};

		let qos = publish.qos();
		let id = publish.id();
		let result = channel.send_timeout(publish, DELIVERY_TIMEOUT).await;

		match (qos, id, result) {
			(QoS::AtMostOnce, _, Ok(())) => Ok(None),
			(QoS::AtMostOnce, _, Err(_)) => {
				tracing::warn!("failed to deliver publish, subscriber channel full or closed");
				Ok(None)
			}
			(QoS::AtLeastOnce, Some(id), Ok(())) => Ok(Some(PubAck { id }.into())),
			(QoS::AtLeastOnce, Some(_), Err(SendTimeoutError::Timeout(publish))) => {
				tracing::warn!(topic = publish.topic(), "delivery timed out, broker will retry");
				Err(super::StateError::DeliveryFailure(publish))
			}
			(QoS::AtLeastOnce, Some(_), Err(SendTimeoutError::Closed(publish))) => {
				tracing::error!(topic = publish.topic(), "subscriber channel closed");
				Ok(None)
			}
			(QoS::AtLeastOnce, None, _) => unreachable!("AtLeastOnce Publish always carries an id"),
		}
	}
}

/// Tracks outgoing Publish packets awaiting a PubAck.
#[derive(Debug)]
pub struct OutgoingPublishManager {
	publish_id: NonZeroU16,
	awaiting_puback: HashMap<PacketId, ResponseTx<()>>,
}

impl Default for OutgoingPublishManager {
	fn default() -> Self {
		Self {
			publish_id: NonZeroU16::MAX,
			awaiting_puback: HashMap::new(),
		}
	}
}

impl OutgoingPublishManager {
	pub fn handle_publish_command(&mut self, command: PublishCommand) -> Option<Packet> {
		let PublishCommand {
			topic,
			payload,
			qos,
			retain,
			response_tx,
		} = command;

		let packet = match qos {
			QoS::AtMostOnce => Packet::Publish(Publish::AtMostOnce { retain, topic, payload }),
			QoS::AtLeastOnce => {
				let id = self.generate_id();
				Packet::Publish(Publish::AtLeastOnce {
					id,
					retain,
					duplicate: false,
					topic,
					payload,
				})
			}
		};

		match qos {
			QoS::AtMostOnce => {
				let _ = response_tx.send(());
			}
			QoS::AtLeastOnce => {
				if let Packet::Publish(Publish::AtLeastOnce { id, .. }) = &packet {
					self.awaiting_puback.insert(*id, response_tx);
				}
			}
		}

		Some(packet)
	}

	pub fn handle_puback(&mut self, puback: PubAck) -> Result<(), super::StateError> {
		let tx = self
			.awaiting_puback
			.remove(&puback.id)
			.ok_or(super::StateError::Unsolicited(PacketType::PubAck))?;

		let _ = tx.send(());
		Ok(())
	}

	#[inline]
	fn generate_id(&mut self) -> PacketId {
		loop {
			self.publish_id = self.publish_id.checked_add(1).unwrap_or(NonZeroU16::MIN);
			if !self.awaiting_puback.contains_key(&self.publish_id) {
				break;
			}
		}
		self.publish_id
	}
}
