use super::StateError;
use crate::command::{ResponseTx, SubscribeCommand, UnsubscribeCommand};
use std::{
	collections::{BTreeMap, HashMap},
	num::NonZeroU16,
};
use tars_proto::{FilterBuf, Packet, PacketId, PacketType, QoS, SubAck, Subscribe, UnsubAck, Unsubscribe};
use tokio::sync::mpsc;

pub type PublishTx = mpsc::Sender<tars_proto::Publish>;
pub type PublishRx = mpsc::Receiver<tars_proto::Publish>;

#[derive(Debug)]
pub struct SubscriptionsManager {
	subscribe_id: NonZeroU16,
	subscribe_state: HashMap<PacketId, SubscribeState>,
	unsubscribe_state: HashMap<PacketId, UnsubscribeState>,
	subscriptions: BTreeMap<FilterBuf, PublishTx>,
}

#[derive(Debug)]
struct SubscribeState {
	requested_filters: Vec<(FilterBuf, QoS)>,
	publish_tx: PublishTx,
	response_tx: ResponseTx<Vec<(FilterBuf, QoS)>>,
}

#[derive(Debug)]
struct UnsubscribeState {
	filters: Vec<FilterBuf>,
	response_tx: ResponseTx<()>,
}

impl Default for SubscriptionsManager {
	fn default() -> Self {
		Self {
			subscribe_id: NonZeroU16::MAX,
			subscribe_state: Default::default(),
			unsubscribe_state: Default::default(),
			subscriptions: Default::default(),
		}
	}
}

impl SubscriptionsManager {
	pub fn handle_subscribe_command(&mut self, command: SubscribeCommand) -> Option<Packet> {
		let SubscribeCommand {
			filters,
			publish_tx,
			response_tx,
		} = command;
		let id = self.generate_id();

		self.subscribe_state.insert(
			id,
			SubscribeState {
				requested_filters: filters.clone(),
				publish_tx,
				response_tx,
			},
		);

		Some(Subscribe { id, filters }.into())
	}

	pub fn handle_unsubscribe_command(&mut self, command: UnsubscribeCommand) -> Option<Packet> {
		let UnsubscribeCommand { filters, response_tx } = command;
		let id = self.generate_id();
		self.unsubscribe_state.insert(
			id,
			UnsubscribeState {
				filters: filters.clone(),
				response_tx,
			},
		);

		Some(Unsubscribe { id, filters }.into())
	}

	pub fn handle_suback(&mut self, suback: SubAck) -> Result<(), StateError> {
		let SubAck { id, result } = suback;
		let Some(subscribe_state) = self.subscribe_state.remove(&id) else {
			return Err(StateError::Unsolicited(PacketType::SubAck));
		};

		let SubscribeState {
			requested_filters,
			publish_tx,
			response_tx,
		} = subscribe_state;

		if result.len() != requested_filters.len() {
			return Err(StateError::ProtocolError(
				"SubAck payload length does not correspond to Subscribe payload length",
			));
		}

		let successful_filters: Vec<_> = result
			.into_iter()
			.zip(requested_filters)
			.filter_map(|(result_qos, (requested_filter, _))| {
				let qos = result_qos?;
				Some((requested_filter, qos))
			})
			.collect();

		for (filter, _) in &successful_filters {
			self.subscriptions.insert(filter.clone(), publish_tx.clone());
		}

		if response_tx.send(successful_filters).is_err() {
			tracing::warn!(?id, "response channel for SubAck closed");
		}

		Ok(())
	}

	pub fn handle_unsuback(&mut self, unsuback: UnsubAck) -> Result<(), StateError> {
		let UnsubAck { id } = unsuback;
		let Some(unsubscribe_state) = self.unsubscribe_state.remove(&id) else {
			return Err(StateError::Unsolicited(PacketType::UnsubAck));
		};

		let UnsubscribeState { filters, response_tx } = unsubscribe_state;

		let before = self.subscriptions.len();
		self.subscriptions.retain(|key, _| !filters.contains(key));
		tracing::info!(
			removed = before - self.subscriptions.len(),
			remaining = self.subscriptions.len(),
			"processed unsubscribe"
		);

		if response_tx.send(()).is_err() {
			tracing::warn!("response channel for Unsubscribe command closed");
		}

		Ok(())
	}

	/// Finds the channel of the most specific active subscription matching
	/// `topic`, per the filter specificity scoring in `tars-proto`.
	pub fn find_publish_channel(&self, topic: &str) -> Option<&PublishTx> {
		self.subscriptions
			.iter()
			.filter_map(|(filter, channel)| filter.matches_topic(topic).map(|score| (score, channel)))
			.max_by_key(|(score, _)| score.clone())
			.map(|(_, channel)| channel)
	}

	/// Builds Subscribe packets re-requesting every currently active filter,
	/// grouped by the subscriber channel that owns them, used to restore
	/// subscriptions after a clean-session reconnect. Each returned packet
	/// must be written and its SubAck awaited in turn, same as any other
	/// Subscribe.
	pub fn generate_resubscribe(&mut self) -> Vec<Packet> {
		let mut by_channel: HashMap<usize, (PublishTx, Vec<(FilterBuf, QoS)>)> = HashMap::new();
		for (filter, tx) in &self.subscriptions {
			let key = tx as *const PublishTx as usize;
			by_channel
				.entry(key)
				.or_insert_with(|| (tx.clone(), Vec::new()))
				.1
				.push((filter.clone(), QoS::AtLeastOnce));
		}

		by_channel
			.into_values()
			.map(|(publish_tx, filters)| {
				let id = self.generate_id();
				let (response_tx, _response_rx) = tokio::sync::oneshot::channel();
				self.subscribe_state.insert(
					id,
					SubscribeState {
						requested_filters: filters.clone(),
						publish_tx,
						response_tx,
					},
				);
				Subscribe { id, filters }.into()
			})
			.collect()
	}

	#[inline]
	fn generate_id(&mut self) -> PacketId {
		loop {
			self.subscribe_id = self.subscribe_id.checked_add(1).unwrap_or(NonZeroU16::MIN);
			if !self.subscribe_state.contains_key(&self.subscribe_id) {
				break;
			}
		}
		self.subscribe_id
	}
}
