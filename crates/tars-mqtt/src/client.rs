use crate::command::{Command, CommandTx, PublishCommand, SubscribeCommand, UnsubscribeCommand};
use crate::{FilterBuf, QoS};
use bytes::Bytes;
use std::fmt;
use tars_proto::Publish;
use tokio::sync::{mpsc, oneshot};

/// A payload delivered to a subscription, already stripped of its MQTT
/// framing. QoS 1 messages are acked to the broker before they reach here, so
/// there's nothing left for the receiver to acknowledge.
#[derive(Debug, Clone)]
pub struct Message {
	pub topic: String,
	pub payload: Bytes,
}

#[derive(Clone)]
pub struct Client {
	tx: CommandTx,
}

impl fmt::Debug for Client {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Client").finish_non_exhaustive()
	}
}

#[derive(Debug)]
pub enum ClientError {
	Disconnected,
}

impl fmt::Display for ClientError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

impl<T> From<mpsc::error::SendError<T>> for ClientError {
	fn from(_: mpsc::error::SendError<T>) -> Self {
		Self::Disconnected
	}
}

impl From<oneshot::error::RecvError> for ClientError {
	fn from(_: oneshot::error::RecvError) -> Self {
		Self::Disconnected
	}
}

impl std::error::Error for ClientError {}

impl Client {
	pub(crate) fn new(tx: CommandTx) -> Self {
		Self { tx }
	}

	#[tracing::instrument(skip(self), err)]
	pub async fn subscribe(&self, filters: Vec<(FilterBuf, QoS)>) -> Result<Subscription, ClientError> {
		let (response_tx, response_rx) = oneshot::channel();
		let (publish_tx, publish_rx) = mpsc::channel(32);

		self.tx.send(Command::Subscribe(SubscribeCommand {
			filters,
			publish_tx,
			response_tx,
		}))?;

		let accepted = response_rx.await?;
		Ok(Subscription::new(accepted, publish_rx, self.tx.clone()))
	}

	#[tracing::instrument(skip(self, payload), err)]
	pub async fn publish(
		&self,
		topic: impl Into<String> + fmt::Debug,
		payload: impl Into<Bytes>,
		qos: QoS,
		retain: bool,
	) -> Result<(), ClientError> {
		let (response_tx, response_rx) = oneshot::channel();
		self.tx.send(Command::Publish(PublishCommand {
			topic: topic.into(),
			payload: payload.into(),
			qos,
			retain,
			response_tx,
		}))?;

		response_rx.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), err)]
	pub async fn unsubscribe(&self, filters: Vec<FilterBuf>) -> Result<(), ClientError> {
		let (response_tx, response_rx) = oneshot::channel();
		self.tx
			.send(Command::Unsubscribe(UnsubscribeCommand { filters, response_tx }))?;

		response_rx.await?;
		Ok(())
	}

	pub fn disconnect(self) -> Result<(), ClientError> {
		self.tx.send(Command::Shutdown)?;
		Ok(())
	}

	/// Drops the current broker connection and lets the client task's normal
	/// holdoff/reconnect loop re-establish it, without affecting subscriptions
	/// or the command channel. Used by the heartbeat watchdog when publishes
	/// keep failing.
	pub fn force_reconnect(&self) -> Result<(), ClientError> {
		self.tx.send(Command::Reconnect)?;
		Ok(())
	}
}

#[derive(Debug)]
pub struct Subscription {
	tx: CommandTx,
	rx: mpsc::Receiver<Publish>,
	filters: Vec<(FilterBuf, QoS)>,
}

impl Subscription {
	pub(crate) fn new(filters: Vec<(FilterBuf, QoS)>, rx: mpsc::Receiver<Publish>, tx: CommandTx) -> Self {
		Self { tx, rx, filters }
	}

	/// Receives the next message, or `None` once the client task has shut
	/// down and every sender for this subscription's channel has dropped.
	pub async fn recv(&mut self) -> Option<Message> {
		let publish = self.rx.recv().await?;
		let (topic, payload) = match publish {
			Publish::AtMostOnce { topic, payload, .. } => (topic, payload),
			Publish::AtLeastOnce { topic, payload, .. } => (topic, payload),
		};
		Some(Message { topic, payload })
	}

	pub fn filters(&self) -> &[(FilterBuf, QoS)] {
		&self.filters
	}

	/// Unsubscribes every filter held by this subscription, awaiting the
	/// broker's UnsubAck.
	pub async fn unsubscribe(mut self) -> Result<(), ClientError> {
		let (response_tx, response_rx) = oneshot::channel();
		let filters = self.filters.drain(..).map(|(f, _)| f).collect();
		self.tx
			.send(Command::Unsubscribe(UnsubscribeCommand { filters, response_tx }))?;

		response_rx.await?;
		Ok(())
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if self.filters.is_empty() {
			return;
		}
		let (response_tx, _response_rx) = oneshot::channel();
		let filters = self.filters.drain(..).map(|(f, _)| f).collect();
		let _ = self
			.tx
			.send(Command::Unsubscribe(UnsubscribeCommand { filters, response_tx }));
	}
}
