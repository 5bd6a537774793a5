use tars_proto::{FilterBuf, Publish, QoS};
use tokio::sync::{
	mpsc::{self, UnboundedReceiver, UnboundedSender},
	oneshot,
};

pub type CommandTx = UnboundedSender<Command>;
pub type CommandRx = UnboundedReceiver<Command>;

#[derive(Debug)]
pub enum Command {
	Publish(PublishCommand),
	Subscribe(SubscribeCommand),
	Unsubscribe(UnsubscribeCommand),
	/// Forces the client task to drop its connection and run its normal
	/// reconnect loop, without tearing down subscriptions or the command
	/// channel the way [`Command::Shutdown`] does.
	Reconnect,
	Shutdown,
}

#[derive(Debug)]
pub struct PublishCommand {
	pub topic: String,
	pub payload: bytes::Bytes,
	pub qos: QoS,
	pub retain: bool,
	pub response_tx: oneshot::Sender<()>,
}

#[derive(Debug)]
pub struct SubscribeCommand {
	pub filters: Vec<(FilterBuf, QoS)>,
	pub publish_tx: mpsc::Sender<Publish>,
	pub response_tx: oneshot::Sender<Vec<(FilterBuf, QoS)>>,
}

#[derive(Debug)]
pub struct UnsubscribeCommand {
	pub filters: Vec<FilterBuf>,
	pub response_tx: oneshot::Sender<()>,
}

pub type ResponseTx<T> = oneshot::Sender<T>;
pub type ResponseRx<T> = oneshot::Receiver<T>;
