mod support;

use bytes::BytesMut;
use serde::Deserialize;
use std::time::Duration;
use support::{base_options, read_packet, write_packet};
use tars_proto::{ConnAck, Packet, Publish};
use time::format_description::well_known::Rfc3339;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Deserialize)]
struct HeartbeatPayload {
	ok: bool,
	event: String,
	timestamp: String,
}

/// The application-level heartbeat must land on `system/keepalive/<id>` as an
/// unretained QoS 0 JSON `{ok, event, timestamp}` publish, independent of the
/// MQTT protocol's own PINGREQ/PINGRESP.
#[tokio::test]
async fn publishes_json_heartbeat_to_keepalive_topic() {
	let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let client_id = String::from("heartbeat-test");
	let expected_topic = tars_mqtt::registry::keepalive_topic(&client_id);

	let (seen_tx, seen_rx) = oneshot::channel();

	let broker = tokio::spawn({
		let expected_topic = expected_topic.clone();
		async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let mut buffer = BytesMut::with_capacity(4 * 1024);

			match read_packet(&mut stream, &mut buffer).await.unwrap() {
				Some(Packet::Connect(_)) => {}
				other => panic!("expected Connect, got {other:?}"),
			}
			write_packet(&mut stream, &Packet::ConnAck(ConnAck { session_present: false, code: 0 }))
				.await
				.unwrap();

			let mut seen_tx = Some(seen_tx);
			let mut received = 0;
			while received < 2 {
				match read_packet(&mut stream, &mut buffer).await.unwrap() {
					Some(Packet::Publish(Publish::AtMostOnce { retain, topic, payload })) => {
						assert!(!retain, "heartbeat must not be retained");
						assert_eq!(topic, expected_topic);

						let decoded: HeartbeatPayload = serde_json::from_slice(&payload).unwrap();
						assert!(decoded.ok);
						assert_eq!(decoded.event, "heartbeat");
						assert!(time::OffsetDateTime::parse(&decoded.timestamp, &Rfc3339).is_ok());

						received += 1;
					}
					Some(Packet::Publish(Publish::AtLeastOnce { .. })) => {
						panic!("heartbeat must publish at QoS 0, not QoS 1");
					}
					other => panic!("unexpected packet while waiting for heartbeats: {other:?}"),
				}
			}
			let _ = seen_tx.take().unwrap().send(());

			// Keep the socket open so the client doesn't spend the rest of
			// the test churning through reconnect attempts.
			let _ = read_packet(&mut stream, &mut buffer).await;
		}
	});

	let mut options = base_options(port);
	options.client_id = client_id;
	options.heartbeat_interval = Duration::from_millis(20);

	let (client, _handle) = tars_mqtt::client(options);

	tokio::time::timeout(Duration::from_secs(2), seen_rx).await.unwrap().unwrap();

	drop(client);
	broker.abort();
}
