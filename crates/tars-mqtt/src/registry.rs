//! C3: a static mapping from domain event names to their default MQTT
//! topics and delivery semantics. Every worker's config module overrides
//! individual topics via its own env vars; this registry documents and
//! validates the defaults so a mistyped topic name fails fast rather than
//! silently going unheard.

use tars_proto::QoS;

/// Whether a retained flag should be set when publishing an event, and the
/// quality of service its producer should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSpec {
	pub topic: &'static str,
	pub qos: QoS,
	pub retained: bool,
}

const fn spec(topic: &'static str, qos: QoS, retained: bool) -> TopicSpec {
	TopicSpec { topic, qos, retained }
}

/// Canonical event name -> default topic table, mirroring the external
/// interfaces topic list (stt, tts, llm, memory, character, wake, system,
/// movement).
pub const EVENT_TOPICS: &[(&str, TopicSpec)] = &[
	("stt.final", spec("stt/final", QoS::AtLeastOnce, false)),
	("stt.partial", spec("stt/partial", QoS::AtMostOnce, false)),
	("tts.say", spec("tts/say", QoS::AtLeastOnce, false)),
	("tts.status", spec("tts/status", QoS::AtLeastOnce, false)),
	("tts.control", spec("tts/control", QoS::AtLeastOnce, false)),
	("llm.request", spec("llm/request", QoS::AtLeastOnce, false)),
	("llm.response", spec("llm/response", QoS::AtLeastOnce, false)),
	("llm.stream", spec("llm/stream", QoS::AtMostOnce, false)),
	(
		"llm.tool_call.request",
		spec("llm/tool.call.request", QoS::AtLeastOnce, false),
	),
	(
		"llm.tool_call.result",
		spec("llm/tool.call.result", QoS::AtLeastOnce, false),
	),
	(
		"llm.tools.registry",
		spec("llm/tools/registry", QoS::AtLeastOnce, true),
	),
	("memory.query", spec("memory/query", QoS::AtLeastOnce, false)),
	("memory.results", spec("memory/results", QoS::AtLeastOnce, false)),
	("character.get", spec("character/get", QoS::AtLeastOnce, false)),
	("character.result", spec("character/result", QoS::AtLeastOnce, false)),
	("character.update", spec("character/update", QoS::AtLeastOnce, false)),
	(
		"system.character.current",
		spec("system/character/current", QoS::AtLeastOnce, true),
	),
	("wake.event", spec("wake/event", QoS::AtLeastOnce, false)),
	("wake.mic", spec("wake/mic", QoS::AtLeastOnce, false)),
	("movement.frame", spec("movement/frame", QoS::AtMostOnce, false)),
	("movement.state", spec("movement/state", QoS::AtLeastOnce, true)),
];

/// Looks up the default [`TopicSpec`] for a well-known event name. Per-client
/// health/keepalive topics are parameterized by client id and are built with
/// [`health_topic`]/[`keepalive_topic`] instead.
pub fn lookup(event: &str) -> Option<TopicSpec> {
	EVENT_TOPICS
		.iter()
		.find(|(name, _)| *name == event)
		.map(|(_, spec)| *spec)
}

pub fn health_topic(client_id: &str) -> String {
	format!("system/health/{client_id}")
}

pub fn keepalive_topic(client_id: &str) -> String {
	format!("system/keepalive/{client_id}")
}
