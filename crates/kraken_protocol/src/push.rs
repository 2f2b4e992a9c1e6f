//! Push transport frames.
//!
//! Inbound frames are decoded once, here, into a closed set of
//! [`PushEvent`] variants. Nothing downstream inspects raw JSON.

use crate::error::{ProtocolError, ProtocolResult};
use crate::node::{BlockKind, PhysState, RunState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Url suffix of physical state updates.
const PHYS_STATE_URL: &str = "/PhysState";
/// Url suffix of run state updates.
const RUN_STATE_URL: &str = "/RunState";
/// Marker of protobuf-typed extension urls.
const EXTENSION_URL_MARKER: &str = "type.googleapis.com/";
/// Prefix of service urls.
const SERVICE_URL_PREFIX: &str = "/Services/";

/// Logical push channels a client subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Per-field state changes.
    StateChange,
    /// State mutation progress.
    StateMutation,
    /// Discovery events.
    Discovery,
}

impl Channel {
    /// All channels, in subscription order.
    pub const ALL: [Channel; 3] = [
        Channel::StateChange,
        Channel::StateMutation,
        Channel::Discovery,
    ];

    /// Returns the numeric code used in inbound frames.
    pub fn code(&self) -> u8 {
        match self {
            Channel::StateChange => 1,
            Channel::StateMutation => 2,
            Channel::Discovery => 5,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Channel::StateChange),
            2 => Some(Channel::StateMutation),
            5 => Some(Channel::Discovery),
            _ => None,
        }
    }

    /// Returns the name used in subscribe commands.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::StateChange => "STATE_CHANGE",
            Channel::StateMutation => "STATE_MUTATION",
            Channel::Discovery => "DISCOVERY",
        }
    }
}

/// A subscribe command sent by the client after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeCommand {
    /// Always `SUBSCRIBE`.
    pub command: String,
    /// Channel name.
    #[serde(rename = "type")]
    pub channel: String,
}

impl SubscribeCommand {
    /// Creates a subscribe command for a channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            command: "SUBSCRIBE".into(),
            channel: channel.name().into(),
        }
    }

    /// Returns the text frames subscribing to every channel, in order.
    pub fn all_frames() -> ProtocolResult<Vec<String>> {
        Channel::ALL
            .into_iter()
            .map(|channel| Ok(serde_json::to_string(&SubscribeCommand::new(channel))?))
            .collect()
    }
}

/// One event as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPushEvent {
    /// Channel code.
    #[serde(rename = "type", alias = "messageType")]
    pub message_type: u8,
    /// Affected node id.
    #[serde(rename = "nodeid", alias = "nodeId", default)]
    pub node_id: String,
    /// Path of the changed field.
    #[serde(default)]
    pub url: String,
    /// New value.
    #[serde(default)]
    pub value: Value,
    /// Free-form event description.
    #[serde(rename = "data", alias = "rawData", default)]
    pub raw_data: String,
}

/// A decoded push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Node set may have changed; incremental patching is not possible.
    StructuralChange {
        /// Node the event was reported for.
        node_id: String,
    },
    /// Physical state changed.
    PhysStateChanged {
        /// Affected node.
        node_id: String,
        /// New state.
        state: PhysState,
    },
    /// Run state changed.
    RunStateChanged {
        /// Affected node.
        node_id: String,
        /// New state.
        state: RunState,
    },
    /// A leaf field inside an extension or service block changed.
    BlockFieldChanged {
        /// Affected node.
        node_id: String,
        /// Extension or service.
        kind: BlockKind,
        /// Block tag (`@type` url or service id).
        tag: String,
        /// Field path inside the block.
        path: Vec<String>,
        /// New value.
        value: Value,
    },
    /// Mutation or discovery activity that may change a topology graph.
    GraphRelevant {
        /// Affected node.
        node_id: String,
    },
    /// A state-change event whose payload could not be interpreted.
    Malformed {
        /// Affected node.
        node_id: String,
        /// What was wrong.
        reason: String,
    },
    /// Anything this client does not act on.
    Ignored,
}

impl PushEvent {
    /// Classifies one wire event.
    pub fn classify(raw: RawPushEvent) -> Self {
        match Channel::from_code(raw.message_type) {
            Some(Channel::StateChange) => Self::classify_state_change(raw),
            Some(Channel::StateMutation) | Some(Channel::Discovery) => PushEvent::GraphRelevant {
                node_id: raw.node_id,
            },
            None => PushEvent::Ignored,
        }
    }

    fn classify_state_change(raw: RawPushEvent) -> Self {
        if raw.raw_data.contains("(CREATE)") || raw.raw_data.contains("(CFG_UPDATE") {
            return PushEvent::StructuralChange {
                node_id: raw.node_id,
            };
        }

        let RawPushEvent {
            node_id,
            url,
            value,
            ..
        } = raw;

        if url.ends_with(PHYS_STATE_URL) {
            return match value.as_str().map(str::parse::<PhysState>) {
                Some(Ok(state)) => PushEvent::PhysStateChanged { node_id, state },
                _ => PushEvent::Malformed {
                    node_id,
                    reason: format!("bad physState value {value}"),
                },
            };
        }
        if url.ends_with(RUN_STATE_URL) {
            return match value.as_str().map(str::parse::<RunState>) {
                Some(Ok(state)) => PushEvent::RunStateChanged { node_id, state },
                _ => PushEvent::Malformed {
                    node_id,
                    reason: format!("bad runState value {value}"),
                },
            };
        }

        if let Some(start) = url.find(EXTENSION_URL_MARKER) {
            let mut segments = url[start..].split('/').filter(|s| !s.is_empty());
            let (Some(domain), Some(name)) = (segments.next(), segments.next()) else {
                return PushEvent::Malformed {
                    node_id,
                    reason: format!("extension url without type: {url}"),
                };
            };
            let tag = format!("{domain}/{name}");
            return Self::block_change(node_id, BlockKind::Extension, tag, segments, value, &url);
        }

        if let Some(rest) = url.strip_prefix(SERVICE_URL_PREFIX) {
            let mut segments = rest.split('/').filter(|s| !s.is_empty());
            let Some(tag) = segments.next() else {
                return PushEvent::Malformed {
                    node_id,
                    reason: format!("service url without id: {url}"),
                };
            };
            let tag = tag.to_string();
            return Self::block_change(node_id, BlockKind::Service, tag, segments, value, &url);
        }

        PushEvent::Ignored
    }

    fn block_change<'a>(
        node_id: String,
        kind: BlockKind,
        tag: String,
        segments: impl Iterator<Item = &'a str>,
        value: Value,
        url: &str,
    ) -> Self {
        let path: Vec<String> = segments.map(str::to_string).collect();
        if path.is_empty() {
            return PushEvent::Malformed {
                node_id,
                reason: format!("block url without field: {url}"),
            };
        }
        PushEvent::BlockFieldChanged {
            node_id,
            kind,
            tag,
            path,
            value,
        }
    }

    /// Returns the affected node id, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            PushEvent::StructuralChange { node_id }
            | PushEvent::PhysStateChanged { node_id, .. }
            | PushEvent::RunStateChanged { node_id, .. }
            | PushEvent::BlockFieldChanged { node_id, .. }
            | PushEvent::GraphRelevant { node_id }
            | PushEvent::Malformed { node_id, .. } => Some(node_id),
            PushEvent::Ignored => None,
        }
    }
}

/// Decodes one text frame into events, preserving delivery order.
///
/// A frame is either a JSON array of events or a single event object.
/// `null` decodes to an empty batch. An object that is not a valid event
/// becomes [`PushEvent::Malformed`] in its position, so the events ahead of
/// it still apply.
pub fn decode_frame(text: &str) -> ProtocolResult<Vec<PushEvent>> {
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.into_iter().map(decode_event).collect()),
        Value::Object(_) => Ok(vec![decode_event(value)]),
        other => Err(ProtocolError::invalid_structure(format!(
            "expected event object or array, got {other}"
        ))),
    }
}

fn decode_event(item: Value) -> PushEvent {
    let node_id = ["nodeid", "nodeId"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    match serde_json::from_value::<RawPushEvent>(item) {
        Ok(raw) => PushEvent::classify(raw),
        Err(e) => PushEvent::Malformed {
            node_id,
            reason: format!("undecodable event: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_change(url: &str, value: Value) -> RawPushEvent {
        RawPushEvent {
            message_type: 1,
            node_id: "n1".into(),
            url: url.into(),
            value,
            raw_data: String::new(),
        }
    }

    #[test]
    fn subscribe_frames_in_order() {
        let frames = SubscribeCommand::all_frames().unwrap();
        assert_eq!(
            frames,
            vec![
                r#"{"command":"SUBSCRIBE","type":"STATE_CHANGE"}"#,
                r#"{"command":"SUBSCRIBE","type":"STATE_MUTATION"}"#,
                r#"{"command":"SUBSCRIBE","type":"DISCOVERY"}"#,
            ]
        );
    }

    #[test]
    fn structural_markers_win() {
        let mut raw = state_change("/PhysState", json!("POWER_ON"));
        raw.raw_data = "node n1 (CREATE)".into();
        assert!(matches!(
            PushEvent::classify(raw.clone()),
            PushEvent::StructuralChange { .. }
        ));

        raw.raw_data = "(CFG_UPDATE) /Nodename".into();
        assert!(matches!(
            PushEvent::classify(raw),
            PushEvent::StructuralChange { .. }
        ));
    }

    #[test]
    fn state_urls() {
        assert_eq!(
            PushEvent::classify(state_change("/PhysState", json!("POWER_OFF"))),
            PushEvent::PhysStateChanged {
                node_id: "n1".into(),
                state: PhysState::PowerOff
            }
        );
        assert_eq!(
            PushEvent::classify(state_change("/RunState", json!("INIT"))),
            PushEvent::RunStateChanged {
                node_id: "n1".into(),
                state: RunState::Init
            }
        );
        assert!(matches!(
            PushEvent::classify(state_change("/RunState", json!("POWER_OFF"))),
            PushEvent::Malformed { .. }
        ));
        assert_eq!(
            PushEvent::classify(state_change("/nodes/n1/PhysState", json!("PHYS_HANG"))),
            PushEvent::PhysStateChanged {
                node_id: "n1".into(),
                state: PhysState::PhysHang
            }
        );
        assert_eq!(
            PushEvent::classify(state_change("/XRunState", json!("SYNC"))),
            PushEvent::Ignored
        );
    }

    #[test]
    fn extension_and_service_urls() {
        let event = PushEvent::classify(state_change(
            "/type.googleapis.com/proto.PXE/State",
            json!("COMP"),
        ));
        assert_eq!(
            event,
            PushEvent::BlockFieldChanged {
                node_id: "n1".into(),
                kind: BlockKind::Extension,
                tag: "type.googleapis.com/proto.PXE".into(),
                path: vec!["State".into()],
                value: json!("COMP"),
            }
        );

        let event = PushEvent::classify(state_change("/Services/powerman/State", json!("RUN")));
        assert!(matches!(
            event,
            PushEvent::BlockFieldChanged { kind: BlockKind::Service, ref tag, .. } if tag == "powerman"
        ));

        assert!(matches!(
            PushEvent::classify(state_change("/type.googleapis.com/proto.PXE", json!(1))),
            PushEvent::Malformed { .. }
        ));
        assert_eq!(
            PushEvent::classify(state_change("/Nodename", json!("x"))),
            PushEvent::Ignored
        );
    }

    #[test]
    fn mutation_and_discovery_are_graph_relevant() {
        for code in [2u8, 5] {
            let raw = RawPushEvent {
                message_type: code,
                node_id: "abc".into(),
                ..RawPushEvent::default()
            };
            assert_eq!(
                PushEvent::classify(raw),
                PushEvent::GraphRelevant {
                    node_id: "abc".into()
                }
            );
        }
        let raw = RawPushEvent {
            message_type: 9,
            ..RawPushEvent::default()
        };
        assert_eq!(PushEvent::classify(raw), PushEvent::Ignored);
    }

    #[test]
    fn decode_array_object_and_null() {
        let batch = decode_frame(
            r#"[{"type":1,"nodeid":"a","url":"/RunState","value":"SYNC","data":""},
                {"messageType":2,"nodeId":"b","url":"","rawData":"mutation"}]"#,
        )
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].node_id(), Some("a"));
        assert_eq!(batch[1].node_id(), Some("b"));

        let single = decode_frame(r#"{"type":5,"nodeid":"c"}"#).unwrap();
        assert_eq!(single.len(), 1);

        assert!(decode_frame("null").unwrap().is_empty());
        assert!(matches!(
            decode_frame(r#"{"type":1,"data":null}"#).unwrap()[..],
            [PushEvent::Malformed { .. }]
        ));
        assert!(decode_frame("42").is_err());
        assert!(decode_frame("{not json").is_err());
    }

    #[test]
    fn bad_array_element_becomes_malformed_in_place() {
        let batch = decode_frame(
            r#"[{"type":1,"nodeid":"a","url":"/PhysState","value":"POWER_OFF","data":""},
                {"type":1,"nodeid":"b","url":"/RunState","value":"UNKNOWN","data":null},
                7]"#,
        )
        .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch[0],
            PushEvent::PhysStateChanged {
                node_id: "a".into(),
                state: PhysState::PowerOff
            }
        );
        assert!(matches!(
            &batch[1],
            PushEvent::Malformed { node_id, .. } if node_id == "b"
        ));
        assert!(matches!(
            &batch[2],
            PushEvent::Malformed { node_id, .. } if node_id.is_empty()
        ));
    }
}
