//! Cluster node model.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Physical (power/hardware) state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhysState {
    /// Hardware reported an error.
    PhysError,
    /// Power is being cycled.
    PowerCycle,
    /// Node is hung.
    PhysHang,
    /// Node is powered off.
    PowerOff,
    /// Physical state is not known.
    PhysUnknown,
    /// Node is powered on.
    PowerOn,
}

impl PhysState {
    /// All physical states.
    pub const ALL: [PhysState; 6] = [
        PhysState::PhysError,
        PhysState::PowerCycle,
        PhysState::PhysHang,
        PhysState::PowerOff,
        PhysState::PhysUnknown,
        PhysState::PowerOn,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhysState::PhysError => "PHYS_ERROR",
            PhysState::PowerCycle => "POWER_CYCLE",
            PhysState::PhysHang => "PHYS_HANG",
            PhysState::PowerOff => "POWER_OFF",
            PhysState::PhysUnknown => "PHYS_UNKNOWN",
            PhysState::PowerOn => "POWER_ON",
        }
    }

    /// Returns true if entering this state invalidates the run state.
    ///
    /// A node that is off or hung cannot have a meaningful run state.
    pub fn forces_unknown_run_state(&self) -> bool {
        matches!(self, PhysState::PowerOff | PhysState::PhysHang)
    }

    /// Returns true if run state may not advance while in this state.
    pub fn blocks_run_state(&self) -> bool {
        matches!(
            self,
            PhysState::PhysUnknown | PhysState::PowerOff | PhysState::PhysHang
        )
    }
}

impl fmt::Display for PhysState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhysState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhysState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownState {
                kind: "physState",
                value: s.to_string(),
            })
    }
}

/// Run (software/provisioning) state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Node reported an error.
    Error,
    /// Run state is not known.
    Unknown,
    /// Node is initializing.
    Init,
    /// Node is synchronized with its configuration.
    Sync,
}

impl RunState {
    /// All run states.
    pub const ALL: [RunState; 4] = [
        RunState::Error,
        RunState::Unknown,
        RunState::Init,
        RunState::Sync,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Error => "ERROR",
            RunState::Unknown => "UNKNOWN",
            RunState::Init => "INIT",
            RunState::Sync => "SYNC",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownState {
                kind: "runState",
                value: s.to_string(),
            })
    }
}

/// Kind of typed attribute block attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Extension block, tagged by `@type`.
    Extension,
    /// Service block, tagged by `id`.
    Service,
}

impl BlockKind {
    /// Returns the key holding this block kind's tag.
    pub fn tag_key(&self) -> &'static str {
        match self {
            BlockKind::Extension => "@type",
            BlockKind::Service => "id",
        }
    }
}

/// A typed attribute block (one extension or one service entry).
///
/// Blocks are free-form JSON objects; only the tag key is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block(pub Map<String, Value>);

impl Block {
    /// Creates a block with the given tag and fields.
    pub fn new(kind: BlockKind, tag: &str, fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut map = Map::new();
        map.insert(kind.tag_key().to_string(), Value::String(tag.to_string()));
        map.extend(fields);
        Self(map)
    }

    /// Returns the block's tag for the given kind.
    pub fn tag(&self, kind: BlockKind) -> Option<&str> {
        self.0.get(kind.tag_key()).and_then(Value::as_str)
    }

    /// Gets a field by path, matching keys case-insensitively.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let (leaf, parents) = path.split_last()?;
        let mut current = &self.0;
        for segment in parents {
            let key = find_key(current, segment)?;
            current = current.get(&key)?.as_object()?;
        }
        let key = find_key(current, leaf)?;
        current.get(&key)
    }

    /// Sets an existing leaf field by path.
    ///
    /// Keys match case-insensitively. No intermediate objects or leaf keys
    /// are created: returns false if any segment is missing.
    pub fn set_path(&mut self, path: &[String], value: Value) -> bool {
        let Some((leaf, parents)) = path.split_last() else {
            return false;
        };
        let mut current = &mut self.0;
        for segment in parents {
            let Some(key) = find_key(current, segment) else {
                return false;
            };
            current = match current.get_mut(&key) {
                Some(Value::Object(next)) => next,
                _ => return false,
            };
        }
        let Some(key) = find_key(current, leaf) else {
            return false;
        };
        current.insert(key, value);
        true
    }
}

fn find_key(map: &Map<String, Value>, segment: &str) -> Option<String> {
    map.keys()
        .find(|key| key.eq_ignore_ascii_case(segment))
        .cloned()
}

/// A cluster member as reported by the controller.
///
/// Unknown fields are preserved so a node can be written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable identifier, unique within a collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Parent node id; absent only on the master.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Node name.
    #[serde(rename = "nodename", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// CPU architecture.
    #[serde(rename = "arch", default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Hardware platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Physical state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phys_state: Option<PhysState>,
    /// Run state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_state: Option<RunState>,
    /// Extension blocks, tagged by `@type`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<Block>,
    /// Service blocks, tagged by `id`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Block>,
    /// Fields this model does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// Creates a node with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Returns true if the node carries no data at all.
    pub fn is_empty(&self) -> bool {
        *self == Node::default()
    }

    /// Returns true if this node is a collection master (no parent).
    pub fn is_master(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns the blocks of the given kind.
    pub fn blocks(&self, kind: BlockKind) -> &[Block] {
        match kind {
            BlockKind::Extension => &self.extensions,
            BlockKind::Service => &self.services,
        }
    }

    /// Returns the blocks of the given kind, mutably.
    pub fn blocks_mut(&mut self, kind: BlockKind) -> &mut Vec<Block> {
        match kind {
            BlockKind::Extension => &mut self.extensions,
            BlockKind::Service => &mut self.services,
        }
    }

    /// Finds a block by kind and tag.
    pub fn block_mut(&mut self, kind: BlockKind, tag: &str) -> Option<&mut Block> {
        self.blocks_mut(kind)
            .iter_mut()
            .find(|block| block.tag(kind) == Some(tag))
    }
}

/// Response body of the node list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    /// All nodes, master included.
    pub nodes: Vec<Node>,
}

/// Read-only view combining a CFG node with its DSC counterpart.
///
/// Static attributes come from CFG, dynamic state from DSC, and blocks are
/// the union of both with DSC winning on tag collisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedNode {
    /// Node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Parent id from CFG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Name from CFG.
    #[serde(rename = "nodename", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Architecture from CFG.
    #[serde(rename = "arch", default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Platform from CFG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Physical state from DSC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phys_state: Option<PhysState>,
    /// Run state from DSC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_state: Option<RunState>,
    /// Merged extension blocks.
    #[serde(default)]
    pub extensions: Vec<Block>,
    /// Merged service blocks.
    #[serde(default)]
    pub services: Vec<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_wire_names() {
        assert_eq!(
            serde_json::to_string(&PhysState::PhysUnknown).unwrap(),
            "\"PHYS_UNKNOWN\""
        );
        assert_eq!(serde_json::to_string(&RunState::Sync).unwrap(), "\"SYNC\"");
        for state in PhysState::ALL {
            assert_eq!(state.as_str().parse::<PhysState>().unwrap(), state);
        }
        for state in RunState::ALL {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
        assert!("POWER_ON".parse::<RunState>().is_err());
    }

    #[test]
    fn phys_state_rules() {
        assert!(PhysState::PowerOff.forces_unknown_run_state());
        assert!(PhysState::PhysHang.forces_unknown_run_state());
        assert!(!PhysState::PhysUnknown.forces_unknown_run_state());

        assert!(PhysState::PhysUnknown.blocks_run_state());
        assert!(!PhysState::PowerOn.blocks_run_state());
        assert!(!PhysState::PhysError.blocks_run_state());
    }

    #[test]
    fn node_from_controller_json() {
        let node: Node = serde_json::from_value(json!({
            "id": "Ej5FZ+ibEtOkVkJmVUQAAA==",
            "parentId": "AAAAAAAAAAAAAAAAAAAAAA==",
            "nodename": "kr1n3",
            "arch": "aarch64",
            "platform": "rpi3",
            "physState": "POWER_ON",
            "runState": "SYNC",
            "extensions": [{"@type": "type.googleapis.com/proto.PXE", "state": "INIT"}],
            "services": [{"id": "powerman", "state": "RUN"}],
            "messages": ["kept"]
        }))
        .unwrap();

        assert_eq!(node.name.as_deref(), Some("kr1n3"));
        assert_eq!(node.architecture.as_deref(), Some("aarch64"));
        assert_eq!(node.phys_state, Some(PhysState::PowerOn));
        assert!(!node.is_master());
        assert_eq!(
            node.extensions[0].tag(BlockKind::Extension),
            Some("type.googleapis.com/proto.PXE")
        );
        assert_eq!(node.services[0].tag(BlockKind::Service), Some("powerman"));
        assert_eq!(node.extra.get("messages"), Some(&json!(["kept"])));

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["nodename"], "kr1n3");
        assert_eq!(back["messages"], json!(["kept"]));
    }

    #[test]
    fn null_parent_is_master() {
        let node: Node = serde_json::from_value(json!({"id": "m", "parentId": null})).unwrap();
        assert!(node.is_master());
        assert!(!node.is_empty());
        assert!(Node::default().is_empty());
    }

    #[test]
    fn block_set_path_is_case_insensitive() {
        let mut block: Block = serde_json::from_value(json!({
            "@type": "type.googleapis.com/proto.PXE",
            "state": "INIT",
            "net": {"ip": "10.0.0.1"}
        }))
        .unwrap();

        assert!(block.set_path(&["State".into()], json!("COMP")));
        assert_eq!(block.get_path(&["state".into()]), Some(&json!("COMP")));

        assert!(block.set_path(&["Net".into(), "Ip".into()], json!("10.0.0.2")));
        assert_eq!(block.0["net"]["ip"], "10.0.0.2");
    }

    #[test]
    fn block_set_path_creates_nothing() {
        let mut block = Block::new(
            BlockKind::Service,
            "powerman",
            [("state".to_string(), json!("RUN"))],
        );
        let before = block.clone();

        assert!(!block.set_path(&["missing".into()], json!(1)));
        assert!(!block.set_path(&["state".into(), "deeper".into()], json!(1)));
        assert!(!block.set_path(&[], json!(1)));
        assert_eq!(block, before);
    }

    #[test]
    fn find_block_by_tag() {
        let mut node = Node::with_id("a");
        node.services.push(Block::new(BlockKind::Service, "sshd", []));
        assert!(node.block_mut(BlockKind::Service, "sshd").is_some());
        assert!(node.block_mut(BlockKind::Extension, "sshd").is_none());
    }
}
