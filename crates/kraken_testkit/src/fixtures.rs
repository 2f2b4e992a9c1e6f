//! Cluster fixtures and push frame builders.
//!
//! Provides ready-made clusters and the JSON frames a controller would push
//! for them.

use kraken_protocol::{Block, BlockKind, Node, NodeList, PhysState, RunState};
use serde_json::{json, Value};

/// Id of the fixture master.
pub const MASTER_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

/// Extension tag of the PXE boot block.
pub const PXE_TAG: &str = "type.googleapis.com/proto.PXE";

/// Extension tag of the Raspberry Pi 3 block.
pub const RPI3_TAG: &str = "type.googleapis.com/proto.RPi3";

/// Returns the fixture id of member `index` (1-based).
pub fn member_id(index: usize) -> String {
    format!("123e4567-e89b-12d3-a456-{index:012}")
}

/// Builds a member node named `c0n<index>` that is powered on and synced.
pub fn member(index: usize) -> Node {
    let mut node = Node::with_id(member_id(index));
    node.parent_id = Some(MASTER_ID.to_string());
    node.name = Some(format!("c0n{index}"));
    node.architecture = Some("aarch64".into());
    node.platform = Some("rpi3".into());
    node.phys_state = Some(PhysState::PowerOn);
    node.run_state = Some(RunState::Sync);
    node.extensions.push(Block::new(
        BlockKind::Extension,
        PXE_TAG,
        [
            ("state".to_string(), json!("COMP")),
            ("method".to_string(), json!("PXE")),
        ],
    ));
    node.extensions.push(Block::new(
        BlockKind::Extension,
        RPI3_TAG,
        [("pxe".to_string(), json!("COMP"))],
    ));
    node.services.push(Block::new(
        BlockKind::Service,
        "sshd",
        [("state".to_string(), json!("RUN"))],
    ));
    node
}

/// Builds the master node.
pub fn master() -> Node {
    let mut node = Node::with_id(MASTER_ID);
    node.name = Some("kraken".into());
    node.phys_state = Some(PhysState::PowerOn);
    node.run_state = Some(RunState::Sync);
    node
}

/// A master with its members, in one view (CFG or DSC).
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterFixture {
    /// The master.
    pub master: Node,
    /// Members, in insertion order.
    pub members: Vec<Node>,
}

impl ClusterFixture {
    /// Creates a cluster with `members` members named `c0n1`..`c0n<members>`.
    pub fn new(members: usize) -> Self {
        Self {
            master: master(),
            members: (1..=members).map(member).collect(),
        }
    }

    /// Returns the master id.
    pub fn master_id(&self) -> &str {
        MASTER_ID
    }

    /// Returns the member ids.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().filter_map(|n| n.id.clone()).collect()
    }

    /// Finds a member, or the master, by id.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.master.id.as_deref() == Some(id) {
            return Some(&mut self.master);
        }
        self.members.iter_mut().find(|n| n.id.as_deref() == Some(id))
    }

    /// Removes a member.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        let index = self.members.iter().position(|n| n.id.as_deref() == Some(id))?;
        Some(self.members.remove(index))
    }

    /// Returns the node list body, master first.
    pub fn node_list(&self) -> NodeList {
        let mut nodes = Vec::with_capacity(self.members.len() + 1);
        nodes.push(self.master.clone());
        nodes.extend(self.members.iter().cloned());
        NodeList { nodes }
    }

    /// Returns the node list as JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(&self.node_list()).unwrap_or_default()
    }
}

/// A state-change event setting a node's physical state.
pub fn phys_state_event(node_id: &str, state: PhysState) -> Value {
    json!({"type": 1, "nodeid": node_id, "url": "/PhysState", "value": state.as_str(), "data": ""})
}

/// A state-change event setting a node's run state.
pub fn run_state_event(node_id: &str, state: RunState) -> Value {
    json!({"type": 1, "nodeid": node_id, "url": "/RunState", "value": state.as_str(), "data": ""})
}

/// A state-change event setting a block field.
pub fn field_event(node_id: &str, url: &str, value: Value) -> Value {
    json!({"type": 1, "nodeid": node_id, "url": url, "value": value, "data": ""})
}

/// A state-change event announcing a new node.
pub fn create_event(node_id: &str) -> Value {
    json!({"type": 1, "nodeid": node_id, "url": "", "data": "(CREATE)"})
}

/// A mutation event.
pub fn mutation_event(node_id: &str) -> Value {
    json!({"type": 2, "nodeid": node_id, "url": "", "data": "mutation"})
}

/// Serializes events into one push frame.
pub fn frame(events: impl IntoIterator<Item = Value>) -> String {
    Value::Array(events.into_iter().collect()).to_string()
}
