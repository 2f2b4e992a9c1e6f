//! Connection session state and the snapshots published from it.

use crate::reconcile::reconcile;
use crate::repository::Collection;
use kraken_protocol::{Graph, MergedNode, Node, RunState, StateCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Live connection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveConnectionMode {
    /// Full re-fetch of both collections. Initial mode.
    #[default]
    #[serde(rename = "REFETCH")]
    Refetch,
    /// Periodic DSC re-fetch.
    #[serde(rename = "POLLING")]
    Polling,
    /// Push updates over a socket.
    #[serde(rename = "WEBSOCKET")]
    WebSocket,
    /// Periodic probe until the controller answers again.
    #[serde(rename = "RECONNECT")]
    Reconnect,
}

impl LiveConnectionMode {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveConnectionMode::Refetch => "REFETCH",
            LiveConnectionMode::Polling => "POLLING",
            LiveConnectionMode::WebSocket => "WEBSOCKET",
            LiveConnectionMode::Reconnect => "RECONNECT",
        }
    }
}

impl fmt::Display for LiveConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State owned by the live connection state machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// CFG master.
    pub cfg_master: Option<Node>,
    /// CFG members by id.
    pub cfg_nodes: BTreeMap<String, Node>,
    /// DSC master.
    pub dsc_master: Option<Node>,
    /// DSC members by id.
    pub dsc_nodes: BTreeMap<String, Node>,
    /// Current mode.
    pub live_connection_mode: LiveConnectionMode,
    /// Topology graph of the focused node.
    pub graph: Option<Graph>,
    /// State enumerables, passed through untouched.
    pub state_categories: Option<Vec<StateCategory>>,
}

impl SessionState {
    /// Replaces the CFG collection.
    pub fn set_cfg(&mut self, collection: Collection) {
        self.cfg_master = collection.master;
        self.cfg_nodes = collection.members;
    }

    /// Replaces the DSC collection.
    pub fn set_dsc(&mut self, collection: Collection) {
        self.dsc_master = collection.master;
        self.dsc_nodes = collection.members;
    }

    /// Returns the CFG master id.
    pub fn master_id(&self) -> Option<&str> {
        self.cfg_master.as_ref().and_then(|m| m.id.as_deref())
    }

    /// Looks a node up in both mirrors, masters included.
    pub fn node_pair_mut(&mut self, id: &str) -> (Option<&mut Node>, Option<&mut Node>) {
        (
            find_mut(&mut self.cfg_master, &mut self.cfg_nodes, id),
            find_mut(&mut self.dsc_master, &mut self.dsc_nodes, id),
        )
    }
}

fn find_mut<'a>(
    master: &'a mut Option<Node>,
    members: &'a mut BTreeMap<String, Node>,
    id: &str,
) -> Option<&'a mut Node> {
    if let Some(node) = members.get_mut(id) {
        return Some(node);
    }
    master
        .as_mut()
        .filter(|m| m.id.as_deref() == Some(id))
}

/// Run state tally over the merged members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Unknown or absent run state.
    pub unknown: usize,
    /// Initializing.
    pub init: usize,
    /// Synchronized.
    pub sync: usize,
    /// Errored.
    pub error: usize,
}

impl StateCounts {
    /// Counts the run states of the given nodes.
    pub fn tally<'a>(nodes: impl IntoIterator<Item = &'a MergedNode>) -> Self {
        let mut counts = StateCounts::default();
        for node in nodes {
            match node.run_state {
                Some(RunState::Init) => counts.init += 1,
                Some(RunState::Sync) => counts.sync += 1,
                Some(RunState::Error) => counts.error += 1,
                Some(RunState::Unknown) | None => counts.unknown += 1,
            }
        }
        counts
    }
}

/// An immutable copy of the session, plus the merged view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The raw session state.
    #[serde(flatten)]
    pub session: SessionState,
    /// Merged master.
    pub master: Option<MergedNode>,
    /// Merged members in display order.
    pub nodes: Vec<MergedNode>,
    /// Run state tally of `nodes`.
    pub counts: StateCounts,
}

impl Snapshot {
    /// Copies the session and derives the merged view.
    pub fn capture(session: &SessionState) -> Self {
        let (master, nodes) = reconcile(
            session.cfg_master.as_ref(),
            &session.cfg_nodes,
            session.dsc_master.as_ref(),
            &session.dsc_nodes,
        );
        let counts = StateCounts::tally(&nodes);
        Self {
            session: session.clone(),
            master,
            nodes,
            counts,
        }
    }

    /// Returns the live connection mode.
    pub fn mode(&self) -> LiveConnectionMode {
        self.session.live_connection_mode
    }

    /// Finds a merged member by id.
    pub fn node(&self, id: &str) -> Option<&MergedNode> {
        self.nodes.iter().find(|n| n.id.as_deref() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> SessionState {
        let mut session = SessionState::default();
        session.cfg_master = Some(Node::with_id("m"));
        session.dsc_master = Some(Node::with_id("m"));
        for (id, run) in [("a", Some(RunState::Sync)), ("b", None), ("c", Some(RunState::Init))] {
            let mut node = Node::with_id(id);
            node.parent_id = Some("m".into());
            session.cfg_nodes.insert(id.into(), node.clone());
            node.run_state = run;
            session.dsc_nodes.insert(id.into(), node);
        }
        session
    }

    #[test]
    fn node_pair_lookup() {
        let mut session = session();
        let (cfg, dsc) = session.node_pair_mut("a");
        assert!(cfg.is_some() && dsc.is_some());

        let (cfg, dsc) = session.node_pair_mut("m");
        assert!(cfg.is_some() && dsc.is_some());

        session.dsc_nodes.remove("b");
        let (cfg, dsc) = session.node_pair_mut("b");
        assert!(cfg.is_some());
        assert!(dsc.is_none());
    }

    #[test]
    fn snapshot_counts_and_wire_names() {
        let snapshot = Snapshot::capture(&session());
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(
            snapshot.counts,
            StateCounts {
                unknown: 1,
                init: 1,
                sync: 1,
                error: 0
            }
        );

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["liveConnectionMode"], json!("REFETCH"));
        assert!(value["cfgNodes"].get("a").is_some());
        assert!(value["dscMaster"].is_object());
        assert_eq!(value["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(value["counts"]["sync"], json!(1));
        assert!(value["graph"].is_null());
    }

    #[test]
    fn mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&LiveConnectionMode::WebSocket).unwrap(),
            "\"WEBSOCKET\""
        );
        assert_eq!(LiveConnectionMode::default(), LiveConnectionMode::Refetch);
        assert_eq!(LiveConnectionMode::Reconnect.to_string(), "RECONNECT");
    }
}
