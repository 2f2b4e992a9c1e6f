//! Auxiliary controller payloads: topology graph, state enumerables and
//! push socket bootstrap.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Topology graph for one focused node.
///
/// Graph contents are rendered by the presentation layer and passed through
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Graph vertices.
    #[serde(default)]
    pub nodes: Vec<Value>,
    /// Graph edges.
    #[serde(default)]
    pub edges: Vec<Value>,
}

/// One enumerable state category used to populate UI pickers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCategory {
    /// Category name.
    pub name: String,
    /// Node field url this category applies to.
    pub url: String,
    /// Enum value to display label.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CategoryList {
    Bare(Vec<StateCategory>),
    Wrapped { state_categories: Vec<StateCategory> },
}

impl StateCategory {
    /// Decodes the enumerables endpoint body.
    ///
    /// Accepts either a bare list or an object wrapping it in
    /// `state_categories`.
    pub fn decode_list(bytes: &[u8]) -> ProtocolResult<Vec<StateCategory>> {
        let list: CategoryList = serde_json::from_slice(bytes)?;
        Ok(match list {
            CategoryList::Bare(categories) => categories,
            CategoryList::Wrapped { state_categories } => state_categories,
        })
    }
}

/// Push socket location announced by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketBootstrap {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Socket path.
    pub url: String,
}

impl SocketBootstrap {
    /// Returns the full push socket URL.
    pub fn socket_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_url() {
        let bootstrap: SocketBootstrap =
            serde_json::from_str(r#"{"host":"10.0.0.1","port":3141,"url":"/ws"}"#).unwrap();
        assert_eq!(bootstrap.socket_url(), "ws://10.0.0.1:3141/ws");
    }

    #[test]
    fn categories_bare_and_wrapped() {
        let bare = br#"[{"name":"Run State","url":"/RunState","options":{"SYNC":"Sync"}}]"#;
        let categories = StateCategory::decode_list(bare).unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].options["SYNC"], "Sync");

        let wrapped = br#"{"state_categories":[{"name":"a","url":"/a"},{"name":"b","url":"/b"}]}"#;
        let categories = StateCategory::decode_list(wrapped).unwrap();
        assert_eq!(categories.len(), 2);
        assert!(categories[1].options.is_empty());

        assert!(StateCategory::decode_list(b"{}").is_err());
    }

    #[test]
    fn graph_tolerates_missing_parts() {
        let graph: Graph = serde_json::from_str(r#"{"nodes":[{"id":"a"}]}"#).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
    }
}
