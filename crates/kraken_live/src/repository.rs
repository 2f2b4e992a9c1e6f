//! Node repository: fetching, splitting, merging and ordering node
//! collections.

use crate::error::{LiveError, LiveResult};
use crate::transport::Controller;
use kraken_protocol::{Block, BlockKind, MergedNode, Node, NodeList};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// One node collection: a master plus members keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// The collection's master node.
    pub master: Option<Node>,
    /// Member nodes by id.
    pub members: BTreeMap<String, Node>,
}

impl Collection {
    /// Returns the master's id, if any.
    pub fn master_id(&self) -> Option<&str> {
        self.master.as_ref().and_then(|m| m.id.as_deref())
    }

    /// Splits a CFG node list: the parentless node is the master.
    pub fn from_list(list: NodeList) -> Self {
        let mut collection = Collection::default();
        for node in list.nodes {
            if node.is_master() {
                if collection.master.is_some() {
                    debug!(node_id = ?node.id, "second parentless node ignored");
                    continue;
                }
                collection.master = Some(node);
            } else {
                collection.insert_member(node);
            }
        }
        collection
    }

    /// Splits a DSC node list: the master is the node whose id matches.
    pub fn from_discovery_list(list: NodeList, expected_master_id: &str) -> Self {
        let mut collection = Collection::default();
        for node in list.nodes {
            if collection.master.is_none() && node.id.as_deref() == Some(expected_master_id) {
                collection.master = Some(node);
            } else {
                collection.insert_member(node);
            }
        }
        collection
    }

    fn insert_member(&mut self, node: Node) {
        match node.id.clone() {
            Some(id) => {
                self.members.insert(id, node);
            }
            None => debug!("member without id dropped"),
        }
    }
}

/// Fetches a CFG-style collection.
///
/// Never retries; the caller decides what a failure means.
pub fn fetch_collection(controller: &dyn Controller, url: &str) -> LiveResult<Collection> {
    let list = controller.node_list(url)?;
    Ok(Collection::from_list(list))
}

/// Fetches a DSC-style collection, selecting the master by id.
pub fn fetch_discovery_collection(
    controller: &dyn Controller,
    url: &str,
    expected_master_id: &str,
) -> LiveResult<Collection> {
    let list = controller.node_list(url)?;
    let collection = Collection::from_discovery_list(list, expected_master_id);
    if collection.master.is_none() {
        return Err(LiveError::fetch(
            url,
            format!("master {expected_master_id} missing from discovery list"),
        ));
    }
    Ok(collection)
}

/// Combines a CFG node with its DSC counterpart.
///
/// Static attributes come from CFG and dynamic state from DSC. Blocks keep
/// CFG order; a DSC block replaces the CFG block with the same tag, and
/// DSC-only blocks are appended.
pub fn merge_node(cfg: &Node, dsc: &Node) -> MergedNode {
    MergedNode {
        id: cfg.id.clone().or_else(|| dsc.id.clone()),
        parent_id: cfg.parent_id.clone(),
        name: cfg.name.clone(),
        architecture: cfg.architecture.clone(),
        platform: cfg.platform.clone(),
        phys_state: dsc.phys_state,
        run_state: dsc.run_state,
        extensions: merge_blocks(BlockKind::Extension, &cfg.extensions, &dsc.extensions),
        services: merge_blocks(BlockKind::Service, &cfg.services, &dsc.services),
    }
}

fn merge_blocks(kind: BlockKind, cfg: &[Block], dsc: &[Block]) -> Vec<Block> {
    let mut merged: Vec<Block> = cfg
        .iter()
        .map(|block| {
            block
                .tag(kind)
                .and_then(|tag| dsc.iter().find(|d| d.tag(kind) == Some(tag)))
                .unwrap_or(block)
                .clone()
        })
        .collect();

    for block in dsc {
        let present = block
            .tag(kind)
            .is_some_and(|tag| cfg.iter().any(|c| c.tag(kind) == Some(tag)));
        if !present {
            merged.push(block.clone());
        }
    }
    merged
}

/// Ordering key derived from a node name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NameKey<'a> {
    Unnamed,
    Indexed(u64, u64, &'a str),
    Plain(&'a str),
}

fn name_key(name: Option<&str>) -> NameKey<'_> {
    let Some(name) = name else {
        return NameKey::Unnamed;
    };
    let mut groups = name
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .map(|g| g.parse::<u64>().ok());
    match (groups.next().flatten(), groups.next().flatten()) {
        (Some(cluster), Some(node)) => NameKey::Indexed(cluster, node, name),
        _ => NameKey::Plain(name),
    }
}

/// Compares two nodes for display order.
///
/// Unnamed nodes come first, then names with cluster and node indices in
/// numeric order, then other names. Ties break by id, so the order is total.
pub fn compare_nodes(a: &MergedNode, b: &MergedNode) -> Ordering {
    name_key(a.name.as_deref())
        .cmp(&name_key(b.name.as_deref()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts merged members into display order.
pub fn sort_collection(mut members: Vec<MergedNode>) -> Vec<MergedNode> {
    members.sort_by(compare_nodes);
    members
}
