//! Reconciler: validation and merging of CFG and DSC collections.

use crate::repository::{merge_node, sort_collection, Collection};
use kraken_protocol::{MergedNode, Node};
use std::collections::BTreeMap;
use thiserror::Error;

/// Structural inconsistency between the CFG and DSC collections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The CFG master is missing or has no id.
    #[error("cfg master missing or without id")]
    MissingCfgMaster,

    /// The DSC master is missing or empty.
    #[error("dsc master missing")]
    MissingDscMaster,

    /// The member counts differ.
    #[error("member count mismatch: cfg={cfg}, dsc={dsc}")]
    SizeMismatch {
        /// CFG member count.
        cfg: usize,
        /// DSC member count.
        dsc: usize,
    },

    /// A CFG member has no DSC counterpart.
    #[error("cfg member {id} missing from dsc")]
    MissingMember {
        /// The member id.
        id: String,
    },
}

/// Checks that the two collections describe the same node set.
///
/// Equal counts plus every CFG id present in DSC means the id sets are
/// equal.
pub fn validate(
    cfg_master: Option<&Node>,
    cfg_members: &BTreeMap<String, Node>,
    dsc_master: Option<&Node>,
    dsc_members: &BTreeMap<String, Node>,
) -> Result<(), ValidationError> {
    if cfg_master.and_then(|m| m.id.as_ref()).is_none() {
        return Err(ValidationError::MissingCfgMaster);
    }
    if dsc_master.map_or(true, Node::is_empty) {
        return Err(ValidationError::MissingDscMaster);
    }
    if cfg_members.len() != dsc_members.len() {
        return Err(ValidationError::SizeMismatch {
            cfg: cfg_members.len(),
            dsc: dsc_members.len(),
        });
    }
    if let Some(id) = cfg_members.keys().find(|id| !dsc_members.contains_key(*id)) {
        return Err(ValidationError::MissingMember { id: id.clone() });
    }
    Ok(())
}

/// Validates two whole collections.
pub fn validate_collections(cfg: &Collection, dsc: &Collection) -> Result<(), ValidationError> {
    validate(
        cfg.master.as_ref(),
        &cfg.members,
        dsc.master.as_ref(),
        &dsc.members,
    )
}

/// Produces the merged master and the ordered merged members.
///
/// CFG members without a DSC counterpart are left out.
pub fn reconcile(
    cfg_master: Option<&Node>,
    cfg_members: &BTreeMap<String, Node>,
    dsc_master: Option<&Node>,
    dsc_members: &BTreeMap<String, Node>,
) -> (Option<MergedNode>, Vec<MergedNode>) {
    let empty = Node::default();
    let master = cfg_master.map(|cfg| merge_node(cfg, dsc_master.unwrap_or(&empty)));

    let members = cfg_members
        .iter()
        .filter_map(|(id, cfg)| dsc_members.get(id).map(|dsc| merge_node(cfg, dsc)))
        .collect();

    (master, sort_collection(members))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kraken_protocol::{PhysState, RunState};
    use proptest::prelude::*;

    fn members(ids: &[&str]) -> BTreeMap<String, Node> {
        ids.iter()
            .map(|id| {
                let mut node = Node::with_id(*id);
                node.parent_id = Some("m".into());
                (id.to_string(), node)
            })
            .collect()
    }

    fn master() -> Node {
        Node::with_id("m")
    }

    #[test]
    fn valid_collections() {
        let m = master();
        assert_eq!(
            validate(Some(&m), &members(&["a", "b"]), Some(&m), &members(&["b", "a"])),
            Ok(())
        );
    }

    #[test]
    fn same_size_different_ids() {
        let m = master();
        assert_eq!(
            validate(Some(&m), &members(&["a", "b"]), Some(&m), &members(&["a", "c"])),
            Err(ValidationError::MissingMember { id: "b".into() })
        );
    }

    #[test]
    fn structural_failures() {
        let m = master();
        let a = members(&["a"]);

        assert_eq!(
            validate(None, &a, Some(&m), &a),
            Err(ValidationError::MissingCfgMaster)
        );
        assert_eq!(
            validate(Some(&Node::default()), &a, Some(&m), &a),
            Err(ValidationError::MissingCfgMaster)
        );
        assert_eq!(
            validate(Some(&m), &a, Some(&Node::default()), &a),
            Err(ValidationError::MissingDscMaster)
        );
        assert_eq!(
            validate(Some(&m), &a, Some(&m), &members(&["a", "b"])),
            Err(ValidationError::SizeMismatch { cfg: 1, dsc: 2 })
        );
    }

    #[test]
    fn reconcile_merges_and_orders() {
        let mut cfg_master = master();
        cfg_master.name = Some("head".into());
        let mut dsc_master = master();
        dsc_master.phys_state = Some(PhysState::PowerOn);

        let mut cfg = members(&["x", "y", "z"]);
        cfg.get_mut("x").unwrap().name = Some("c0n10".into());
        cfg.get_mut("y").unwrap().name = Some("c0n2".into());
        let mut dsc = members(&["x", "y"]);
        dsc.get_mut("y").unwrap().run_state = Some(RunState::Sync);

        let (merged_master, merged) = reconcile(Some(&cfg_master), &cfg, Some(&dsc_master), &dsc);

        let merged_master = merged_master.unwrap();
        assert_eq!(merged_master.name.as_deref(), Some("head"));
        assert_eq!(merged_master.phys_state, Some(PhysState::PowerOn));

        let ids: Vec<_> = merged.iter().map(|n| n.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["y", "x"]);
        assert_eq!(merged[0].run_state, Some(RunState::Sync));
    }

    proptest! {
        #[test]
        fn validation_matches_id_set_equality(
            cfg_ids in proptest::collection::btree_set("[a-d]", 0..4),
            dsc_ids in proptest::collection::btree_set("[a-d]", 0..4),
        ) {
            let m = master();
            let cfg: Vec<&str> = cfg_ids.iter().map(String::as_str).collect();
            let dsc: Vec<&str> = dsc_ids.iter().map(String::as_str).collect();

            let result = validate(Some(&m), &members(&cfg), Some(&m), &members(&dsc));
            prop_assert_eq!(result.is_ok(), cfg_ids == dsc_ids);
        }
    }
}
