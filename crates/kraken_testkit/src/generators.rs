//! Property-based test generators using proptest.
//!
//! Provides strategies for node names, clusters and push frames.

use crate::fixtures::{
    create_event, field_event, member_id, mutation_event, phys_state_event, run_state_event,
    ClusterFixture,
};
use kraken_protocol::{PhysState, RunState};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for display names, indexed (`c<n>n<m>`), plain or absent.
pub fn node_name_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        (0u32..4, 0u32..40).prop_map(|(c, n)| Some(format!("c{c}n{n}"))),
        "[a-z]{1,8}".prop_map(Some),
        "[a-z]{1,4}[0-9]{1,3}".prop_map(Some),
    ]
}

/// Strategy for physical states.
pub fn phys_state_strategy() -> impl Strategy<Value = PhysState> {
    proptest::sample::select(PhysState::ALL.to_vec())
}

/// Strategy for run states.
pub fn run_state_strategy() -> impl Strategy<Value = RunState> {
    proptest::sample::select(RunState::ALL.to_vec())
}

/// Strategy for a fixture cluster with renamed members.
pub fn cluster_strategy(max_members: usize) -> impl Strategy<Value = ClusterFixture> {
    (1..=max_members)
        .prop_flat_map(|n| proptest::collection::vec(node_name_strategy(), n))
        .prop_map(|names| {
            let mut cluster = ClusterFixture::new(names.len());
            for (node, name) in cluster.members.iter_mut().zip(names) {
                node.name = name;
            }
            cluster
        })
}

/// Strategy for one non-structural push event about member 1..=`members`.
pub fn state_event_strategy(members: usize) -> impl Strategy<Value = Value> {
    let id = (1..=members).prop_map(member_id);
    prop_oneof![
        (id.clone(), phys_state_strategy()).prop_map(|(id, s)| phys_state_event(&id, s)),
        (id.clone(), run_state_strategy()).prop_map(|(id, s)| run_state_event(&id, s)),
        (id.clone(), "[A-Z]{3,5}").prop_map(|(id, v)| field_event(
            &id,
            "/type.googleapis.com/proto.PXE/State",
            json!(v)
        )),
        id.prop_map(|id| mutation_event(&id)),
    ]
}

/// Strategy for a push frame, optionally containing a structural change.
pub fn frame_strategy(members: usize) -> impl Strategy<Value = Vec<Value>> {
    (
        proptest::collection::vec(state_event_strategy(members), 0..8),
        proptest::option::of((0usize..8, 1..=members)),
    )
        .prop_map(|(mut events, create)| {
            if let Some((at, index)) = create {
                let at = at.min(events.len());
                events.insert(at, create_event(&member_id(index)));
            }
            events
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kraken_protocol::{decode_frame, PushEvent};

    proptest! {
        #[test]
        fn generated_frames_decode(events in frame_strategy(3)) {
            let text = Value::Array(events.clone()).to_string();
            let decoded = decode_frame(&text).unwrap();
            prop_assert_eq!(decoded.len(), events.len());
            let well_formed = decoded
                .iter()
                .all(|e| !matches!(e, PushEvent::Malformed { .. }));
            prop_assert!(well_formed, "malformed event in {}", text);
        }

        #[test]
        fn generated_clusters_have_one_master(cluster in cluster_strategy(6)) {
            let list = cluster.node_list();
            prop_assert_eq!(list.nodes.iter().filter(|n| n.is_master()).count(), 1);
        }
    }
}
