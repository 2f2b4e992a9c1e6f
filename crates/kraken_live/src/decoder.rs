//! Event decoder: applies push events to the session mirrors.

use crate::session::SessionState;
use kraken_protocol::{BlockKind, PhysState, PushEvent, RunState};
use serde_json::Value;
use tracing::{debug, info};

/// Result of applying one push batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// At least one mirror field changed.
    pub dirty: bool,
    /// The mirror is out of sync and must be re-fetched.
    pub refetch: bool,
    /// The focused node's topology graph should be re-fetched.
    pub graph_refresh: bool,
}

enum Applied {
    Changed,
    Unchanged,
    GraphRelevant,
    Desync(&'static str),
}

/// Applies a batch of events in delivery order.
///
/// The first desync signal stops the batch; mutations applied before it are
/// kept and reported as dirty.
pub fn apply_batch(
    session: &mut SessionState,
    events: impl IntoIterator<Item = PushEvent>,
    focused: Option<&str>,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for event in events {
        let node_id = event.node_id().map(str::to_string);
        match apply_event(session, event, focused) {
            Applied::Changed => outcome.dirty = true,
            Applied::Unchanged => {}
            Applied::GraphRelevant => outcome.graph_refresh = true,
            Applied::Desync(reason) => {
                info!(node_id = node_id.as_deref().unwrap_or(""), reason, "mirror out of sync");
                outcome.refetch = true;
                break;
            }
        }
    }
    outcome
}

fn apply_event(session: &mut SessionState, event: PushEvent, focused: Option<&str>) -> Applied {
    match event {
        PushEvent::StructuralChange { .. } => Applied::Desync("structural change"),
        PushEvent::Malformed { reason, .. } => {
            debug!(%reason, "malformed state change");
            Applied::Desync("malformed state value")
        }
        PushEvent::PhysStateChanged { node_id, state } => set_phys_state(session, &node_id, state),
        PushEvent::RunStateChanged { node_id, state } => set_run_state(session, &node_id, state),
        PushEvent::BlockFieldChanged {
            node_id,
            kind,
            tag,
            path,
            value,
        } => set_block_field(session, &node_id, kind, &tag, &path, value),
        PushEvent::GraphRelevant { node_id } => match focused {
            Some(focused) if node_id == focused.to_lowercase() => Applied::GraphRelevant,
            _ => Applied::Unchanged,
        },
        PushEvent::Ignored => Applied::Unchanged,
    }
}

fn set_phys_state(session: &mut SessionState, node_id: &str, state: PhysState) -> Applied {
    let (Some(cfg), Some(dsc)) = session.node_pair_mut(node_id) else {
        return Applied::Desync("unknown node");
    };
    for node in [cfg, dsc] {
        node.phys_state = Some(state);
        if state.forces_unknown_run_state() {
            node.run_state = Some(RunState::Unknown);
        }
    }
    Applied::Changed
}

fn set_run_state(session: &mut SessionState, node_id: &str, state: RunState) -> Applied {
    let (Some(cfg), Some(dsc)) = session.node_pair_mut(node_id) else {
        return Applied::Desync("unknown node");
    };
    // Guard on the observed physical state. After a power action the CFG
    // mirror holds the requested state, which the node may not have reached.
    let blocked = dsc.phys_state.is_some_and(|p| p.blocks_run_state());
    if state != RunState::Unknown && blocked {
        return Applied::Desync("run state advanced while physical state unhealthy");
    }
    cfg.run_state = Some(state);
    dsc.run_state = Some(state);
    Applied::Changed
}

fn set_block_field(
    session: &mut SessionState,
    node_id: &str,
    kind: BlockKind,
    tag: &str,
    path: &[String],
    value: Value,
) -> Applied {
    let (Some(cfg), Some(dsc)) = session.node_pair_mut(node_id) else {
        return Applied::Desync("unknown node");
    };
    let mut changed = false;
    for node in [cfg, dsc] {
        if let Some(block) = node.block_mut(kind, tag) {
            changed |= block.set_path(path, value.clone());
        }
    }
    if changed {
        Applied::Changed
    } else {
        debug!(node_id, tag, ?path, "block field not present, update skipped");
        Applied::Unchanged
    }
}
