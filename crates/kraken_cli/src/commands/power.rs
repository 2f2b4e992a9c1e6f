//! Power command implementation.

use kraken_live::{
    ConfigPatch, Controller, LiveConnectionMode, LiveWorker, PowerAction, PushConnector,
    Snapshot, Transport, WorkerEvent, WorkerRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs the power command.
///
/// Loads the cluster, sends the power request and waits `settle` for the
/// controller to reject the write.
pub async fn run(
    controller: Arc<dyn Controller>,
    connector: Arc<dyn PushConnector>,
    address: String,
    node_id: String,
    action: PowerAction,
    settle: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker = LiveWorker::spawn(controller, connector);
    worker.send(WorkerRequest::Start {
        config: Some(ConfigPatch::default().address(address).transport(Transport::Poll)),
    })?;

    let result = power(&worker, node_id, action, settle).await;
    worker.shutdown().await;
    result
}

async fn power(
    worker: &LiveWorker,
    node_id: String,
    action: PowerAction,
    settle: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = loaded(worker).await?;
    if !contains(&snapshot, &node_id) {
        return Err(format!("node {node_id} not found").into());
    }

    info!(%node_id, ?action, "sending power request");
    worker.send(WorkerRequest::Power {
        node_id: node_id.clone(),
        action,
    })?;

    let deadline = tokio::time::sleep(settle);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = worker.recv() => match event {
                Some(WorkerEvent::Error { error }) => return Err(error.into()),
                Some(_) => {}
                None => break,
            },
        }
    }

    let verb = match action {
        PowerAction::On => "on",
        PowerAction::Off => "off",
    };
    println!("{node_id}: power {verb}");
    Ok(())
}

// Waits for the first consistent load of the cluster.
async fn loaded(worker: &LiveWorker) -> Result<Snapshot, Box<dyn std::error::Error>> {
    loop {
        match worker.recv().await {
            Some(WorkerEvent::Data { data }) => match data.mode() {
                LiveConnectionMode::Polling => return Ok(data),
                LiveConnectionMode::Reconnect => {
                    return Err("controller unreachable or inconsistent".into())
                }
                _ => {}
            },
            Some(WorkerEvent::Error { error }) => return Err(error.into()),
            Some(WorkerEvent::Connection { .. }) => {}
            None => return Err("worker stopped".into()),
        }
    }
}

fn contains(snapshot: &Snapshot, node_id: &str) -> bool {
    snapshot.node(node_id).is_some()
        || snapshot
            .master
            .as_ref()
            .is_some_and(|m| m.id.as_deref() == Some(node_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kraken_protocol::MergedNode;

    #[test]
    fn master_and_members_are_targets() {
        let snapshot = Snapshot {
            master: Some(MergedNode {
                id: Some("m".into()),
                ..MergedNode::default()
            }),
            nodes: vec![MergedNode {
                id: Some("n1".into()),
                ..MergedNode::default()
            }],
            ..Snapshot::default()
        };
        assert!(contains(&snapshot, "m"));
        assert!(contains(&snapshot, "n1"));
        assert!(!contains(&snapshot, "n2"));
    }
}
