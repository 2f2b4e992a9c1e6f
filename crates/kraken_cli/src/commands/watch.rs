//! Watch command implementation.

use kraken_live::{
    ConfigPatch, Controller, LiveWorker, PushConnector, Snapshot, Transport, WorkerEvent,
    WorkerRequest,
};
use std::sync::Arc;

/// Options of the watch command.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Controller `host:port`.
    pub address: String,
    /// Refresh interval in seconds.
    pub refresh_secs: f64,
    /// Preferred transport.
    pub transport: Transport,
    /// Node whose topology graph is followed.
    pub focus: Option<String>,
    /// Output format (text, json).
    pub format: String,
    /// Stop after this many snapshots.
    pub count: Option<usize>,
}

impl WatchOptions {
    fn patch(&self) -> ConfigPatch {
        ConfigPatch::default()
            .address(self.address.clone())
            .refresh_secs(self.refresh_secs)
            .transport(self.transport)
            .focus(self.focus.as_deref())
    }
}

/// Runs the watch command until interrupted.
pub async fn run(
    controller: Arc<dyn Controller>,
    connector: Arc<dyn PushConnector>,
    options: WatchOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker = LiveWorker::spawn(controller, connector);
    worker.send(WorkerRequest::Start {
        config: Some(options.patch()),
    })?;

    let result = follow(&worker, &options).await;
    worker.shutdown().await;
    result
}

async fn follow(worker: &LiveWorker, options: &WatchOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut snapshots = 0;
    loop {
        let event = tokio::select! {
            event = worker.recv() => event,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = event else {
            return Ok(());
        };

        if options.format == "json" {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", describe(&event));
        }

        if matches!(event, WorkerEvent::Data { .. }) {
            snapshots += 1;
            if options.count.is_some_and(|count| snapshots >= count) {
                return Ok(());
            }
        }
    }
}

/// One-line text rendering of an outbound message.
pub fn describe(event: &WorkerEvent) -> String {
    match event {
        WorkerEvent::Data { data } => summary(data),
        WorkerEvent::Error { error } => format!("error: {error}"),
        WorkerEvent::Connection { connection_type } => {
            format!("transport switched to {connection_type}")
        }
    }
}

fn summary(snapshot: &Snapshot) -> String {
    let master = snapshot
        .master
        .as_ref()
        .and_then(|m| m.name.as_deref().or(m.id.as_deref()))
        .unwrap_or("-");
    let counts = snapshot.counts;
    format!(
        "{:<9} master={} nodes={} sync={} init={} error={} unknown={}{}",
        snapshot.mode().as_str(),
        master,
        snapshot.nodes.len(),
        counts.sync,
        counts.init,
        counts.error,
        counts.unknown,
        if snapshot.session.graph.is_some() {
            " graph"
        } else {
            ""
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kraken_live::LiveConnectionMode;
    use kraken_protocol::{MergedNode, RunState};

    #[test]
    fn text_rendering() {
        let mut snapshot = Snapshot::default();
        snapshot.session.live_connection_mode = LiveConnectionMode::Polling;
        snapshot.master = Some(MergedNode {
            name: Some("kraken".into()),
            ..MergedNode::default()
        });
        snapshot.nodes = vec![MergedNode {
            run_state: Some(RunState::Sync),
            ..MergedNode::default()
        }];
        snapshot.counts.sync = 1;

        assert_eq!(
            describe(&WorkerEvent::Data { data: snapshot }),
            "POLLING   master=kraken nodes=1 sync=1 init=0 error=0 unknown=0"
        );
        assert_eq!(
            describe(&WorkerEvent::Connection {
                connection_type: Transport::Poll
            }),
            "transport switched to POLL"
        );
    }

    #[test]
    fn options_become_a_start_patch() {
        let options = WatchOptions {
            address: "10.0.0.1:3141".into(),
            refresh_secs: 2.0,
            transport: Transport::WebSocket,
            focus: None,
            format: "text".into(),
            count: None,
        };
        let patch = options.patch();
        assert_eq!(patch.address.as_deref(), Some("10.0.0.1:3141"));
        assert_eq!(patch.preferred_transport, Some(Transport::WebSocket));
        assert_eq!(patch.focused_node, Some(None));
    }
}
