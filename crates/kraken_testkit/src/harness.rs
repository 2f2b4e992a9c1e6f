//! Worker harness for end-to-end tests.
//!
//! Spawns a [`LiveWorker`] against a [`SimulatedCluster`] and a
//! [`MockConnector`], and waits for the messages it publishes.

use crate::cluster::SimulatedCluster;
use kraken_live::{
    ConfigPatch, LiveConnectionMode, LiveWorker, MockConnection, MockConnector, Snapshot,
    Transport, WorkerEvent, WorkerRequest,
};
use std::time::Duration;

/// How long the helpers wait for a message.
pub const WAIT: Duration = Duration::from_secs(10);

/// A started worker and the fakes it runs against.
pub struct LiveHarness {
    /// The worker.
    pub worker: LiveWorker,
    /// The simulated controller.
    pub cluster: SimulatedCluster,
    /// The push connector.
    pub connector: MockConnector,
    /// Every message received through the harness, in order.
    pub received: Vec<WorkerEvent>,
}

impl LiveHarness {
    /// Starts a worker preferring `transport` with a 1s refresh interval.
    pub fn start(cluster: SimulatedCluster, transport: Transport) -> Self {
        let patch = ConfigPatch::default()
            .address(cluster.address())
            .refresh_secs(1.0)
            .transport(transport);
        Self::start_with(cluster, MockConnector::new(), patch)
    }

    /// Starts a worker with an explicit connector and configuration.
    pub fn start_with(cluster: SimulatedCluster, connector: MockConnector, patch: ConfigPatch) -> Self {
        let worker = LiveWorker::spawn(cluster.controller(), std::sync::Arc::new(connector.clone()));
        worker
            .send(WorkerRequest::Start {
                config: Some(patch),
            })
            .expect("worker accepts START");
        Self {
            worker,
            cluster,
            connector,
            received: Vec::new(),
        }
    }

    /// Sends a configuration patch.
    pub fn configure(&self, patch: ConfigPatch) {
        self.worker
            .send(WorkerRequest::Config {
                config: Some(patch),
            })
            .expect("worker accepts CONFIG");
    }

    /// Waits for the next message.
    pub async fn next(&mut self) -> WorkerEvent {
        let event = tokio::time::timeout(WAIT, self.worker.recv())
            .await
            .expect("timed out waiting for a worker message")
            .expect("worker stopped");
        self.received.push(event.clone());
        event
    }

    /// Waits for a snapshot matching `predicate`.
    pub async fn snapshot_where(&mut self, predicate: impl Fn(&Snapshot) -> bool) -> Snapshot {
        loop {
            if let WorkerEvent::Data { data } = self.next().await {
                if predicate(&data) {
                    return data;
                }
            }
        }
    }

    /// Waits for a snapshot in `mode`.
    pub async fn mode(&mut self, mode: LiveConnectionMode) -> Snapshot {
        self.snapshot_where(|s| s.mode() == mode).await
    }

    /// Waits for an `ERROR` message and returns its text.
    pub async fn error(&mut self) -> String {
        loop {
            if let WorkerEvent::Error { error } = self.next().await {
                return error;
            }
        }
    }

    /// Returns the most recent socket connection.
    pub fn socket(&self) -> MockConnection {
        self.connector
            .last_connection()
            .expect("a socket was opened")
    }

    /// Lets spawned work run and the clock advance by `by`.
    pub async fn settle(&self, by: Duration) {
        tokio::time::sleep(by).await;
    }

    /// Modes of every snapshot received so far.
    pub fn modes(&self) -> Vec<LiveConnectionMode> {
        self.received
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Data { data } => Some(data.mode()),
                _ => None,
            })
            .collect()
    }

    /// Stops the worker.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}
