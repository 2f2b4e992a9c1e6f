//! Worker boundary: the messages exchanged with the host and the task that
//! runs the live connection.
//!
//! The host talks to a [`LiveWorker`] with [`WorkerRequest`]s (or their JSON
//! form) and drains [`WorkerEvent`]s. Only the newest snapshot matters, so a
//! queued `DATA` message is replaced by the next one.

use crate::config::{ConfigPatch, LiveConfig, Transport};
use crate::engine::Engine;
use crate::error::{LiveError, LiveResult};
use crate::machine::{LiveMachine, PowerAction};
use crate::session::Snapshot;
use crate::transport::{Controller, PushConnector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Message from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Start the live connection, optionally with initial configuration.
    Start {
        /// Initial configuration.
        #[serde(default)]
        config: Option<ConfigPatch>,
    },
    /// Merge a configuration patch.
    Config {
        /// The patch. Required.
        #[serde(default)]
        config: Option<ConfigPatch>,
    },
    /// Power a node on or off.
    Power {
        /// Target node.
        #[serde(rename = "nodeId")]
        node_id: String,
        /// Requested action.
        action: PowerAction,
    },
}

/// Message to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    /// A new session snapshot.
    Data {
        /// The snapshot.
        data: Snapshot,
    },
    /// A failure the host should surface.
    Error {
        /// Human readable description.
        error: String,
    },
    /// The preferred transport was changed by the worker.
    Connection {
        /// The new preferred transport.
        #[serde(rename = "connectionType")]
        connection_type: Transport,
    },
}

impl WorkerEvent {
    /// Builds an `ERROR` message.
    pub fn error(error: impl fmt::Display) -> Self {
        WorkerEvent::Error {
            error: error.to_string(),
        }
    }
}

/// A host message as it enters the worker's control channel.
#[derive(Debug)]
pub(crate) enum Envelope {
    Request(WorkerRequest),
    Invalid(String),
}

/// Queue of outbound messages.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Mutex<VecDeque<WorkerEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message. A `DATA` message replaces a trailing `DATA`.
    pub fn push(&self, event: WorkerEvent) {
        {
            let mut queue = self.queue.lock();
            if matches!(event, WorkerEvent::Data { .. })
                && matches!(queue.back(), Some(WorkerEvent::Data { .. }))
            {
                queue.pop_back();
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Takes the oldest message without waiting.
    pub fn try_pop(&self) -> Option<WorkerEvent> {
        self.queue.lock().pop_front()
    }

    /// Returns the number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Waits for the next message. Returns `None` once closed and drained.
    pub async fn pop(&self) -> Option<WorkerEvent> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Marks the outbox closed. Queued messages stay readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// Handle to a running live connection worker.
///
/// # Example
///
/// ```rust,ignore
/// let worker = LiveWorker::spawn(controller, connector);
/// worker.send(WorkerRequest::Start {
///     config: Some(ConfigPatch::default().address("10.0.0.1:3141")),
/// })?;
/// while let Some(event) = worker.recv().await {
///     println!("{}", serde_json::to_string(&event)?);
/// }
/// ```
pub struct LiveWorker {
    control: mpsc::UnboundedSender<Envelope>,
    outbox: Arc<Outbox>,
    task: JoinHandle<()>,
}

impl LiveWorker {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// Nothing is fetched until a `START` request arrives.
    pub fn spawn(controller: Arc<dyn Controller>, connector: Arc<dyn PushConnector>) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Outbox::new());
        let task = tokio::spawn(run_worker(
            control_rx,
            controller,
            connector,
            Arc::clone(&outbox),
        ));
        Self {
            control,
            outbox,
            task,
        }
    }

    /// Sends a request.
    pub fn send(&self, request: WorkerRequest) -> LiveResult<()> {
        self.control
            .send(Envelope::Request(request))
            .map_err(|_| LiveError::WorkerClosed)
    }

    /// Sends a JSON request. Unparseable input is answered with an `ERROR`.
    pub fn send_json(&self, text: &str) -> LiveResult<()> {
        let envelope = match serde_json::from_str::<WorkerRequest>(text) {
            Ok(request) => Envelope::Request(request),
            Err(e) => Envelope::Invalid(e.to_string()),
        };
        self.control
            .send(envelope)
            .map_err(|_| LiveError::WorkerClosed)
    }

    /// Waits for the next outbound message.
    pub async fn recv(&self) -> Option<WorkerEvent> {
        self.outbox.pop().await
    }

    /// Takes the next outbound message if one is queued.
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.outbox.try_pop()
    }

    /// Stops the worker, closing any open socket.
    pub async fn shutdown(self) {
        drop(self.control);
        if let Err(e) = self.task.await {
            debug!(error = %e, "live worker task ended abnormally");
        }
    }
}

async fn run_worker(
    mut control: mpsc::UnboundedReceiver<Envelope>,
    controller: Arc<dyn Controller>,
    connector: Arc<dyn PushConnector>,
    outbox: Arc<Outbox>,
) {
    if let Some(config) = await_start(&mut control, &outbox).await {
        info!(address = %config.address, transport = %config.preferred_transport, "live connection starting");
        Engine::new(LiveMachine::new(config), controller, connector, Arc::clone(&outbox))
            .run(&mut control)
            .await;
    }
    outbox.close();
}

// Everything but START is refused until the worker is started.
async fn await_start(
    control: &mut mpsc::UnboundedReceiver<Envelope>,
    outbox: &Outbox,
) -> Option<LiveConfig> {
    while let Some(envelope) = control.recv().await {
        let error = match envelope {
            Envelope::Request(WorkerRequest::Start {
                config: Some(patch),
            }) => {
                let mut live = LiveConfig::default();
                live.apply(patch);
                return Some(live);
            }
            Envelope::Request(WorkerRequest::Start { config: None }) => {
                LiveError::MissingStartConfig
            }
            Envelope::Request(WorkerRequest::Config { .. }) => LiveError::NotStarted("CONFIG"),
            Envelope::Request(WorkerRequest::Power { .. }) => LiveError::NotStarted("POWER"),
            Envelope::Invalid(reason) => LiveError::InvalidMessage(reason),
        };
        outbox.push(WorkerEvent::error(error));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpController, MockHttpClient};
    use crate::session::LiveConnectionMode;
    use crate::transport::MockConnector;
    use serde_json::json;
    use std::time::Duration;

    fn data(mode: LiveConnectionMode) -> WorkerEvent {
        let mut snapshot = Snapshot::default();
        snapshot.session.live_connection_mode = mode;
        WorkerEvent::Data { data: snapshot }
    }

    #[test]
    fn request_wire_format() {
        let request: WorkerRequest = serde_json::from_str(
            r#"{"type":"START","config":{"ip":"10.0.0.1:3141","refreshRate":1.5}}"#,
        )
        .unwrap();
        let WorkerRequest::Start { config: Some(patch) } = request else {
            panic!("expected START with config");
        };
        assert_eq!(patch.address.as_deref(), Some("10.0.0.1:3141"));
        assert_eq!(patch.refresh_secs, Some(1.5));

        let request: WorkerRequest = serde_json::from_str(r#"{"type":"CONFIG"}"#).unwrap();
        assert_eq!(request, WorkerRequest::Config { config: None });

        let request: WorkerRequest =
            serde_json::from_str(r#"{"type":"POWER","nodeId":"n1","action":"OFF"}"#).unwrap();
        assert_eq!(
            request,
            WorkerRequest::Power {
                node_id: "n1".into(),
                action: PowerAction::Off
            }
        );

        assert!(serde_json::from_str::<WorkerRequest>(r#"{"type":"REBOOT"}"#).is_err());
    }

    #[test]
    fn event_wire_format() {
        let value = serde_json::to_value(WorkerEvent::Connection {
            connection_type: Transport::Poll,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "CONNECTION", "connectionType": "POLL"}));

        let value = serde_json::to_value(WorkerEvent::error("boom")).unwrap();
        assert_eq!(value, json!({"type": "ERROR", "error": "boom"}));

        let value = serde_json::to_value(data(LiveConnectionMode::Polling)).unwrap();
        assert_eq!(value["type"], "DATA");
        assert_eq!(value["data"]["liveConnectionMode"], "POLLING");
    }

    #[test]
    fn outbox_coalesces_trailing_data() {
        let outbox = Outbox::new();
        outbox.push(data(LiveConnectionMode::Refetch));
        outbox.push(data(LiveConnectionMode::Polling));
        assert_eq!(outbox.len(), 1);

        outbox.push(WorkerEvent::error("x"));
        outbox.push(data(LiveConnectionMode::Reconnect));
        outbox.push(data(LiveConnectionMode::Refetch));

        assert_eq!(outbox.try_pop(), Some(data(LiveConnectionMode::Polling)));
        assert_eq!(outbox.try_pop(), Some(WorkerEvent::error("x")));
        assert_eq!(outbox.try_pop(), Some(data(LiveConnectionMode::Refetch)));
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn outbox_pop_wakes_and_closes() {
        let outbox = Arc::new(Outbox::new());
        let reader = {
            let outbox = Arc::clone(&outbox);
            tokio::spawn(async move {
                let first = outbox.pop().await;
                let second = outbox.pop().await;
                (first, second)
            })
        };
        tokio::task::yield_now().await;
        outbox.push(WorkerEvent::error("late"));
        outbox.close();

        let (first, second) = reader.await.unwrap();
        assert_eq!(first, Some(WorkerEvent::error("late")));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn requests_before_start_are_refused() {
        let controller: Arc<dyn Controller> = Arc::new(HttpController::new(MockHttpClient::new()));
        let worker = LiveWorker::spawn(controller, Arc::new(MockConnector::new()));

        worker
            .send(WorkerRequest::Config {
                config: Some(ConfigPatch::default()),
            })
            .unwrap();
        worker
            .send(WorkerRequest::Power {
                node_id: "n".into(),
                action: PowerAction::On,
            })
            .unwrap();
        worker.send_json("not json").unwrap();

        let errors: Vec<_> = [
            worker.recv().await.unwrap(),
            worker.recv().await.unwrap(),
            worker.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|event| match event {
            WorkerEvent::Error { error } => error,
            other => panic!("unexpected {other:?}"),
        })
        .collect();

        assert_eq!(errors[0], "CONFIG received before start");
        assert_eq!(errors[1], "POWER received before start");
        assert!(errors[2].starts_with("invalid control message"));
        assert!(worker.try_recv().is_none());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn start_without_config_is_refused() {
        let controller: Arc<dyn Controller> = Arc::new(HttpController::new(MockHttpClient::new()));
        let worker = LiveWorker::spawn(controller, Arc::new(MockConnector::new()));

        worker.send_json(r#"{"type":"START"}"#).unwrap();
        assert_eq!(
            worker.recv().await,
            Some(WorkerEvent::error(LiveError::MissingStartConfig))
        );

        // Still waiting for a usable START.
        worker
            .send(WorkerRequest::Config {
                config: Some(ConfigPatch::default()),
            })
            .unwrap();
        assert_eq!(
            worker.recv().await,
            Some(WorkerEvent::error(LiveError::NotStarted("CONFIG")))
        );

        worker
            .send(WorkerRequest::Start {
                config: Some(ConfigPatch::default()),
            })
            .unwrap();
        assert!(matches!(worker.recv().await, Some(WorkerEvent::Data { .. })));
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_controller_ends_in_reconnect() {
        let controller: Arc<dyn Controller> = Arc::new(HttpController::new(MockHttpClient::new()));
        let worker = LiveWorker::spawn(controller, Arc::new(MockConnector::new()));
        worker
            .send(WorkerRequest::Start {
                config: Some(ConfigPatch::default()),
            })
            .unwrap();

        let mut last = None;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), worker.recv()).await
        {
            if let WorkerEvent::Data { data } = event {
                last = Some(data.mode());
                if data.mode() == LiveConnectionMode::Reconnect {
                    break;
                }
            }
        }
        assert_eq!(last, Some(LiveConnectionMode::Reconnect));

        worker
            .send(WorkerRequest::Start {
                config: Some(ConfigPatch::default()),
            })
            .unwrap();
        worker.send(WorkerRequest::Config { config: None }).unwrap();
        let mut errors = Vec::new();
        while errors.len() < 2 {
            if let Some(WorkerEvent::Error { error }) = worker.recv().await {
                errors.push(error);
            }
        }
        assert_eq!(
            errors,
            vec![
                LiveError::AlreadyStarted.to_string(),
                LiveError::MissingConfig.to_string()
            ]
        );
        worker.shutdown().await;
    }
}
