//! Transport abstractions: the controller's request/response API and the
//! push socket.
//!
//! Both are traits so the state machine driver can run against a real
//! controller, an in-memory cluster, or a mock.

use crate::error::{LiveError, LiveResult};
use crate::machine::Input;
use kraken_protocol::{Graph, Node, NodeList, SocketBootstrap, StateCategory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The cluster controller's request/response API.
///
/// Calls are blocking; the driver runs them off the state machine's task.
pub trait Controller: Send + Sync {
    /// Fetches a node list.
    fn node_list(&self, url: &str) -> LiveResult<NodeList>;

    /// Fetches the topology graph of one node.
    fn graph(&self, url: &str) -> LiveResult<Graph>;

    /// Fetches the state enumerables.
    fn state_categories(&self, url: &str) -> LiveResult<Vec<StateCategory>>;

    /// Fetches the push socket location.
    fn socket_bootstrap(&self, url: &str) -> LiveResult<SocketBootstrap>;

    /// Writes a full node.
    fn put_node(&self, url: &str, node: &Node) -> LiveResult<()>;
}

impl<C: Controller + ?Sized> Controller for Arc<C> {
    fn node_list(&self, url: &str) -> LiveResult<NodeList> {
        (**self).node_list(url)
    }

    fn graph(&self, url: &str) -> LiveResult<Graph> {
        (**self).graph(url)
    }

    fn state_categories(&self, url: &str) -> LiveResult<Vec<StateCategory>> {
        (**self).state_categories(url)
    }

    fn socket_bootstrap(&self, url: &str) -> LiveResult<SocketBootstrap> {
        (**self).socket_bootstrap(url)
    }

    fn put_node(&self, url: &str, node: &Node) -> LiveResult<()> {
        (**self).put_node(url, node)
    }
}

/// Why a push socket could not be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFailure {
    /// The execution context forbids opening the socket.
    Insecure,
    /// Any other reason (unreachable host, handshake refused, ...).
    Unavailable(String),
}

impl From<SocketFailure> for LiveError {
    fn from(failure: SocketFailure) -> Self {
        match failure {
            SocketFailure::Insecure => LiveError::InsecureContext,
            SocketFailure::Unavailable(reason) => LiveError::SocketUnavailable(reason),
        }
    }
}

/// Something that happened on a push socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection is established.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The connection closed.
    Closed,
    /// The connection could not be established.
    Failed(SocketFailure),
}

/// Sink for a socket's events, handed to the connector.
///
/// Events are tagged with the socket id so late events from a replaced
/// socket can be told apart. Sending never blocks.
#[derive(Debug, Clone)]
pub struct SocketEvents {
    socket_id: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl SocketEvents {
    /// Creates a sink feeding `tx`.
    pub fn new(socket_id: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { socket_id, tx }
    }

    /// Returns the socket id.
    pub fn socket_id(&self) -> u64 {
        self.socket_id
    }

    /// Reports an event. Returns false if the driver is gone.
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx.send(Input::Socket(self.socket_id, event)).is_ok()
    }

    /// Reports that the connection opened.
    pub fn opened(&self) -> bool {
        self.emit(SocketEvent::Opened)
    }

    /// Reports an inbound text frame.
    pub fn frame(&self, text: impl Into<String>) -> bool {
        self.emit(SocketEvent::Frame(text.into()))
    }

    /// Reports that the connection closed.
    pub fn closed(&self) -> bool {
        self.emit(SocketEvent::Closed)
    }
}

/// An open (or opening) push socket.
pub trait PushSocket: Send {
    /// Queues a text frame.
    fn send(&mut self, text: String) -> LiveResult<()>;

    /// Closes the socket. No `Closed` event needs to follow.
    fn close(&mut self);
}

/// Opens push sockets.
pub trait PushConnector: Send + Sync {
    /// Starts connecting to `url` and returns immediately.
    ///
    /// Progress is reported through `events`. Failures detected before
    /// returning are reported as an error instead.
    fn connect(&self, url: &str, events: SocketEvents) -> Result<Box<dyn PushSocket>, SocketFailure>;
}

/// One connection attempt recorded by [`MockConnector`].
#[derive(Debug, Clone)]
pub struct MockConnection {
    /// Requested URL.
    pub url: String,
    /// Event sink for injecting socket events.
    pub events: SocketEvents,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    /// Returns the frames sent on this socket.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Returns true if the driver closed this socket.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MockConnectorState {
    refuse: Option<SocketFailure>,
    manual_open: bool,
    connections: Vec<MockConnection>,
}

/// A push connector for testing.
///
/// By default every connection succeeds and reports `Opened` immediately.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockConnectorState>>,
}

impl MockConnector {
    /// Creates a new mock connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following connection attempt fail.
    pub fn set_refusal(&self, failure: Option<SocketFailure>) {
        self.state.lock().refuse = failure;
    }

    /// When set, `Opened` is not reported automatically.
    pub fn set_manual_open(&self, manual: bool) {
        self.state.lock().manual_open = manual;
    }

    /// Returns the number of connection attempts that returned a socket.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Returns the number of sockets not yet closed by the driver.
    pub fn open_count(&self) -> usize {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    /// Returns a recorded connection.
    pub fn connection(&self, index: usize) -> Option<MockConnection> {
        self.state.lock().connections.get(index).cloned()
    }

    /// Returns the most recent connection.
    pub fn last_connection(&self) -> Option<MockConnection> {
        self.state.lock().connections.last().cloned()
    }
}

struct MockSocket {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl PushSocket for MockSocket {
    fn send(&mut self, text: String) -> LiveResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LiveError::SocketUnavailable("socket closed".into()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PushConnector for MockConnector {
    fn connect(&self, url: &str, events: SocketEvents) -> Result<Box<dyn PushSocket>, SocketFailure> {
        let mut state = self.state.lock();
        if let Some(failure) = &state.refuse {
            return Err(failure.clone());
        }

        let connection = MockConnection {
            url: url.to_string(),
            events: events.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let socket = MockSocket {
            sent: Arc::clone(&connection.sent),
            closed: Arc::clone(&connection.closed),
        };
        state.connections.push(connection);
        if !state.manual_open {
            events.opened();
        }
        Ok(Box::new(socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Input;

    #[test]
    fn mock_connector_records_and_opens() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MockConnector::new();

        let mut socket = connector
            .connect("ws://h:1/ws", SocketEvents::new(7, tx))
            .unwrap();
        socket.send("hello".into()).unwrap();

        assert!(matches!(rx.try_recv(), Ok(Input::Socket(7, SocketEvent::Opened))));
        let connection = connector.last_connection().unwrap();
        assert_eq!(connection.url, "ws://h:1/ws");
        assert_eq!(connection.sent(), vec!["hello".to_string()]);
        assert_eq!(connector.open_count(), 1);

        socket.close();
        assert!(connection.is_closed());
        assert_eq!(connector.open_count(), 0);
        assert!(socket.send("late".into()).is_err());
    }

    #[test]
    fn mock_connector_refusal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MockConnector::new();
        connector.set_refusal(Some(SocketFailure::Insecure));

        let result = connector.connect("ws://h:1/ws", SocketEvents::new(1, tx));
        assert_eq!(result.err(), Some(SocketFailure::Insecure));
        assert_eq!(connector.connection_count(), 0);
        assert!(matches!(
            LiveError::from(SocketFailure::Unavailable("x".into())),
            LiveError::SocketUnavailable(_)
        ));
    }
}
