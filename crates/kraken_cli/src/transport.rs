//! Network transports: reqwest for the controller API, tokio-tungstenite
//! for the push socket.

use futures::{SinkExt, StreamExt};
use kraken_live::{
    HttpClient, LiveError, LiveResult, PushConnector, PushSocket, SocketEvent, SocketEvents,
    SocketFailure,
};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Blocking controller client.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Creates a client with a per-request timeout.
    ///
    /// Must be created outside the async runtime.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| e.to_string())
    }

    fn put(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| e.to_string())
    }
}

/// Opens push sockets with tokio-tungstenite.
pub struct TungsteniteConnector {
    runtime: Handle,
    require_tls: bool,
}

impl TungsteniteConnector {
    /// Creates a connector spawning socket tasks on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            require_tls: false,
        }
    }

    /// Refuses plain `ws://` sockets when set.
    pub fn with_require_tls(mut self, require_tls: bool) -> Self {
        self.require_tls = require_tls;
        self
    }
}

struct TungsteniteSocket {
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl PushSocket for TungsteniteSocket {
    fn send(&mut self, text: String) -> LiveResult<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| LiveError::SocketUnavailable("socket closed".into()))?;
        outgoing
            .send(text)
            .map_err(|_| LiveError::SocketUnavailable("socket task ended".into()))
    }

    fn close(&mut self) {
        self.outgoing = None;
    }
}

impl PushConnector for TungsteniteConnector {
    fn connect(&self, url: &str, events: SocketEvents) -> Result<Box<dyn PushSocket>, SocketFailure> {
        if self.require_tls && !url.starts_with("wss://") {
            return Err(SocketFailure::Insecure);
        }

        let (outgoing, rx) = mpsc::unbounded_channel();
        self.runtime.spawn(run_socket(url.to_string(), events, rx));
        Ok(Box::new(TungsteniteSocket {
            outgoing: Some(outgoing),
        }))
    }
}

async fn run_socket(url: String, events: SocketEvents, mut outgoing: mpsc::UnboundedReceiver<String>) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            events.emit(SocketEvent::Failed(SocketFailure::Unavailable(e.to_string())));
            return;
        }
    };
    debug!(socket_id = events.socket_id(), %url, "push socket open");
    events.opened();

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            text = outgoing.recv() => match text {
                Some(text) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!(error = %e, "push socket write failed");
                        break;
                    }
                }
                // Closed by the engine; it expects no further events.
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !events.frame(text.as_str()) {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "push socket read failed");
                    break;
                }
            },
        }
    }
    events.closed();
}
