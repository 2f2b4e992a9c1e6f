//! HTTP controller implementation.
//!
//! The actual HTTP client is abstracted via a trait so the driver can use
//! any blocking client (reqwest, ureq, ...) or an in-memory cluster.

use crate::error::{LiveError, LiveResult};
use crate::transport::Controller;
use kraken_protocol::{Graph, Node, NodeList, ProtocolError, SocketBootstrap, StateCategory};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Blocking HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, String>;

    /// Sends a PUT request with a JSON body and returns the response body.
    fn put(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// JSON-over-HTTP controller.
pub struct HttpController<C: HttpClient> {
    client: C,
}

impl<C: HttpClient> HttpController<C> {
    /// Creates a new HTTP controller.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> LiveResult<T> {
        let body = self
            .client
            .get(url)
            .map_err(|e| LiveError::fetch(url, e))?;
        serde_json::from_slice(&body).map_err(|e| LiveError::Decode(ProtocolError::Json(e)))
    }
}

impl<C: HttpClient> Controller for HttpController<C> {
    fn node_list(&self, url: &str) -> LiveResult<NodeList> {
        self.get_json(url)
    }

    fn graph(&self, url: &str) -> LiveResult<Graph> {
        self.get_json(url)
    }

    fn state_categories(&self, url: &str) -> LiveResult<Vec<StateCategory>> {
        let body = self
            .client
            .get(url)
            .map_err(|e| LiveError::fetch(url, e))?;
        Ok(StateCategory::decode_list(&body)?)
    }

    fn socket_bootstrap(&self, url: &str) -> LiveResult<SocketBootstrap> {
        self.get_json(url)
    }

    fn put_node(&self, url: &str, node: &Node) -> LiveResult<()> {
        let body = serde_json::to_vec(node).map_err(|e| LiveError::Decode(ProtocolError::Json(e)))?;
        self.client
            .put(url, body)
            .map(|_| ())
            .map_err(|e| LiveError::fetch(url, e))
    }
}

/// An HTTP client for testing that serves canned bodies by URL.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    responses: Mutex<HashMap<String, Result<Vec<u8>, String>>>,
    puts: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockHttpClient {
    /// Creates a new mock client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the body returned for a URL.
    pub fn set_response(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.responses.lock().insert(url.into(), Ok(body.into()));
    }

    /// Makes requests to a URL fail.
    pub fn set_failure(&self, url: impl Into<String>, message: impl Into<String>) {
        self.responses
            .lock()
            .insert(url.into(), Err(message.into()));
    }

    /// Returns every PUT received so far.
    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.puts.lock().clone()
    }
}

impl HttpClient for MockHttpClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        self.responses
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(format!("no mock response for {url}")))
    }

    fn put(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if let Some(Err(e)) = self.responses.lock().get(url) {
            return Err(e.clone());
        }
        self.puts.lock().push((url.to_string(), body));
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_list_decoding() {
        let client = MockHttpClient::new();
        client.set_response(
            "http://c/cfg/nodes",
            r#"{"nodes":[{"id":"m","nodename":"master"},{"id":"a","parentId":"m"}]}"#,
        );
        let controller = HttpController::new(client);

        let list = controller.node_list("http://c/cfg/nodes").unwrap();
        assert_eq!(list.nodes.len(), 2);
        assert!(list.nodes[0].is_master());
    }

    #[test]
    fn fetch_and_decode_errors() {
        let client = MockHttpClient::new();
        client.set_failure("http://c/dsc/nodes", "connection refused");
        client.set_response("http://c/graph/node/a/json", "null");
        let controller = HttpController::new(client);

        let err = controller.node_list("http://c/dsc/nodes").unwrap_err();
        assert!(matches!(err, LiveError::Fetch { ref url, .. } if url == "http://c/dsc/nodes"));

        let err = controller.graph("http://c/graph/node/a/json").unwrap_err();
        assert!(matches!(err, LiveError::Decode(_)));

        assert!(controller.socket_bootstrap("http://c/ws").is_err());
    }

    #[test]
    fn put_node_sends_json() {
        let controller = HttpController::new(MockHttpClient::new());
        let node = Node::with_id("a");

        controller.put_node("http://c/cfg/node", &node).unwrap();

        let puts = controller.client().puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, "http://c/cfg/node");
        let sent: Node = serde_json::from_slice(&puts[0].1).unwrap();
        assert_eq!(sent, node);
    }
}
