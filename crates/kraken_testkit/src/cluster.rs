//! In-memory controller.
//!
//! [`SimulatedCluster`] answers the controller's HTTP endpoints from a
//! mutable CFG/DSC model. It implements [`HttpClient`], so it plugs into
//! [`HttpController`] exactly like a real client does.

use crate::fixtures::ClusterFixture;
use kraken_live::{Controller, Endpoints, HttpClient, HttpController};
use kraken_protocol::{Graph, Node, SocketBootstrap, StateCategory};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Default fixture controller address.
pub const CLUSTER_ADDRESS: &str = "10.0.0.1:3141";

#[derive(Debug)]
struct ClusterModel {
    address: String,
    endpoints: Endpoints,
    cfg: ClusterFixture,
    dsc: ClusterFixture,
    graphs: BTreeMap<String, Graph>,
    state_categories: Vec<StateCategory>,
    websocket: Option<SocketBootstrap>,
    offline: bool,
    failing: HashSet<String>,
    requests: Vec<(&'static str, String)>,
}

/// A simulated controller.
#[derive(Debug, Clone)]
pub struct SimulatedCluster {
    model: Arc<Mutex<ClusterModel>>,
}

impl SimulatedCluster {
    /// Creates a controller at [`CLUSTER_ADDRESS`] serving `members` members.
    pub fn new(members: usize) -> Self {
        let cluster = ClusterFixture::new(members);
        Self {
            model: Arc::new(Mutex::new(ClusterModel {
                address: CLUSTER_ADDRESS.to_string(),
                endpoints: Endpoints::default(),
                cfg: cluster.clone(),
                dsc: cluster,
                graphs: BTreeMap::new(),
                state_categories: vec![StateCategory {
                    name: "Run State".into(),
                    url: "/RunState".into(),
                    options: [("SYNC".to_string(), "Synchronized".to_string())]
                        .into_iter()
                        .collect(),
                }],
                websocket: Some(SocketBootstrap {
                    host: "10.0.0.1".into(),
                    port: 3141,
                    url: "/ws".into(),
                }),
                offline: false,
                failing: HashSet::new(),
                requests: Vec::new(),
            })),
        }
    }

    /// Returns the controller address.
    pub fn address(&self) -> String {
        self.model.lock().address.clone()
    }

    /// Wraps the cluster in an [`HttpController`].
    pub fn controller(&self) -> Arc<dyn Controller> {
        Arc::new(HttpController::new(self.clone()))
    }

    /// Makes every request fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.model.lock().offline = offline;
    }

    /// Makes requests to one endpoint path fail (or succeed again).
    pub fn set_path_failing(&self, path: &str, failing: bool) {
        let mut model = self.model.lock();
        if failing {
            model.failing.insert(path.to_string());
        } else {
            model.failing.remove(path);
        }
    }

    /// Sets the push socket bootstrap; `None` makes the endpoint fail.
    pub fn set_websocket(&self, bootstrap: Option<SocketBootstrap>) {
        self.model.lock().websocket = bootstrap;
    }

    /// Sets the topology graph served for a node.
    pub fn set_graph(&self, node_id: &str, graph: Graph) {
        self.model.lock().graphs.insert(node_id.to_string(), graph);
    }

    /// Edits the CFG view.
    pub fn edit_cfg<R>(&self, edit: impl FnOnce(&mut ClusterFixture) -> R) -> R {
        edit(&mut self.model.lock().cfg)
    }

    /// Edits the DSC view.
    pub fn edit_dsc<R>(&self, edit: impl FnOnce(&mut ClusterFixture) -> R) -> R {
        edit(&mut self.model.lock().dsc)
    }

    /// Edits a node in both views.
    pub fn edit_node(&self, id: &str, edit: impl Fn(&mut Node)) {
        let mut model = self.model.lock();
        if let Some(node) = model.cfg.node_mut(id) {
            edit(node);
        }
        if let Some(node) = model.dsc.node_mut(id) {
            edit(node);
        }
    }

    /// Returns a copy of the DSC node.
    pub fn dsc_node(&self, id: &str) -> Option<Node> {
        self.model.lock().dsc.node_mut(id).cloned()
    }

    /// Returns a copy of the CFG node.
    pub fn cfg_node(&self, id: &str) -> Option<Node> {
        self.model.lock().cfg.node_mut(id).cloned()
    }

    /// Returns every request received so far as `(method, path)`.
    pub fn requests(&self) -> Vec<(&'static str, String)> {
        self.model.lock().requests.clone()
    }

    /// Returns how many GETs hit the given path.
    pub fn get_count(&self, path: &str) -> usize {
        self.model
            .lock()
            .requests
            .iter()
            .filter(|(method, p)| *method == "GET" && p == path)
            .count()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.model.lock().requests.clear();
    }
}

impl ClusterModel {
    fn path<'a>(&self, url: &'a str) -> Result<&'a str, String> {
        let path = url
            .strip_prefix("http://")
            .and_then(|rest| rest.strip_prefix(self.address.as_str()))
            .ok_or_else(|| format!("connection refused: {url}"))?;
        if self.offline || self.failing.contains(path) {
            return Err(format!("503 Service Unavailable: {path}"));
        }
        Ok(path)
    }

    fn graph_node<'a>(&self, path: &'a str) -> Option<&'a str> {
        let (prefix, suffix) = self.endpoints.graph.split_once("{id}")?;
        path.strip_prefix(prefix)?.strip_suffix(suffix)
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, String> {
    serde_json::to_vec(value).map_err(|e| e.to_string())
}

impl HttpClient for SimulatedCluster {
    fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        let mut model = self.model.lock();
        let path = model.path(url)?.to_string();
        model.requests.push(("GET", path.clone()));

        let endpoints = &model.endpoints;
        if path == endpoints.cfg_nodes {
            Ok(model.cfg.to_json())
        } else if path == endpoints.dsc_nodes {
            Ok(model.dsc.to_json())
        } else if path == endpoints.enumerables {
            to_body(&json!({ "state_categories": model.state_categories }))
        } else if path == endpoints.websocket {
            match &model.websocket {
                Some(bootstrap) => to_body(bootstrap),
                None => Err("404 Not Found".into()),
            }
        } else if let Some(id) = model.graph_node(&path) {
            to_body(&model.graphs.get(id).cloned().unwrap_or_default())
        } else {
            Err(format!("404 Not Found: {path}"))
        }
    }

    fn put(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let mut guard = self.model.lock();
        let model = &mut *guard;
        let path = model.path(url)?.to_string();
        model.requests.push(("PUT", path.clone()));

        let node: Node = serde_json::from_slice(&body).map_err(|e| format!("400 Bad Request: {e}"))?;
        let id = node.id.clone().ok_or("400 Bad Request: node without id")?;
        let view = if path == model.endpoints.cfg_node {
            &mut model.cfg
        } else if path == model.endpoints.dsc_node {
            &mut model.dsc
        } else {
            return Err(format!("404 Not Found: {path}"));
        };
        let slot = view
            .node_mut(&id)
            .ok_or_else(|| format!("404 Not Found: node {id}"))?;
        *slot = node.clone();
        to_body(&node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::member_id;
    use kraken_live::LiveConfig;
    use kraken_protocol::PhysState;

    #[test]
    fn serves_controller_endpoints() {
        let cluster = SimulatedCluster::new(2);
        let config = LiveConfig::new(cluster.address());
        let controller = cluster.controller();

        let cfg = controller.node_list(&config.cfg_nodes_url()).unwrap();
        assert_eq!(cfg.nodes.len(), 3);
        let categories = controller.state_categories(&config.enumerables_url()).unwrap();
        assert_eq!(categories.len(), 1);
        let bootstrap = controller.socket_bootstrap(&config.websocket_url()).unwrap();
        assert_eq!(bootstrap.socket_url(), "ws://10.0.0.1:3141/ws");
        let graph = controller.graph(&config.graph_url(&member_id(1))).unwrap();
        assert_eq!(graph, Graph::default());

        assert_eq!(cluster.get_count("/cfg/nodes"), 1);
    }

    #[test]
    fn failure_toggles() {
        let cluster = SimulatedCluster::new(1);
        let config = LiveConfig::new(cluster.address());
        let controller = cluster.controller();

        cluster.set_path_failing("/dsc/nodes", true);
        assert!(controller.node_list(&config.dsc_nodes_url()).is_err());
        assert!(controller.node_list(&config.cfg_nodes_url()).is_ok());

        cluster.set_offline(true);
        assert!(controller.node_list(&config.cfg_nodes_url()).is_err());

        let elsewhere = LiveConfig::new("10.9.9.9:1");
        cluster.set_offline(false);
        assert!(controller.node_list(&elsewhere.cfg_nodes_url()).is_err());
    }

    #[test]
    fn put_replaces_node() {
        let cluster = SimulatedCluster::new(1);
        let config = LiveConfig::new(cluster.address());
        let controller = cluster.controller();

        let mut node = cluster.cfg_node(&member_id(1)).unwrap();
        node.phys_state = Some(PhysState::PowerOff);
        controller.put_node(&config.cfg_node_url(), &node).unwrap();

        assert_eq!(
            cluster.cfg_node(&member_id(1)).unwrap().phys_state,
            Some(PhysState::PowerOff)
        );
        assert_eq!(
            cluster.dsc_node(&member_id(1)).unwrap().phys_state,
            Some(PhysState::PowerOn)
        );
    }
}
