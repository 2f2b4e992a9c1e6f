//! Configuration for the live connection.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Lower bound for the polling and reconnect interval, in seconds.
pub const MIN_REFRESH_SECS: f64 = 0.15;

/// Preferred transport for live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Server push over a websocket.
    #[serde(rename = "WEBSOCKET")]
    WebSocket,
    /// Periodic DSC re-fetch.
    #[serde(rename = "POLL")]
    Poll,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::WebSocket => f.write_str("WEBSOCKET"),
            Transport::Poll => f.write_str("POLL"),
        }
    }
}

/// Controller endpoint paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// CFG node list.
    pub cfg_nodes: String,
    /// DSC node list.
    pub dsc_nodes: String,
    /// CFG single node (PUT).
    pub cfg_node: String,
    /// DSC single node (PUT).
    pub dsc_node: String,
    /// Topology graph; `{id}` is replaced by the node id.
    pub graph: String,
    /// State enumerables.
    pub enumerables: String,
    /// Push socket bootstrap.
    pub websocket: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cfg_nodes: "/cfg/nodes".into(),
            dsc_nodes: "/dsc/nodes".into(),
            cfg_node: "/cfg/node".into(),
            dsc_node: "/dsc/node".into(),
            graph: "/graph/node/{id}/json".into(),
            enumerables: "/enumerables".into(),
            websocket: "/ws".into(),
        }
    }
}

/// Externally supplied configuration of the live connection.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    /// Controller `host:port`.
    pub address: String,
    /// Polling and reconnect interval, in seconds.
    pub refresh_secs: f64,
    /// Transport the user prefers.
    pub preferred_transport: Transport,
    /// Node whose topology graph is kept live.
    pub focused_node: Option<String>,
    /// Controller endpoint paths.
    pub endpoints: Endpoints,
}

impl LiveConfig {
    /// Creates a configuration for the given controller address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            refresh_secs: 0.4,
            preferred_transport: Transport::Poll,
            focused_node: None,
            endpoints: Endpoints::default(),
        }
    }

    /// Sets the refresh interval in seconds.
    pub fn with_refresh_secs(mut self, secs: f64) -> Self {
        self.refresh_secs = secs;
        self
    }

    /// Sets the preferred transport.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.preferred_transport = transport;
        self
    }

    /// Sets the focused node.
    pub fn with_focused_node(mut self, node_id: impl Into<String>) -> Self {
        self.focused_node = Some(node_id.into());
        self
    }

    /// Sets the endpoint table.
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Returns the timer period, floored at [`MIN_REFRESH_SECS`].
    pub fn effective_interval(&self) -> Duration {
        let secs = if self.refresh_secs.is_finite() && self.refresh_secs > MIN_REFRESH_SECS {
            self.refresh_secs
        } else {
            MIN_REFRESH_SECS
        };
        Duration::from_secs_f64(secs)
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// CFG node list URL.
    pub fn cfg_nodes_url(&self) -> String {
        self.url(&self.endpoints.cfg_nodes)
    }

    /// DSC node list URL.
    pub fn dsc_nodes_url(&self) -> String {
        self.url(&self.endpoints.dsc_nodes)
    }

    /// CFG single node URL.
    pub fn cfg_node_url(&self) -> String {
        self.url(&self.endpoints.cfg_node)
    }

    /// DSC single node URL.
    pub fn dsc_node_url(&self) -> String {
        self.url(&self.endpoints.dsc_node)
    }

    /// Topology graph URL for a node.
    pub fn graph_url(&self, node_id: &str) -> String {
        self.url(&self.endpoints.graph.replace("{id}", node_id))
    }

    /// State enumerables URL.
    pub fn enumerables_url(&self) -> String {
        self.url(&self.endpoints.enumerables)
    }

    /// Push socket bootstrap URL.
    pub fn websocket_url(&self) -> String {
        self.url(&self.endpoints.websocket)
    }

    /// Merges a patch into this configuration and reports what changed.
    pub fn apply(&mut self, patch: ConfigPatch) -> ConfigChanges {
        let mut changes = ConfigChanges::default();

        if let Some(address) = patch.address {
            if address != self.address {
                self.address = address;
                changes.address = true;
            }
        }
        if let Some(secs) = patch.refresh_secs {
            if secs != self.refresh_secs {
                self.refresh_secs = secs;
                changes.refresh = true;
            }
        }
        if let Some(transport) = patch.preferred_transport {
            if transport != self.preferred_transport {
                self.preferred_transport = transport;
                changes.transport = true;
            }
        }
        if let Some(focused) = patch.focused_node {
            if focused != self.focused_node {
                self.focused_node = focused;
                changes.focus = true;
            }
        }

        changes
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new("192.168.57.10:3141")
    }
}

/// A partial configuration update, as carried by `START` and `CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    /// Controller `host:port`.
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Refresh interval, in seconds.
    #[serde(rename = "refreshRate", default, skip_serializing_if = "Option::is_none")]
    pub refresh_secs: Option<f64>,
    /// Preferred transport.
    #[serde(
        rename = "preferredConnectionType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub preferred_transport: Option<Transport>,
    /// Focused node; `Some(None)` clears the focus.
    #[serde(
        rename = "updatingGraph",
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub focused_node: Option<Option<String>>,
}

impl ConfigPatch {
    /// Sets the address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the refresh interval.
    pub fn refresh_secs(mut self, secs: f64) -> Self {
        self.refresh_secs = Some(secs);
        self
    }

    /// Sets the preferred transport.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.preferred_transport = Some(transport);
        self
    }

    /// Sets or clears the focused node.
    pub fn focus(mut self, node_id: Option<&str>) -> Self {
        self.focused_node = Some(node_id.map(str::to_string));
        self
    }
}

// Distinguishes an explicit `null` from an absent field.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Summary of which configuration fields a patch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    /// Controller address changed.
    pub address: bool,
    /// Refresh interval changed.
    pub refresh: bool,
    /// Preferred transport changed.
    pub transport: bool,
    /// Focused node changed.
    pub focus: bool,
}

impl ConfigChanges {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        !(self.address || self.refresh || self.transport || self.focus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = LiveConfig::new("10.0.0.1:3141")
            .with_refresh_secs(2.0)
            .with_transport(Transport::WebSocket)
            .with_focused_node("abc");

        assert_eq!(config.cfg_nodes_url(), "http://10.0.0.1:3141/cfg/nodes");
        assert_eq!(config.dsc_node_url(), "http://10.0.0.1:3141/dsc/node");
        assert_eq!(config.graph_url("abc"), "http://10.0.0.1:3141/graph/node/abc/json");
        assert_eq!(config.websocket_url(), "http://10.0.0.1:3141/ws");
        assert_eq!(config.effective_interval(), Duration::from_secs(2));
        assert_eq!(config.focused_node.as_deref(), Some("abc"));
    }

    #[test]
    fn defaults() {
        let config = LiveConfig::default();
        assert_eq!(config.address, "192.168.57.10:3141");
        assert_eq!(config.preferred_transport, Transport::Poll);
        assert_eq!(config.effective_interval(), Duration::from_millis(400));
        assert!(config.focused_node.is_none());
    }

    #[test]
    fn interval_is_floored() {
        for secs in [0.0, 0.01, -3.0, f64::NAN, f64::INFINITY] {
            let config = LiveConfig::default().with_refresh_secs(secs);
            assert_eq!(config.effective_interval(), Duration::from_secs_f64(MIN_REFRESH_SECS));
        }
    }

    #[test]
    fn apply_reports_changes() {
        let mut config = LiveConfig::default();

        let changes = config.apply(ConfigPatch::default().refresh_secs(0.4));
        assert!(changes.is_empty());

        let changes = config.apply(
            ConfigPatch::default()
                .address("10.0.0.2:3141")
                .transport(Transport::WebSocket),
        );
        assert!(changes.address);
        assert!(changes.transport);
        assert!(!changes.refresh);
        assert!(!changes.focus);

        let changes = config.apply(ConfigPatch::default().focus(Some("n1")));
        assert!(changes.focus);
        let changes = config.apply(ConfigPatch::default().focus(None));
        assert!(changes.focus);
        assert!(config.focused_node.is_none());
    }

    #[test]
    fn patch_wire_names() {
        let patch: ConfigPatch = serde_json::from_str(
            r#"{"ip":"10.0.0.3:3141","refreshRate":1.5,"preferredConnectionType":"WEBSOCKET","updatingGraph":null}"#,
        )
        .unwrap();
        assert_eq!(patch.address.as_deref(), Some("10.0.0.3:3141"));
        assert_eq!(patch.refresh_secs, Some(1.5));
        assert_eq!(patch.preferred_transport, Some(Transport::WebSocket));
        assert_eq!(patch.focused_node, Some(None));

        let patch: ConfigPatch = serde_json::from_str(r#"{"refreshRate":1}"#).unwrap();
        assert_eq!(patch.focused_node, None);
    }
}
