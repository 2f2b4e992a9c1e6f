//! Live connection state machine.
//!
//! The machine is a reducer: it consumes [`Input`]s and returns the
//! [`Action`]s a driver must perform. It never performs I/O, so every
//! transition can be exercised synchronously.
//!
//! ## Modes
//!
//! - `REFETCH`: one full fetch of both collections, then the preferred
//!   transport; failure goes to `RECONNECT`.
//! - `POLLING`: DSC re-fetch on a timer; fetch failure goes to `RECONNECT`,
//!   validation failure to `REFETCH`.
//! - `WEBSOCKET`: push events patch the mirrors; closure goes to
//!   `RECONNECT`, desync to `REFETCH`.
//! - `RECONNECT`: CFG probe on a timer until the controller answers.
//!
//! ## Staleness
//!
//! Every transition bumps an epoch and every address change bumps a
//! generation. Responses carry the [`Ticket`] they were requested with and
//! are dropped on arrival if it no longer matches.

use crate::config::{ConfigPatch, LiveConfig, Transport};
use crate::decoder::apply_batch;
use crate::error::{LiveError, LiveResult};
use crate::reconcile::{validate, validate_collections};
use crate::repository::Collection;
use crate::session::{LiveConnectionMode, SessionState, Snapshot};
use crate::store::WorkerEvent;
use crate::transport::{SocketEvent, SocketFailure};
use kraken_protocol::{
    decode_frame, BlockKind, Graph, Node, PhysState, RunState, SocketBootstrap, StateCategory,
    SubscribeCommand,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const PXE_EXTENSION: &str = "type.googleapis.com/proto.PXE";
const RPI3_EXTENSION: &str = "type.googleapis.com/proto.RPi3";

/// Periodic timers driven by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// DSC poll timer (`POLLING`).
    Poll,
    /// Probe timer (`RECONNECT`).
    Reconnect,
}

/// Identifies the context a request was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    epoch: u64,
}

/// Topology graph request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTarget {
    /// Focused node id.
    pub node_id: String,
    /// Graph URL.
    pub url: String,
}

/// A read the driver performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    /// Both collections, the focused graph and the state enumerables.
    Full {
        /// CFG list URL.
        cfg_url: String,
        /// DSC list URL.
        dsc_url: String,
        /// Focused node graph, if any.
        graph: Option<GraphTarget>,
        /// Enumerables URL.
        enumerables_url: String,
    },
    /// The DSC collection only.
    Discovery {
        /// DSC list URL.
        url: String,
        /// Expected master id.
        master_id: String,
    },
    /// The CFG collection, as a liveness probe.
    Probe {
        /// CFG list URL.
        url: String,
    },
    /// The focused node's graph.
    Graph(GraphTarget),
    /// The push socket location.
    SocketBootstrap {
        /// Bootstrap URL.
        url: String,
    },
}

/// Result of a full fetch.
#[derive(Debug, Clone, Default)]
pub struct FullFetch {
    /// CFG collection.
    pub cfg: Collection,
    /// DSC collection.
    pub dsc: Collection,
    /// Graph of the node that was focused when the fetch started.
    pub graph: Option<(String, Graph)>,
    /// State enumerables, if they could be fetched.
    pub state_categories: Option<Vec<StateCategory>>,
}

/// Result of a [`FetchRequest`].
#[derive(Debug)]
pub enum FetchOutcome {
    /// Result of [`FetchRequest::Full`].
    Full(LiveResult<FullFetch>),
    /// Result of [`FetchRequest::Discovery`].
    Discovery(LiveResult<Collection>),
    /// Result of [`FetchRequest::Probe`].
    Probe(LiveResult<Collection>),
    /// Result of [`FetchRequest::Graph`].
    Graph {
        /// Node the graph was requested for.
        node_id: String,
        /// The graph.
        result: LiveResult<Graph>,
    },
    /// Result of [`FetchRequest::SocketBootstrap`].
    SocketBootstrap(LiveResult<SocketBootstrap>),
}

/// A node write (PUT) requested by a power action.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWrite {
    /// Target URL.
    pub url: String,
    /// Full node body.
    pub node: Node,
}

/// Power action requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerAction {
    /// Power the node on.
    On,
    /// Power the node off.
    Off,
}

/// A control message from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Merge a configuration patch.
    Config(ConfigPatch),
    /// Power a node on or off.
    Power {
        /// Target node.
        node_id: String,
        /// Requested action.
        action: PowerAction,
    },
}

/// Everything that can drive the machine.
#[derive(Debug)]
pub enum Input {
    /// Host control message.
    Control(Control),
    /// A timer fired.
    Tick(TimerKind),
    /// A fetch completed.
    Fetched(Ticket, FetchOutcome),
    /// A push socket event.
    Socket(u64, SocketEvent),
    /// A batch of node writes completed.
    PutDone(LiveResult<()>),
}

/// Side effects requested by the machine, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start (or restart) a periodic timer.
    StartTimer(TimerKind, Duration),
    /// Stop a timer.
    StopTimer(TimerKind),
    /// Perform a read and feed the outcome back with the ticket.
    Fetch(Ticket, FetchRequest),
    /// Perform node writes in order and feed back [`Input::PutDone`].
    Put(Vec<NodeWrite>),
    /// Open a push socket.
    OpenSocket {
        /// Socket id used to tag its events.
        id: u64,
        /// Socket URL.
        url: String,
    },
    /// Send a text frame.
    Send {
        /// Socket id.
        id: u64,
        /// Frame text.
        text: String,
    },
    /// Close a push socket.
    CloseSocket {
        /// Socket id.
        id: u64,
    },
    /// Deliver a message to the host.
    Emit(WorkerEvent),
}

/// The live connection state machine.
pub struct LiveMachine {
    config: LiveConfig,
    session: SessionState,
    generation: u64,
    epoch: u64,
    poll_timer: bool,
    reconnect_timer: bool,
    socket: Option<u64>,
    next_socket_id: u64,
    poll_in_flight: bool,
    probe_in_flight: bool,
    dirty: bool,
    last_published: Option<Snapshot>,
}

impl LiveMachine {
    /// Creates a machine with an empty session.
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config,
            session: SessionState::default(),
            generation: 0,
            epoch: 0,
            poll_timer: false,
            reconnect_timer: false,
            socket: None,
            next_socket_id: 0,
            poll_in_flight: false,
            probe_in_flight: false,
            dirty: false,
            last_published: None,
        }
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Returns the session state.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Returns the current mode.
    pub fn mode(&self) -> LiveConnectionMode {
        self.session.live_connection_mode
    }

    /// Returns the timers the machine considers running.
    pub fn active_timers(&self) -> Vec<TimerKind> {
        let mut timers = Vec::new();
        if self.poll_timer {
            timers.push(TimerKind::Poll);
        }
        if self.reconnect_timer {
            timers.push(TimerKind::Reconnect);
        }
        timers
    }

    /// Returns the id of the current push socket.
    pub fn socket_id(&self) -> Option<u64> {
        self.socket
    }

    /// Enters `REFETCH`.
    pub fn start(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        self.transition(LiveConnectionMode::Refetch, &mut out);
        self.finish(out)
    }

    /// Handles one input. A changed snapshot is published last.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        let mut out = Vec::new();
        match input {
            Input::Control(Control::Config(patch)) => self.on_config(patch, &mut out),
            Input::Control(Control::Power { node_id, action }) => {
                self.on_power(&node_id, action, &mut out)
            }
            Input::Tick(kind) => self.on_tick(kind, &mut out),
            Input::Fetched(ticket, outcome) => self.on_fetched(ticket, outcome, &mut out),
            Input::Socket(id, event) => self.on_socket(id, event, &mut out),
            Input::PutDone(Ok(())) => {}
            Input::PutDone(Err(e)) => {
                warn!(error = %e, "node write failed");
                out.push(Action::Emit(WorkerEvent::error(e)));
            }
        }
        self.finish(out)
    }

    fn finish(&mut self, mut out: Vec<Action>) -> Vec<Action> {
        if std::mem::take(&mut self.dirty) {
            let snapshot = Snapshot::capture(&self.session);
            if self.last_published.as_ref() != Some(&snapshot) {
                self.last_published = Some(snapshot.clone());
                out.push(Action::Emit(WorkerEvent::Data { data: snapshot }));
            }
        }
        out
    }

    fn ticket(&self) -> Ticket {
        Ticket {
            generation: self.generation,
            epoch: self.epoch,
        }
    }

    fn preferred_mode(&self) -> LiveConnectionMode {
        match self.config.preferred_transport {
            Transport::WebSocket => LiveConnectionMode::WebSocket,
            Transport::Poll => LiveConnectionMode::Polling,
        }
    }

    fn set_mode(&mut self, next: LiveConnectionMode, out: &mut Vec<Action>) {
        if next != self.mode() {
            self.transition(next, out);
        }
    }

    // Stop-then-start on every transition, including REFETCH -> REFETCH.
    fn transition(&mut self, next: LiveConnectionMode, out: &mut Vec<Action>) {
        let from = self.mode();
        self.epoch += 1;
        info!(%from, to = %next, epoch = self.epoch, "live connection transition");

        self.stop_timers(out);
        if !matches!(
            next,
            LiveConnectionMode::WebSocket | LiveConnectionMode::Refetch
        ) {
            self.close_socket(out);
        }
        self.poll_in_flight = false;
        self.probe_in_flight = false;
        self.session.live_connection_mode = next;
        self.dirty = true;

        match next {
            LiveConnectionMode::Refetch => {
                out.push(Action::Fetch(self.ticket(), self.full_fetch_request()));
            }
            LiveConnectionMode::Polling => self.start_timer(TimerKind::Poll, out),
            LiveConnectionMode::Reconnect => self.start_timer(TimerKind::Reconnect, out),
            LiveConnectionMode::WebSocket => {
                if self.socket.is_none() {
                    out.push(Action::Fetch(
                        self.ticket(),
                        FetchRequest::SocketBootstrap {
                            url: self.config.websocket_url(),
                        },
                    ));
                }
            }
        }
    }

    fn stop_timers(&mut self, out: &mut Vec<Action>) {
        if std::mem::take(&mut self.poll_timer) {
            out.push(Action::StopTimer(TimerKind::Poll));
        }
        if std::mem::take(&mut self.reconnect_timer) {
            out.push(Action::StopTimer(TimerKind::Reconnect));
        }
    }

    fn start_timer(&mut self, kind: TimerKind, out: &mut Vec<Action>) {
        let period = self.config.effective_interval();
        let active = match kind {
            TimerKind::Poll => &mut self.poll_timer,
            TimerKind::Reconnect => &mut self.reconnect_timer,
        };
        if *active {
            out.push(Action::StopTimer(kind));
        }
        *active = true;
        out.push(Action::StartTimer(kind, period));
    }

    fn close_socket(&mut self, out: &mut Vec<Action>) {
        if let Some(id) = self.socket.take() {
            debug!(socket_id = id, "closing push socket");
            out.push(Action::CloseSocket { id });
        }
    }

    fn graph_target(&self) -> Option<GraphTarget> {
        self.config.focused_node.as_ref().map(|id| GraphTarget {
            node_id: id.clone(),
            url: self.config.graph_url(id),
        })
    }

    fn full_fetch_request(&self) -> FetchRequest {
        FetchRequest::Full {
            cfg_url: self.config.cfg_nodes_url(),
            dsc_url: self.config.dsc_nodes_url(),
            graph: self.graph_target(),
            enumerables_url: self.config.enumerables_url(),
        }
    }

    fn downgrade(&mut self, reason: &str, out: &mut Vec<Action>) {
        warn!(reason, "push transport unavailable, falling back to polling");
        self.config.preferred_transport = Transport::Poll;
        out.push(Action::Emit(WorkerEvent::Connection {
            connection_type: Transport::Poll,
        }));
        self.set_mode(LiveConnectionMode::Polling, out);
    }

    fn on_config(&mut self, patch: ConfigPatch, out: &mut Vec<Action>) {
        let changes = self.config.apply(patch);
        if changes.is_empty() {
            return;
        }

        if changes.address {
            info!(address = %self.config.address, "controller address changed, resetting session");
            self.generation += 1;
            self.session = SessionState {
                live_connection_mode: self.mode(),
                ..SessionState::default()
            };
            self.close_socket(out);
            self.transition(LiveConnectionMode::Refetch, out);
            return;
        }

        if changes.refresh {
            match self.mode() {
                LiveConnectionMode::Polling => self.start_timer(TimerKind::Poll, out),
                LiveConnectionMode::Reconnect => self.start_timer(TimerKind::Reconnect, out),
                _ => {}
            }
        }

        if changes.focus {
            self.session.graph = None;
            self.dirty = true;
            if let Some(target) = self.graph_target() {
                out.push(Action::Fetch(self.ticket(), FetchRequest::Graph(target)));
            }
        }

        if changes.transport {
            match self.mode() {
                LiveConnectionMode::Reconnect => {
                    debug!("transport preference deferred until reconnected")
                }
                LiveConnectionMode::Refetch => {}
                _ => self.set_mode(self.preferred_mode(), out),
            }
        }
    }

    fn on_power(&mut self, node_id: &str, action: PowerAction, out: &mut Vec<Action>) {
        let cfg_url = self.config.cfg_node_url();
        let dsc_url = self.config.dsc_node_url();
        let (cfg, dsc) = self.session.node_pair_mut(node_id);

        let writes = match (action, cfg, dsc) {
            (PowerAction::Off, Some(cfg), Some(dsc)) => {
                cfg.phys_state = Some(PhysState::PowerOff);
                cfg.run_state = Some(RunState::Unknown);
                dsc.run_state = Some(RunState::Unknown);
                reset_boot_fields(cfg);
                reset_boot_fields(dsc);
                vec![
                    NodeWrite {
                        url: dsc_url,
                        node: dsc.clone(),
                    },
                    NodeWrite {
                        url: cfg_url,
                        node: cfg.clone(),
                    },
                ]
            }
            (PowerAction::On, Some(cfg), _) => {
                cfg.run_state = Some(RunState::Sync);
                cfg.phys_state = Some(PhysState::PowerOn);
                vec![NodeWrite {
                    url: cfg_url,
                    node: cfg.clone(),
                }]
            }
            _ => {
                out.push(Action::Emit(WorkerEvent::error(LiveError::UnknownNode(
                    node_id.to_string(),
                ))));
                return;
            }
        };

        info!(node_id, ?action, "power action");
        self.dirty = true;
        out.push(Action::Put(writes));
    }

    fn on_tick(&mut self, kind: TimerKind, out: &mut Vec<Action>) {
        match kind {
            TimerKind::Poll => {
                if self.mode() != LiveConnectionMode::Polling || !self.poll_timer {
                    debug!("stale poll tick");
                    return;
                }
                if self.poll_in_flight {
                    debug!("poll still in flight, tick skipped");
                    return;
                }
                let Some(master_id) = self.session.master_id().map(str::to_string) else {
                    self.set_mode(LiveConnectionMode::Refetch, out);
                    return;
                };
                self.poll_in_flight = true;
                out.push(Action::Fetch(
                    self.ticket(),
                    FetchRequest::Discovery {
                        url: self.config.dsc_nodes_url(),
                        master_id,
                    },
                ));
            }
            TimerKind::Reconnect => {
                if self.mode() != LiveConnectionMode::Reconnect || !self.reconnect_timer {
                    debug!("stale reconnect tick");
                    return;
                }
                if self.probe_in_flight {
                    debug!("probe still in flight, tick skipped");
                    return;
                }
                self.probe_in_flight = true;
                out.push(Action::Fetch(
                    self.ticket(),
                    FetchRequest::Probe {
                        url: self.config.cfg_nodes_url(),
                    },
                ));
            }
        }
    }

    fn on_fetched(&mut self, ticket: Ticket, outcome: FetchOutcome, out: &mut Vec<Action>) {
        if let FetchOutcome::Graph { node_id, result } = outcome {
            self.on_graph(ticket, node_id, result, out);
            return;
        }
        if ticket != self.ticket() {
            debug!(
                epoch = ticket.epoch,
                current = self.epoch,
                "discarding stale response"
            );
            return;
        }
        match outcome {
            FetchOutcome::Full(result) => self.on_full_fetch(result, out),
            FetchOutcome::Discovery(result) => self.on_discovery(result, out),
            FetchOutcome::Probe(result) => self.on_probe(result, out),
            FetchOutcome::SocketBootstrap(result) => self.on_bootstrap(result, out),
            FetchOutcome::Graph { .. } => {}
        }
    }

    fn on_graph(
        &mut self,
        ticket: Ticket,
        node_id: String,
        result: LiveResult<Graph>,
        out: &mut Vec<Action>,
    ) {
        if ticket.generation != self.generation
            || self.config.focused_node.as_deref() != Some(node_id.as_str())
        {
            debug!(%node_id, "discarding graph of unfocused node");
            return;
        }
        match result {
            Ok(graph) => {
                self.session.graph = Some(graph);
                self.dirty = true;
            }
            Err(e) => {
                warn!(%node_id, error = %e, "graph fetch failed");
                self.set_mode(LiveConnectionMode::Reconnect, out);
            }
        }
    }

    fn on_full_fetch(&mut self, result: LiveResult<FullFetch>, out: &mut Vec<Action>) {
        let resync = self.mode() == LiveConnectionMode::WebSocket;
        let full = match result {
            Ok(full) => full,
            Err(e) => {
                warn!(error = %e, "full fetch failed");
                self.set_mode(LiveConnectionMode::Reconnect, out);
                return;
            }
        };
        if let Err(e) = validate_collections(&full.cfg, &full.dsc) {
            info!(error = %e, "fetched collections inconsistent");
            let next = if resync {
                LiveConnectionMode::Refetch
            } else {
                LiveConnectionMode::Reconnect
            };
            self.set_mode(next, out);
            return;
        }

        self.session.set_cfg(full.cfg);
        self.session.set_dsc(full.dsc);
        match (&self.config.focused_node, full.graph) {
            (None, _) => self.session.graph = None,
            (Some(focused), Some((node_id, graph))) if *focused == node_id => {
                self.session.graph = Some(graph)
            }
            _ => {}
        }
        if let Some(categories) = full.state_categories {
            self.session.state_categories = Some(categories);
        }
        self.dirty = true;

        if !resync {
            self.set_mode(self.preferred_mode(), out);
        }
    }

    fn on_discovery(&mut self, result: LiveResult<Collection>, out: &mut Vec<Action>) {
        self.poll_in_flight = false;
        let dsc = match result {
            Ok(dsc) => dsc,
            Err(e) => {
                warn!(error = %e, "poll failed");
                self.set_mode(LiveConnectionMode::Reconnect, out);
                return;
            }
        };
        let valid = validate(
            self.session.cfg_master.as_ref(),
            &self.session.cfg_nodes,
            dsc.master.as_ref(),
            &dsc.members,
        );
        match valid {
            Ok(()) => {
                self.session.set_dsc(dsc);
                self.dirty = true;
            }
            Err(e) => {
                info!(error = %e, "discovery view drifted from configuration");
                self.set_mode(LiveConnectionMode::Refetch, out);
            }
        }
    }

    fn on_probe(&mut self, result: LiveResult<Collection>, out: &mut Vec<Action>) {
        self.probe_in_flight = false;
        match result {
            Ok(cfg) if cfg.master_id().is_some() => {
                info!("controller reachable again");
                self.set_mode(LiveConnectionMode::Refetch, out);
            }
            Ok(_) => debug!("probe returned no master"),
            Err(e) => debug!(error = %e, "controller still unreachable"),
        }
    }

    fn on_bootstrap(&mut self, result: LiveResult<SocketBootstrap>, out: &mut Vec<Action>) {
        if self.mode() != LiveConnectionMode::WebSocket || self.socket.is_some() {
            return;
        }
        match result {
            Ok(bootstrap) => {
                let id = self.next_socket_id;
                self.next_socket_id += 1;
                self.socket = Some(id);
                let url = bootstrap.socket_url();
                info!(socket_id = id, %url, "opening push socket");
                out.push(Action::OpenSocket { id, url });
            }
            Err(e) => self.downgrade(&e.to_string(), out),
        }
    }

    fn on_socket(&mut self, id: u64, event: SocketEvent, out: &mut Vec<Action>) {
        if self.socket != Some(id) {
            debug!(socket_id = id, "event from retired socket ignored");
            return;
        }
        let live = self.mode() == LiveConnectionMode::WebSocket;

        match event {
            SocketEvent::Opened => {
                match SubscribeCommand::all_frames() {
                    Ok(frames) => {
                        out.extend(frames.into_iter().map(|text| Action::Send { id, text }))
                    }
                    Err(e) => warn!(error = %e, "could not encode subscribe commands"),
                }
                if live {
                    out.push(Action::Fetch(self.ticket(), self.full_fetch_request()));
                }
            }
            SocketEvent::Frame(text) => {
                if !live {
                    debug!(mode = %self.mode(), "frame discarded outside websocket mode");
                    return;
                }
                let events = match decode_frame(&text) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "undecodable push frame");
                        return;
                    }
                };
                let focused = self.config.focused_node.as_deref();
                let outcome = apply_batch(&mut self.session, events, focused);
                if outcome.dirty {
                    self.dirty = true;
                }
                if outcome.graph_refresh {
                    if let Some(target) = self.graph_target() {
                        out.push(Action::Fetch(self.ticket(), FetchRequest::Graph(target)));
                    }
                }
                if outcome.refetch {
                    self.set_mode(LiveConnectionMode::Refetch, out);
                }
            }
            SocketEvent::Closed => {
                self.socket = None;
                if live {
                    warn!(socket_id = id, "push socket closed");
                    self.set_mode(LiveConnectionMode::Reconnect, out);
                }
            }
            SocketEvent::Failed(failure) => {
                self.socket = None;
                if !live {
                    return;
                }
                match failure {
                    SocketFailure::Insecure => {
                        warn!("push socket refused in an insecure context");
                        self.set_mode(LiveConnectionMode::Reconnect, out);
                    }
                    SocketFailure::Unavailable(reason) => self.downgrade(&reason, out),
                }
            }
        }
    }
}

fn reset_boot_fields(node: &mut Node) {
    let none = Value::String("NONE".into());
    if let Some(pxe) = node.block_mut(BlockKind::Extension, PXE_EXTENSION) {
        pxe.set_path(&["state".to_string()], none.clone());
    }
    if let Some(rpi) = node.block_mut(BlockKind::Extension, RPI3_EXTENSION) {
        rpi.set_path(&["pxe".to_string()], none);
    }
}
