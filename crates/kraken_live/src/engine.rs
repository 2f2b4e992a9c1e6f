//! Async driver for the live connection state machine.
//!
//! One task owns the machine and turns its actions into timers, blocking
//! controller calls, socket operations and outbound messages. Results come
//! back as inputs on the task's own channel, so the machine only ever sees
//! one input at a time.

use crate::error::{LiveError, LiveResult};
use crate::machine::{
    Action, Control, FetchOutcome, FetchRequest, FullFetch, GraphTarget, Input, LiveMachine,
    TimerKind,
};
use crate::reconcile::ValidationError;
use crate::repository::{fetch_collection, fetch_discovery_collection};
use crate::store::{Envelope, Outbox, WorkerEvent, WorkerRequest};
use crate::transport::{Controller, PushConnector, PushSocket, SocketEvent, SocketEvents};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Performs one read against the controller.
///
/// Blocking; the engine calls it from the blocking pool.
pub fn perform_fetch(controller: &dyn Controller, request: FetchRequest) -> FetchOutcome {
    match request {
        FetchRequest::Full {
            cfg_url,
            dsc_url,
            graph,
            enumerables_url,
        } => FetchOutcome::Full(full_fetch(
            controller,
            &cfg_url,
            &dsc_url,
            graph,
            &enumerables_url,
        )),
        FetchRequest::Discovery { url, master_id } => {
            FetchOutcome::Discovery(fetch_discovery_collection(controller, &url, &master_id))
        }
        FetchRequest::Probe { url } => FetchOutcome::Probe(fetch_collection(controller, &url)),
        FetchRequest::Graph(target) => FetchOutcome::Graph {
            result: controller.graph(&target.url),
            node_id: target.node_id,
        },
        FetchRequest::SocketBootstrap { url } => {
            FetchOutcome::SocketBootstrap(controller.socket_bootstrap(&url))
        }
    }
}

// CFG, then DSC keyed on the CFG master, then the optional extras.
fn full_fetch(
    controller: &dyn Controller,
    cfg_url: &str,
    dsc_url: &str,
    graph: Option<GraphTarget>,
    enumerables_url: &str,
) -> LiveResult<FullFetch> {
    let cfg = fetch_collection(controller, cfg_url)?;
    let master_id = cfg
        .master_id()
        .map(str::to_string)
        .ok_or(ValidationError::MissingCfgMaster)?;
    let dsc = fetch_discovery_collection(controller, dsc_url, &master_id)?;

    let graph = graph.and_then(|target| match controller.graph(&target.url) {
        Ok(graph) => Some((target.node_id, graph)),
        Err(e) => {
            warn!(node_id = %target.node_id, error = %e, "graph unavailable during refetch");
            None
        }
    });
    let state_categories = match controller.state_categories(enumerables_url) {
        Ok(categories) => Some(categories),
        Err(e) => {
            warn!(error = %e, "state enumerables unavailable");
            None
        }
    };

    Ok(FullFetch {
        cfg,
        dsc,
        graph,
        state_categories,
    })
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

enum Wake {
    Control(Option<Envelope>),
    Input(Input),
}

/// Owns a started machine and everything its actions touch.
pub(crate) struct Engine {
    machine: LiveMachine,
    controller: Arc<dyn Controller>,
    connector: Arc<dyn PushConnector>,
    outbox: Arc<Outbox>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    poll: Option<Interval>,
    reconnect: Option<Interval>,
    socket: Option<(u64, Box<dyn PushSocket>)>,
}

impl Engine {
    pub(crate) fn new(
        machine: LiveMachine,
        controller: Arc<dyn Controller>,
        connector: Arc<dyn PushConnector>,
        outbox: Arc<Outbox>,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        Self {
            machine,
            controller,
            connector,
            outbox,
            inputs_tx,
            inputs_rx,
            poll: None,
            reconnect: None,
            socket: None,
        }
    }

    /// Runs until the control channel closes.
    pub(crate) async fn run(mut self, control: &mut mpsc::UnboundedReceiver<Envelope>) {
        let actions = self.machine.start();
        self.execute(actions);

        loop {
            let wake = tokio::select! {
                request = control.recv() => Wake::Control(request),
                Some(input) = self.inputs_rx.recv() => Wake::Input(input),
                _ = next_tick(&mut self.poll) => Wake::Input(Input::Tick(TimerKind::Poll)),
                _ = next_tick(&mut self.reconnect) => Wake::Input(Input::Tick(TimerKind::Reconnect)),
            };

            let input = match wake {
                Wake::Control(None) => break,
                Wake::Control(Some(request)) => match self.accept(request) {
                    Some(input) => input,
                    None => continue,
                },
                Wake::Input(input) => input,
            };
            let actions = self.machine.handle(input);
            self.execute(actions);
        }

        if let Some((_, mut socket)) = self.socket.take() {
            socket.close();
        }
        debug!("live engine stopped");
    }

    fn accept(&self, envelope: Envelope) -> Option<Input> {
        let request = match envelope {
            Envelope::Request(request) => request,
            Envelope::Invalid(reason) => {
                self.outbox
                    .push(WorkerEvent::error(LiveError::InvalidMessage(reason)));
                return None;
            }
        };
        match request {
            WorkerRequest::Start { .. } => {
                self.outbox
                    .push(WorkerEvent::error(LiveError::AlreadyStarted));
                None
            }
            WorkerRequest::Config { config: None } => {
                self.outbox.push(WorkerEvent::error(LiveError::MissingConfig));
                None
            }
            WorkerRequest::Config {
                config: Some(patch),
            } => Some(Input::Control(Control::Config(patch))),
            WorkerRequest::Power { node_id, action } => {
                Some(Input::Control(Control::Power { node_id, action }))
            }
        }
    }

    fn timer(&mut self, kind: TimerKind) -> &mut Option<Interval> {
        match kind {
            TimerKind::Poll => &mut self.poll,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::StartTimer(kind, period) => {
                    let mut interval = time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    *self.timer(kind) = Some(interval);
                }
                Action::StopTimer(kind) => *self.timer(kind) = None,
                Action::Fetch(ticket, request) => {
                    let controller = Arc::clone(&self.controller);
                    let tx = self.inputs_tx.clone();
                    tokio::task::spawn_blocking(move || {
                        let outcome = perform_fetch(controller.as_ref(), request);
                        let _ = tx.send(Input::Fetched(ticket, outcome));
                    });
                }
                Action::Put(writes) => {
                    let controller = Arc::clone(&self.controller);
                    let tx = self.inputs_tx.clone();
                    tokio::task::spawn_blocking(move || {
                        let result = writes
                            .iter()
                            .try_for_each(|write| controller.put_node(&write.url, &write.node));
                        let _ = tx.send(Input::PutDone(result));
                    });
                }
                Action::OpenSocket { id, url } => self.open_socket(id, &url),
                Action::Send { id, text } => match &mut self.socket {
                    Some((current, socket)) if *current == id => {
                        if let Err(e) = socket.send(text) {
                            warn!(socket_id = id, error = %e, "push socket send failed");
                        }
                    }
                    _ => debug!(socket_id = id, "send to retired socket dropped"),
                },
                Action::CloseSocket { id } => {
                    if matches!(self.socket, Some((current, _)) if current == id) {
                        if let Some((_, mut socket)) = self.socket.take() {
                            socket.close();
                        }
                    }
                }
                Action::Emit(event) => self.outbox.push(event),
            }
        }
    }

    fn open_socket(&mut self, id: u64, url: &str) {
        if let Some((_, mut previous)) = self.socket.take() {
            previous.close();
        }
        let events = SocketEvents::new(id, self.inputs_tx.clone());
        match self.connector.connect(url, events) {
            Ok(socket) => self.socket = Some((id, socket)),
            Err(failure) => {
                let _ = self
                    .inputs_tx
                    .send(Input::Socket(id, SocketEvent::Failed(failure)));
            }
        }
    }
}
