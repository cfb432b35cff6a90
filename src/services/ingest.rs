//! Ingestion Supervisor
//!
//! Owns the broker session and a single background receive loop. Each
//! received event is classified by the [`EventRouter`] and dispatched to the
//! gateway or the ledger, strictly one at a time.
//!
//! ```text
//!   Stopped ──start──▶ Connecting ──Connected──▶ Subscribed ──message──▶ Receiving
//!      ▲                   ▲                                                │
//!      │                   └────────── Disconnected (auto_reconnect) ───────┤
//!      └──────────── stop / fatal / Disconnected (no auto_reconnect) ───────┘
//! ```
//!
//! With `auto_reconnect`, a failed connect or a fatal transport error sends
//! the loop back to `Connecting`, where it calls the connector again every
//! `connect_retry_ms`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{DispatchError, TransportError};
use crate::gateway::TimeSeriesGateway;
use crate::ledger::AlertLedger;
use crate::observability::PipelineMetrics;
use crate::router::{Action, EventRouter};
use crate::transport::{Transport, TransportConnector, TransportEvent};
use crate::types::RawEvent;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No session
    Stopped,
    /// Waiting for the broker to accept a session
    Connecting,
    /// Topics registered, nothing received yet on this session
    Subscribed,
    /// Steady state
    Receiving,
}

impl SupervisorState {
    /// Whether a session is established and subscribed
    pub fn is_listening(&self) -> bool {
        matches!(self, SupervisorState::Subscribed | SupervisorState::Receiving)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Subscribed => "subscribed",
            SupervisorState::Receiving => "receiving",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state tagged with the generation of the loop that owns it
#[derive(Clone)]
struct StateCell(Arc<RwLock<(u64, SupervisorState)>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(RwLock::new((0, SupervisorState::Stopped))))
    }

    fn get(&self) -> SupervisorState {
        self.0.read().1
    }

    /// Start a new generation; writes from older ones are ignored from now on
    fn claim(&self, initial: SupervisorState) -> u64 {
        let mut cell = self.0.write();
        cell.0 += 1;
        transition(&mut cell.1, initial);
        cell.0
    }

    fn set(&self, generation: u64, next: SupervisorState) {
        let mut cell = self.0.write();
        if cell.0 == generation {
            transition(&mut cell.1, next);
        }
    }
}

fn transition(state: &mut SupervisorState, next: SupervisorState) {
    if *state != next {
        debug!(from = %*state, to = %next, "Ingestion state transition");
        *state = next;
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Applies routed actions to the gateway and the ledger
pub struct Dispatcher {
    router: EventRouter,
    gateway: Arc<TimeSeriesGateway>,
    ledger: Arc<AlertLedger>,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    pub fn new(
        router: EventRouter,
        gateway: Arc<TimeSeriesGateway>,
        ledger: Arc<AlertLedger>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            router,
            gateway,
            ledger,
            metrics,
        }
    }

    /// Topics the router understands
    pub fn topics(&self) -> Vec<String> {
        self.router.topics()
    }

    /// Classify and apply one event. Drops are not errors.
    pub async fn dispatch(&self, event: &RawEvent) -> Result<(), DispatchError> {
        match self.router.route(event) {
            Action::WriteMeasurement(sample) => {
                self.gateway.write(&sample).await?;
                self.metrics.record_written();
            }
            Action::RecordAlert {
                message,
                timestamp,
                severity,
            } => {
                let alert = self
                    .ledger
                    .add_with_severity(message, &timestamp, severity)?;
                self.metrics.record_alert(self.ledger.len());
                debug!(id = %alert.id, severity = %alert.severity, "Alert recorded");
            }
            Action::Drop(reason) => {
                debug!(topic = %event.topic, reason = %reason, "Event dropped");
                self.metrics.record_dropped(reason.as_str());
            }
        }
        Ok(())
    }

    /// Dispatch, reporting any failure instead of returning it
    pub async fn handle(&self, event: &RawEvent) {
        self.metrics.record_received();
        if let Err(e) = self.dispatch(event).await {
            warn!(topic = %event.topic, kind = e.kind(), error = %e, "Dispatch failed");
            self.metrics.record_failure(e.kind());
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

struct Running {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Supervises the broker subscription and the receive loop
pub struct IngestionSupervisor {
    connector: Arc<dyn TransportConnector>,
    dispatcher: Arc<Dispatcher>,
    connect_timeout: Duration,
    connect_retry: Duration,
    auto_reconnect: bool,
    state: StateCell,
    running: Mutex<Option<Running>>,
}

impl IngestionSupervisor {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        dispatcher: Arc<Dispatcher>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            connector,
            dispatcher,
            connect_timeout: config.connect_timeout(),
            connect_retry: config.connect_retry(),
            auto_reconnect: config.auto_reconnect,
            state: StateCell::new(),
            running: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        self.state.get()
    }

    /// Whether a receive loop task is alive
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Connect and spawn the receive loop.
    ///
    /// A no-op while a loop is alive. A loop that ended on its own (fatal
    /// transport error, or disconnect without auto-reconnect) is reaped and
    /// replaced.
    ///
    /// With auto-reconnect a failed first connect is not an error: the loop
    /// is spawned in `Connecting` and keeps retrying until stopped.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if let Some(active) = running.take() {
            if !active.handle.is_finished() {
                debug!("Ingestion supervisor already running");
                *running = Some(active);
                return Ok(());
            }
            if let Err(e) = active.handle.await {
                error!(error = %e, "Receive loop ended abnormally");
            }
        }

        let generation = self.state.claim(SupervisorState::Connecting);
        let transport = match connect(self.connector.as_ref(), self.connect_timeout).await {
            Ok(transport) => Some(transport),
            Err(e) if self.auto_reconnect => {
                warn!(
                    error = %e,
                    retry = ?self.connect_retry,
                    "Broker connect failed, retrying in background"
                );
                None
            }
            Err(e) => {
                self.state.set(generation, SupervisorState::Stopped);
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let receive_loop = ReceiveLoop {
            connector: self.connector.clone(),
            dispatcher: self.dispatcher.clone(),
            topics: self.dispatcher.topics(),
            state: self.state.clone(),
            generation,
            connect_timeout: self.connect_timeout,
            connect_retry: self.connect_retry,
            auto_reconnect: self.auto_reconnect,
        };
        let handle = tokio::spawn(receive_loop.run(transport, shutdown_rx));

        *running = Some(Running { shutdown, handle });
        info!("Ingestion supervisor started");
        Ok(())
    }

    /// Stop the receive loop and tear down the session.
    ///
    /// Safe to call at any time, including before or after a failed `start`.
    /// Holds the handle lock until the loop has exited.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(active) = running.take() {
            // Err only when the loop already ended and dropped its receiver
            let _ = active.shutdown.send(());
            if let Err(e) = active.handle.await {
                error!(error = %e, "Receive loop ended abnormally");
            }
            info!("Ingestion supervisor stopped");
        }
        self.state.claim(SupervisorState::Stopped);
    }
}

async fn connect(
    connector: &dyn TransportConnector,
    timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

// ============================================================================
// Receive loop
// ============================================================================

enum SessionEnd {
    Shutdown,
    Lost,
}

struct ReceiveLoop {
    connector: Arc<dyn TransportConnector>,
    dispatcher: Arc<Dispatcher>,
    topics: Vec<String>,
    state: StateCell,
    generation: u64,
    connect_timeout: Duration,
    connect_retry: Duration,
    auto_reconnect: bool,
}

impl ReceiveLoop {
    fn set_state(&self, next: SupervisorState) {
        self.state.set(self.generation, next);
    }

    async fn run(
        self,
        mut transport: Option<Box<dyn Transport>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let session = match transport.take() {
                Some(session) => session,
                None => {
                    let retry = async {
                        tokio::time::sleep(self.connect_retry).await;
                        connect(self.connector.as_ref(), self.connect_timeout).await
                    };
                    tokio::select! {
                        _ = shutdown.recv() => {
                            debug!("Receive loop received shutdown signal while connecting");
                            break;
                        }
                        result = retry => match result {
                            Ok(session) => {
                                info!("Broker connection established");
                                session
                            }
                            Err(e) => {
                                warn!(error = %e, "Broker connect failed, retrying");
                                continue;
                            }
                        },
                    }
                }
            };

            match self.session(session, &mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost if self.auto_reconnect => {
                    self.set_state(SupervisorState::Connecting);
                }
                SessionEnd::Lost => break,
            }
        }

        self.set_state(SupervisorState::Stopped);
    }

    async fn session(
        &self,
        mut transport: Box<dyn Transport>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        let end = loop {
            let next = tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("Receive loop received shutdown signal");
                            break SessionEnd::Shutdown;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "Receive loop shutdown receiver lagged");
                            continue;
                        }
                    }
                }
                next = transport.recv() => next,
            };

            match next {
                Ok(TransportEvent::Connected) => {
                    if let Err(e) = transport.subscribe(&self.topics).await {
                        error!(error = %e, "Subscription failed");
                        break SessionEnd::Lost;
                    }
                    info!(topics = ?self.topics, "Subscribed to event topics");
                    self.set_state(SupervisorState::Subscribed);
                }
                Ok(TransportEvent::Message(event)) => {
                    self.set_state(SupervisorState::Receiving);
                    self.dispatcher.handle(&event).await;
                }
                Ok(TransportEvent::Disconnected(reason)) => {
                    if self.auto_reconnect {
                        warn!(reason = %reason, "Transport disconnected, waiting for reconnect");
                        self.set_state(SupervisorState::Connecting);
                    } else {
                        warn!(reason = %reason, "Transport disconnected, stopping");
                        break SessionEnd::Lost;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Transport failed");
                    break SessionEnd::Lost;
                }
            }
        };

        if let Err(e) = transport.disconnect().await {
            debug!(error = %e, "Transport disconnect failed");
        }
        end
    }
}

// ============================================================================
// Tests
// ============================================================================
