//! Vending transaction orchestration
//!
//! The Orchestrator is the single owner of transaction state. It drains one
//! ordered queue fed by the event filter, the HTTP API and the timeout
//! monitors, and drives the command and ledger ports in response:
//! - Session lifecycle (swipe, door open, inference, door close, ledger)
//! - Timeout fallbacks (re-lock, degraded finalize, stuck-door abort)
//! - Maintenance lockout and reset
//!
//! For every transition the door command or ledger call is issued before
//! the state is advanced.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::session::{StatusSnapshot, TransactionSession, VendingState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::audit::{SessionAudit, SessionOutcome, SessionRecord};
use crate::services::events::{MonitorId, OrchestratorEvent, Phase};
use crate::services::monitor::{spawn_monitor, wait_for_shutdown, MonitorHandle};
use crate::services::ports::{PortError, Ports};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Central state machine for the vending transaction lifecycle
pub struct Orchestrator {
    /// Current finite state
    pub(crate) state: VendingState,
    /// Active shopper session, at most one
    pub(crate) session: Option<TransactionSession>,
    /// Last known physical door position
    pub(crate) door_closed: bool,
    /// Running timeout monitor for the active session
    pub(crate) monitor: Option<MonitorHandle>,
    next_monitor_id: u64,
    /// Application configuration
    pub(crate) config: Config,
    /// External collaborators
    pub(crate) ports: Ports,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
    /// Session audit writer (optional)
    pub(crate) audit: Option<SessionAudit>,
    /// Queue sender handed to monitors
    event_tx: mpsc::Sender<OrchestratorEvent>,
    shutdown: watch::Receiver<bool>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl Orchestrator {
    /// Create a new Orchestrator.
    ///
    /// `event_tx` must feed the receiver later passed to [`Orchestrator::run`];
    /// monitors enqueue their timeouts through it. Returns the orchestrator
    /// and a receiver for its status snapshots.
    pub fn new(
        config: Config,
        ports: Ports,
        metrics: Arc<Metrics>,
        event_tx: mpsc::Sender<OrchestratorEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<StatusSnapshot>) {
        let audit = if config.audit_file().is_empty() {
            None
        } else {
            Some(SessionAudit::new(config.audit_file()))
        };
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

        let orchestrator = Self {
            state: VendingState::Idle,
            session: None,
            door_closed: true,
            monitor: None,
            next_monitor_id: 0,
            config,
            ports,
            metrics,
            audit,
            event_tx,
            shutdown,
            status_tx,
        };
        (orchestrator, status_rx)
    }

    /// Start the orchestrator, consuming events until shutdown or channel close
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<OrchestratorEvent>) {
        let mut shutdown = self.shutdown.clone();
        info!(
            card_reader = %self.config.card_reader_device(),
            inference_device = %self.config.inference_device(),
            "orchestrator_started"
        );

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("orchestrator_shutdown");
                    break;
                }
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e).await,
                        None => break, // Channel closed
                    }
                }
            }
        }

        if let Some(monitor) = self.monitor.take() {
            monitor.cancel();
        }
        if let Some(session) = &self.session {
            warn!(
                session_id = %session.session_id,
                account_id = %session.account_id,
                state = %self.state,
                "session_interrupted_by_shutdown"
            );
        }
        info!("orchestrator_stopped");
    }

    /// Process a single event, dispatching to the appropriate handler
    pub async fn process_event(&mut self, event: OrchestratorEvent) {
        self.metrics.record_event_processed();
        let kind = event.kind();

        if self.state == VendingState::MaintenanceLockout {
            match event {
                OrchestratorEvent::SetMaintenance(enabled) => {
                    self.handle_set_maintenance(enabled).await
                }
                OrchestratorEvent::QueryBoardStatus { reply } => {
                    self.handle_board_status_query(reply).await
                }
                _ => {
                    self.metrics.record_event_rejected();
                    debug!(event = %kind, "event_ignored_maintenance");
                }
            }
            self.publish_status();
            return;
        }

        match event {
            OrchestratorEvent::CardSwipe { card_id } => self.handle_card_swipe(&card_id).await,
            OrchestratorEvent::BoardStatusReport(status) => {
                self.handle_door_report(status.door_closed).await
            }
            OrchestratorEvent::Inference { deltas } => self.handle_inference(deltas).await,
            OrchestratorEvent::Timeout { phase, monitor } => {
                self.handle_timeout(phase, monitor).await
            }
            OrchestratorEvent::SetMaintenance(enabled) => {
                self.handle_set_maintenance(enabled).await
            }
            OrchestratorEvent::ResetDoorLock => self.handle_reset_door_lock().await,
            OrchestratorEvent::QueryBoardStatus { reply } => {
                self.handle_board_status_query(reply).await
            }
        }

        self.publish_status();
    }

    /// Current finite state
    pub fn state(&self) -> VendingState {
        self.state
    }

    pub fn maintenance_mode(&self) -> bool {
        self.state == VendingState::MaintenanceLockout
    }

    pub fn door_closed(&self) -> bool {
        self.door_closed
    }

    pub fn session(&self) -> Option<&TransactionSession> {
        self.session.as_ref()
    }

    /// Phase of the running monitor, if any
    pub fn active_monitor(&self) -> Option<Phase> {
        self.monitor.as_ref().map(|m| m.phase())
    }

    /// Build the read-only snapshot for status consumers
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            mode: self.state.mode(),
            state: self.state,
            door_closed: self.door_closed,
            maintenance_mode: self.maintenance_mode(),
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            account_id: self.session.as_ref().map(|s| s.account_id.to_string()),
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_if_modified(|current| {
            let next = self.snapshot();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Move to a new state, logging the transition
    pub(crate) fn transition(&mut self, to: VendingState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "state_transition");
            self.state = to;
        }
    }

    /// Spawn the monitor for `phase`, replacing (and cancelling) any previous one
    pub(crate) fn start_monitor(&mut self, phase: Phase) {
        self.cancel_monitor();
        let deadline = match phase {
            Phase::DoorOpenWait => self.config.door_open_wait(),
            Phase::InferenceWait => self.config.inference_wait(),
            Phase::DoorCloseWait => self.config.door_close_wait(),
        };
        self.next_monitor_id += 1;
        let id = MonitorId(self.next_monitor_id);
        self.monitor = Some(spawn_monitor(
            id,
            phase,
            deadline,
            self.event_tx.clone(),
            self.shutdown.clone(),
        ));
    }

    pub(crate) fn cancel_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.cancel();
        }
    }

    /// Run a port call under the configured port timeout, recording latency
    pub(crate) async fn call_port<T, F>(&self, op: &'static str, fut: F) -> Result<T, PortError>
    where
        F: Future<Output = Result<T, PortError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.config.port_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(PortError::Timeout { op }),
        };
        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_port_latency(latency_ms);
        debug!(op = %op, latency_ms = %latency_ms, ok = %result.is_ok(), "port_call");
        result
    }

    /// Drop the active session and return to Idle, auditing the outcome
    pub(crate) fn end_session(&mut self, record: Option<SessionRecord>) {
        self.cancel_monitor();
        if let Some(session) = self.session.take() {
            let record = record.unwrap_or_else(|| SessionRecord::new(&session, SessionOutcome::Aborted));
            match record.outcome {
                SessionOutcome::Completed => self.metrics.record_session_completed(),
                SessionOutcome::Aborted | SessionOutcome::Abandoned => {
                    self.metrics.record_session_aborted()
                }
            }
            if let Some(ref audit) = self.audit {
                audit.write(&record);
            }
        }
        self.transition(VendingState::Idle);
    }
}
