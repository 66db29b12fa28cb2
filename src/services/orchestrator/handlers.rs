//! Event handlers for the Orchestrator
//!
//! Each handler processes one event type, issuing door commands or ledger
//! calls and then advancing the state machine.

use super::Orchestrator;
use crate::domain::session::{epoch_ms, InferenceOutcome, TransactionSession, VendingState};
use crate::domain::types::{BoardStatus, LedgerRequest, SkuDelta};
use crate::infra::config::InferenceTimeoutPolicy;
use crate::io::audit::{SessionOutcome, SessionRecord};
use crate::services::events::{MonitorId, Phase};
use crate::services::ports::PortError;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

impl Orchestrator {
    /// Handle an accepted card-reader read
    ///
    /// Resolves the account, creates the session and unlocks the door. An
    /// unlock failure aborts the session before it ever leaves Idle.
    pub(crate) async fn handle_card_swipe(&mut self, card_id: &str) {
        if let Some(ref session) = self.session {
            self.metrics.record_swipe_rejected();
            self.metrics.record_event_rejected();
            warn!(
                session_id = %session.session_id,
                account_id = %session.account_id,
                state = %self.state,
                "card_swipe_rejected_session_active"
            );
            return;
        }

        let accounts = self.ports.accounts.clone();
        let account_id = match self.call_port("resolve_account", accounts.resolve(card_id)).await {
            Ok(account_id) => account_id,
            Err(e) => {
                self.metrics.record_swipe_rejected();
                self.metrics.record_event_rejected();
                warn!(card_id = %card_id, error = %e, "card_swipe_rejected_unknown_account");
                return;
            }
        };

        let session = TransactionSession::new(card_id, account_id);
        info!(
            session_id = %session.session_id,
            account_id = %session.account_id,
            "session_started"
        );
        self.session = Some(session);
        self.metrics.record_session_started();

        let command = self.ports.command.clone();
        if let Err(e) = self.call_port("unlock", command.unlock()).await {
            self.metrics.record_command_failure();
            self.log_port_failure("unlock", &e);
            self.abort_session(SessionOutcome::Aborted, "unlock_failed");
            return;
        }

        self.transition(VendingState::AwaitingDoorOpen);
        self.start_monitor(Phase::DoorOpenWait);
    }

    /// Handle a board status push; only a change of door position is an event
    pub(crate) async fn handle_door_report(&mut self, door_closed: bool) {
        if door_closed == self.door_closed {
            debug!(door_closed = %door_closed, "door_report_unchanged");
            return;
        }
        self.door_closed = door_closed;

        if door_closed {
            self.on_door_closed().await;
        } else {
            self.on_door_opened().await;
        }
    }

    async fn on_door_opened(&mut self) {
        match self.state {
            VendingState::AwaitingDoorOpen => {
                self.cancel_monitor();
                if let Some(ref mut session) = self.session {
                    session.door_opened_at = Some(epoch_ms());
                    info!(
                        session_id = %session.session_id,
                        account_id = %session.account_id,
                        "door_opened_cv_workflow_armed"
                    );
                }
                self.transition(VendingState::DoorOpenActive);
                self.start_monitor(Phase::InferenceWait);
            }
            VendingState::Idle => {
                self.metrics.record_forced_entry();
                error!("forced_entry_fault");
                self.lock_best_effort("forced_entry").await;
            }
            VendingState::DoorOpenActive => {
                // Closed and reopened before inference arrived
                if let Some(ref mut session) = self.session {
                    session.door_closed_at = None;
                    info!(session_id = %session.session_id, "door_reopened");
                }
            }
            _ => {
                debug!(state = %self.state, "door_opened_ignored");
            }
        }
    }

    async fn on_door_closed(&mut self) {
        match self.state {
            VendingState::AwaitingDoorClose => {
                self.cancel_monitor();
                if let Some(ref mut session) = self.session {
                    session.door_closed_at = Some(epoch_ms());
                    info!(session_id = %session.session_id, "door_closed");
                }
                self.finalize().await;
            }
            VendingState::DoorOpenActive => {
                if let Some(ref mut session) = self.session {
                    session.door_closed_at = Some(epoch_ms());
                    info!(session_id = %session.session_id, "door_closed_before_inference");
                }
            }
            _ => {
                debug!(state = %self.state, "door_closed_ignored");
            }
        }
    }

    /// Handle inference results for the current door-open interval
    pub(crate) async fn handle_inference(&mut self, deltas: Vec<SkuDelta>) {
        if self.state != VendingState::DoorOpenActive {
            self.metrics.record_event_rejected();
            debug!(state = %self.state, items = %deltas.len(), "inference_ignored");
            return;
        }

        self.cancel_monitor();
        if let Some(ref mut session) = self.session {
            info!(
                session_id = %session.session_id,
                items = %deltas.len(),
                "inference_received"
            );
            session.inference = InferenceOutcome::Received(deltas);
        }
        self.after_inference().await;
    }

    /// Finalize right away if the door already closed, otherwise wait for it
    async fn after_inference(&mut self) {
        if self.door_closed {
            self.finalize().await;
        } else {
            self.transition(VendingState::AwaitingDoorClose);
            self.start_monitor(Phase::DoorCloseWait);
        }
    }

    /// Handle a monitor deadline
    pub(crate) async fn handle_timeout(&mut self, phase: Phase, monitor: MonitorId) {
        let active = self.monitor.as_ref().map(|m| (m.id(), m.phase()));
        if active != Some((monitor, phase)) {
            debug!(monitor = %monitor, phase = %phase, "stale_timeout_ignored");
            return;
        }
        self.monitor = None;
        self.metrics.record_timeout(phase.timeout_kind());

        match phase {
            Phase::DoorOpenWait => {
                if let Some(ref session) = self.session {
                    warn!(
                        session_id = %session.session_id,
                        account_id = %session.account_id,
                        wait_ms = %self.config.door_open_wait().as_millis(),
                        "door_open_timeout"
                    );
                }
                self.lock_best_effort("door_open_timeout").await;
                self.abort_session(SessionOutcome::Aborted, "door_open_timeout");
            }
            Phase::InferenceWait => {
                if let Some(ref mut session) = self.session {
                    session.inference = InferenceOutcome::TimedOut;
                    warn!(
                        session_id = %session.session_id,
                        account_id = %session.account_id,
                        policy = %self.config.inference_timeout_policy().as_str(),
                        "inference_timeout_degraded"
                    );
                }
                self.after_inference().await;
            }
            Phase::DoorCloseWait => {
                if let Some(ref session) = self.session {
                    error!(
                        session_id = %session.session_id,
                        account_id = %session.account_id,
                        wait_ms = %self.config.door_close_wait().as_millis(),
                        "stuck_door_fault"
                    );
                }
                self.lock_best_effort("stuck_door").await;
                self.abort_session(SessionOutcome::Aborted, "door_close_timeout");
                if self.config.lockout_on_stuck_door() {
                    self.transition(VendingState::MaintenanceLockout);
                    warn!("maintenance_lockout_stuck_door");
                }
            }
        }
    }

    /// Submit the session to the ledger and return to Idle
    async fn finalize(&mut self) {
        self.transition(VendingState::Finalizing);

        let Some(session) = self.session.as_ref() else {
            self.transition(VendingState::Idle);
            return;
        };

        if session.inference == InferenceOutcome::TimedOut
            && self.config.inference_timeout_policy() == InferenceTimeoutPolicy::Abort
        {
            warn!(
                session_id = %session.session_id,
                account_id = %session.account_id,
                "finalize_aborted_no_inference"
            );
            self.abort_session(SessionOutcome::Aborted, "inference_timeout");
            return;
        }

        let request =
            LedgerRequest { account_id: session.account_id.clone(), delta_skus: session.deltas() };

        let ledger = self.ports.ledger.clone();
        match self.call_port("submit_transaction", ledger.submit_transaction(&request)).await {
            Ok(tx) => {
                for item in &tx.line_items {
                    debug!(
                        transaction_id = %tx.transaction_id,
                        sku = %item.sku,
                        product = %item.product_name,
                        count = %item.item_count,
                        total = ?item.line_total(),
                        "transaction_line_item"
                    );
                }
                let record = self.session.as_ref().map(|session| {
                    info!(
                        session_id = %session.session_id,
                        account_id = %session.account_id,
                        transaction_id = %tx.transaction_id,
                        line_total = %tx.line_total,
                        items = %tx.line_items.len(),
                        duration_ms = %session.elapsed_ms(),
                        "transaction_completed"
                    );
                    SessionRecord::new(session, SessionOutcome::Completed).with_transaction(&tx)
                });
                self.end_session(record);
            }
            Err(e) => {
                self.metrics.record_ledger_failure();
                self.log_port_failure("finalizing", &e);
                self.abort_session(SessionOutcome::Aborted, "ledger_failed");
            }
        }
    }

    /// Handle the maintenance toggle; repeated toggles are no-ops
    pub(crate) async fn handle_set_maintenance(&mut self, enabled: bool) {
        if enabled == self.maintenance_mode() {
            debug!(enabled = %enabled, "maintenance_mode_unchanged");
            return;
        }

        if enabled {
            if let Some(ref session) = self.session {
                warn!(
                    session_id = %session.session_id,
                    account_id = %session.account_id,
                    state = %self.state,
                    "session_abandoned_maintenance"
                );
                self.cancel_monitor();
                self.lock_best_effort("maintenance").await;
                self.abort_session(SessionOutcome::Abandoned, "maintenance_mode");
            }
            self.transition(VendingState::MaintenanceLockout);
            info!("maintenance_mode_enabled");
            return;
        }

        self.transition(VendingState::Idle);
        info!("maintenance_mode_disabled");

        let command = self.ports.command.clone();
        match self.call_port("board_status", command.board_status()).await {
            Ok(status) => {
                self.door_closed = status.door_closed;
                info!(door_closed = %status.door_closed, "door_position_resynced");
            }
            Err(e) => {
                warn!(error = %e, "door_position_resync_failed");
            }
        }
    }

    /// Abort anything in flight, re-lock and return to Idle
    pub(crate) async fn handle_reset_door_lock(&mut self) {
        self.cancel_monitor();
        self.lock_best_effort("reset_door_lock").await;
        if let Some(ref session) = self.session {
            warn!(
                session_id = %session.session_id,
                account_id = %session.account_id,
                state = %self.state,
                "session_abandoned_reset"
            );
        }
        self.abort_session(SessionOutcome::Abandoned, "reset_door_lock");
        info!("door_lock_reset");
    }

    /// Answer a board status query through the command port
    pub(crate) async fn handle_board_status_query(
        &mut self,
        reply: oneshot::Sender<Result<BoardStatus, PortError>>,
    ) {
        let command = self.ports.command.clone();
        let result = self.call_port("board_status", command.board_status()).await;
        if reply.send(result).is_err() {
            debug!("board_status_requester_gone");
        }
    }

    /// Issue a lock, logging (not propagating) any failure
    async fn lock_best_effort(&self, context: &'static str) {
        let command = self.ports.command.clone();
        match self.call_port("lock", command.lock()).await {
            Ok(()) => debug!(context = %context, "door_locked"),
            Err(e) => {
                self.metrics.record_command_failure();
                error!(context = %context, error = %e, "lock_failed");
            }
        }
    }

    /// End the active session with a non-completed outcome
    fn abort_session(&mut self, outcome: SessionOutcome, reason: &str) {
        let record = self.session.as_ref().map(|session| {
            info!(
                session_id = %session.session_id,
                account_id = %session.account_id,
                outcome = %outcome.as_str(),
                reason = %reason,
                "session_ended"
            );
            SessionRecord::new(session, outcome).with_reason(reason)
        });
        self.end_session(record);
    }

    fn log_port_failure(&self, phase: &'static str, e: &PortError) {
        match self.session {
            Some(ref session) => error!(
                session_id = %session.session_id,
                account_id = %session.account_id,
                phase = %phase,
                error = %e,
                "port_call_failed"
            ),
            None => error!(phase = %phase, error = %e, "port_call_failed"),
        }
    }
}
