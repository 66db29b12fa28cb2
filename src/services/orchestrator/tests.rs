//! Tests for the Orchestrator module

use super::*;
use crate::domain::session::InferenceOutcome;
use crate::domain::types::{AccountId, BoardStatus, LedgerRequest, LedgerTransaction, LineItem, SkuDelta};
use crate::infra::config::InferenceTimeoutPolicy;
use crate::services::ports::{AccountResolver, CardIsAccount, CommandPort, LedgerPort};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::oneshot;
use tokio::time::Duration;

/// Command port that records every call
#[derive(Default)]
struct MockCommand {
    locks: AtomicUsize,
    unlocks: AtomicUsize,
    status_calls: AtomicUsize,
    fail_unlock: AtomicBool,
    fail_lock: AtomicBool,
    hang_unlock: AtomicBool,
    /// Door position reported by `board_status`
    door_open: AtomicBool,
}

impl MockCommand {
    fn locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandPort for MockCommand {
    async fn lock(&self) -> Result<(), PortError> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        if self.fail_lock.load(Ordering::SeqCst) {
            return Err(PortError::Transport("lock relay offline".to_string()));
        }
        Ok(())
    }

    async fn unlock(&self) -> Result<(), PortError> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        if self.hang_unlock.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_unlock.load(Ordering::SeqCst) {
            return Err(PortError::Transport("unlock relay offline".to_string()));
        }
        Ok(())
    }

    async fn board_status(&self) -> Result<BoardStatus, PortError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BoardStatus {
            door_closed: !self.door_open.load(Ordering::SeqCst),
            temperature: 4.5,
            ..Default::default()
        })
    }
}

/// Ledger port that records requests and prices every item at 1.99
#[derive(Default)]
struct MockLedger {
    requests: Mutex<Vec<LedgerRequest>>,
    failure: Mutex<Option<PortError>>,
}

impl MockLedger {
    fn requests(&self) -> Vec<LedgerRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LedgerPort for MockLedger {
    async fn submit_transaction(
        &self,
        request: &LedgerRequest,
    ) -> Result<LedgerTransaction, PortError> {
        self.requests.lock().push(request.clone());
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let line_items: Vec<LineItem> = request
            .delta_skus
            .iter()
            .filter(|d| d.delta < 0)
            .map(|d| LineItem {
                sku: d.sku.clone(),
                product_name: "Water".to_string(),
                item_price: dec!(1.99),
                item_count: d.delta.unsigned_abs(),
            })
            .collect();
        let line_total = line_items.iter().filter_map(|i| i.line_total()).sum();
        Ok(LedgerTransaction {
            transaction_id: 1,
            tx_time_stamp: 0,
            line_total,
            created_at: 0,
            updated_at: 0,
            is_paid: false,
            line_items,
        })
    }
}

/// Resolver that knows no accounts
struct NoAccounts;

#[async_trait]
impl AccountResolver for NoAccounts {
    async fn resolve(&self, _card_id: &str) -> Result<AccountId, PortError> {
        Err(PortError::AccountNotFound)
    }
}

/// Test harness that keeps the queue receiver so monitor timeouts can be drained
struct TestOrchestrator {
    orchestrator: Orchestrator,
    command: Arc<MockCommand>,
    ledger: Arc<MockLedger>,
    metrics: Arc<Metrics>,
    event_rx: mpsc::Receiver<OrchestratorEvent>,
    status_rx: watch::Receiver<StatusSnapshot>,
    #[allow(dead_code)]
    shutdown_tx: watch::Sender<bool>,
}

impl std::ops::Deref for TestOrchestrator {
    type Target = Orchestrator;
    fn deref(&self) -> &Self::Target {
        &self.orchestrator
    }
}

impl std::ops::DerefMut for TestOrchestrator {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.orchestrator
    }
}

impl TestOrchestrator {
    async fn swipe(&mut self, card_id: &str) {
        self.process_event(OrchestratorEvent::CardSwipe { card_id: card_id.to_string() }).await;
    }

    async fn door(&mut self, closed: bool) {
        let status = BoardStatus { door_closed: closed, ..Default::default() };
        self.process_event(OrchestratorEvent::BoardStatusReport(status)).await;
    }

    async fn inference(&mut self, deltas: Vec<SkuDelta>) {
        self.process_event(OrchestratorEvent::Inference { deltas }).await;
    }

    /// Let `secs` of (paused) time pass, then process whatever the monitors enqueued
    async fn advance_and_drain(&mut self, secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        while let Ok(event) = self.event_rx.try_recv() {
            self.orchestrator.process_event(event).await;
        }
    }
}

fn test_config() -> Config {
    Config::default().with_waits(30_000, 40_000, 30_000).with_audit_file("")
}

fn create_test_orchestrator() -> TestOrchestrator {
    create_test_orchestrator_with(test_config(), Arc::new(CardIsAccount))
}

fn create_test_orchestrator_with(
    config: Config,
    accounts: Arc<dyn AccountResolver>,
) -> TestOrchestrator {
    let command = Arc::new(MockCommand::default());
    let ledger = Arc::new(MockLedger::default());
    let metrics = Arc::new(Metrics::new());
    let ports = Ports { command: command.clone(), ledger: ledger.clone(), accounts };
    let (event_tx, event_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (orchestrator, status_rx) =
        Orchestrator::new(config, ports, metrics.clone(), event_tx, shutdown_rx);
    TestOrchestrator { orchestrator, command, ledger, metrics, event_rx, status_rx, shutdown_tx }
}

fn water() -> Vec<SkuDelta> {
    vec![SkuDelta::new("4900002470", -1)]
}

#[tokio::test(start_paused = true)]
async fn test_full_transaction_submits_once() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    assert_eq!(t.state(), VendingState::AwaitingDoorOpen);
    assert_eq!(t.command.unlocks(), 1);
    assert_eq!(t.active_monitor(), Some(Phase::DoorOpenWait));

    t.door(false).await;
    assert_eq!(t.state(), VendingState::DoorOpenActive);
    assert!(t.session().unwrap().cv_workflow_started());
    assert_eq!(t.active_monitor(), Some(Phase::InferenceWait));

    t.inference(water()).await;
    assert_eq!(t.state(), VendingState::AwaitingDoorClose);
    assert!(t.session().unwrap().inference_data_received());
    assert_eq!(t.active_monitor(), Some(Phase::DoorCloseWait));

    t.door(true).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert!(t.active_monitor().is_none());

    assert_eq!(
        t.ledger.requests(),
        vec![LedgerRequest { account_id: AccountId::from("A1"), delta_skus: water() }]
    );
    assert_eq!(t.command.locks(), 0);
    assert_eq!(t.metrics.sessions_completed(), 1);
    assert_eq!(t.metrics.sessions_aborted(), 0);

    // Nothing left for the monitors to deliver
    t.advance_and_drain(120).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert_eq!(t.ledger.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_door_open_timeout_locks_exactly_once() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.advance_and_drain(29).await;
    assert_eq!(t.state(), VendingState::AwaitingDoorOpen);
    assert_eq!(t.command.locks(), 0);

    t.advance_and_drain(2).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert_eq!(t.command.locks(), 1);
    assert!(t.ledger.requests().is_empty());
    assert_eq!(t.metrics.report().door_open_timeouts, 1);

    t.advance_and_drain(300).await;
    assert_eq!(t.command.locks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_swipe_rejected() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    let session_id = t.session().unwrap().session_id.clone();
    let monitor_id = t.monitor.as_ref().map(|m| m.id());
    assert!(monitor_id.is_some());

    t.swipe("B2").await;
    assert_eq!(t.monitor.as_ref().map(|m| m.id()), monitor_id);
    assert_eq!(t.active_monitor(), Some(Phase::DoorOpenWait));
    let session = t.session().unwrap();
    assert_eq!(session.session_id, session_id);
    assert_eq!(session.account_id, AccountId::from("A1"));
    assert_eq!(t.state(), VendingState::AwaitingDoorOpen);
    assert_eq!(t.command.unlocks(), 1);
    assert_eq!(t.metrics.swipes_rejected(), 1);
    assert_eq!(t.metrics.sessions_started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_door_open_monitor_never_fires() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.advance_and_drain(10).await;
    t.door(false).await;

    // Past the original 30s deadline, before the 40s inference deadline
    t.advance_and_drain(25).await;
    assert_eq!(t.state(), VendingState::DoorOpenActive);
    assert_eq!(t.command.locks(), 0);
    assert_eq!(t.metrics.report().door_open_timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timeout_ignored() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.process_event(OrchestratorEvent::Timeout {
        phase: Phase::DoorOpenWait,
        monitor: MonitorId(999),
    })
    .await;

    assert_eq!(t.state(), VendingState::AwaitingDoorOpen);
    assert!(t.session().is_some());
    assert_eq!(t.command.locks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_blocks_events() {
    let mut t = create_test_orchestrator();

    t.process_event(OrchestratorEvent::SetMaintenance(true)).await;
    assert!(t.maintenance_mode());

    t.swipe("A1").await;
    t.door(false).await;
    t.inference(water()).await;
    t.process_event(OrchestratorEvent::ResetDoorLock).await;

    assert_eq!(t.state(), VendingState::MaintenanceLockout);
    assert!(t.session().is_none());
    assert!(t.door_closed());
    assert_eq!(t.command.unlocks(), 0);
    assert_eq!(t.command.locks(), 0);
    assert!(t.ledger.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_abandons_session_and_resyncs_door() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.door(false).await;
    t.process_event(OrchestratorEvent::SetMaintenance(true)).await;

    assert_eq!(t.state(), VendingState::MaintenanceLockout);
    assert!(t.session().is_none());
    assert!(t.active_monitor().is_none());
    assert_eq!(t.command.locks(), 1);
    assert_eq!(t.metrics.sessions_aborted(), 1);

    // Repeated toggle is a no-op
    t.process_event(OrchestratorEvent::SetMaintenance(true)).await;
    assert_eq!(t.command.locks(), 1);

    // Door was shut by staff while in maintenance
    assert!(!t.door_closed());
    t.process_event(OrchestratorEvent::SetMaintenance(false)).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.door_closed());
    assert_eq!(t.command.status_calls.load(Ordering::SeqCst), 1);

    // No stray timeouts from the abandoned session
    t.advance_and_drain(120).await;
    assert_eq!(t.state(), VendingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_forced_entry_in_idle_locks() {
    let mut t = create_test_orchestrator();

    t.door(false).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert!(!t.door_closed());
    assert_eq!(t.command.locks(), 1);
    assert_eq!(t.metrics.report().forced_entry_faults, 1);

    // Repeated report of the same position is not a new event
    t.door(false).await;
    assert_eq!(t.command.locks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forced_entry_lock_failure_stays_idle() {
    let mut t = create_test_orchestrator();
    t.command.fail_lock.store(true, Ordering::SeqCst);

    t.door(false).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert_eq!(t.metrics.report().command_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_inference_timeout_proceeds_with_empty_deltas() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.door(false).await;
    t.advance_and_drain(41).await;

    assert_eq!(t.state(), VendingState::AwaitingDoorClose);
    assert_eq!(t.session().unwrap().inference, InferenceOutcome::TimedOut);
    assert_eq!(t.metrics.report().inference_timeouts, 1);

    // Late inference is outside DoorOpenActive and ignored
    t.inference(water()).await;
    assert_eq!(t.session().unwrap().inference, InferenceOutcome::TimedOut);

    t.door(true).await;
    assert_eq!(t.state(), VendingState::Idle);
    let requests = t.ledger.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].delta_skus.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inference_timeout_abort_policy_skips_ledger() {
    let config = test_config().with_inference_timeout_policy(InferenceTimeoutPolicy::Abort);
    let mut t = create_test_orchestrator_with(config, Arc::new(CardIsAccount));

    t.swipe("A1").await;
    t.door(false).await;
    t.advance_and_drain(41).await;
    t.door(true).await;

    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert!(t.ledger.requests().is_empty());
    assert_eq!(t.metrics.sessions_aborted(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_door_closed_before_inference_finalizes_on_inference() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.door(false).await;
    t.door(true).await;
    assert_eq!(t.state(), VendingState::DoorOpenActive);
    assert!(t.session().unwrap().door_closed_during_session());

    t.inference(water()).await;
    assert_eq!(t.state(), VendingState::Idle);
    assert_eq!(t.ledger.requests().len(), 1);
    assert!(t.active_monitor().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_door_closed_before_inference_timeout_finalizes() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.door(false).await;
    t.door(true).await;
    t.advance_and_drain(41).await;

    assert_eq!(t.state(), VendingState::Idle);
    assert_eq!(t.ledger.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_door_aborts_and_locks() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.door(false).await;
    t.inference(water()).await;
    t.advance_and_drain(31).await;

    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert_eq!(t.command.locks(), 1);
    assert!(t.ledger.requests().is_empty());
    assert_eq!(t.metrics.report().door_close_timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_door_lockout() {
    let config = test_config().with_lockout_on_stuck_door(true);
    let mut t = create_test_orchestrator_with(config, Arc::new(CardIsAccount));

    t.swipe("A1").await;
    t.door(false).await;
    t.inference(water()).await;
    t.advance_and_drain(31).await;

    assert_eq!(t.state(), VendingState::MaintenanceLockout);
    assert!(t.session().is_none());
    assert_eq!(t.command.locks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unlock_failure_aborts_swipe() {
    let mut t = create_test_orchestrator();
    t.command.fail_unlock.store(true, Ordering::SeqCst);

    t.swipe("A1").await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert!(t.active_monitor().is_none());
    assert_eq!(t.metrics.sessions_aborted(), 1);
    assert_eq!(t.metrics.report().command_failures, 1);

    // The next swipe can start fresh once the relay recovers
    t.command.fail_unlock.store(false, Ordering::SeqCst);
    t.swipe("A1").await;
    assert_eq!(t.state(), VendingState::AwaitingDoorOpen);
}

#[tokio::test(start_paused = true)]
async fn test_hung_unlock_times_out() {
    let config = test_config().with_port_timeout_ms(2_000);
    let mut t = create_test_orchestrator_with(config, Arc::new(CardIsAccount));
    t.command.hang_unlock.store(true, Ordering::SeqCst);

    t.swipe("A1").await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert_eq!(t.metrics.report().command_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_account_rejects_swipe() {
    let mut t = create_test_orchestrator_with(test_config(), Arc::new(NoAccounts));

    t.swipe("0003293374").await;
    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert_eq!(t.command.unlocks(), 0);
    assert_eq!(t.metrics.swipes_rejected(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ledger_failure_aborts_session() {
    let mut t = create_test_orchestrator();
    *t.ledger.failure.lock() = Some(PortError::SkuNotFound("4900002470".to_string()));

    t.swipe("A1").await;
    t.door(false).await;
    t.inference(water()).await;
    t.door(true).await;

    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert_eq!(t.ledger.requests().len(), 1);
    assert_eq!(t.metrics.report().ledger_failures, 1);
    assert_eq!(t.metrics.sessions_completed(), 0);
    assert_eq!(t.metrics.sessions_aborted(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inference_outside_door_open_ignored() {
    let mut t = create_test_orchestrator();

    t.inference(water()).await;
    assert_eq!(t.state(), VendingState::Idle);

    t.swipe("A1").await;
    t.inference(water()).await;
    assert_eq!(t.state(), VendingState::AwaitingDoorOpen);
    assert_eq!(t.session().unwrap().inference, InferenceOutcome::Pending);
    assert_eq!(t.metrics.report().events_rejected, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_door_lock_abandons_session() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    t.door(false).await;
    t.process_event(OrchestratorEvent::ResetDoorLock).await;

    assert_eq!(t.state(), VendingState::Idle);
    assert!(t.session().is_none());
    assert!(t.active_monitor().is_none());
    assert_eq!(t.command.locks(), 1);
    assert!(t.ledger.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_board_status_query_answers_in_maintenance() {
    let mut t = create_test_orchestrator();
    t.command.door_open.store(true, Ordering::SeqCst);
    t.process_event(OrchestratorEvent::SetMaintenance(true)).await;

    let (reply, rx) = oneshot::channel();
    t.process_event(OrchestratorEvent::QueryBoardStatus { reply }).await;
    let status = rx.await.unwrap().unwrap();
    assert!(!status.door_closed);
    assert_eq!(status.temperature, 4.5);
    assert_eq!(t.state(), VendingState::MaintenanceLockout);
}

#[tokio::test(start_paused = true)]
async fn test_status_snapshot_published() {
    let mut t = create_test_orchestrator();

    t.swipe("A1").await;
    {
        let snapshot = t.status_rx.borrow_and_update();
        assert_eq!(snapshot.mode, "active");
        assert_eq!(snapshot.state, VendingState::AwaitingDoorOpen);
        assert_eq!(snapshot.account_id.as_deref(), Some("A1"));
        assert!(snapshot.session_id.is_some());
    }

    t.process_event(OrchestratorEvent::SetMaintenance(true)).await;
    let snapshot = t.status_rx.borrow_and_update();
    assert_eq!(snapshot.mode, "maintenance");
    assert!(snapshot.maintenance_mode);
    assert!(snapshot.session_id.is_none());
}
