//! Timeout monitors - one deadline race per session phase
//!
//! A monitor sleeps for its deadline and, if nothing resolved it first,
//! enqueues exactly one `Timeout` into the orchestrator queue.
//!
//! Cancellation and expiry race on a single atomic guard: whichever side
//! moves it out of `PENDING` first wins, so a cancelled monitor can never
//! deliver. The orchestrator additionally drops timeouts whose `MonitorId`
//! is no longer active (expired just before the real event was processed).

use crate::services::events::{MonitorId, OrchestratorEvent, Phase};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Resolution guard shared by a monitor task and its handle
#[derive(Debug, Default)]
struct Resolution {
    state: AtomicU8,
    cancel: Notify,
}

impl Resolution {
    fn try_resolve(&self, to: u8) -> bool {
        self.state.compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

/// Owner-side handle for a running monitor
#[derive(Debug)]
pub struct MonitorHandle {
    id: MonitorId,
    phase: Phase,
    resolution: Arc<Resolution>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn id(&self) -> MonitorId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Cancel the monitor.
    ///
    /// Returns true if the cancellation won; false means the deadline had
    /// already fired and a timeout is (or will be) in the queue.
    pub fn cancel(self) -> bool {
        let won = self.resolution.try_resolve(CANCELLED);
        // notify_one stores a permit, so a task not yet polling still sees it
        self.resolution.cancel.notify_one();
        debug!(monitor = %self.id, phase = %self.phase, won = %won, "monitor_cancelled");
        won
    }

    /// Whether the monitor task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Wait until the shutdown flag is raised (or its sender is gone)
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Spawn a monitor that races `deadline` against cancellation and shutdown
pub fn spawn_monitor(
    id: MonitorId,
    phase: Phase,
    deadline: Duration,
    event_tx: mpsc::Sender<OrchestratorEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> MonitorHandle {
    let resolution = Arc::new(Resolution::default());
    let task_resolution = resolution.clone();

    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                if task_resolution.try_resolve(EXPIRED) {
                    debug!(monitor = %id, phase = %phase, "monitor_expired");
                    if event_tx.send(OrchestratorEvent::Timeout { phase, monitor: id }).await.is_err() {
                        warn!(monitor = %id, phase = %phase, "monitor_queue_closed");
                    }
                }
            }
            _ = task_resolution.cancel.notified() => {}
            _ = wait_for_shutdown(&mut shutdown) => {
                task_resolution.try_resolve(CANCELLED);
            }
        }
    });

    debug!(monitor = %id, phase = %phase, deadline_ms = %deadline.as_millis(), "monitor_started");
    MonitorHandle { id, phase, resolution, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn channels() -> (
        mpsc::Sender<OrchestratorEvent>,
        mpsc::Receiver<OrchestratorEvent>,
        watch::Sender<bool>,
        watch::Receiver<bool>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (tx, rx, shutdown_tx, shutdown_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_delivers_exactly_one_timeout() {
        let (tx, mut rx, _shutdown_tx, shutdown_rx) = channels();
        let handle = spawn_monitor(
            MonitorId(1),
            Phase::DoorOpenWait,
            Duration::from_secs(30),
            tx,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(31)).await;

        match rx.recv().await {
            Some(OrchestratorEvent::Timeout { phase, monitor }) => {
                assert_eq!(phase, Phase::DoorOpenWait);
                assert_eq!(monitor, MonitorId(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(handle.is_finished());
        // Cancelling after expiry loses the race
        assert!(!handle.cancel());
        // The task held the only other sender, so the channel is now closed and empty
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline_never_delivers() {
        let (tx, mut rx, _shutdown_tx, shutdown_rx) = channels();
        let handle = spawn_monitor(
            MonitorId(7),
            Phase::InferenceWait,
            Duration::from_secs(10),
            tx.clone(),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_poll_never_delivers() {
        let (tx, mut rx, _shutdown_tx, shutdown_rx) = channels();
        let handle = spawn_monitor(
            MonitorId(2),
            Phase::DoorCloseWait,
            Duration::from_millis(1),
            tx.clone(),
            shutdown_rx,
        );
        // Cancel before the task has had any chance to run
        assert!(handle.cancel());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_monitors() {
        let (tx, mut rx, shutdown_tx, shutdown_rx) = channels();
        let handles: Vec<_> = [Phase::DoorOpenWait, Phase::InferenceWait, Phase::DoorCloseWait]
            .into_iter()
            .enumerate()
            .map(|(i, phase)| {
                spawn_monitor(
                    MonitorId(i as u64),
                    phase,
                    Duration::from_secs(10),
                    tx.clone(),
                    shutdown_rx.clone(),
                )
            })
            .collect();

        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(handles.iter().all(|h| h.is_finished()));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        // Shutdown resolved the guard, so a late cancel reports a lost race
        for handle in handles {
            assert!(!handle.cancel());
        }
    }
}
