//! Messages accepted by the orchestrator queue
//!
//! Every component talks to the orchestrator only by enqueuing one of these.

use crate::domain::types::{BoardStatus, SkuDelta};
use crate::infra::metrics::TimeoutKind;
use crate::services::ports::PortError;
use tokio::sync::oneshot;

/// Session phase a timeout monitor watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DoorOpenWait,
    InferenceWait,
    DoorCloseWait,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::DoorOpenWait => "door_open_wait",
            Phase::InferenceWait => "inference_wait",
            Phase::DoorCloseWait => "door_close_wait",
        }
    }

    pub fn timeout_kind(&self) -> TimeoutKind {
        match self {
            Phase::DoorOpenWait => TimeoutKind::DoorOpen,
            Phase::InferenceWait => TimeoutKind::Inference,
            Phase::DoorCloseWait => TimeoutKind::DoorClose,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one spawned monitor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MonitorId(pub u64);

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub enum OrchestratorEvent {
    /// Accepted card-reader read
    CardSwipe { card_id: String },
    /// Board status push; a change in `door_closed` is a door event
    BoardStatusReport(BoardStatus),
    /// Inference device result for the current door-open interval
    Inference { deltas: Vec<SkuDelta> },
    /// A monitor's deadline elapsed
    Timeout { phase: Phase, monitor: MonitorId },
    /// Maintenance toggle
    SetMaintenance(bool),
    /// Abort whatever is in flight and re-lock
    ResetDoorLock,
    /// Board status query, answered through the command port
    QueryBoardStatus { reply: oneshot::Sender<Result<BoardStatus, PortError>> },
}

impl OrchestratorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorEvent::CardSwipe { .. } => "card_swipe",
            OrchestratorEvent::BoardStatusReport(_) => "board_status",
            OrchestratorEvent::Inference { .. } => "inference",
            OrchestratorEvent::Timeout { .. } => "timeout",
            OrchestratorEvent::SetMaintenance(_) => "set_maintenance",
            OrchestratorEvent::ResetDoorLock => "reset_door_lock",
            OrchestratorEvent::QueryBoardStatus { .. } => "query_board_status",
        }
    }
}
