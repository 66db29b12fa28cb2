//! Transaction session model and orchestrator state

use crate::domain::types::{AccountId, SkuDelta};
use serde::Serialize;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Orchestrator finite state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendingState {
    Idle,
    AwaitingDoorOpen,
    /// Door is open and the CV workflow is running
    DoorOpenActive,
    AwaitingDoorClose,
    Finalizing,
    MaintenanceLockout,
}

impl VendingState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            VendingState::Idle => "idle",
            VendingState::AwaitingDoorOpen => "awaiting_door_open",
            VendingState::DoorOpenActive => "door_open_active",
            VendingState::AwaitingDoorClose => "awaiting_door_close",
            VendingState::Finalizing => "finalizing",
            VendingState::MaintenanceLockout => "maintenance_lockout",
        }
    }

    /// Coarse mode exposed to status consumers
    pub fn mode(&self) -> &'static str {
        match self {
            VendingState::Idle => "idle",
            VendingState::MaintenanceLockout => "maintenance",
            _ => "active",
        }
    }
}

impl std::fmt::Display for VendingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the CV workflow produced for this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    Pending,
    Received(Vec<SkuDelta>),
    TimedOut,
}

/// Live record of one shopper interaction
///
/// Door and inference progress are stored as facts (timestamps / outcome)
/// recorded at transition time rather than as independent flags.
#[derive(Debug, Clone)]
pub struct TransactionSession {
    pub session_id: String,
    pub card_id: String,
    pub account_id: AccountId,
    pub started_at: Instant,
    pub started_at_ms: u64,
    pub door_opened_at: Option<u64>,
    pub door_closed_at: Option<u64>,
    pub inference: InferenceOutcome,
}

impl TransactionSession {
    pub fn new(card_id: &str, account_id: AccountId) -> Self {
        Self {
            session_id: new_uuid_v7(),
            card_id: card_id.to_string(),
            account_id,
            started_at: Instant::now(),
            started_at_ms: epoch_ms(),
            door_opened_at: None,
            door_closed_at: None,
            inference: InferenceOutcome::Pending,
        }
    }

    pub fn door_opened_during_session(&self) -> bool {
        self.door_opened_at.is_some()
    }

    pub fn door_closed_during_session(&self) -> bool {
        self.door_closed_at.is_some()
    }

    /// CV workflow is armed the moment the door opens
    pub fn cv_workflow_started(&self) -> bool {
        self.door_opened_during_session()
    }

    pub fn inference_data_received(&self) -> bool {
        matches!(self.inference, InferenceOutcome::Received(_))
    }

    /// Deltas to submit; empty when inference never arrived
    pub fn deltas(&self) -> Vec<SkuDelta> {
        match &self.inference {
            InferenceOutcome::Received(deltas) => deltas.clone(),
            InferenceOutcome::Pending | InferenceOutcome::TimedOut => Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// Read-only snapshot published for status consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub mode: &'static str,
    pub state: VendingState,
    pub door_closed: bool,
    pub maintenance_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            mode: VendingState::Idle.mode(),
            state: VendingState::Idle,
            door_closed: true,
            maintenance_mode: false,
            session_id: None,
            account_id: None,
        }
    }
}
