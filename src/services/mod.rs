//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `orchestrator` - Vending transaction state machine
//! - `monitor` - Deadline monitors for the session phases
//! - `event_filter` - Device event decoding and filtering
//! - `events` - Orchestrator queue messages
//! - `ports` - Collaborator traits (command, ledger, accounts)

pub mod event_filter;
pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod ports;

// Re-export commonly used types
pub use event_filter::EventFilter;
pub use events::{MonitorId, OrchestratorEvent, Phase};
pub use orchestrator::Orchestrator;
pub use ports::{AccountResolver, CardIsAccount, CommandPort, LedgerPort, PortError, Ports};
