//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving device events
//! - `command` - Door controller commands (HTTP or log-only)
//! - `ledger` - Ledger collaborator client
//! - `auth` - Card-to-account resolution
//! - `envelope` - Collaborator response envelope
//! - `http_api` - Status and control HTTP API with Prometheus metrics
//! - `audit` - Session outcomes to file (JSONL format)

pub mod audit;
pub mod auth;
pub mod command;
pub mod envelope;
pub mod http_api;
pub mod ledger;
pub mod mqtt;

// Re-export commonly used types
pub use audit::{SessionAudit, SessionOutcome, SessionRecord};
pub use auth::HttpAccountResolver;
pub use command::{create_command_port, HttpCommandPort, LoggingCommandPort};
pub use http_api::{start_http_api, ApiState};
pub use ledger::HttpLedgerPort;
