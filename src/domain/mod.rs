//! Domain models - core business types and the transaction session
//!
//! This module contains the canonical data types used throughout the system:
//! - `TransactionSession` - one card-swipe-to-door-close shopper interaction
//! - `VendingState` - the orchestrator's finite state
//! - `SkuDelta` / `LedgerRequest` / `LedgerTransaction` - ledger wire types
//! - `BoardStatus` - controller board report (door, locks, climate)

pub mod session;
pub mod types;

pub use session::{InferenceOutcome, StatusSnapshot, TransactionSession, VendingState};
pub use types::{AccountId, BoardStatus, LedgerRequest, LedgerTransaction, LineItem, SkuDelta};
