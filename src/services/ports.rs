//! Port traits for the orchestrator's external collaborators
//!
//! The orchestrator only ever talks to hardware and microservices through
//! these traits. Concrete adapters live in `io::command`, `io::ledger` and
//! `io::auth`.

use crate::domain::types::{AccountId, BoardStatus, LedgerRequest, LedgerTransaction};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortError {
    #[error("{op} timed out")]
    Timeout { op: &'static str },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("account not found")]
    AccountNotFound,
    #[error("SKU {0} not found in inventory")]
    SkuNotFound(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Door controller commands and board status
#[async_trait]
pub trait CommandPort: Send + Sync {
    async fn lock(&self) -> Result<(), PortError>;
    async fn unlock(&self) -> Result<(), PortError>;
    async fn board_status(&self) -> Result<BoardStatus, PortError>;
}

/// Ledger collaborator: prices and records a finished transaction
#[async_trait]
pub trait LedgerPort: Send + Sync {
    async fn submit_transaction(
        &self,
        request: &LedgerRequest,
    ) -> Result<LedgerTransaction, PortError>;
}

/// Maps a swiped card to a ledger account
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve(&self, card_id: &str) -> Result<AccountId, PortError>;
}

/// Resolver used when no authentication collaborator is configured
pub struct CardIsAccount;

#[async_trait]
impl AccountResolver for CardIsAccount {
    async fn resolve(&self, card_id: &str) -> Result<AccountId, PortError> {
        Ok(AccountId::from(card_id))
    }
}

/// The set of collaborators handed to the orchestrator
#[derive(Clone)]
pub struct Ports {
    pub command: Arc<dyn CommandPort>,
    pub ledger: Arc<dyn LedgerPort>,
    pub accounts: Arc<dyn AccountResolver>,
}
