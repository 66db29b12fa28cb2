//! Session audit - writes terminal session outcomes to file
//!
//! Records are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::session::{InferenceOutcome, TransactionSession};
use crate::domain::types::LedgerTransaction;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, info};

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Ledger accepted the transaction
    Completed,
    /// Session ended without a ledger record (timeout, port failure, policy)
    Aborted,
    /// Session dropped by maintenance mode or a reset
    Abandoned,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Aborted => "aborted",
            SessionOutcome::Abandoned => "abandoned",
        }
    }
}

/// Format epoch milliseconds as RFC 3339 (empty on out-of-range input)
fn rfc3339_from_ms(ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_default()
}

/// One line of the audit file
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub account_id: String,
    pub outcome: SessionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: String,
    pub duration_ms: u64,
    pub door_opened: bool,
    pub door_closed: bool,
    pub inference: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", with = "rust_decimal::serde::float_option")]
    pub line_total: Option<Decimal>,
    pub items: usize,
}

impl SessionRecord {
    pub fn new(session: &TransactionSession, outcome: SessionOutcome) -> Self {
        let inference = match session.inference {
            InferenceOutcome::Pending => "pending",
            InferenceOutcome::Received(_) => "received",
            InferenceOutcome::TimedOut => "timed_out",
        };
        Self {
            session_id: session.session_id.clone(),
            account_id: session.account_id.to_string(),
            outcome,
            reason: None,
            started_at: rfc3339_from_ms(session.started_at_ms),
            duration_ms: session.elapsed_ms(),
            door_opened: session.door_opened_during_session(),
            door_closed: session.door_closed_during_session(),
            inference,
            transaction_id: None,
            line_total: None,
            items: session.deltas().len(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_transaction(mut self, tx: &LedgerTransaction) -> Self {
        self.transaction_id = Some(tx.transaction_id);
        self.line_total = Some(tx.line_total);
        self.items = tx.line_items.len();
        self
    }
}

/// Audit writer for session records
pub struct SessionAudit {
    file_path: String,
}

impl SessionAudit {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "session_audit_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a record to the audit file
    /// Returns true if successful, false otherwise
    pub fn write(&self, record: &SessionRecord) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(session_id = %record.session_id, error = %e, "session_audit_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    session_id = %record.session_id,
                    outcome = %record.outcome.as_str(),
                    "session_audited"
                );
                true
            }
            Err(e) => {
                error!(session_id = %record.session_id, error = %e, "session_audit_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
