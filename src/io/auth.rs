//! Card-to-account resolution through the authentication collaborator
//!
//! `GET {auth_url}/{card_id}` answers with an envelope whose content carries
//! `{"accountID": ...}`. The account id may be numeric or a string.

use crate::domain::types::AccountId;
use crate::io::envelope::Envelope;
use crate::services::ports::{AccountResolver, PortError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct AuthContent {
    #[serde(rename = "accountID", alias = "accountId")]
    account_id: serde_json::Value,
}

/// Decode an authentication response body given its HTTP status
pub fn decode_account(status: u16, body: &[u8]) -> Result<AccountId, PortError> {
    let envelope = Envelope::parse(body)?;
    if envelope.error || !(200..300).contains(&status) {
        return match status {
            401 | 404 => Err(PortError::AccountNotFound),
            _ => Err(PortError::Rejected { status, reason: envelope.reason() }),
        };
    }

    let content: AuthContent = envelope.decode()?;
    match content.account_id {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(id) => Ok(AccountId::Numeric(id)),
            None => Err(PortError::InvalidResponse(format!("non-integer accountID: {n}"))),
        },
        serde_json::Value::String(s) if !s.trim().is_empty() => Ok(AccountId::from(s.trim())),
        other => Err(PortError::InvalidResponse(format!("unexpected accountID: {other}"))),
    }
}

pub struct HttpAccountResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccountResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Transport(e.to_string()))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl AccountResolver for HttpAccountResolver {
    async fn resolve(&self, card_id: &str) -> Result<AccountId, PortError> {
        let url = format!("{}/{}", self.base_url, card_id);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                PortError::Timeout { op: "resolve_account" }
            } else {
                PortError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| PortError::Transport(e.to_string()))?;
        let result = decode_account(status, &body);
        debug!(card_id = %card_id, status = %status, ok = %result.is_ok(), "account_resolved");
        result
    }
}
