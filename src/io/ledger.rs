//! Ledger collaborator client
//!
//! Posts the session's SKU deltas and decodes the priced transaction from the
//! response envelope. Error envelopes carry a reason string that is mapped
//! onto the typed `PortError` variants.

use crate::domain::types::{LedgerRequest, LedgerTransaction};
use crate::infra::config::Config;
use crate::io::envelope::Envelope;
use crate::services::ports::{LedgerPort, PortError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const ACCOUNT_NOT_FOUND: &str = "Account not found";
const SKU_NOT_FOUND_PREFIX: &str = "Could not find product Info for ";

/// Map a ledger failure reason onto a typed error
pub fn classify_failure(status: u16, reason: &str) -> PortError {
    let reason = reason.trim();
    if reason.starts_with(ACCOUNT_NOT_FOUND) {
        return PortError::AccountNotFound;
    }
    if let Some(rest) = reason.strip_prefix(SKU_NOT_FOUND_PREFIX) {
        let sku = rest.split_whitespace().next().unwrap_or_default();
        return PortError::SkuNotFound(sku.to_string());
    }
    if reason.starts_with("Failed to unmarshal") || reason.starts_with("Failed to parse") {
        return PortError::MalformedRequest(reason.to_string());
    }
    PortError::Rejected { status, reason: reason.to_string() }
}

/// Decode a ledger response body given its HTTP status
pub fn decode_response(status: u16, body: &[u8]) -> Result<LedgerTransaction, PortError> {
    let envelope = match Envelope::parse(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => return Err(e),
        Err(_) => {
            return Err(classify_failure(status, &String::from_utf8_lossy(body)));
        }
    };

    if envelope.error || !(200..300).contains(&status) {
        let status = if envelope.status_code > 0 { envelope.status_code } else { status };
        return Err(classify_failure(status, &envelope.reason()));
    }
    envelope.decode()
}

pub struct HttpLedgerPort {
    client: reqwest::Client,
    url: String,
}

impl HttpLedgerPort {
    pub fn new(config: &Config) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.ledger_timeout_ms()))
            .build()
            .map_err(|e| PortError::Transport(e.to_string()))?;
        Ok(Self { client, url: config.ledger_url().to_string() })
    }
}

#[async_trait]
impl LedgerPort for HttpLedgerPort {
    async fn submit_transaction(
        &self,
        request: &LedgerRequest,
    ) -> Result<LedgerTransaction, PortError> {
        let start = Instant::now();
        let response = self.client.post(&self.url).json(request).send().await.map_err(|e| {
            error!(account_id = %request.account_id, error = %e, "ledger_request_error");
            if e.is_timeout() {
                PortError::Timeout { op: "submit_transaction" }
            } else {
                PortError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| PortError::Transport(e.to_string()))?;
        debug!(
            account_id = %request.account_id,
            status = %status,
            latency_ms = %start.elapsed().as_millis(),
            "ledger_response"
        );
        decode_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_failure() {
        assert_eq!(classify_failure(400, "Account not found"), PortError::AccountNotFound);
        assert_eq!(
            classify_failure(
                400,
                "Could not find product Info for 4900002470 Could not hit inventoryEndpoint"
            ),
            PortError::SkuNotFound("4900002470".to_string())
        );
        assert!(matches!(
            classify_failure(400, "Failed to unmarshal request body"),
            PortError::MalformedRequest(_)
        ));
        assert_eq!(
            classify_failure(500, "Failed to update ledger"),
            PortError::Rejected { status: 500, reason: "Failed to update ledger".to_string() }
        );
    }

    #[test]
    fn test_decode_success_envelope() {
        let content = serde_json::json!({
            "transactionID": 1591978880389012000i64,
            "txTimeStamp": 1591978880389012000i64,
            "lineTotal": 1.99,
            "createdAt": 1591978880389012000i64,
            "updatedAt": 1591978880389012000i64,
            "isPaid": false,
            "lineItems": [{
                "SKU": "4900002470",
                "productName": "Sprite (Lemon-Lime) - 16.9 oz",
                "itemPrice": 1.99,
                "itemCount": 1
            }]
        })
        .to_string();
        let body = serde_json::json!({
            "content": content,
            "contentType": "json",
            "statusCode": 200,
            "error": false
        })
        .to_string();

        let tx = decode_response(200, body.as_bytes()).unwrap();
        assert_eq!(tx.line_total, dec!(1.99));
        assert_eq!(tx.line_items.len(), 1);
        assert_eq!(tx.line_items[0].line_total(), Some(dec!(1.99)));
    }

    #[test]
    fn test_decode_error_envelope() {
        let body = r#"{"content":"Account not found","contentType":"string","statusCode":400,"error":true}"#;
        assert_eq!(decode_response(400, body.as_bytes()), Err(PortError::AccountNotFound));
    }

    #[test]
    fn test_decode_non_envelope_failure() {
        assert_eq!(
            decode_response(502, b"Bad Gateway"),
            Err(PortError::Rejected { status: 502, reason: "Bad Gateway".to_string() })
        );
        assert!(matches!(decode_response(200, b"ok"), Err(PortError::InvalidResponse(_))));
    }
}
