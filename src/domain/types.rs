//! Shared types for the vending orchestrator

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger account ID, keeping the JSON type the authentication service used
///
/// The ledger decodes `accountId` strictly: a numeric account must go out as
/// a JSON number and a textual one as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Numeric(i64),
    Text(String),
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        AccountId::Numeric(id)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId::Text(id.to_string())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountId::Numeric(id) => write!(f, "{id}"),
            AccountId::Text(id) => f.write_str(id),
        }
    }
}

/// Signed quantity change for one SKU (negative = item removed from the cabinet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuDelta {
    #[serde(rename = "SKU", alias = "sku")]
    pub sku: String,
    pub delta: i32,
}

impl SkuDelta {
    pub fn new(sku: impl Into<String>, delta: i32) -> Self {
        Self { sku: sku.into(), delta }
    }
}

/// Request body submitted to the ledger collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRequest {
    pub account_id: AccountId,
    #[serde(rename = "deltaSKUs")]
    pub delta_skus: Vec<SkuDelta>,
}

/// One priced line of a ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(rename = "SKU", alias = "sku")]
    pub sku: String,
    pub product_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub item_price: Decimal,
    pub item_count: u32,
}

impl LineItem {
    /// Unit price times quantity; `None` if the product overflows
    pub fn line_total(&self) -> Option<Decimal> {
        self.item_price.checked_mul(Decimal::from(self.item_count))
    }
}

/// Itemized transaction returned by the ledger collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    #[serde(rename = "transactionID")]
    pub transaction_id: i64,
    #[serde(default)]
    pub tx_time_stamp: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub line_total: Decimal,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

/// Controller board status as reported by the board-status collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardStatus {
    #[serde(default)]
    pub lock1_status: i32,
    #[serde(default)]
    pub lock2_status: i32,
    pub door_closed: bool,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub humidity: f64,
    #[serde(default)]
    pub min_temperature_status: bool,
    #[serde(default)]
    pub max_temperature_status: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ledger_request_wire_format() {
        let request = LedgerRequest {
            account_id: AccountId::from("A1"),
            delta_skus: vec![SkuDelta::new("4900002470", -1)],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "accountId": "A1",
                "deltaSKUs": [{ "SKU": "4900002470", "delta": -1 }]
            })
        );
    }

    #[test]
    fn test_account_id_keeps_json_type() {
        assert_eq!(serde_json::to_value(AccountId::Numeric(2)).unwrap(), serde_json::json!(2));
        assert_eq!(serde_json::to_value(AccountId::from("A1")).unwrap(), serde_json::json!("A1"));
        let parsed: AccountId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, AccountId::Numeric(7));
        assert_eq!(parsed.to_string(), "7");
    }

    #[test]
    fn test_line_total_overflow_is_none() {
        let item = LineItem {
            sku: "4900002470".to_string(),
            product_name: "Water".to_string(),
            item_price: Decimal::MAX,
            item_count: 2,
        };
        assert_eq!(item.line_total(), None);
    }

    #[test]
    fn test_sku_delta_accepts_lowercase_key() {
        let delta: SkuDelta = serde_json::from_str(r#"{"sku":"123","delta":2}"#).unwrap();
        assert_eq!(delta, SkuDelta::new("123", 2));
    }

    #[test]
    fn test_ledger_transaction_from_collaborator_json() {
        let json = r#"{
            "transactionID": 1591810592463727000,
            "txTimeStamp": 1591810592463727000,
            "lineTotal": 3.98,
            "createdAt": 1591810592463727000,
            "updatedAt": 1591810592463727000,
            "isPaid": false,
            "lineItems": [
                {"SKU": "4900002470", "productName": "Sprite (Lemon-Lime) - 16.9 oz", "itemPrice": 1.99, "itemCount": 2}
            ]
        }"#;
        let tx: LedgerTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.line_total, dec!(3.98));
        assert_eq!(tx.line_items.len(), 1);
        assert_eq!(tx.line_items[0].line_total(), Some(dec!(3.98)));
    }

    #[test]
    fn test_board_status_defaults() {
        let status: BoardStatus = serde_json::from_str(r#"{"door_closed":false}"#).unwrap();
        assert!(!status.door_closed);
        assert_eq!(status.lock1_status, 0);
    }
}
