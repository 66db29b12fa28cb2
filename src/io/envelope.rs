//! Response envelope shared by the ledger and authentication collaborators
//!
//! `{"content": ..., "contentType": "json"|"string", "statusCode": 200, "error": false}`
//!
//! `content` is usually a string, holding either a JSON document or a plain
//! reason message. Some deployments inline the document as an object.

use crate::services::ports::PortError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub error: bool,
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self, PortError> {
        serde_json::from_slice(body).map_err(|e| PortError::InvalidResponse(e.to_string()))
    }

    /// Content as a reason string (error responses)
    pub fn reason(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Decode the content document
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PortError> {
        let result = match &self.content {
            serde_json::Value::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        };
        result.map_err(|e| PortError::InvalidResponse(e.to_string()))
    }
}
