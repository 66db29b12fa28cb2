//! Device event filter
//!
//! Decodes EdgeX-style device events from the ingestion pipeline and forwards
//! only card-reader and inference-device events to the orchestrator. Events
//! from other devices are dropped silently; malformed events are dropped with
//! a warning and never reach the state machine.
//!
//! Accepted payload shapes:
//! - message bus envelope: `{"payload": "<base64 event JSON>", ...}`
//! - add-event request: `{"apiVersion": "v3", "event": {...}}`
//! - bare event: `{"deviceName": "...", "readings": [...]}`

use crate::domain::types::SkuDelta;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::events::OrchestratorEvent;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_name: String,
    #[serde(default)]
    pub readings: Vec<Reading>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(default)]
    pub resource_name: String,
    #[serde(default)]
    pub value: String,
}

/// Why a payload was discarded as malformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    Undecodable(String),
    NoReadings,
    EmptyCardId,
    BadDeltas(String),
}

impl std::fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedEvent::Undecodable(e) => write!(f, "undecodable payload: {e}"),
            MalformedEvent::NoReadings => f.write_str("event has no readings"),
            MalformedEvent::EmptyCardId => f.write_str("card reading is empty"),
            MalformedEvent::BadDeltas(e) => write!(f, "inference deltas unparseable: {e}"),
        }
    }
}

/// Decode a raw ingestion payload into a device event
pub fn decode_device_event(payload: &[u8]) -> Result<DeviceEvent, MalformedEvent> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| MalformedEvent::Undecodable(e.to_string()))?;

    // Message bus envelope carries the event base64-encoded
    let value = match value.get("payload").and_then(|p| p.as_str()) {
        Some(encoded) => {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| MalformedEvent::Undecodable(e.to_string()))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| MalformedEvent::Undecodable(e.to_string()))?
        }
        None => value,
    };

    let event = match value.get("event") {
        Some(inner) => inner.clone(),
        None => value,
    };

    serde_json::from_value(event).map_err(|e| MalformedEvent::Undecodable(e.to_string()))
}

/// Filters ingestion traffic down to orchestrator events
pub struct EventFilter {
    card_reader_device: String,
    inference_device: String,
    metrics: Arc<Metrics>,
}

impl EventFilter {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            card_reader_device: config.card_reader_device().to_string(),
            inference_device: config.inference_device().to_string(),
            metrics,
        }
    }

    /// Decode and filter one payload
    pub fn accept(&self, payload: &[u8]) -> Option<OrchestratorEvent> {
        let event = match decode_device_event(payload) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_event_malformed();
                warn!(error = %e, "device_event_malformed");
                return None;
            }
        };
        self.metrics.record_event_received();
        self.filter(&event)
    }

    /// Map a decoded device event to an orchestrator event
    pub fn filter(&self, event: &DeviceEvent) -> Option<OrchestratorEvent> {
        let result = if event.device_name == self.card_reader_device {
            Self::card_swipe(event)
        } else if event.device_name == self.inference_device {
            Self::inference(event)
        } else {
            trace!(device = %event.device_name, "device_event_ignored");
            return None;
        };

        match result {
            Ok(forwarded) => {
                self.metrics.record_event_forwarded();
                Some(forwarded)
            }
            Err(e) => {
                self.metrics.record_event_malformed();
                warn!(device = %event.device_name, error = %e, "device_event_malformed");
                None
            }
        }
    }

    fn card_swipe(event: &DeviceEvent) -> Result<OrchestratorEvent, MalformedEvent> {
        let reading = event.readings.first().ok_or(MalformedEvent::NoReadings)?;
        let card_id = reading.value.trim();
        if card_id.is_empty() {
            return Err(MalformedEvent::EmptyCardId);
        }
        Ok(OrchestratorEvent::CardSwipe { card_id: card_id.to_string() })
    }

    fn inference(event: &DeviceEvent) -> Result<OrchestratorEvent, MalformedEvent> {
        let reading = event.readings.first().ok_or(MalformedEvent::NoReadings)?;
        let deltas: Vec<SkuDelta> = serde_json::from_str(&reading.value)
            .map_err(|e| MalformedEvent::BadDeltas(e.to_string()))?;
        Ok(OrchestratorEvent::Inference { deltas })
    }
}
