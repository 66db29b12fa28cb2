//! MQTT client for receiving device events from the ingestion pipeline

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::event_filter::EventFilter;
use crate::services::events::OrchestratorEvent;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Outcome of handing one event to the orchestrator queue
#[derive(Debug, PartialEq, Eq)]
enum Forward {
    Sent,
    Dropped,
    Closed,
}

/// Enqueue without blocking the eventloop; a full queue drops the event
fn forward(event_tx: &mpsc::Sender<OrchestratorEvent>, event: OrchestratorEvent) -> Forward {
    match event_tx.try_send(event) {
        Ok(()) => Forward::Sent,
        Err(TrySendError::Full(_)) => Forward::Dropped,
        Err(TrySendError::Closed(_)) => Forward::Closed,
    }
}

/// Start the MQTT client and forward filtered events to the orchestrator queue
///
/// Dropped events are counted in metrics; the warning is rate-limited to one
/// per second. The topic is (re)subscribed on every ConnAck so a broker
/// restart does not silently stop ingestion.
pub async fn start_mqtt_client(
    config: &Config,
    filter: EventFilter,
    event_tx: mpsc::Sender<OrchestratorEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), rumqttc::ClientError> {
    let client_id = format!("vending-orchestrator-{}", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let topic = config.mqtt_topic().to_string();
    let mut last_drop_warn: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    client.disconnect().await.ok();
                    return Ok(());
                }
            }
            result = eventloop.poll() => match result {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    client.subscribe(topic.as_str(), QoS::AtLeastOnce).await?;
                    info!(
                        topic = %topic,
                        host = %config.mqtt_host(),
                        port = %config.mqtt_port(),
                        "mqtt_subscribed"
                    );
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(event) = filter.accept(&publish.payload) else {
                        continue;
                    };
                    let kind = event.kind();
                    match forward(&event_tx, event) {
                        Forward::Sent => {
                            debug!(topic = %publish.topic, event = %kind, "device_event_queued");
                        }
                        Forward::Dropped => {
                            metrics.record_event_dropped();
                            if last_drop_warn.map_or(true, |t| t.elapsed() > Duration::from_secs(1)) {
                                warn!(event = %kind, "device_event_dropped_queue_full");
                                last_drop_warn = Some(Instant::now());
                            }
                        }
                        Forward::Closed => {
                            warn!("orchestrator_queue_closed");
                            return Ok(());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "mqtt_connection_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
