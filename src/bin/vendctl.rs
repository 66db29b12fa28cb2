//! Vending bench controller
//!
//! Drives a running orchestrator without hardware: publishes simulated
//! card-reader and inference events over MQTT and pushes board status,
//! maintenance toggles and resets to the HTTP API.
//!
//! Usage:
//!   cargo run --bin vendctl -- swipe 0003293374
//!   cargo run --bin vendctl -- door open
//!   cargo run --bin vendctl -- inference 4900002470:-1 4900002500:-2
//!   cargo run --bin vendctl -- door closed
//!   cargo run --bin vendctl -- scenario --card 0003293374 --sku 4900002470:-1

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vendctl")]
#[command(about = "Vending bench controller - simulated devices and API calls")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,

    /// Topic prefix; the device name is appended
    #[arg(long, default_value = "edgex/events/device/vendctl")]
    topic_prefix: String,

    /// Orchestrator HTTP API base URL
    #[arg(long, default_value = "http://localhost:48099")]
    api: String,

    /// Card reader device name
    #[arg(long, default_value = "card-reader")]
    card_reader: String,

    /// Inference device name
    #[arg(long, default_value = "Inference-device")]
    inference_device: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Publish a card-reader read
    Swipe { card_id: String },
    /// Publish inference deltas as SKU:delta pairs
    Inference { deltas: Vec<String> },
    /// Push a board status with the door open or closed
    Door { position: DoorPosition },
    /// Toggle maintenance mode
    Maintenance { mode: Toggle },
    /// Abort any session and re-lock
    Reset,
    /// Print the orchestrator status snapshot
    Status,
    /// Run a full swipe, open, inference, close sequence
    Scenario {
        #[arg(long, default_value = "0003293374")]
        card: String,
        #[arg(long = "sku", default_value = "4900002470:-1")]
        deltas: Vec<String>,
        /// Pause between steps in milliseconds
        #[arg(long, default_value_t = 500)]
        step_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DoorPosition {
    Open,
    Closed,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

// ============================================================================
// Event payloads
// ============================================================================

fn epoch_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

/// Build an EdgeX v3 event with a single string reading
fn device_event(device: &str, resource: &str, value: &str) -> serde_json::Value {
    let origin = epoch_ns();
    json!({
        "apiVersion": "v3",
        "id": Uuid::now_v7().to_string(),
        "deviceName": device,
        "profileName": device,
        "sourceName": resource,
        "origin": origin,
        "readings": [{
            "id": Uuid::now_v7().to_string(),
            "origin": origin,
            "deviceName": device,
            "resourceName": resource,
            "profileName": device,
            "valueType": "String",
            "value": value,
        }]
    })
}

/// Parse `SKU:delta` pairs into the inference reading value
fn deltas_value(pairs: &[String]) -> anyhow::Result<String> {
    let mut deltas = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let Some((sku, delta)) = pair.rsplit_once(':') else {
            bail!("expected SKU:delta, got {pair}");
        };
        let delta: i32 = delta.parse().with_context(|| format!("bad delta in {pair}"))?;
        deltas.push(json!({ "SKU": sku, "delta": delta }));
    }
    Ok(serde_json::Value::Array(deltas).to_string())
}

// ============================================================================
// Transports
// ============================================================================

async fn publish(args: &Args, device: &str, event: serde_json::Value) -> anyhow::Result<()> {
    let client_id = format!("vendctl-{}", Uuid::now_v7().simple());
    let mut options = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    options.set_keep_alive(Duration::from_secs(5));

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let topic = format!("{}/{}", args.topic_prefix, device);
    client.publish(&topic, QoS::AtLeastOnce, false, event.to_string()).await?;

    let acked = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .context("timed out waiting for publish ack")?;
    acked.context("MQTT connection failed")?;

    client.disconnect().await.ok();
    println!("published {device} event to {topic}");
    Ok(())
}

async fn post(args: &Args, path: &str, body: serde_json::Value) -> anyhow::Result<()> {
    let url = format!("{}{}", args.api.trim_end_matches('/'), path);
    let response = reqwest::Client::new().post(&url).json(&body).send().await?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    println!("POST {path} -> {} {text}", status.as_u16());
    if !status.is_success() {
        bail!("request failed with {status}");
    }
    Ok(())
}

async fn door(args: &Args, position: DoorPosition) -> anyhow::Result<()> {
    let door_closed = matches!(position, DoorPosition::Closed);
    let body = json!({
        "lock1_status": 1,
        "lock2_status": 1,
        "door_closed": door_closed,
        "temperature": 4.0,
        "humidity": 40.0,
        "min_temperature_status": false,
        "max_temperature_status": false,
    });
    post(args, "/boardStatus", body).await
}

async fn swipe(args: &Args, card_id: &str) -> anyhow::Result<()> {
    let event = device_event(&args.card_reader, "card-reader-event", card_id);
    publish(args, &args.card_reader, event).await
}

async fn inference(args: &Args, deltas: &[String]) -> anyhow::Result<()> {
    let event = device_event(&args.inference_device, "inferenceSkuDelta", &deltas_value(deltas)?);
    publish(args, &args.inference_device, event).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.command {
        Cmd::Swipe { card_id } => swipe(&args, card_id).await,
        Cmd::Inference { deltas } => inference(&args, deltas).await,
        Cmd::Door { position } => door(&args, *position).await,
        Cmd::Maintenance { mode } => {
            let enabled = matches!(mode, Toggle::On);
            post(&args, "/maintenanceMode", json!({ "maintenanceMode": enabled })).await
        }
        Cmd::Reset => post(&args, "/resetDoorLock", json!({})).await,
        Cmd::Status => {
            let url = format!("{}/status", args.api.trim_end_matches('/'));
            let body = reqwest::get(&url).await?.text().await?;
            println!("{body}");
            Ok(())
        }
        Cmd::Scenario { card, deltas, step_ms } => {
            let pause = Duration::from_millis(*step_ms);
            swipe(&args, card).await?;
            tokio::time::sleep(pause).await;
            door(&args, DoorPosition::Open).await?;
            tokio::time::sleep(pause).await;
            inference(&args, deltas).await?;
            tokio::time::sleep(pause).await;
            door(&args, DoorPosition::Closed).await
        }
    }
}
