//! Status and control HTTP API
//!
//! Routes:
//! - `GET /status` - orchestrator snapshot
//! - `GET|POST /maintenanceMode` - query or toggle maintenance lockout
//! - `POST /boardStatus` - controller board push (door sensor)
//! - `GET /boardStatus` - board status via the command port
//! - `POST /resetDoorLock` - abort any session and re-lock
//! - `GET /metrics` - Prometheus text format
//!
//! Reads come from the watch snapshot; everything that changes state is
//! enqueued on the orchestrator queue. Uses hyper for the HTTP server.

use crate::domain::session::StatusSnapshot;
use crate::domain::types::BoardStatus;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::events::OrchestratorEvent;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

/// Shared state for request handlers
pub struct ApiState {
    pub event_tx: mpsc::Sender<OrchestratorEvent>,
    pub status_rx: watch::Receiver<StatusSnapshot>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceBody {
    maintenance_mode: bool,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(
    metrics: &Metrics,
    snapshot: &StatusSnapshot,
    site_id: &str,
) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_event_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);
    write_fault_metrics(&mut output, site_id, &summary);
    write_histogram(
        &mut output,
        "vending_port_latency_ms",
        "Command, ledger and auth port call latency in milliseconds",
        site_id,
        &summary.port_lat_buckets,
        summary.port_latency_avg_ms,
    );

    write_metric(
        &mut output,
        "vending_door_closed",
        "Known door position (1=closed, 0=open)",
        MetricType::Gauge,
        site_id,
        u64::from(snapshot.door_closed),
    );
    write_metric(
        &mut output,
        "vending_maintenance_mode",
        "Maintenance lockout active (1=yes)",
        MetricType::Gauge,
        site_id,
        u64::from(snapshot.maintenance_mode),
    );
    write_metric(
        &mut output,
        "vending_session_active",
        "Transaction session in progress (1=yes)",
        MetricType::Gauge,
        site_id,
        u64::from(snapshot.session_id.is_some()),
    );

    output
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let counters = [
        ("vending_events_received_total", "Device events decoded from ingestion", summary.events_received),
        ("vending_events_forwarded_total", "Device events forwarded after filtering", summary.events_forwarded),
        ("vending_events_dropped_total", "Device events dropped due to full queue", summary.events_dropped),
        ("vending_events_malformed_total", "Malformed device events discarded", summary.events_malformed),
        ("vending_events_processed_total", "Events processed by the orchestrator", summary.events_processed),
        ("vending_events_rejected_total", "Events not accepted in the current state", summary.events_rejected),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, site, val);
    }
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let counters = [
        ("vending_sessions_started_total", "Transaction sessions started", summary.sessions_started),
        ("vending_sessions_completed_total", "Sessions recorded in the ledger", summary.sessions_completed),
        ("vending_sessions_aborted_total", "Sessions aborted or abandoned", summary.sessions_aborted),
        ("vending_swipes_rejected_total", "Card swipes rejected", summary.swipes_rejected),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, site, val);
    }
}

fn write_fault_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let counters = [
        ("vending_door_open_timeouts_total", "Door never opened after unlock", summary.door_open_timeouts),
        ("vending_inference_timeouts_total", "Inference data never arrived", summary.inference_timeouts),
        ("vending_door_close_timeouts_total", "Door never closed (stuck door)", summary.door_close_timeouts),
        ("vending_forced_entry_total", "Door opened with no active session", summary.forced_entry_faults),
        ("vending_command_failures_total", "Lock/unlock command failures", summary.command_failures),
        ("vending_ledger_failures_total", "Ledger submission failures", summary.ledger_failures),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, site, val);
    }
}

fn response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "ok": false, "error": message }))
}

fn ok_response() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &serde_json::json!({ "ok": true }))
}

/// Enqueue an event, mapping a closed queue to 503
async fn enqueue(state: &ApiState, event: OrchestratorEvent) -> Response<Full<Bytes>> {
    let kind = event.kind();
    match state.event_tx.send(event).await {
        Ok(()) => {
            info!(event = %kind, "api_event_enqueued");
            ok_response()
        }
        Err(_) => {
            warn!(event = %kind, "api_queue_closed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "orchestrator_unavailable")
        }
    }
}

/// Route one request; split from the hyper service for testing
pub async fn route(method: &Method, path: &str, body: Bytes, state: &ApiState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/status") => {
            let snapshot = state.status_rx.borrow().clone();
            json_response(StatusCode::OK, &snapshot)
        }
        (&Method::GET, "/maintenanceMode") => {
            let maintenance_mode = state.status_rx.borrow().maintenance_mode;
            json_response(StatusCode::OK, &MaintenanceBody { maintenance_mode })
        }
        (&Method::POST, "/maintenanceMode") => match serde_json::from_slice::<MaintenanceBody>(&body) {
            Ok(req) => enqueue(state, OrchestratorEvent::SetMaintenance(req.maintenance_mode)).await,
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        },
        (&Method::POST, "/boardStatus") => match serde_json::from_slice::<BoardStatus>(&body) {
            Ok(status) => enqueue(state, OrchestratorEvent::BoardStatusReport(status)).await,
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        },
        (&Method::GET, "/boardStatus") => {
            let (reply, rx) = oneshot::channel();
            if state.event_tx.send(OrchestratorEvent::QueryBoardStatus { reply }).await.is_err() {
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "orchestrator_unavailable");
            }
            match rx.await {
                Ok(Ok(status)) => json_response(StatusCode::OK, &status),
                Ok(Err(e)) => error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
                Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "orchestrator_unavailable"),
            }
        }
        (&Method::POST, "/resetDoorLock") => enqueue(state, OrchestratorEvent::ResetDoorLock).await,
        (&Method::GET, "/metrics") => {
            let snapshot = state.status_rx.borrow().clone();
            let body = format_prometheus_metrics(&state.metrics, &snapshot, &state.site_id);
            response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/health") => response(StatusCode::OK, "text/plain", "ok"),
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string())),
    };
    Ok(route(&method, &path, body, &state).await)
}

/// Start the status and control HTTP server
pub async fn start_http_api(
    bind_address: &str,
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, site = %state.site_id, "http_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_api_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
