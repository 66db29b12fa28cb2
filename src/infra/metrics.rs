//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics updated from the orchestrator loop, the
//! ingestion task and the HTTP API. Reporting reads a consistent-enough
//! snapshot; only the port latency histogram is reset per report.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are
//! statistical counters only and must not drive any orchestration logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Which session wait expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    DoorOpen,
    Inference,
    DoorClose,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Device events decoded from ingestion (monotonic)
    events_received: AtomicU64,
    /// Events forwarded to the orchestrator after filtering
    events_forwarded: AtomicU64,
    /// Events dropped because the queue was full
    events_dropped: AtomicU64,
    /// Malformed device events discarded by the filter
    events_malformed: AtomicU64,
    /// Events processed by the orchestrator loop
    events_processed: AtomicU64,
    /// Events ignored because the state did not accept them
    events_rejected: AtomicU64,
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_aborted: AtomicU64,
    swipes_rejected: AtomicU64,
    door_open_timeouts: AtomicU64,
    inference_timeouts: AtomicU64,
    door_close_timeouts: AtomicU64,
    /// Door opened with no active session
    forced_entry_faults: AtomicU64,
    command_failures: AtomicU64,
    ledger_failures: AtomicU64,
    /// Port call latency histogram buckets (reset on report)
    port_latency_buckets: [AtomicU64; NUM_BUCKETS],
    port_latency_sum_ms: AtomicU64,
    port_latency_max_ms: AtomicU64,
    port_calls_since_report: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_forwarded: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_malformed: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_aborted: AtomicU64::new(0),
            swipes_rejected: AtomicU64::new(0),
            door_open_timeouts: AtomicU64::new(0),
            inference_timeouts: AtomicU64::new(0),
            door_close_timeouts: AtomicU64::new(0),
            forced_entry_faults: AtomicU64::new(0),
            command_failures: AtomicU64::new(0),
            ledger_failures: AtomicU64::new(0),
            port_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            port_latency_sum_ms: AtomicU64::new(0),
            port_latency_max_ms: AtomicU64::new(0),
            port_calls_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_forwarded(&self) {
        self.events_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swipe_rejected(&self) {
        self.swipes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self, kind: TimeoutKind) {
        let counter = match kind {
            TimeoutKind::DoorOpen => &self.door_open_timeouts,
            TimeoutKind::Inference => &self.inference_timeouts,
            TimeoutKind::DoorClose => &self.door_close_timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_entry(&self) {
        self.forced_entry_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ledger_failure(&self) {
        self.ledger_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the latency of one port call (lock, unlock, ledger, auth, status)
    #[inline]
    pub fn record_port_latency(&self, latency_ms: u64) {
        self.port_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.port_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.port_calls_since_report.fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.port_latency_max_ms, latency_ms);
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.load(Ordering::Relaxed)
    }

    pub fn sessions_aborted(&self) -> u64 {
        self.sessions_aborted.load(Ordering::Relaxed)
    }

    pub fn swipes_rejected(&self) -> u64 {
        self.swipes_rejected.load(Ordering::Relaxed)
    }

    /// Take a snapshot; resets the per-report port latency histogram
    pub fn report(&self) -> MetricsSummary {
        let port_calls = self.port_calls_since_report.swap(0, Ordering::Relaxed);
        let port_latency_sum = self.port_latency_sum_ms.swap(0, Ordering::Relaxed);
        let port_latency_max_ms = self.port_latency_max_ms.swap(0, Ordering::Relaxed);
        let port_lat_buckets = swap_buckets(&self.port_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_processed = self.events_processed.load(Ordering::Relaxed);
        let port_latency_avg_ms = if port_calls > 0 { port_latency_sum / port_calls } else { 0 };

        MetricsSummary {
            interval_secs: elapsed.as_secs_f64(),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            events_processed,
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            sessions_started: self.sessions_started(),
            sessions_completed: self.sessions_completed(),
            sessions_aborted: self.sessions_aborted(),
            swipes_rejected: self.swipes_rejected(),
            door_open_timeouts: self.door_open_timeouts.load(Ordering::Relaxed),
            inference_timeouts: self.inference_timeouts.load(Ordering::Relaxed),
            door_close_timeouts: self.door_close_timeouts.load(Ordering::Relaxed),
            forced_entry_faults: self.forced_entry_faults.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            ledger_failures: self.ledger_failures.load(Ordering::Relaxed),
            port_calls,
            port_lat_buckets,
            port_latency_avg_ms,
            port_latency_max_ms,
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub interval_secs: f64,
    pub events_received: u64,
    pub events_forwarded: u64,
    pub events_dropped: u64,
    pub events_malformed: u64,
    pub events_processed: u64,
    pub events_rejected: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub swipes_rejected: u64,
    pub door_open_timeouts: u64,
    pub inference_timeouts: u64,
    pub door_close_timeouts: u64,
    pub forced_entry_faults: u64,
    pub command_failures: u64,
    pub ledger_failures: u64,
    /// Port calls in this interval
    pub port_calls: u64,
    /// Port latency histogram buckets
    /// Bounds: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000 ms
    pub port_lat_buckets: [u64; NUM_BUCKETS],
    pub port_latency_avg_ms: u64,
    pub port_latency_max_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_processed = %self.events_processed,
            events_rejected = %self.events_rejected,
            events_dropped = %self.events_dropped,
            sessions_started = %self.sessions_started,
            sessions_completed = %self.sessions_completed,
            sessions_aborted = %self.sessions_aborted,
            timeouts_door_open = %self.door_open_timeouts,
            timeouts_inference = %self.inference_timeouts,
            timeouts_door_close = %self.door_close_timeouts,
            port_calls = %self.port_calls,
            port_avg_ms = %self.port_latency_avg_ms,
            port_max_ms = %self.port_latency_max_ms,
            "metrics"
        );
    }
}
