//! Prometheus metrics for latency tracking and monitoring.
//!
//! This module provides metrics for:
//! - Venue refresh and RPC latency
//! - Path search effort and results
//! - Bundle construction outcomes
//! - Simulation, submission and execution outcomes

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::venue::ProtocolKind;

// === Metric Name Constants ===

/// JSON-RPC call latency metric name.
pub const METRIC_RPC_LATENCY: &str = "rpc_latency_ms";
/// Single venue fetch latency metric name.
pub const METRIC_VENUE_FETCH_LATENCY: &str = "venue_fetch_latency_ms";
/// Full graph refresh latency metric name.
pub const METRIC_GRAPH_REFRESH_LATENCY: &str = "graph_refresh_latency_ms";
/// Path search latency metric name.
pub const METRIC_PATH_SEARCH_LATENCY: &str = "path_search_latency_ms";
/// Discovery cycle (search + build) latency metric name.
pub const METRIC_DISCOVERY_LATENCY: &str = "discovery_latency_ms";
/// Bundle simulation latency metric name.
pub const METRIC_SIMULATION_LATENCY: &str = "simulation_latency_ms";
/// End-to-end execution latency metric name.
pub const METRIC_EXECUTION_LATENCY: &str = "execution_latency_ms";
/// Venue refresh failures counter metric name.
pub const METRIC_VENUE_REFRESH_FAILURES: &str = "venue_refresh_failures_total";
/// Degraded venues gauge metric name.
pub const METRIC_DEGRADED_VENUES: &str = "degraded_venues";
/// Latest block gauge metric name.
pub const METRIC_BLOCK_HEIGHT: &str = "block_height";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Path search expansions counter metric name.
pub const METRIC_PATH_EXPANSIONS: &str = "path_expansions_total";
/// Paths found counter metric name.
pub const METRIC_PATHS_FOUND: &str = "paths_found_total";
/// Discovery cycles cancelled counter metric name.
pub const METRIC_DISCOVERY_CANCELLED: &str = "discovery_cancelled_total";
/// Bundles built counter metric name.
pub const METRIC_BUNDLES_BUILT: &str = "bundles_built_total";
/// Bundles rejected by the builder counter metric name.
pub const METRIC_BUNDLES_REJECTED: &str = "bundles_rejected_total";
/// Bundles submitted counter metric name.
pub const METRIC_BUNDLES_SUBMITTED: &str = "bundles_submitted_total";
/// Execution outcomes counter metric name.
pub const METRIC_EXECUTION_OUTCOMES: &str = "execution_outcomes_total";
/// Executions skipped for lack of a permit counter metric name.
pub const METRIC_EXECUTIONS_SKIPPED: &str = "executions_skipped_total";
/// Sink events dropped counter metric name.
pub const METRIC_SINK_DROPPED: &str = "sink_events_dropped_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(METRIC_RPC_LATENCY, "JSON-RPC call latency in milliseconds");
    describe_histogram!(
        METRIC_VENUE_FETCH_LATENCY,
        "Single venue state fetch latency in milliseconds"
    );
    describe_histogram!(
        METRIC_GRAPH_REFRESH_LATENCY,
        "Liquidity graph refresh latency in milliseconds"
    );
    describe_histogram!(METRIC_PATH_SEARCH_LATENCY, "Cycle search latency in milliseconds");
    describe_histogram!(
        METRIC_DISCOVERY_LATENCY,
        "Discovery cycle (search and bundle build) latency in milliseconds"
    );
    describe_histogram!(METRIC_SIMULATION_LATENCY, "Bundle simulation latency in milliseconds");
    describe_histogram!(
        METRIC_EXECUTION_LATENCY,
        "Bundle execution latency from simulation to final outcome in milliseconds"
    );

    // Gauges
    describe_gauge!(METRIC_DEGRADED_VENUES, "Venues currently excluded from search");
    describe_gauge!(METRIC_BLOCK_HEIGHT, "Latest block seen by the block watcher");

    // Counters
    describe_counter!(METRIC_VENUE_REFRESH_FAILURES, "Total number of failed venue refreshes");
    describe_counter!(METRIC_WS_RECONNECTS, "Total number of WebSocket reconnections");
    describe_counter!(METRIC_PATH_EXPANSIONS, "Total number of partial paths expanded");
    describe_counter!(METRIC_PATHS_FOUND, "Total number of profitable cycles found");
    describe_counter!(
        METRIC_DISCOVERY_CANCELLED,
        "Total number of discovery cycles abandoned for a newer snapshot"
    );
    describe_counter!(METRIC_BUNDLES_BUILT, "Total number of bundles built");
    describe_counter!(METRIC_BUNDLES_REJECTED, "Total number of candidate paths rejected by the builder");
    describe_counter!(METRIC_BUNDLES_SUBMITTED, "Total number of bundle submissions to the relay");
    describe_counter!(METRIC_EXECUTION_OUTCOMES, "Total number of executions by outcome");
    describe_counter!(
        METRIC_EXECUTIONS_SKIPPED,
        "Total number of bundles skipped while the base token was busy"
    );
    describe_counter!(METRIC_SINK_DROPPED, "Total number of result events dropped");

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and return a handle for rendering.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Record JSON-RPC call latency.
pub fn record_rpc_latency(start: Instant, method: &str) {
    histogram!(METRIC_RPC_LATENCY, "method" => method.to_string()).record(elapsed_ms(start));
}

/// Record a single venue fetch latency.
pub fn record_venue_fetch_latency(start: Instant, kind: ProtocolKind) {
    histogram!(METRIC_VENUE_FETCH_LATENCY, "kind" => kind.to_string()).record(elapsed_ms(start));
}

/// Record graph refresh latency.
pub fn record_graph_refresh_latency(start: Instant) {
    histogram!(METRIC_GRAPH_REFRESH_LATENCY).record(elapsed_ms(start));
}

/// Record path search latency.
pub fn record_path_search_latency(start: Instant) {
    histogram!(METRIC_PATH_SEARCH_LATENCY).record(elapsed_ms(start));
}

/// Record simulation latency.
pub fn record_simulation_latency(start: Instant) {
    histogram!(METRIC_SIMULATION_LATENCY).record(elapsed_ms(start));
}

/// Record execution latency.
pub fn record_execution_latency(start: Instant) {
    histogram!(METRIC_EXECUTION_LATENCY).record(elapsed_ms(start));
}

/// Add failed venue refreshes.
pub fn add_venue_refresh_failures(count: u64) {
    counter!(METRIC_VENUE_REFRESH_FAILURES).increment(count);
}

/// Set the number of degraded venues.
pub fn set_degraded_venues(count: usize) {
    gauge!(METRIC_DEGRADED_VENUES).set(count as f64);
}

/// Set the latest block height.
pub fn set_block_height(block: u64) {
    gauge!(METRIC_BLOCK_HEIGHT).set(block as f64);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// Add path expansions.
pub fn add_path_expansions(count: u64) {
    counter!(METRIC_PATH_EXPANSIONS).increment(count);
}

/// Add paths found.
pub fn add_paths_found(count: u64) {
    counter!(METRIC_PATHS_FOUND).increment(count);
}

/// Increment cancelled discovery counter.
pub fn inc_discovery_cancelled() {
    counter!(METRIC_DISCOVERY_CANCELLED).increment(1);
}

/// Increment bundles built counter.
pub fn inc_bundles_built() {
    counter!(METRIC_BUNDLES_BUILT).increment(1);
}

/// Increment builder rejections, labelled by reason.
pub fn inc_bundles_rejected(reason: &'static str) {
    counter!(METRIC_BUNDLES_REJECTED, "reason" => reason).increment(1);
}

/// Increment bundles submitted counter.
pub fn inc_bundles_submitted() {
    counter!(METRIC_BUNDLES_SUBMITTED).increment(1);
}

/// Increment execution outcome counter.
pub fn inc_execution_outcome(outcome: &'static str) {
    counter!(METRIC_EXECUTION_OUTCOMES, "outcome" => outcome).increment(1);
}

/// Increment skipped executions counter.
pub fn inc_executions_skipped() {
    counter!(METRIC_EXECUTIONS_SKIPPED).increment(1);
}

/// Increment dropped sink events counter.
pub fn inc_sink_dropped() {
    counter!(METRIC_SINK_DROPPED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        elapsed_ms(self.start)
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(elapsed_ms(self.start));
    }
}

/// Create a latency timer for a discovery cycle.
pub fn timer_discovery() -> LatencyTimer {
    LatencyTimer::new(METRIC_DISCOVERY_LATENCY)
}
