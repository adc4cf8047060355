//! Fire-and-forget result reporting.
//!
//! The engine emits [`SinkEvent`]s through a [`ResultSink`]; the channel
//! implementation never blocks the caller and drops events when full.
//! [`spawn_forwarder`] drains the channel to the log and, optionally, to an
//! HTTP endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::execution::{ExecutionAttempt, ExecutionReport, Outcome};
use crate::graph::GraphSnapshot;
use crate::metrics;
use crate::pathfinder::{Path, PathSummary};

/// Attempt as reported externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptSummary {
    /// Attempt number.
    pub number: u32,
    /// Final state.
    pub state: String,
    /// Priority fee in wei.
    pub priority_fee_wei: String,
    /// Target block window.
    pub target_blocks: Option<(u64, u64)>,
    /// Relay bundle hash.
    pub bundle_hash: Option<String>,
    /// Failure reason.
    pub failure: Option<String>,
}

impl From<&ExecutionAttempt> for AttemptSummary {
    fn from(attempt: &ExecutionAttempt) -> Self {
        Self {
            number: attempt.number,
            state: attempt.state.to_string(),
            priority_fee_wei: attempt.params.max_priority_fee_per_gas.to_string(),
            target_blocks: attempt.target_blocks,
            bundle_hash: attempt.receipt.as_ref().map(|r| r.bundle_hash.clone()),
            failure: attempt.failure.clone(),
        }
    }
}

/// Structured event for external collaborators. Amounts are decimal strings
/// of raw base-token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    /// A profitable cycle was found.
    OpportunityFound {
        /// Base token symbol.
        base: String,
        /// Path details.
        path: PathSummary,
        /// Projected net profit.
        projected_profit: String,
        /// Snapshot the path was found on.
        snapshot_version: u64,
        /// Discovery time.
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    /// A bundle reached its final outcome.
    ExecutionResult {
        /// Bundle id.
        bundle_id: String,
        /// Base token symbol.
        base: String,
        /// Outcome label.
        outcome: String,
        /// Rejection reason, if rejected.
        reason: Option<String>,
        /// Every attempt.
        attempts: Vec<AttemptSummary>,
        /// Builder projection.
        projected_profit: String,
        /// Simulated net profit.
        simulated_profit: Option<String>,
        /// Realized net profit.
        actual_profit: Option<String>,
        /// Gas consumed.
        gas_used: Option<u64>,
        /// Gas paid in base-token units.
        gas_cost: Option<String>,
        /// Block included in.
        included_block: Option<u64>,
        /// End-to-end latency.
        latency_ms: u64,
        /// Report time.
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

impl SinkEvent {
    /// Event for a discovered path.
    pub fn opportunity(snapshot: &GraphSnapshot, path: &Path, now: OffsetDateTime) -> Self {
        Self::OpportunityFound {
            base: symbol(snapshot, path.base),
            path: path.summary(snapshot),
            projected_profit: path.net_profit.to_string(),
            snapshot_version: path.snapshot_version,
            timestamp: now,
        }
    }

    /// Event for a finished execution.
    pub fn execution(snapshot: &GraphSnapshot, report: &ExecutionReport, now: OffsetDateTime) -> Self {
        let reason = match &report.outcome {
            Outcome::Rejected(reason) => Some(reason.to_string()),
            _ => None,
        };
        Self::ExecutionResult {
            bundle_id: format!("{:#x}", report.bundle_id),
            base: symbol(snapshot, report.base),
            outcome: report.outcome.label().to_string(),
            reason,
            attempts: report.attempts.iter().map(AttemptSummary::from).collect(),
            projected_profit: report.projected_profit.to_string(),
            simulated_profit: report.simulated_profit.map(|p| p.to_string()),
            actual_profit: report.actual_profit.map(|p| p.to_string()),
            gas_used: report.gas_used,
            gas_cost: report.gas_cost.map(|c| c.to_string()),
            included_block: report.included_block,
            latency_ms: report.latency.as_millis() as u64,
            timestamp: now,
        }
    }

    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpportunityFound { .. } => "opportunity_found",
            Self::ExecutionResult { .. } => "execution_result",
        }
    }
}

fn symbol(snapshot: &GraphSnapshot, token: crate::venue::TokenId) -> String {
    snapshot
        .token(token)
        .map(|t| t.symbol.clone())
        .unwrap_or_else(|| token.to_string())
}

/// Receiver of engine events. `emit` must not block.
pub trait ResultSink: Send + Sync {
    /// Hand an event to the sink.
    fn emit(&self, event: SinkEvent);
}

/// Sink backed by a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ResultSink for ChannelSink {
    fn emit(&self, event: SinkEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::inc_sink_dropped();
            debug!(error = %e, "Sink event dropped");
        }
    }
}

/// Drain `rx`, logging every event as JSON and POSTing it to `endpoint` when
/// set. Delivery failures are logged and skipped.
pub fn spawn_forwarder(
    mut rx: mpsc::Receiver<SinkEvent>,
    endpoint: Option<String>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Sink HTTP client unavailable, logging only");
                None
            }
        };

        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, event = event.name(), "Failed to encode sink event");
                    continue;
                }
            };
            info!(event = event.name(), payload = %payload, "Result event");

            if let (Some(url), Some(client)) = (&endpoint, &client) {
                let response = client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(payload)
                    .send()
                    .await;
                match response {
                    Ok(r) if r.status().is_success() => {}
                    Ok(r) => warn!(status = %r.status(), event = event.name(), "Sink endpoint refused event"),
                    Err(e) => warn!(error = %e, event = event.name(), "Sink delivery failed"),
                }
            }
        }
        debug!("Sink forwarder stopped");
    })
}
