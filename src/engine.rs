//! Discovery and execution control loop.
//!
//! Snapshot updates drive discovery. Each cycle searches every base token on
//! a blocking worker and builds at most one bundle per base; a newer
//! snapshot arriving mid-cycle cancels the stale work. Execution is
//! serialized per base token by a semaphore, and a busy base skips the
//! bundle rather than queueing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::bundle::{Bundle, BundleBuilder};
use crate::error::{BundleError, PathError};
use crate::execution::{ExecutionCoordinator, ExecutionReport, Outcome};
use crate::graph::{GraphSnapshot, LiquidityGraph, SnapshotUpdate};
use crate::metrics;
use crate::pathfinder::{BaseToken, PathFinder};
use crate::sink::{ResultSink, SinkEvent};
use crate::venue::TokenId;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Concurrent executions allowed per base token.
    pub max_inflight_per_base: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_base: 1,
        }
    }
}

/// Running totals for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Latest snapshot searched.
    pub snapshot_version: u64,
    /// Discovery cycles completed.
    pub cycles: u64,
    /// Discovery cycles abandoned for a newer snapshot.
    pub cancelled_cycles: u64,
    /// Profitable cycles found.
    pub opportunities: u64,
    /// Bundles built.
    pub bundles_built: u64,
    /// Candidates rejected by the builder.
    pub bundles_rejected: u64,
    /// Bundles skipped because the base token was busy.
    pub skipped_busy: u64,
    /// Executions finished.
    pub executions: u64,
    /// Executions included on-chain.
    pub included: u64,
    /// Executions rejected.
    pub rejected: u64,
    /// Executions abandoned after expiry.
    pub abandoned: u64,
    /// Executions stopped after simulation.
    pub dry_runs: u64,
    /// Outcome of the most recent execution.
    pub last_outcome: Option<String>,
}

impl EngineStats {
    fn record(&mut self, report: &ExecutionReport) {
        self.executions += 1;
        match report.outcome {
            Outcome::Included => self.included += 1,
            Outcome::Rejected(_) => self.rejected += 1,
            Outcome::Abandoned => self.abandoned += 1,
            Outcome::DryRun => self.dry_runs += 1,
        }
        self.last_outcome = Some(report.outcome.to_string());
    }
}

/// Result of one discovery cycle.
#[derive(Debug, Default)]
struct Discovery {
    cancelled: bool,
    opportunities: u64,
    rejected: u64,
    bundles: Vec<Bundle>,
}

/// Wires graph, finder, builder, coordinator and sink together.
pub struct Engine {
    graph: Arc<LiquidityGraph>,
    finder: PathFinder,
    builder: BundleBuilder,
    coordinator: Arc<ExecutionCoordinator>,
    sink: Arc<dyn ResultSink>,
    bases: Vec<BaseToken>,
    permits: HashMap<TokenId, Arc<Semaphore>>,
    stats: Arc<RwLock<EngineStats>>,
}

impl Engine {
    /// Create an engine for `bases`.
    pub fn new(
        graph: Arc<LiquidityGraph>,
        finder: PathFinder,
        builder: BundleBuilder,
        coordinator: Arc<ExecutionCoordinator>,
        sink: Arc<dyn ResultSink>,
        bases: Vec<BaseToken>,
        config: EngineConfig,
    ) -> Self {
        let permits = bases
            .iter()
            .map(|b| (b.token, Arc::new(Semaphore::new(config.max_inflight_per_base.max(1)))))
            .collect();
        Self {
            graph,
            finder,
            builder,
            coordinator,
            sink,
            bases,
            permits,
            stats: Arc::new(RwLock::new(EngineStats::default())),
        }
    }

    /// Shared statistics handle.
    pub fn stats(&self) -> Arc<RwLock<EngineStats>> {
        self.stats.clone()
    }

    /// Consume snapshot updates until the channel closes.
    pub async fn run(self: Arc<Self>, mut updates: mpsc::Receiver<SnapshotUpdate>) {
        let mut pending: Option<SnapshotUpdate> = None;
        let mut closed = false;
        let mut executions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            let first = match pending.take() {
                Some(update) => update,
                None if closed => break,
                None => match updates.recv().await {
                    Some(update) => update,
                    None => break,
                },
            };
            let latest = drain_latest(&mut updates, first);
            let snapshot = self.graph.snapshot();
            debug!(version = snapshot.version(), trigger = ?latest.trigger, "Discovery cycle");

            let cancel = Arc::new(AtomicBool::new(false));
            let mut work = tokio::task::spawn_blocking({
                let engine = self.clone();
                let snapshot = snapshot.clone();
                let cancel = cancel.clone();
                move || engine.discover(&snapshot, &cancel, OffsetDateTime::now_utc())
            });

            let joined = loop {
                tokio::select! {
                    joined = &mut work => break joined,
                    newer = updates.recv(), if !closed => match newer {
                        Some(update) if update.version > snapshot.version() => {
                            cancel.store(true, Ordering::Relaxed);
                            pending = Some(update);
                        }
                        // Same snapshot, already being searched.
                        Some(_) => {}
                        None => closed = true,
                    },
                }
            };

            let discovery = match joined {
                Ok(discovery) => discovery,
                Err(e) => {
                    error!(error = %e, "Discovery worker failed");
                    continue;
                }
            };

            {
                let mut stats = self.stats.write().await;
                stats.snapshot_version = snapshot.version();
                if discovery.cancelled {
                    stats.cancelled_cycles += 1;
                } else {
                    stats.cycles += 1;
                }
                stats.opportunities += discovery.opportunities;
                stats.bundles_rejected += discovery.rejected;
                stats.bundles_built += discovery.bundles.len() as u64;
            }
            if discovery.cancelled {
                metrics::inc_discovery_cancelled();
                debug!(version = snapshot.version(), "Discovery superseded by a newer snapshot");
                continue;
            }

            executions.retain(|h| !h.is_finished());
            for bundle in discovery.bundles {
                if let Some(handle) = self.clone().dispatch(bundle).await {
                    executions.push(handle);
                }
            }
        }

        for handle in executions {
            if let Err(e) = handle.await {
                error!(error = %e, "Execution task failed");
            }
        }
        info!("Engine stopped");
    }

    /// Search every base token and build one bundle per base from the best
    /// buildable candidate.
    #[instrument(skip_all, fields(version = snapshot.version()))]
    fn discover(&self, snapshot: &GraphSnapshot, cancel: &AtomicBool, now: OffsetDateTime) -> Discovery {
        let _timer = metrics::timer_discovery();
        let mut discovery = Discovery::default();

        for base in &self.bases {
            let paths = match self.finder.find_cancellable(snapshot, base, now, cancel) {
                Ok(paths) => paths,
                Err(PathError::Cancelled) => {
                    discovery.cancelled = true;
                    return discovery;
                }
                Err(e) => {
                    warn!(base = %base.token, error = %e, "Path search failed");
                    continue;
                }
            };

            discovery.opportunities += paths.len() as u64;
            for path in &paths {
                self.sink.emit(SinkEvent::opportunity(snapshot, path, now));
            }

            for path in &paths {
                if cancel.load(Ordering::Relaxed) {
                    discovery.cancelled = true;
                    return discovery;
                }
                match self.builder.build(snapshot, path, base, now) {
                    Ok(bundle) => {
                        metrics::inc_bundles_built();
                        info!(
                            base = %base.token,
                            route = %path.describe(snapshot),
                            principal = %bundle.principal,
                            expected_profit = %bundle.expected_profit,
                            "Bundle built"
                        );
                        discovery.bundles.push(bundle);
                        break;
                    }
                    Err(e) => {
                        metrics::inc_bundles_rejected(rejection_label(&e));
                        discovery.rejected += 1;
                        debug!(route = %path.describe(snapshot), error = %e, "Candidate rejected");
                    }
                }
            }
        }
        discovery
    }

    /// Start executing `bundle` if its base token has a free slot.
    async fn dispatch(self: Arc<Self>, bundle: Bundle) -> Option<JoinHandle<()>> {
        let Some(semaphore) = self.permits.get(&bundle.base) else {
            warn!(base = %bundle.base, "No execution slot for base token");
            return None;
        };
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                metrics::inc_executions_skipped();
                self.stats.write().await.skipped_busy += 1;
                info!(base = %bundle.base, "Base token busy, skipping bundle");
                return None;
            }
        };

        Some(tokio::spawn(async move {
            let report = self.coordinator.execute(Arc::new(bundle)).await;
            drop(permit);
            self.settle(&report).await;
        }))
    }

    /// Report an execution and feed its outcome back into the graph.
    async fn settle(&self, report: &ExecutionReport) {
        self.sink.emit(SinkEvent::execution(
            &self.graph.snapshot(),
            report,
            OffsetDateTime::now_utc(),
        ));
        self.stats.write().await.record(report);

        if report.is_included() {
            let touched = report.bundle.touched_venues();
            let refresh = self.graph.refresh_venues(&touched).await;
            debug!(venues = touched.len(), version = refresh.version, "Refreshed venues after inclusion");
        } else if report.requeue_discovery {
            self.graph.request_discovery();
        }
    }
}

/// Newest update in the queue, starting from `first`.
fn drain_latest(updates: &mut mpsc::Receiver<SnapshotUpdate>, first: SnapshotUpdate) -> SnapshotUpdate {
    let mut latest = first;
    while let Ok(update) = updates.try_recv() {
        latest = update;
    }
    latest
}

fn rejection_label(err: &BundleError) -> &'static str {
    match err {
        BundleError::StaleData { .. } => "stale",
        BundleError::Infeasible { .. } => "infeasible",
        BundleError::BelowMinimumProfit { .. } => "below_min_profit",
        BundleError::Quote { .. } => "quote",
        BundleError::ZeroBorrow => "zero_borrow",
        BundleError::Invalid(_) | BundleError::Decode(_) => "invalid",
    }
}
