//! Liquidity graph owner: copy-on-write snapshots and bounded refresh fan-out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{stream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::snapshot::GraphSnapshot;
use crate::error::SourceError;
use crate::metrics;
use crate::venue::{VenueId, VenueSource, VenueState};

/// Refresh policy.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum concurrent venue fetches.
    pub concurrency: usize,
    /// Per-venue fetch timeout.
    pub timeout: Duration,
    /// Consecutive failures before a venue is excluded from search.
    pub degraded_after_failures: u32,
    /// Polling interval for venues without an override.
    pub interval: Duration,
    /// Per-venue polling intervals from the registry.
    pub venue_intervals: HashMap<VenueId, Duration>,
    /// Longest wait between fetches of a failing venue.
    pub max_backoff: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            timeout: Duration::from_millis(1500),
            degraded_after_failures: 3,
            interval: Duration::from_secs(2),
            venue_intervals: HashMap::new(),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RefreshConfig {
    /// Polling interval for `venue`.
    pub fn interval_for(&self, venue: VenueId) -> Duration {
        self.venue_intervals.get(&venue).copied().unwrap_or(self.interval)
    }

    /// Wait before the next fetch of `venue` after `failures` consecutive
    /// failures: its interval doubled per failure, capped at `max_backoff`.
    pub fn backoff_for(&self, venue: VenueId, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.interval_for(venue)
            .saturating_mul(1 << doublings)
            .min(self.max_backoff.max(self.interval_for(venue)))
    }

    /// Shortest polling interval of any venue.
    pub fn tick(&self) -> Duration {
        self.venue_intervals
            .values()
            .copied()
            .fold(self.interval, Duration::min)
            .max(Duration::from_millis(10))
    }
}

/// Why a snapshot update was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTrigger {
    /// Venue states changed.
    Refresh,
    /// A previous cycle was abandoned and discovery should rerun.
    Requeue,
}

/// Notification that a fresher snapshot is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotUpdate {
    /// Snapshot version at the time of the notification.
    pub version: u64,
    /// Venues refreshed successfully.
    pub refreshed: usize,
    /// Venues whose refresh failed.
    pub failed: usize,
    /// Reason for the update.
    pub trigger: UpdateTrigger,
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Published snapshot version.
    pub version: u64,
    /// Venues refreshed successfully.
    pub refreshed: Vec<VenueId>,
    /// Venues whose refresh failed or timed out.
    pub failed: Vec<VenueId>,
    /// Venues that crossed the failure threshold in this pass.
    pub newly_degraded: Vec<VenueId>,
    /// Venues that left the degraded set in this pass.
    pub recovered: Vec<VenueId>,
    /// Fetches discarded because a newer fetch had already been applied.
    pub superseded: Vec<VenueId>,
}

/// Owns the current snapshot. Readers clone an `Arc`; writers build a new
/// snapshot and swap it in.
pub struct LiquidityGraph {
    current: RwLock<Arc<GraphSnapshot>>,
    source: Arc<dyn VenueSource>,
    config: RefreshConfig,
    failures: DashMap<VenueId, u32>,
    next_due: DashMap<VenueId, Instant>,
    publish: Mutex<()>,
    updates: Option<mpsc::Sender<SnapshotUpdate>>,
}

/// A finished fetch with the moment it was issued.
struct Fetched {
    id: VenueId,
    issued_at: OffsetDateTime,
    issued: Instant,
    result: Result<VenueState, SourceError>,
}

impl LiquidityGraph {
    /// Create a graph around an initial snapshot.
    pub fn new(initial: GraphSnapshot, source: Arc<dyn VenueSource>, config: RefreshConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            source,
            config,
            failures: DashMap::new(),
            next_due: DashMap::new(),
            publish: Mutex::new(()),
            updates: None,
        }
    }

    /// Publish update notifications on a bounded channel.
    pub fn with_updates(mut self, updates: mpsc::Sender<SnapshotUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Consecutive failure count for a venue.
    pub fn failure_count(&self, venue: VenueId) -> u32 {
        self.failures.get(&venue).map_or(0, |c| *c)
    }

    /// Refresh policy.
    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Venues due for a fetch at `now`. A failing venue waits out its
    /// backoff. Otherwise a venue is due once its interval has elapsed, or,
    /// when `on_block` is set, on every block unless it has its own interval.
    pub fn due_venues(&self, now: Instant, on_block: bool) -> Vec<VenueId> {
        self.snapshot()
            .venues()
            .iter()
            .map(|v| v.id)
            .filter(|id| {
                let elapsed = self.next_due.get(id).map_or(true, |due| *due <= now);
                if self.failure_count(*id) > 0 {
                    elapsed
                } else if on_block && !self.config.venue_intervals.contains_key(id) {
                    true
                } else {
                    elapsed
                }
            })
            .collect()
    }

    /// Refresh the venues that are due, if any.
    pub async fn refresh_due(&self, on_block: bool) -> Option<RefreshReport> {
        let due = self.due_venues(Instant::now(), on_block);
        if due.is_empty() {
            return None;
        }
        Some(self.refresh_venues(&due).await)
    }

    /// Refresh every venue.
    pub async fn refresh_all(&self) -> RefreshReport {
        let ids: Vec<VenueId> = self.snapshot().venues().iter().map(|v| v.id).collect();
        self.refresh_venues(&ids).await
    }

    /// Refresh the given venues and publish a successor snapshot.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn refresh_venues(&self, ids: &[VenueId]) -> RefreshReport {
        let start = Instant::now();
        let base = self.snapshot();
        let timeout = self.config.timeout;

        let targets: Vec<_> = ids.iter().filter_map(|id| base.venue(*id).cloned()).collect();
        let results: Vec<Fetched> = stream::iter(targets)
            .map(|venue| {
                let source = self.source.clone();
                async move {
                    let issued_at = OffsetDateTime::now_utc();
                    let issued = Instant::now();
                    let result = match tokio::time::timeout(timeout, source.fetch(&venue)).await {
                        Ok(r) => r,
                        Err(_) => Err(SourceError::Timeout {
                            venue: venue.id,
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    };
                    Fetched { id: venue.id, issued_at, issued, result }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        // Apply on top of whatever is current now, not the snapshot we started from.
        let _guard = self.publish.lock().await;
        let latest = self.snapshot();
        let now = OffsetDateTime::now_utc();
        let mut venues = latest.venues().to_vec();
        let mut report = RefreshReport::default();

        for Fetched { id, issued_at, issued, result } in results {
            match result {
                Ok(state) => {
                    if let Some(v) = venues.get_mut(id.index()) {
                        // A fetch issued before the applied one carries older state.
                        if v.refreshed_at > issued_at {
                            debug!(venue = %id, "discarding superseded fetch");
                            report.superseded.push(id);
                            continue;
                        }
                        if state.kind() == v.kind() {
                            v.state = state;
                            v.refreshed_at = issued_at;
                            self.failures.remove(&id);
                            self.next_due.insert(id, issued + self.config.interval_for(id));
                            report.refreshed.push(id);
                            continue;
                        }
                        warn!(venue = %id, "source returned a state of the wrong protocol kind");
                    }
                    self.record_failure(id, issued);
                    report.failed.push(id);
                }
                Err(e) => {
                    let failures = self.record_failure(id, issued);
                    debug!(venue = %id, failures, error = %e, "venue refresh failed");
                    report.failed.push(id);
                }
            }
        }
        metrics::add_venue_refresh_failures(report.failed.len() as u64);

        let threshold = self.config.degraded_after_failures.max(1);
        let degraded: Vec<bool> = venues
            .iter()
            .map(|v| self.failure_count(v.id) >= threshold)
            .collect();
        for v in &venues {
            let was = latest.is_degraded(v.id);
            let is = degraded[v.id.index()];
            if is && !was {
                warn!(venue = %v.id, address = %v.address, "venue marked degraded");
                report.newly_degraded.push(v.id);
            } else if was && !is {
                info!(venue = %v.id, address = %v.address, "venue recovered");
                report.recovered.push(v.id);
            }
        }

        let next = Arc::new(latest.successor(venues, degraded, now));
        report.version = next.version();
        metrics::set_degraded_venues(next.degraded_count());
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        drop(_guard);

        report.refreshed.sort();
        report.failed.sort();
        report.superseded.sort();
        metrics::record_graph_refresh_latency(start);
        debug!(
            version = report.version,
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "snapshot published"
        );

        self.notify(SnapshotUpdate {
            version: report.version,
            refreshed: report.refreshed.len(),
            failed: report.failed.len(),
            trigger: UpdateTrigger::Refresh,
        });
        report
    }

    /// Ask the discovery loop to run again on the current snapshot.
    pub fn request_discovery(&self) {
        self.notify(SnapshotUpdate {
            version: self.snapshot().version(),
            refreshed: 0,
            failed: 0,
            trigger: UpdateTrigger::Requeue,
        });
    }

    fn record_failure(&self, id: VenueId, issued: Instant) -> u32 {
        let failures = {
            let mut entry = self.failures.entry(id).or_insert(0);
            *entry += 1;
            *entry
        };
        self.next_due.insert(id, issued + self.config.backoff_for(id, failures));
        failures
    }

    fn notify(&self, update: SnapshotUpdate) {
        let Some(tx) = &self.updates else { return };
        match tx.try_send(update) {
            Ok(()) => {}
            // The consumer always reads the newest snapshot, so a full queue
            // already carries enough signal.
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(version = update.version, "update queue full, coalescing");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("update queue closed");
            }
        }
    }
}

/// Refresh venues as they fall due: on every new block when a block feed is
/// supplied, and on the shortest venue interval otherwise (and as a
/// fallback). Failing venues back off per [`RefreshConfig::backoff_for`].
pub fn spawn_refresh_loop(graph: Arc<LiquidityGraph>, mut blocks: Option<mpsc::Receiver<u64>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(graph.config().tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let trigger = match blocks.as_mut() {
                Some(rx) => tokio::select! {
                    block = rx.recv() => block.map(Some),
                    _ = ticker.tick() => Some(None),
                },
                None => {
                    ticker.tick().await;
                    Some(None)
                }
            };
            let Some(block) = trigger else {
                warn!("block feed closed, falling back to polling");
                blocks = None;
                continue;
            };

            let Some(report) = graph.refresh_due(block.is_some()).await else { continue };
            debug!(
                block,
                version = report.version,
                refreshed = report.refreshed.len(),
                failed = report.failed.len(),
                "refresh cycle complete"
            );
        }
    })
}
