//! Mock venue source for unit testing.
//!
//! Serves scripted venue states without making network requests, with
//! switchable per-venue failures and simulated latency.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::source::VenueSource;
use super::types::{Venue, VenueId, VenueState};
use crate::error::SourceError;

/// Configuration for mock source behavior.
#[derive(Debug, Clone, Default)]
pub struct MockSourceConfig {
    /// Whether every fetch fails.
    pub fail_all: bool,
    /// Simulated latency in milliseconds.
    pub latency_ms: u64,
}

/// Mock price/liquidity source for testing.
#[derive(Debug, Clone, Default)]
pub struct MockVenueSource {
    /// Mock configuration.
    config: MockSourceConfig,
    /// Scripted states by venue.
    states: Arc<Mutex<HashMap<VenueId, VenueState>>>,
    /// Venues whose fetch currently fails.
    failing: Arc<Mutex<HashSet<VenueId>>>,
    /// Venues that never answer.
    hanging: Arc<Mutex<HashSet<VenueId>>>,
    /// Per-venue latency overriding the configured one.
    delays: Arc<Mutex<HashMap<VenueId, Duration>>>,
    /// Number of fetch calls served.
    calls: Arc<AtomicU64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockVenueSource {
    /// Create a new mock source with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock source with custom configuration.
    pub fn with_config(config: MockSourceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the state returned for a venue.
    pub fn set_state(&self, venue: VenueId, state: VenueState) {
        lock(&self.states).insert(venue, state);
    }

    /// Set constant-product reserves for a venue.
    pub fn set_reserves(&self, venue: VenueId, reserve0: u128, reserve1: u128) {
        self.set_state(venue, VenueState::ConstantProduct { reserve0, reserve1 });
    }

    /// Make fetches for a venue fail until [`recover`](Self::recover) is called.
    pub fn fail(&self, venue: VenueId) {
        lock(&self.failing).insert(venue);
    }

    /// Make fetches for a venue hang forever (exercises refresh timeouts).
    pub fn hang(&self, venue: VenueId) {
        lock(&self.hanging).insert(venue);
    }

    /// Delay answers for a venue. The answer still reflects the state at
    /// the time of the request. `Duration::ZERO` removes the delay.
    pub fn delay(&self, venue: VenueId, latency: Duration) {
        let mut delays = lock(&self.delays);
        if latency.is_zero() {
            delays.remove(&venue);
        } else {
            delays.insert(venue, latency);
        }
    }

    /// Clear scripted failures for a venue.
    pub fn recover(&self, venue: VenueId) {
        lock(&self.failing).remove(&venue);
        lock(&self.hanging).remove(&venue);
    }

    /// Number of fetch calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueSource for MockVenueSource {
    async fn fetch(&self, venue: &Venue) -> Result<VenueState, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        // Answer with the state as of the request; latency only delays it.
        let answer = if self.config.fail_all || lock(&self.failing).contains(&venue.id) {
            Err(SourceError::Unavailable(format!(
                "mock failure for venue {}",
                venue.id
            )))
        } else {
            // Unscripted venues keep their current state.
            Ok(lock(&self.states)
                .get(&venue.id)
                .cloned()
                .unwrap_or_else(|| venue.state.clone()))
        };

        let latency = lock(&self.delays)
            .get(&venue.id)
            .copied()
            .unwrap_or(Duration::from_millis(self.config.latency_ms));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let hang = lock(&self.hanging).contains(&venue.id);
        if hang {
            futures::future::pending::<()>().await;
        }

        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::TokenId;
    use alloy::primitives::Address;
    use time::OffsetDateTime;

    fn venue(id: u32) -> Venue {
        Venue {
            id: VenueId(id),
            address: Address::ZERO,
            token0: TokenId(0),
            token1: TokenId(1),
            fee_pips: 3000,
            state: VenueState::ConstantProduct { reserve0: 1, reserve1: 1 },
            refreshed_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn mock_source_serves_scripted_state() {
        let source = MockVenueSource::new();
        source.set_reserves(VenueId(1), 100, 200);

        let state = source.fetch(&venue(1)).await.unwrap();
        assert_eq!(state, VenueState::ConstantProduct { reserve0: 100, reserve1: 200 });

        // Unscripted venue echoes its current state.
        let state = source.fetch(&venue(2)).await.unwrap();
        assert_eq!(state, VenueState::ConstantProduct { reserve0: 1, reserve1: 1 });
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn mock_source_failure_modes() {
        let source = MockVenueSource::new();
        source.fail(VenueId(1));
        assert!(source.fetch(&venue(1)).await.is_err());

        source.recover(VenueId(1));
        assert!(source.fetch(&venue(1)).await.is_ok());

        let failing = MockVenueSource::with_config(MockSourceConfig {
            fail_all: true,
            ..Default::default()
        });
        assert!(failing.fetch(&venue(3)).await.is_err());
    }

    #[tokio::test]
    async fn delayed_answer_reflects_state_at_request_time() {
        let source = MockVenueSource::new();
        source.set_reserves(VenueId(1), 100, 200);
        source.delay(VenueId(1), Duration::from_millis(50));

        let pending = tokio::spawn({
            let source = source.clone();
            async move { source.fetch(&venue(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.set_reserves(VenueId(1), 300, 400);

        let state = pending.await.unwrap().unwrap();
        assert_eq!(state, VenueState::ConstantProduct { reserve0: 100, reserve1: 200 });
        source.delay(VenueId(1), Duration::ZERO);
        let state = source.fetch(&venue(1)).await.unwrap();
        assert_eq!(state, VenueState::ConstantProduct { reserve0: 300, reserve1: 400 });
    }
}
