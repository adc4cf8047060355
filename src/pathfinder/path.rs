//! Candidate cycles and their ranking.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use smallvec::SmallVec;
use time::OffsetDateTime;

use crate::graph::{EdgeRef, GraphSnapshot};
use crate::venue::{Amount, TokenId, VenueId};

/// A profitable cycle from the base token back to itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// Start and end token.
    pub base: TokenId,
    /// Hops in execution order.
    pub edges: SmallVec<[EdgeRef; 4]>,
    /// Number of hops.
    pub hops: usize,
    /// Sized input (the borrow).
    pub amount_in: Amount,
    /// Projected output of the final hop.
    pub amount_out: Amount,
    /// Projected gas cost in base-token units.
    pub gas_cost: Amount,
    /// `amount_out − amount_in − gas_cost`.
    pub net_profit: i128,
    /// Largest share of any hop's input-side depth consumed, in bps.
    pub max_utilization_bps: u32,
    /// Most recent refresh among the path's venues.
    pub freshness: OffsetDateTime,
    /// Oldest refresh among the path's venues.
    pub oldest_refresh: OffsetDateTime,
    /// Snapshot the path was found on.
    pub snapshot_version: u64,
}

impl Path {
    /// Venues on the path, sorted. Two paths with the same key consume the
    /// same liquidity.
    pub fn venue_key(&self) -> SmallVec<[VenueId; 4]> {
        let mut key: SmallVec<[VenueId; 4]> = self.edges.iter().map(|e| e.venue).collect();
        key.sort();
        key
    }

    /// Total ranking order: best first.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .net_profit
            .cmp(&self.net_profit)
            .then(self.hops.cmp(&other.hops))
            .then(self.max_utilization_bps.cmp(&other.max_utilization_bps))
            .then_with(|| self.edges.as_slice().cmp(other.edges.as_slice()))
    }

    /// Tokens visited, base first and last.
    pub fn tokens(&self, snapshot: &GraphSnapshot) -> Vec<TokenId> {
        let mut tokens = Vec::with_capacity(self.hops + 1);
        tokens.push(self.base);
        for edge in &self.edges {
            if let Some(e) = snapshot.edge(*edge) {
                tokens.push(e.token_out());
            }
        }
        tokens
    }

    /// Human-readable route, e.g. `WETH -> USDC -> WETH`.
    pub fn describe(&self, snapshot: &GraphSnapshot) -> String {
        self.tokens(snapshot)
            .iter()
            .map(|t| snapshot.token(*t).map_or_else(|| t.to_string(), |tok| tok.symbol.clone()))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Serializable summary for logs and the result sink.
    pub fn summary(&self, snapshot: &GraphSnapshot) -> PathSummary {
        PathSummary {
            route: self.describe(snapshot),
            venues: self
                .edges
                .iter()
                .filter_map(|e| snapshot.venue(e.venue).map(|v| v.address.to_string()))
                .collect(),
            hops: self.hops,
            amount_in: self.amount_in.to_string(),
            amount_out: self.amount_out.to_string(),
            gas_cost: self.gas_cost.to_string(),
            net_profit: self.net_profit.to_string(),
            max_utilization_bps: self.max_utilization_bps,
        }
    }
}

/// Path as reported externally. Amounts are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathSummary {
    /// Token route.
    pub route: String,
    /// Venue addresses in hop order.
    pub venues: Vec<String>,
    /// Hop count.
    pub hops: usize,
    /// Sized input.
    pub amount_in: String,
    /// Projected output.
    pub amount_out: String,
    /// Projected gas cost.
    pub gas_cost: String,
    /// Projected net profit.
    pub net_profit: String,
    /// Worst per-hop utilization.
    pub max_utilization_bps: u32,
}

/// Merge candidates sharing a venue set, keeping the best-ranked of each,
/// then sort and truncate.
pub fn dedup_ranked(candidates: impl IntoIterator<Item = Path>, max_results: usize) -> Vec<Path> {
    let mut best: HashMap<SmallVec<[VenueId; 4]>, Path> = HashMap::new();
    for path in candidates {
        let key = path.venue_key();
        match best.get(&key) {
            Some(existing) if existing.rank_cmp(&path) != Ordering::Greater => {}
            _ => {
                best.insert(key, path);
            }
        }
    }
    let mut ranked: Vec<Path> = best.into_values().collect();
    ranked.sort_by(Path::rank_cmp);
    ranked.truncate(max_results);
    ranked
}
