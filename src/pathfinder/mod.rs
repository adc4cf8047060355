//! Path finder: ranked profitable cycles over a graph snapshot.
//!
//! This module handles:
//! - Borrow sizing and gas-cost conversion
//! - The optimistic return bound used for pruning
//! - Bounded depth-first search, ranking and deduplication

pub mod bound;
pub mod path;
pub mod search;
pub mod sizing;

use std::time::Duration;

pub use bound::ReturnBound;
pub use path::{dedup_ranked, Path, PathSummary};
pub use search::PathFinder;
pub use sizing::{BorrowSizer, GasModel, WEI_PER_NATIVE};

use crate::venue::{Amount, TokenId};

/// Search limits shared by every base token.
#[derive(Debug, Clone)]
pub struct PathFinderConfig {
    /// Maximum hops per cycle (L).
    pub max_hops: usize,
    /// Maximum edge expansions per search (K).
    pub max_expansions: usize,
    /// Maximum candidates returned.
    pub max_results: usize,
    /// Venues older than this are skipped.
    pub staleness: Duration,
    /// Borrow sizing rule, shared with the bundle builder.
    pub sizer: BorrowSizer,
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            max_expansions: 5_000,
            max_results: 10,
            staleness: Duration::from_secs(60),
            sizer: BorrowSizer::default(),
        }
    }
}

/// A capital pool: the token borrowed and returned, with its thresholds
/// already converted to raw base-token units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseToken {
    /// Token handle.
    pub token: TokenId,
    /// Minimum net profit after gas.
    pub min_profit: i128,
    /// Largest borrow allowed.
    pub capital_ceiling: Amount,
    /// Gas cost model in this token's units.
    pub gas: GasModel,
}
