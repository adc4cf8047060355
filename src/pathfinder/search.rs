//! Bounded depth-first cycle search.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use alloy::primitives::U256;
use smallvec::SmallVec;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::bound::{profit_upper_bound, ReturnBound};
use super::path::{dedup_ranked, Path};
use super::sizing::BorrowSizer;
use super::{BaseToken, PathFinderConfig};
use crate::error::PathError;
use crate::graph::{Edge, EdgeRef, GraphSnapshot};
use crate::metrics;
use crate::venue::math::{rate_mul_up, Q128};
use crate::venue::{Amount, Quote, TokenId, VenueId};

/// Expansions between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Smaller exploratory amounts tried when a hop runs out of liquidity.
const EXHAUSTION_RETRIES: usize = 4;

/// Cycle finder over an immutable snapshot. Single-threaded and
/// deterministic: the same snapshot always yields the same ranked list.
#[derive(Debug, Clone)]
pub struct PathFinder {
    config: PathFinderConfig,
}

impl PathFinder {
    /// Create a finder.
    pub fn new(config: PathFinderConfig) -> Self {
        Self { config }
    }

    /// Search configuration.
    pub fn config(&self) -> &PathFinderConfig {
        &self.config
    }

    /// Ranked, deduplicated profitable cycles through `base`. An empty list
    /// is the normal outcome.
    pub fn find(
        &self,
        snapshot: &GraphSnapshot,
        base: &BaseToken,
        now: OffsetDateTime,
    ) -> Result<Vec<Path>, PathError> {
        self.find_cancellable(snapshot, base, now, &AtomicBool::new(false))
    }

    /// Like [`find`](Self::find), abandoning the search with
    /// [`PathError::Cancelled`] once `cancel` is set.
    #[instrument(skip_all, fields(base = %base.token, version = snapshot.version()))]
    pub fn find_cancellable(
        &self,
        snapshot: &GraphSnapshot,
        base: &BaseToken,
        now: OffsetDateTime,
        cancel: &AtomicBool,
    ) -> Result<Vec<Path>, PathError> {
        if snapshot.token(base.token).is_none() {
            return Err(PathError::UnknownBaseToken(base.token.to_string()));
        }
        let start = Instant::now();
        let staleness = self.config.staleness;
        let usable = |venue: VenueId| snapshot.is_usable(venue, now, staleness);
        let bound = ReturnBound::compute(snapshot, base.token, self.config.max_hops, &usable);

        let mut search = Search {
            config: &self.config,
            snapshot,
            base,
            bound: &bound,
            usable: &usable,
            cancel,
            expansions: 0,
            pruned: 0,
            candidates: Vec::new(),
            edges: SmallVec::new(),
            tokens: SmallVec::new(),
        };
        let outcome = search.run();
        let (expansions, pruned, found) = (search.expansions, search.pruned, search.candidates.len());
        metrics::record_path_search_latency(start);
        metrics::add_path_expansions(expansions as u64);
        outcome?;

        let ranked = dedup_ranked(search.candidates, self.config.max_results);
        debug!(expansions, pruned, found, ranked = ranked.len(), "path search complete");
        metrics::add_paths_found(ranked.len() as u64);
        Ok(ranked)
    }

    /// Size and quote a fixed cycle. `None` when it cannot be quoted or does
    /// not clear the base token's minimum profit.
    pub fn evaluate(&self, snapshot: &GraphSnapshot, base: &BaseToken, edges: &[EdgeRef]) -> Option<Path> {
        evaluate_cycle(&self.config.sizer, snapshot, base, edges)
    }
}

fn evaluate_cycle(
    sizer: &BorrowSizer,
    snapshot: &GraphSnapshot,
    base: &BaseToken,
    edges: &[EdgeRef],
) -> Option<Path> {
    let views: SmallVec<[Edge<'_>; 4]> = edges.iter().map(|e| snapshot.edge(*e)).collect::<Option<_>>()?;
    let first = views.first()?;
    if first.token_in() != base.token || views.last()?.token_out() != base.token {
        return None;
    }

    let amount_in = sizer.size(&views, base.capital_ceiling);
    if amount_in == 0 {
        return None;
    }

    let mut amount = amount_in;
    let mut max_utilization_bps = 0;
    let mut freshness = OffsetDateTime::UNIX_EPOCH;
    let mut oldest_refresh = None::<OffsetDateTime>;
    for edge in &views {
        max_utilization_bps = max_utilization_bps.max(BorrowSizer::utilization_bps(amount, edge.depth_in()));
        freshness = freshness.max(edge.venue.refreshed_at);
        oldest_refresh = Some(oldest_refresh.map_or(edge.venue.refreshed_at, |t| t.min(edge.venue.refreshed_at)));
        let quote = edge.amount_out(amount).ok()?;
        if quote.exhausted {
            return None;
        }
        amount = quote.amount_out;
    }

    let gas_cost = base.gas.cost_in_base(views.len());
    let repay = amount_in.saturating_add(sizer.loan_fee(amount_in));
    let net_profit = net(amount, repay, gas_cost);
    if net_profit <= 0 || net_profit < base.min_profit {
        return None;
    }

    Some(Path {
        base: base.token,
        edges: edges.iter().copied().collect(),
        hops: edges.len(),
        amount_in,
        amount_out: amount,
        gas_cost,
        net_profit,
        max_utilization_bps,
        freshness,
        oldest_refresh: oldest_refresh.unwrap_or(freshness),
        snapshot_version: snapshot.version(),
    })
}

/// `out − input − gas` in signed arithmetic, saturating.
pub(crate) fn net(out: Amount, input: Amount, gas: Amount) -> i128 {
    let to_i = |v: Amount| i128::try_from(v).unwrap_or(i128::MAX);
    to_i(out).saturating_sub(to_i(input)).saturating_sub(to_i(gas))
}

/// Quote `amount`, or the largest retried amount the hop can fill in full.
/// A partial fill reports what it consumed, so the first retry starts just
/// below that; later retries halve.
fn quote_within_liquidity(edge: &Edge<'_>, amount: Amount) -> Option<Quote> {
    let mut amount = amount;
    for _ in 0..=EXHAUSTION_RETRIES {
        let quote = edge.amount_out(amount).ok()?;
        if !quote.exhausted {
            return Some(quote);
        }
        let consumed = quote.amount_in.saturating_sub(quote.amount_in / 100);
        amount = if consumed < amount { consumed } else { amount / 2 };
        if amount == 0 {
            return None;
        }
    }
    None
}

struct Search<'a, F: Fn(VenueId) -> bool> {
    config: &'a PathFinderConfig,
    snapshot: &'a GraphSnapshot,
    base: &'a BaseToken,
    bound: &'a ReturnBound,
    usable: &'a F,
    cancel: &'a AtomicBool,
    expansions: usize,
    pruned: usize,
    candidates: Vec<Path>,
    edges: SmallVec<[EdgeRef; 4]>,
    tokens: SmallVec<[TokenId; 5]>,
}

impl<F: Fn(VenueId) -> bool> Search<'_, F> {
    fn run(&mut self) -> Result<(), PathError> {
        let snapshot = self.snapshot;
        let base = self.base.token;
        self.tokens.push(base);
        for edge_ref in snapshot.edges_from(base) {
            if !(self.usable)(edge_ref.venue) {
                continue;
            }
            let Some(edge) = snapshot.edge(*edge_ref) else { continue };
            let a0 = self.config.sizer.initial(&edge, self.base.capital_ceiling);
            if a0 == 0 {
                continue;
            }
            if !self.extend(*edge_ref, a0, Q128)? {
                break;
            }
        }
        Ok(())
    }

    /// Take `edge_ref` from the current token with `amount` in hand. Returns
    /// `Ok(false)` once the expansion budget is spent.
    fn extend(&mut self, edge_ref: EdgeRef, amount: Amount, prefix_rate: U256) -> Result<bool, PathError> {
        if self.expansions >= self.config.max_expansions {
            return Ok(false);
        }
        if self.expansions % CANCEL_CHECK_INTERVAL == 0 && self.cancel.load(Ordering::Relaxed) {
            return Err(PathError::Cancelled);
        }
        self.expansions += 1;

        let snapshot = self.snapshot;
        let Some(edge) = snapshot.edge(edge_ref) else { return Ok(true) };
        let Some(quote) = quote_within_liquidity(&edge, amount) else { return Ok(true) };
        let next = edge.token_out();
        let depth = self.edges.len() + 1;

        self.edges.push(edge_ref);
        let result = if next == self.base.token {
            if depth >= 2 {
                if let Some(path) = evaluate_cycle(&self.config.sizer, snapshot, self.base, &self.edges) {
                    self.candidates.push(path);
                }
            }
            Ok(true)
        } else if depth < self.config.max_hops {
            self.descend(next, quote.amount_out, rate_mul_up(prefix_rate, edge.spot_rate_q128()), depth)
        } else {
            Ok(true)
        };
        self.edges.pop();
        result
    }

    /// Explore onward from an intermediate token, unless even the optimistic
    /// return cannot clear the minimum profit after gas for one more hop.
    fn descend(&mut self, token: TokenId, amount: Amount, prefix_rate: U256, depth: usize) -> Result<bool, PathError> {
        let remaining = self.bound.best(token, self.config.max_hops - depth);
        let gas = self.base.gas.cost_in_base(depth + 1);
        let optimistic = profit_upper_bound(amount, prefix_rate, remaining);
        let floor = i128::try_from(gas).unwrap_or(i128::MAX);
        if optimistic.saturating_sub(floor) < self.base.min_profit.max(1) {
            self.pruned += 1;
            return Ok(true);
        }
        let snapshot = self.snapshot;
        self.tokens.push(token);
        let mut result = Ok(true);
        for edge_ref in snapshot.edges_from(token) {
            if !(self.usable)(edge_ref.venue) || self.edges.iter().any(|e| e.venue == edge_ref.venue) {
                continue;
            }
            let Some(edge) = snapshot.edge(*edge_ref) else { continue };
            let out = edge.token_out();
            if out != self.base.token && self.tokens.contains(&out) {
                continue;
            }
            match self.extend(*edge_ref, amount, prefix_rate) {
                Ok(true) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.tokens.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot::tests::{cp_venue, token};
    use crate::pathfinder::sizing::{GasModel, WEI_PER_NATIVE};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const E18: u128 = WEI_PER_NATIVE;

    fn config() -> PathFinderConfig {
        PathFinderConfig {
            max_hops: 3,
            max_expansions: 10_000,
            max_results: 10,
            staleness: Duration::from_secs(60),
            sizer: BorrowSizer { max_reserve_fraction_bps: 1_000, loan_fee_pips: 0 },
        }
    }

    fn base(gas: GasModel) -> BaseToken {
        BaseToken {
            token: TokenId(0),
            min_profit: 1,
            capital_ceiling: 50 * E18,
            gas,
        }
    }

    /// Venue 0: 1000 X / 2000 Y. Venue 1: 1000 X / 2400 Y (X is cheap there).
    fn mispriced(now: OffsetDateTime, b_refreshed: OffsetDateTime) -> GraphSnapshot {
        GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![
                cp_venue(0, 0, 1, 1_000 * E18, 2_000 * E18, now),
                cp_venue(1, 0, 1, 1_000 * E18, 2_400 * E18, b_refreshed),
            ],
        )
        .unwrap()
    }

    fn v2_out(amount_in: u128, reserve_in: u128, reserve_out: u128) -> u128 {
        let in_with_fee = U256::from(amount_in) * U256::from(997u32);
        let num = in_with_fee * U256::from(reserve_out);
        let den = U256::from(reserve_in) * U256::from(1000u32) + in_with_fee;
        u128::try_from(num / den).unwrap()
    }

    #[test]
    fn balanced_two_hop_cycle_is_not_surfaced() {
        let now = OffsetDateTime::now_utc();
        // A: 1000 X / 2000 Y, B: 1050 X / 2100 Y.
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![
                cp_venue(0, 0, 1, 1_000 * E18, 2_000 * E18, now),
                cp_venue(1, 0, 1, 1_050 * E18, 2_100 * E18, now),
            ],
        )
        .unwrap();

        // 10 X into A, then the Y into B, matches the closed-form formula.
        let a = snap.venue(VenueId(0)).unwrap();
        let b = snap.venue(VenueId(1)).unwrap();
        let y = a.quote(TokenId(0), TokenId(1), 10 * E18).unwrap().amount_out;
        let x = b.quote(TokenId(1), TokenId(0), y).unwrap().amount_out;
        assert_eq!(y, v2_out(10 * E18, 1_000 * E18, 2_000 * E18));
        assert_eq!(x, v2_out(y, 2_100 * E18, 1_050 * E18));
        assert!(x < 10 * E18);

        let finder = PathFinder::new(config());
        let found = finder.find(&snap, &base(GasModel::free()), now).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn mispriced_cycle_is_found_net_of_gas() {
        let now = OffsetDateTime::now_utc();
        let snap = mispriced(now, now);
        let finder = PathFinder::new(config());

        let found = finder.find(&snap, &base(GasModel::free()), now).unwrap();
        assert_eq!(found.len(), 1);
        let path = &found[0];
        assert_eq!(
            path.edges.as_slice(),
            &[
                EdgeRef { venue: VenueId(1), zero_for_one: true },
                EdgeRef { venue: VenueId(0), zero_for_one: false },
            ]
        );
        // The 50 X cap overshoots the peak; about 42 X earns more.
        assert!(path.amount_in > 42 * E18 && path.amount_in < 43 * E18);
        assert!(path.net_profit > 387 * E18 as i128 / 100);
        assert!(path.net_profit < 388 * E18 as i128 / 100);
        assert_eq!(path.describe(&snap), "X -> Y -> X");

        // 1M gas at 10_000 gwei with 1 native = 1 X costs 10 X: nothing clears.
        let expensive = GasModel {
            base_gas: 1_000_000,
            per_hop_gas: 0,
            gas_price_wei: 10_000_000_000_000,
            native_price_in_base: E18,
        };
        let found = finder.find(&snap, &base(expensive), now).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn path_output_composes_pure_quotes() {
        let now = OffsetDateTime::now_utc();
        let snap = mispriced(now, now);
        let path = PathFinder::new(config())
            .find(&snap, &base(GasModel::free()), now)
            .unwrap()
            .remove(0);

        let mut amount = path.amount_in;
        for edge in &path.edges {
            amount = snap.edge(*edge).unwrap().amount_out(amount).unwrap().amount_out;
        }
        assert_eq!(amount, path.amount_out);
        assert_eq!(path.net_profit, amount as i128 - path.amount_in as i128);
    }

    #[test]
    fn stale_venue_is_excluded() {
        let now = OffsetDateTime::now_utc();
        let finder = PathFinder::new(config());

        let stale = mispriced(now, now - Duration::from_secs(61));
        assert!(finder.find(&stale, &base(GasModel::free()), now).unwrap().is_empty());

        let fresh = mispriced(now, now - Duration::from_secs(59));
        let found = finder.find(&fresh, &base(GasModel::free()), now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].oldest_refresh, now - Duration::from_secs(59));
        assert_eq!(found[0].freshness, now);
    }

    #[test]
    fn search_is_deterministic() {
        let now = OffsetDateTime::now_utc();
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y"), token(2, "Z")],
            vec![
                cp_venue(0, 0, 1, 1_000 * E18, 1_000 * E18, now),
                cp_venue(1, 1, 2, 1_000 * E18, 1_000 * E18, now),
                cp_venue(2, 0, 2, 1_000 * E18, 1_300 * E18, now),
                cp_venue(3, 0, 1, 1_000 * E18, 1_150 * E18, now),
            ],
        )
        .unwrap();
        let finder = PathFinder::new(config());

        let first = finder.find(&snap, &base(GasModel::free()), now).unwrap();
        let second = finder.find(&snap, &base(GasModel::free()), now).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
        for pair in first.windows(2) {
            assert!(pair[0].rank_cmp(&pair[1]).is_lt());
        }
        // Each venue set appears at most once.
        let mut keys: Vec<_> = first.iter().map(Path::venue_key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), first.len());
    }

    #[test]
    fn triangle_is_found_in_the_profitable_direction() {
        let now = OffsetDateTime::now_utc();
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y"), token(2, "Z")],
            vec![
                cp_venue(0, 0, 1, 1_000 * E18, 1_000 * E18, now),
                cp_venue(1, 1, 2, 1_000 * E18, 1_000 * E18, now),
                cp_venue(2, 0, 2, 1_000 * E18, 1_300 * E18, now),
            ],
        )
        .unwrap();
        let found = PathFinder::new(config()).find(&snap, &base(GasModel::free()), now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hops, 3);
        assert_eq!(found[0].edges[0], EdgeRef { venue: VenueId(2), zero_for_one: true });
        assert_eq!(found[0].describe(&snap), "X -> Z -> Y -> X");

        // Two hops are not enough to close this triangle.
        let short = PathFinder::new(PathFinderConfig { max_hops: 2, ..config() });
        assert!(short.find(&snap, &base(GasModel::free()), now).unwrap().is_empty());
    }

    #[test]
    fn deep_mispricing_is_found_with_a_large_ceiling() {
        let now = OffsetDateTime::now_utc();
        // About 10% mispriced; borrowing the full 50 X loses to price impact.
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y"), token(2, "Z")],
            vec![
                cp_venue(0, 0, 1, 1_000 * E18, 2_000_000 * E18, now),
                cp_venue(1, 1, 2, 5_000_000 * E18, 5_000_000 * E18, now),
                cp_venue(2, 0, 2, 1_000 * E18, 2_200_000 * E18, now),
            ],
        )
        .unwrap();
        let finder = PathFinder::new(PathFinderConfig::default());
        for ceiling in [5 * E18, 50 * E18] {
            let b = BaseToken { capital_ceiling: ceiling, ..base(GasModel::free()) };
            let found = finder.find(&snap, &b, now).unwrap();
            assert_eq!(found.len(), 1, "ceiling {ceiling}");
            assert_eq!(found[0].describe(&snap), "X -> Z -> Y -> X");
            assert!(found[0].amount_in <= ceiling);
        }

        // A larger ceiling never surfaces a smaller profit.
        let small = finder
            .find(&snap, &BaseToken { capital_ceiling: 5 * E18, ..base(GasModel::free()) }, now)
            .unwrap();
        let large = finder.find(&snap, &base(GasModel::free()), now).unwrap();
        assert!(large[0].net_profit >= small[0].net_profit);
        assert!(large[0].net_profit > 76 * E18 as i128 / 100);
    }

    #[test]
    fn exhausted_hop_is_retried_with_a_smaller_amount() {
        use crate::venue::math::Q96;
        use crate::venue::{ConcentratedState, Venue, VenueState};

        let now = OffsetDateTime::now_utc();
        // Price 1 with liquidity known only up to tick 60: a few Y fill it.
        let narrow = Venue {
            id: VenueId(1),
            address: alloy::primitives::Address::repeat_byte(0xa1),
            token0: TokenId(0),
            token1: TokenId(1),
            fee_pips: 3000,
            state: VenueState::Concentrated(ConcentratedState {
                sqrt_price_x96: Q96,
                tick: 0,
                liquidity: 1_000 * E18,
                tick_spacing: 60,
                ticks: vec![],
                window_lower: -60,
                window_upper: 60,
            }),
            refreshed_at: now,
        };
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![cp_venue(0, 0, 1, 1_000 * E18, 1_020 * E18, now), narrow],
        )
        .unwrap();

        let narrow_edge = snap
            .edge(EdgeRef { venue: VenueId(1), zero_for_one: false })
            .unwrap();
        assert!(narrow_edge.amount_out(50 * E18).unwrap().exhausted);

        let found = PathFinder::new(config()).find(&snap, &base(GasModel::free()), now).unwrap();
        assert_eq!(found.len(), 1);
        let path = &found[0];
        assert_eq!(path.describe(&snap), "X -> Y -> X");
        assert!(path.amount_in < 5 * E18);
        assert!(path.net_profit > 0);
        let mut amount = path.amount_in;
        for edge in &path.edges {
            let quote = snap.edge(*edge).unwrap().amount_out(amount).unwrap();
            assert!(!quote.exhausted);
            amount = quote.amount_out;
        }
        assert_eq!(amount, path.amount_out);
    }

    #[test]
    fn cancellation_abandons_the_search() {
        let now = OffsetDateTime::now_utc();
        let snap = mispriced(now, now);
        let cancel = AtomicBool::new(true);
        let result = PathFinder::new(config()).find_cancellable(&snap, &base(GasModel::free()), now, &cancel);
        assert_eq!(result, Err(PathError::Cancelled));
    }

    #[test]
    fn unknown_base_token_is_an_error() {
        let now = OffsetDateTime::now_utc();
        let snap = mispriced(now, now);
        let mut b = base(GasModel::free());
        b.token = TokenId(9);
        assert!(matches!(
            PathFinder::new(config()).find(&snap, &b, now),
            Err(PathError::UnknownBaseToken(_))
        ));
    }

    #[test]
    fn expansion_budget_limits_the_search() {
        let now = OffsetDateTime::now_utc();
        let snap = mispriced(now, now);
        // One expansion only reaches the first hop.
        let finder = PathFinder::new(PathFinderConfig { max_expansions: 1, ..config() });
        assert!(finder.find(&snap, &base(GasModel::free()), now).unwrap().is_empty());
    }
}
