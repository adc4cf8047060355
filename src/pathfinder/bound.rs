//! Optimistic return bound used to prune partial paths.

use alloy::primitives::U256;

use crate::graph::GraphSnapshot;
use crate::venue::math::{apply_rate_up, mul_div, rate_mul_up, Q128};
use crate::venue::{Amount, TokenId, VenueId};

/// `best[token][h]`: the largest fee-adjusted spot-rate product (Q128,
/// rounded up) of any walk of at most `h` hops from `token` back to the
/// base token. Venue reuse is ignored, so the table over-approximates every
/// simple cycle.
#[derive(Debug, Clone)]
pub struct ReturnBound {
    max_hops: usize,
    table: Vec<U256>,
}

impl ReturnBound {
    /// Build the table over the edges accepted by `usable`.
    pub fn compute(
        snapshot: &GraphSnapshot,
        base: TokenId,
        max_hops: usize,
        usable: impl Fn(VenueId) -> bool,
    ) -> Self {
        let width = max_hops + 1;
        let tokens = snapshot.tokens().len();
        let mut table = vec![U256::ZERO; tokens * width];
        if base.index() < tokens {
            table[base.index() * width] = Q128;
        }

        for h in 1..=max_hops {
            for t in 0..tokens {
                let mut best = table[t * width + h - 1];
                for edge_ref in snapshot.edges_from(TokenId(t as u32)) {
                    if !usable(edge_ref.venue) {
                        continue;
                    }
                    let Some(edge) = snapshot.edge(*edge_ref) else { continue };
                    let onward = table[edge.token_out().index() * width + h - 1];
                    if onward.is_zero() {
                        continue;
                    }
                    best = best.max(rate_mul_up(edge.spot_rate_q128(), onward));
                }
                table[t * width + h] = best;
            }
        }

        Self { max_hops, table }
    }

    /// Bound for `token` with `hops` hops remaining (zero for unknown tokens).
    pub fn best(&self, token: TokenId, hops: usize) -> U256 {
        let width = self.max_hops + 1;
        self.table
            .get(token.index() * width + hops.min(self.max_hops))
            .copied()
            .unwrap_or(U256::ZERO)
    }
}

/// Upper bound on gross profit for any borrow up to the exploratory one.
///
/// `amount` is the current partial output at the exploratory borrow,
/// `prefix_rate` the spot-rate product of the hops taken so far and
/// `remaining` the best return from here. The final output is at most both
/// `amount × remaining` and `x × prefix_rate × remaining` for a borrow `x`,
/// so profit is at most `c − c / k` with `c = amount × remaining` and
/// `k = prefix_rate × remaining`.
pub fn profit_upper_bound(amount: Amount, prefix_rate: U256, remaining: U256) -> i128 {
    let k = rate_mul_up(prefix_rate, remaining);
    if k <= Q128 {
        return 0;
    }
    let c = apply_rate_up(amount, remaining);
    let floor_input = mul_div(c, Q128, k).unwrap_or(U256::ZERO);
    let bound = c.saturating_sub(floor_input);
    i128::try_from(bound).unwrap_or(i128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot::tests::{cp_venue, token};
    use time::OffsetDateTime;

    fn snapshot() -> GraphSnapshot {
        let now = OffsetDateTime::now_utc();
        GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![
                cp_venue(0, 0, 1, 1_000, 2_000, now),
                cp_venue(1, 0, 1, 1_000, 2_400, now),
            ],
        )
        .unwrap()
    }

    #[test]
    fn bound_dominates_every_cycle() {
        let snap = snapshot();
        let bound = ReturnBound::compute(&snap, TokenId(0), 3, |_| true);

        assert_eq!(bound.best(TokenId(0), 0), Q128);
        assert_eq!(bound.best(TokenId(1), 0), U256::ZERO);

        // Best single hop Y -> X is venue 0 at 0.5 * 0.997.
        let y_to_x = bound.best(TokenId(1), 1);
        let expected = snap.venue(VenueId(0)).unwrap().spot_rate_q128(false);
        assert_eq!(y_to_x, expected);

        // X -> Y on venue 1 then Y -> X on venue 0 is ~1.19x.
        let cycle = bound.best(TokenId(0), 2);
        assert!(cycle > Q128);
        let out = apply_rate_up(1_000_000, cycle);
        assert!(out >= U256::from(1_190_000u64));
    }

    #[test]
    fn unusable_venues_are_ignored() {
        let snap = snapshot();
        let bound = ReturnBound::compute(&snap, TokenId(0), 2, |v| v != VenueId(1));
        // Only venue 0 remains: any return trip loses the fee twice.
        assert!(bound.best(TokenId(0), 2) == Q128);
    }

    #[test]
    fn profit_bound_is_zero_without_an_edge() {
        assert_eq!(profit_upper_bound(1_000, Q128, Q128), 0);
        // 2x round trip from an exploratory output of 100: c = 200, k = 2,
        // bound = 200 - 100.
        let two = Q128 * U256::from(2u8);
        assert_eq!(profit_upper_bound(100, Q128, two), 100);
    }
}
