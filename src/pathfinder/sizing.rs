//! Gas cost conversion and borrow sizing.

use alloy::primitives::U256;

use crate::graph::Edge;
use crate::venue::math::{mul_div, mul_div_up, to_amount};
use crate::venue::{Amount, BPS_DENOMINATOR, PIPS_DENOMINATOR};

/// Wei per native token.
pub const WEI_PER_NATIVE: u128 = 1_000_000_000_000_000_000;

/// Shrink iterations before the cap search settles on its last candidate.
const MAX_SHRINK_ROUNDS: usize = 32;

/// Ternary-search rounds; each keeps two thirds of the bracket.
const MAX_SIZING_ROUNDS: usize = 128;

/// The profit search stops at this fraction of the cap.
const SIZING_RESOLUTION: Amount = 10_000;

/// Converts gas units into base-token raw units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasModel {
    /// Fixed overhead per bundle (flash loan, executor dispatch).
    pub base_gas: u64,
    /// Gas per swap hop.
    pub per_hop_gas: u64,
    /// Gas price assumed for projections, in wei.
    pub gas_price_wei: u128,
    /// Raw base-token units per one native token.
    pub native_price_in_base: Amount,
}

impl GasModel {
    /// A model under which gas is free. Used by tests and scans.
    pub fn free() -> Self {
        Self {
            base_gas: 0,
            per_hop_gas: 0,
            gas_price_wei: 0,
            native_price_in_base: 0,
        }
    }

    /// Gas units for a cycle of `hops` swaps.
    pub fn gas_units(&self, hops: usize) -> u64 {
        self.base_gas
            .saturating_add(self.per_hop_gas.saturating_mul(hops as u64))
    }

    /// Projected gas cost of a `hops`-swap cycle in base-token units, rounded up.
    pub fn cost_in_base(&self, hops: usize) -> Amount {
        let wei = U256::from(self.gas_units(hops)) * U256::from(self.gas_price_wei);
        self.wei_to_base(wei)
    }

    /// Convert a wei amount to base-token units, rounded up and saturating.
    pub fn wei_to_base(&self, wei: U256) -> Amount {
        mul_div_up(wei, U256::from(self.native_price_in_base), U256::from(WEI_PER_NATIVE))
            .and_then(to_amount)
            .unwrap_or(Amount::MAX)
    }

    /// Same model with a different gas price.
    pub fn with_gas_price(self, gas_price_wei: u128) -> Self {
        Self { gas_price_wei, ..self }
    }
}

/// Borrow sizing: never take more than a fraction of any hop's input-side
/// reserve, and never more than the capital ceiling. Within those caps the
/// borrow is the amount that maximizes the cycle's profit net of the loan fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowSizer {
    /// Maximum share of a hop's input-side depth a trade may consume.
    pub max_reserve_fraction_bps: u32,
    /// Flash-loan fee charged on the principal, in pips.
    pub loan_fee_pips: u32,
}

impl Default for BorrowSizer {
    fn default() -> Self {
        Self {
            max_reserve_fraction_bps: 1_000,
            loan_fee_pips: 500,
        }
    }
}

impl BorrowSizer {
    /// Largest input allowed against a reserve of `depth`.
    pub fn cap(&self, depth: Amount) -> Amount {
        mul_div(
            U256::from(depth),
            U256::from(self.max_reserve_fraction_bps.min(BPS_DENOMINATOR)),
            U256::from(BPS_DENOMINATOR),
        )
        .and_then(to_amount)
        .unwrap_or(0)
    }

    /// Starting borrow for a path whose first hop is `first`.
    pub fn initial(&self, first: &Edge<'_>, ceiling: Amount) -> Amount {
        ceiling.min(self.cap(first.depth_in()))
    }

    /// Flash-loan fee on `principal`, rounded up.
    pub fn loan_fee(&self, principal: Amount) -> Amount {
        mul_div_up(
            U256::from(principal),
            U256::from(self.loan_fee_pips),
            U256::from(PIPS_DENOMINATOR),
        )
        .and_then(to_amount)
        .unwrap_or(Amount::MAX)
    }

    /// Largest borrow the caps allow: start from the first-hop cap and shrink
    /// until every hop's input fits within its own cap. Quote failures end
    /// shrinking early.
    pub fn upper_bound(&self, edges: &[Edge<'_>], ceiling: Amount) -> Amount {
        let Some(first) = edges.first() else { return 0 };
        let mut borrow = self.initial(first, ceiling);

        for _ in 0..MAX_SHRINK_ROUNDS {
            if borrow == 0 {
                return 0;
            }
            let mut amount = borrow;
            let mut shrink_to = None;
            for edge in edges {
                let cap = self.cap(edge.depth_in());
                if amount > cap {
                    // Scale the borrow by the overshoot, with 1% headroom.
                    let scaled = mul_div(U256::from(borrow), U256::from(cap), U256::from(amount))
                        .and_then(|v| mul_div(v, U256::from(99u8), U256::from(100u8)))
                        .and_then(to_amount)
                        .unwrap_or(0);
                    shrink_to = Some(scaled.min(borrow - 1));
                    break;
                }
                match edge.amount_out(amount) {
                    Ok(q) if !q.exhausted => amount = q.amount_out,
                    _ => return borrow,
                }
            }
            match shrink_to {
                Some(next) => borrow = next,
                None => return borrow,
            }
        }
        borrow
    }

    /// Cycle output less principal and loan fee for a borrow of `amount`,
    /// before gas. `None` when a hop cannot quote or runs out of liquidity.
    pub fn cycle_profit(&self, edges: &[Edge<'_>], amount: Amount) -> Option<i128> {
        let mut out = amount;
        for edge in edges {
            let quote = edge.amount_out(out).ok()?;
            if quote.exhausted {
                return None;
            }
            out = quote.amount_out;
        }
        let to_i = |v: Amount| i128::try_from(v).unwrap_or(i128::MAX);
        Some(
            to_i(out)
                .saturating_sub(to_i(amount))
                .saturating_sub(to_i(self.loan_fee(amount))),
        )
    }

    /// Profit-maximizing borrow in `[1, upper_bound]`.
    ///
    /// Cycle output is concave in the input for both venue kinds and running
    /// out of liquidity only happens above some threshold, so a ternary search
    /// over the capped range finds the peak. The search stops once the bracket
    /// is narrower than `1 / SIZING_RESOLUTION` of the cap. The result may
    /// still be unprofitable; callers check.
    pub fn size(&self, edges: &[Edge<'_>], ceiling: Amount) -> Amount {
        let cap = self.upper_bound(edges, ceiling);
        if cap == 0 {
            return 0;
        }
        let profit = |amount: Amount| self.cycle_profit(edges, amount).unwrap_or(i128::MIN);

        let tolerance = (cap / SIZING_RESOLUTION).max(2);
        let (mut lo, mut hi) = (1, cap);
        for _ in 0..MAX_SIZING_ROUNDS {
            if hi - lo <= tolerance {
                break;
            }
            let third = (hi - lo) / 3;
            let (m1, m2) = (lo + third, hi - third);
            if profit(m1) < profit(m2) {
                lo = m1;
            } else {
                hi = m2;
            }
        }

        let mut best = (lo, profit(lo));
        for amount in [lo + (hi - lo) / 2, hi] {
            let p = profit(amount);
            if p > best.1 {
                best = (amount, p);
            }
        }
        best.0
    }

    /// Share of `depth` consumed by `amount_in`, in basis points.
    pub fn utilization_bps(amount_in: Amount, depth: Amount) -> u32 {
        if depth == 0 {
            return BPS_DENOMINATOR;
        }
        mul_div_up(U256::from(amount_in), U256::from(BPS_DENOMINATOR), U256::from(depth))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot::tests::cp_venue;
    use time::OffsetDateTime;

    const E18: u128 = WEI_PER_NATIVE;

    #[test]
    fn gas_cost_converts_through_native_price() {
        let gas = GasModel {
            base_gas: 100_000,
            per_hop_gas: 50_000,
            gas_price_wei: 20_000_000_000,
            // 1 native = 2000 base units of 6 decimals.
            native_price_in_base: 2_000_000_000,
        };
        assert_eq!(gas.gas_units(2), 200_000);
        // 200k gas * 20 gwei = 0.004 native = 8 base (8_000_000 raw).
        assert_eq!(gas.cost_in_base(2), 8_000_000);
        assert_eq!(GasModel::free().cost_in_base(5), 0);
    }

    #[test]
    fn gas_cost_rounds_up() {
        let gas = GasModel {
            base_gas: 1,
            per_hop_gas: 0,
            gas_price_wei: 1,
            native_price_in_base: 1,
        };
        assert_eq!(gas.cost_in_base(1), 1);
    }

    #[test]
    fn sizer_respects_ceiling_and_first_hop_cap() {
        let now = OffsetDateTime::now_utc();
        let v = cp_venue(0, 0, 1, 1_000 * E18, 2_000 * E18, now);
        let edge = Edge { venue: &v, zero_for_one: true };
        let sizer = BorrowSizer { max_reserve_fraction_bps: 1_000, loan_fee_pips: 0 };

        assert_eq!(sizer.initial(&edge, 500 * E18), 100 * E18);
        assert_eq!(sizer.initial(&edge, 30 * E18), 30 * E18);
    }

    #[test]
    fn sizer_shrinks_to_the_shallowest_hop() {
        let now = OffsetDateTime::now_utc();
        let deep = cp_venue(0, 0, 1, 10_000 * E18, 10_000 * E18, now);
        let shallow = cp_venue(1, 0, 1, 100 * E18, 100 * E18, now);
        let edges = [
            Edge { venue: &deep, zero_for_one: true },
            Edge { venue: &shallow, zero_for_one: false },
        ];
        let sizer = BorrowSizer { max_reserve_fraction_bps: 1_000, loan_fee_pips: 0 };

        let borrow = sizer.upper_bound(&edges, Amount::MAX);
        assert!(borrow > 0);
        let mid = edges[0].amount_out(borrow).unwrap().amount_out;
        assert!(mid <= sizer.cap(shallow.depth(shallow.token1)));
        // Not shrunk far below what the shallow hop allows.
        assert!(mid > sizer.cap(100 * E18) * 9 / 10);
    }

    /// WETH/USDC 1000/2M, USDC/DAI 5M/5M, WETH/DAI 1000/2.2M: about 10%
    /// mispriced, but borrowing the full 50 WETH cap loses money.
    fn deep_triangle(now: OffsetDateTime) -> [crate::venue::Venue; 3] {
        [
            cp_venue(0, 0, 1, 1_000 * E18, 2_000_000 * E18, now),
            cp_venue(1, 1, 2, 5_000_000 * E18, 5_000_000 * E18, now),
            cp_venue(2, 0, 2, 1_000 * E18, 2_200_000 * E18, now),
        ]
    }

    #[test]
    fn sizer_picks_the_profitable_borrow_below_the_cap() {
        let now = OffsetDateTime::now_utc();
        let [v0, v1, v2] = deep_triangle(now);
        let edges = [
            Edge { venue: &v2, zero_for_one: true },
            Edge { venue: &v1, zero_for_one: false },
            Edge { venue: &v0, zero_for_one: false },
        ];
        let sizer = BorrowSizer::default();
        let ceiling = 50 * E18;

        let cap = sizer.upper_bound(&edges, ceiling);
        assert_eq!(cap, 50 * E18);
        assert!(sizer.cycle_profit(&edges, cap).unwrap() < 0);

        let borrow = sizer.size(&edges, ceiling);
        assert!(borrow > 17 * E18 && borrow < 18 * E18, "borrow {borrow}");
        let best = sizer.cycle_profit(&edges, borrow).unwrap();
        assert!(best > 76 * E18 as i128 / 100, "profit {best}");

        // No nearby borrow does meaningfully better.
        let step = borrow / 100;
        for other in [borrow - step, borrow + step, 5 * E18, 30 * E18] {
            assert!(sizer.cycle_profit(&edges, other).unwrap() <= best);
        }
    }

    #[test]
    fn sizer_stays_at_the_cap_when_profit_still_rises() {
        let now = OffsetDateTime::now_utc();
        let [v0, v1, v2] = deep_triangle(now);
        let edges = [
            Edge { venue: &v2, zero_for_one: true },
            Edge { venue: &v1, zero_for_one: false },
            Edge { venue: &v0, zero_for_one: false },
        ];
        let borrow = BorrowSizer::default().size(&edges, 5 * E18);
        assert_eq!(borrow, 5 * E18);
    }

    #[test]
    fn loan_fee_counts_against_profit() {
        let now = OffsetDateTime::now_utc();
        let [v0, v1, v2] = deep_triangle(now);
        let edges = [
            Edge { venue: &v2, zero_for_one: true },
            Edge { venue: &v1, zero_for_one: false },
            Edge { venue: &v0, zero_for_one: false },
        ];
        let free = BorrowSizer { loan_fee_pips: 0, ..BorrowSizer::default() };
        let charged = BorrowSizer::default();
        assert_eq!(charged.loan_fee(10 * E18), 5 * E18 / 1_000);
        assert_eq!(
            free.cycle_profit(&edges, 10 * E18).unwrap() - charged.cycle_profit(&edges, 10 * E18).unwrap(),
            5 * E18 as i128 / 1_000
        );
        // A higher fee never makes the sizer borrow more.
        assert!(charged.size(&edges, 50 * E18) <= free.size(&edges, 50 * E18));
    }

    #[test]
    fn utilization_is_rounded_up() {
        assert_eq!(BorrowSizer::utilization_bps(1, 3), 3_334);
        assert_eq!(BorrowSizer::utilization_bps(5, 0), BPS_DENOMINATOR);
    }
}
