//! Constant-product (x*y=k) pricing.
//!
//! Integer formula identical to the Uniswap V2 router: the fee is taken off
//! the input before the invariant is applied, and the output rounds down.

use alloy::primitives::U256;

use super::math::{less_fee_up, mul_div, Q128};
use super::types::{Amount, Quote, BPS_DENOMINATOR, PIPS_DENOMINATOR};

/// Exact-input swap result, or `None` if the pool cannot fill.
///
/// Zero reserves on either side, or a trade too small to produce a single
/// unit of output, yield `None`.
pub fn quote_exact_in(
    amount_in: Amount,
    reserve_in: u128,
    reserve_out: u128,
    fee_pips: u32,
) -> Option<Quote> {
    if reserve_in == 0 || reserve_out == 0 || amount_in == 0 {
        return None;
    }

    let keep = U256::from(PIPS_DENOMINATOR.saturating_sub(fee_pips));
    let amount_in_with_fee = U256::from(amount_in) * keep;
    let denominator = U256::from(reserve_in) * U256::from(PIPS_DENOMINATOR) + amount_in_with_fee;

    let amount_out = mul_div(amount_in_with_fee, U256::from(reserve_out), denominator)
        .and_then(|v| u128::try_from(v).ok())?;
    if amount_out == 0 {
        return None;
    }

    // Spot-relative impact: effective_in / (reserve_in + effective_in).
    let impact = mul_div(
        amount_in_with_fee,
        U256::from(BPS_DENOMINATOR),
        denominator,
    )
    .and_then(|v| u32::try_from(v).ok())
    .unwrap_or(BPS_DENOMINATOR);

    Some(Quote {
        amount_in,
        amount_out,
        price_impact_bps: impact,
        exhausted: false,
    })
}

/// Fee-adjusted marginal rate `reserve_out / reserve_in * (1 - fee)` in Q128,
/// rounded up. Zero when the pool is empty.
pub fn spot_rate_q128(reserve_in: u128, reserve_out: u128, fee_pips: u32) -> U256 {
    if reserve_in == 0 || reserve_out == 0 {
        return U256::ZERO;
    }
    let raw = super::math::mul_div_up(U256::from(reserve_out), Q128, U256::from(reserve_in))
        .unwrap_or(U256::MAX);
    less_fee_up(raw, fee_pips)
}

#[cfg(test)]
mod tests {
    use super::*;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn v2_router(amount_in: u128, reserve_in: u128, reserve_out: u128) -> u128 {
        let amount_in_with_fee = U256::from(amount_in) * U256::from(997u16);
        let out = amount_in_with_fee * U256::from(reserve_out)
            / (U256::from(reserve_in) * U256::from(1000u16) + amount_in_with_fee);
        out.to::<u128>()
    }

    #[test]
    fn matches_v2_router_formula() {
        let q = quote_exact_in(10 * E18, 1000 * E18, 2000 * E18, 3000).unwrap();
        assert_eq!(q.amount_out, v2_router(10 * E18, 1000 * E18, 2000 * E18));
        assert!(!q.exhausted);
        assert_eq!(q.amount_in, 10 * E18);

        // Deep pools: the product of input and reserve exceeds u128.
        let q = quote_exact_in(500 * E18, 2_000_000 * E18, 5_000_000 * E18, 3000).unwrap();
        assert_eq!(q.amount_out, v2_router(500 * E18, 2_000_000 * E18, 5_000_000 * E18));
    }

    #[test]
    fn small_whole_unit_scenario() {
        // 10 X into (1000 X, 2000 Y) at 0.3%: floor(19_940_000 / 1_009_970) = 19
        let q = quote_exact_in(10, 1000, 2000, 3000).unwrap();
        assert_eq!(q.amount_out, 19);
    }

    #[test]
    fn zero_reserve_cannot_fill() {
        assert!(quote_exact_in(10, 0, 2000, 3000).is_none());
        assert!(quote_exact_in(10, 1000, 0, 3000).is_none());
    }

    #[test]
    fn dust_input_cannot_fill() {
        assert!(quote_exact_in(1, 1_000_000, 1_000, 3000).is_none());
    }

    #[test]
    fn price_impact_grows_with_size() {
        let small = quote_exact_in(E18, 1000 * E18, 1000 * E18, 3000).unwrap();
        let large = quote_exact_in(100 * E18, 1000 * E18, 1000 * E18, 3000).unwrap();
        assert!(small.price_impact_bps < large.price_impact_bps);
        // 99.7 / 1099.7 ~ 9.07%
        assert_eq!(large.price_impact_bps, 906);
    }

    #[test]
    fn spot_rate_bounds_output() {
        let rate = spot_rate_q128(1000 * E18, 2000 * E18, 3000);
        let q = quote_exact_in(10 * E18, 1000 * E18, 2000 * E18, 3000).unwrap();
        let bound = super::super::math::apply_rate_up(10 * E18, rate);
        assert!(U256::from(q.amount_out) <= bound);
    }
}
