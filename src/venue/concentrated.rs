//! Concentrated-liquidity pricing.
//!
//! Integer ports of the Uniswap V3 `TickMath`, `SqrtPriceMath` and `SwapMath`
//! libraries, and an exact-input tick walk over the initialized ticks of the
//! fetched window. The walk never leaves the window: if the input is not
//! consumed by the time the price reaches the window edge, the quote is a
//! partial fill.

use alloy::primitives::U256;

use super::math::{div_up, less_fee_up, mul_div, mul_div_up, Q128, Q96};
use super::types::{Amount, ConcentratedState, Quote, BPS_DENOMINATOR, PIPS_DENOMINATOR};

/// Lowest tick representable by the pool.
pub const MIN_TICK: i32 = -887_272;
/// Highest tick representable by the pool.
pub const MAX_TICK: i32 = 887_272;

/// Why a concentrated quote could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkError {
    /// No output can be produced within the window.
    NoLiquidity,
    /// Fixed-point overflow or an invalid tick.
    Overflow,
}

const TICK_RATIOS: [(u32, u128); 19] = [
    (0x2, 0xfff97272373d413259a46990580e213a),
    (0x4, 0xfff2e50f5f656932ef12357cf3c7fdcc),
    (0x8, 0xffe5caca7e10e4e61c3624eaa0941cd0),
    (0x10, 0xffcb9843d60f6159c9db58835c926644),
    (0x20, 0xff973b41fa98c081472e6896dfb254c0),
    (0x40, 0xff2ea16466c96a3843ec78b326b52861),
    (0x80, 0xfe5dee046a99a2a811c461f1969c3053),
    (0x100, 0xfcbe86c7900a88aedcffc83b479aa3a4),
    (0x200, 0xf987a7253ac413176f2b074cf7815e54),
    (0x400, 0xf3392b0822b70005940c7a398e4b70f3),
    (0x800, 0xe7159475a2c29b7443b29c7fa6e889d9),
    (0x1000, 0xd097f3bdfd2022b8845ad8f792aa5825),
    (0x2000, 0xa9f746462d870fdf8a65dc1f90e061e5),
    (0x4000, 0x70d869a156d2a1b890bb3df62baf32f7),
    (0x8000, 0x31be135f97d08fd981231505542fcfa6),
    (0x10000, 0x9aa508b5b7a84e1c677de54f3e99bc9),
    (0x20000, 0x5d6af8dedb81196699c329225ee604),
    (0x40000, 0x2216e584f5fa1ea926041bedfe98),
    (0x80000, 0x48a170391f7dc42444e8fa2),
];

/// `sqrt(1.0001^tick) * 2^96`, rounded up. `None` outside the tick range.
pub fn sqrt_ratio_at_tick(tick: i32) -> Option<U256> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return None;
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001u128)
    } else {
        Q128
    };
    for (bit, factor) in TICK_RATIOS {
        if abs_tick & bit != 0 {
            ratio = (ratio * U256::from(factor)) >> 128;
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    let remainder: U256 = ratio % (U256::from(1u8) << 32);
    let sqrt = (ratio >> 32) + if remainder.is_zero() { U256::ZERO } else { U256::from(1u8) };
    Some(sqrt)
}

/// Token0 needed to move between two prices at constant liquidity.
fn amount0_delta(a: U256, b: U256, liquidity: u128, round_up: bool) -> Option<U256> {
    let (lo, hi) = if a > b { (b, a) } else { (a, b) };
    if lo.is_zero() {
        return None;
    }
    let numerator1 = U256::from(liquidity) << 96;
    let numerator2 = hi - lo;
    if round_up {
        div_up(mul_div_up(numerator1, numerator2, hi)?, lo)
    } else {
        Some(mul_div(numerator1, numerator2, hi)? / lo)
    }
}

/// Token1 needed to move between two prices at constant liquidity.
fn amount1_delta(a: U256, b: U256, liquidity: u128, round_up: bool) -> Option<U256> {
    let (lo, hi) = if a > b { (b, a) } else { (a, b) };
    if round_up {
        mul_div_up(U256::from(liquidity), hi - lo, Q96)
    } else {
        mul_div(U256::from(liquidity), hi - lo, Q96)
    }
}

/// Price after adding `amount` of input at constant liquidity.
fn next_sqrt_price_from_input(
    sqrt_price: U256,
    liquidity: u128,
    amount: U256,
    zero_for_one: bool,
) -> Option<U256> {
    if liquidity == 0 {
        return None;
    }
    if amount.is_zero() {
        return Some(sqrt_price);
    }
    if zero_for_one {
        // L * P / (L + amount * P), rounded up so the price never overshoots.
        let numerator1: U256 = U256::from(liquidity) << 96;
        let product = amount.checked_mul(sqrt_price);
        match product.and_then(|p| numerator1.checked_add(p)) {
            Some(denominator) => mul_div_up(numerator1, sqrt_price, denominator),
            None => div_up(numerator1, (numerator1 / sqrt_price).checked_add(amount)?),
        }
    } else {
        let quotient = mul_div(amount, Q96, U256::from(liquidity))?;
        sqrt_price.checked_add(quotient)
    }
}

/// One exact-input swap step within a constant-liquidity range.
#[derive(Debug, Clone, Copy)]
struct SwapStep {
    sqrt_next: U256,
    amount_in: U256,
    amount_out: U256,
    fee_amount: U256,
}

fn compute_swap_step(
    sqrt_current: U256,
    sqrt_target: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_pips: u32,
) -> Option<SwapStep> {
    let zero_for_one = sqrt_current >= sqrt_target;
    let keep = U256::from(PIPS_DENOMINATOR - fee_pips);
    let remaining_less_fee = mul_div(amount_remaining, keep, U256::from(PIPS_DENOMINATOR))?;

    let to_target = if zero_for_one {
        amount0_delta(sqrt_target, sqrt_current, liquidity, true)?
    } else {
        amount1_delta(sqrt_current, sqrt_target, liquidity, true)?
    };

    let sqrt_next = if remaining_less_fee >= to_target {
        sqrt_target
    } else {
        next_sqrt_price_from_input(sqrt_current, liquidity, remaining_less_fee, zero_for_one)?
    };
    let reached = sqrt_next == sqrt_target;

    let (amount_in, amount_out) = if zero_for_one {
        let amount_in = if reached {
            to_target
        } else {
            amount0_delta(sqrt_next, sqrt_current, liquidity, true)?
        };
        (amount_in, amount1_delta(sqrt_next, sqrt_current, liquidity, false)?)
    } else {
        let amount_in = if reached {
            to_target
        } else {
            amount1_delta(sqrt_current, sqrt_next, liquidity, true)?
        };
        (amount_in, amount0_delta(sqrt_current, sqrt_next, liquidity, false)?)
    };

    let fee_amount = if reached {
        mul_div_up(amount_in, U256::from(fee_pips), keep)?
    } else {
        amount_remaining.checked_sub(amount_in)?
    };

    Some(SwapStep {
        sqrt_next,
        amount_in,
        amount_out,
        fee_amount,
    })
}

/// Apply a signed liquidity delta.
fn add_delta(liquidity: u128, delta: i128) -> Option<u128> {
    if delta < 0 {
        liquidity.checked_sub(delta.unsigned_abs())
    } else {
        liquidity.checked_add(delta as u128)
    }
}

/// Exact-input quote over the known window.
pub fn quote_exact_in(
    state: &ConcentratedState,
    amount_in: Amount,
    zero_for_one: bool,
    fee_pips: u32,
) -> Result<Quote, WalkError> {
    if state.sqrt_price_x96.is_zero() || fee_pips >= PIPS_DENOMINATOR {
        return Err(WalkError::NoLiquidity);
    }

    let lower = state.window_lower.max(MIN_TICK);
    let upper = state.window_upper.min(MAX_TICK);
    let limit_tick = if zero_for_one { lower } else { upper };
    let sqrt_limit = sqrt_ratio_at_tick(limit_tick).ok_or(WalkError::Overflow)?;

    let start = state.sqrt_price_x96;
    let mut sqrt_price = start;
    let mut tick = state.tick;
    let mut liquidity = state.liquidity;
    let mut remaining = U256::from(amount_in);
    let mut out = U256::ZERO;

    let overshot = |p: U256| if zero_for_one { p <= sqrt_limit } else { p >= sqrt_limit };

    while !remaining.is_zero() && !overshot(sqrt_price) {
        let next = if zero_for_one {
            state
                .ticks
                .iter()
                .rev()
                .map(|t| t.tick)
                .find(|&t| t <= tick)
                .map_or(limit_tick, |t| t.max(limit_tick))
        } else {
            state
                .ticks
                .iter()
                .map(|t| t.tick)
                .find(|&t| t > tick)
                .map_or(limit_tick, |t| t.min(limit_tick))
        };
        let sqrt_next_tick = sqrt_ratio_at_tick(next).ok_or(WalkError::Overflow)?;

        // A tick reported slightly behind the price is crossed without a step.
        let behind = if zero_for_one {
            sqrt_next_tick > sqrt_price
        } else {
            sqrt_next_tick < sqrt_price
        };

        if !behind {
            let step =
                compute_swap_step(sqrt_price, sqrt_next_tick, liquidity, remaining, fee_pips)
                    .ok_or(WalkError::Overflow)?;

            remaining = remaining
                .checked_sub(step.amount_in + step.fee_amount)
                .ok_or(WalkError::Overflow)?;
            out += step.amount_out;
            sqrt_price = step.sqrt_next;
        }

        if behind || sqrt_price == sqrt_next_tick {
            if next != limit_tick {
                if let Some(t) = state.ticks.iter().find(|t| t.tick == next) {
                    let net = if zero_for_one { -t.liquidity_net } else { t.liquidity_net };
                    liquidity = add_delta(liquidity, net).ok_or(WalkError::Overflow)?;
                }
            }
            tick = if zero_for_one { next - 1 } else { next };
        }
    }

    let amount_out = u128::try_from(out).map_err(|_| WalkError::Overflow)?;
    if amount_out == 0 {
        return Err(WalkError::NoLiquidity);
    }
    let unused = u128::try_from(remaining).map_err(|_| WalkError::Overflow)?;

    let (lo, hi) = if zero_for_one { (sqrt_price, start) } else { (start, sqrt_price) };
    let price_impact_bps = impact_bps(lo, hi);

    Ok(Quote {
        amount_in: amount_in - unused,
        amount_out,
        price_impact_bps,
        exhausted: unused > 0,
    })
}

/// Price ratio drop `1 - (lo/hi)^2` in basis points.
fn impact_bps(lo: U256, hi: U256) -> u32 {
    let bps = U256::from(BPS_DENOMINATOR);
    mul_div(lo, bps, hi)
        .and_then(|x| mul_div(x, lo, hi))
        .and_then(|kept| u32::try_from(kept).ok())
        .map_or(BPS_DENOMINATOR, |kept| BPS_DENOMINATOR.saturating_sub(kept))
}

/// Virtual reserves `(x, y)` of the current in-range liquidity.
pub fn virtual_reserves(state: &ConcentratedState) -> (u128, u128) {
    if state.sqrt_price_x96.is_zero() || state.liquidity == 0 {
        return (0, 0);
    }
    let l = U256::from(state.liquidity);
    let x = mul_div(l, Q96, state.sqrt_price_x96).and_then(|v| u128::try_from(v).ok());
    let y = mul_div(l, state.sqrt_price_x96, Q96).and_then(|v| u128::try_from(v).ok());
    (x.unwrap_or(u128::MAX), y.unwrap_or(u128::MAX))
}

/// Fee-adjusted marginal rate in Q128, rounded up.
pub fn spot_rate_q128(state: &ConcentratedState, zero_for_one: bool, fee_pips: u32) -> U256 {
    let p = state.sqrt_price_x96;
    if p.is_zero() {
        return U256::ZERO;
    }
    // price(token1/token0) = p^2 / 2^192; in Q128 that is p^2 / 2^64.
    let raw = if zero_for_one {
        mul_div_up(p, p, U256::from(1u8) << 64)
    } else {
        // 2^320 / p^2 = ceil(2^192 / p) * 2^128 / p
        div_up(U256::from(1u8) << 192, p).and_then(|a| mul_div_up(a, Q128, p))
    };
    less_fee_up(raw.unwrap_or(U256::MAX), fee_pips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::math::apply_rate_up;
    use crate::venue::types::TickLiquidity;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn state(liquidity: u128, ticks: Vec<TickLiquidity>, lower: i32, upper: i32) -> ConcentratedState {
        ConcentratedState {
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity,
            tick_spacing: 60,
            ticks,
            window_lower: lower,
            window_upper: upper,
        }
    }

    #[test]
    fn tick_math_reference_points() {
        assert_eq!(sqrt_ratio_at_tick(0), Some(Q96));
        assert_eq!(sqrt_ratio_at_tick(MIN_TICK), Some(U256::from(4295128739u64)));
        assert_eq!(
            sqrt_ratio_at_tick(MAX_TICK),
            Some(U256::from_str_radix("1461446703485210103287273052203988822378723970342", 10).unwrap())
        );
        assert_eq!(sqrt_ratio_at_tick(MAX_TICK + 1), None);
    }

    #[test]
    fn tick_math_is_monotonic() {
        let mut prev = sqrt_ratio_at_tick(-1000).unwrap();
        for t in (-999..=1000).step_by(37) {
            let next = sqrt_ratio_at_tick(t).unwrap();
            assert!(next > prev, "tick {t}");
            prev = next;
        }
    }

    #[test]
    fn swap_within_range_is_not_exhausted() {
        let s = state(1_000_000 * E18, vec![], -6000, 6000);
        let q = quote_exact_in(&s, E18, true, 3000).unwrap();
        assert!(!q.exhausted);
        assert_eq!(q.amount_in, E18);
        // Price 1.0, 0.3% fee, negligible impact.
        assert!(q.amount_out < E18 * 997 / 1000);
        assert!(q.amount_out > E18 * 996 / 1000);
    }

    #[test]
    fn output_never_exceeds_spot_bound() {
        let s = state(10_000 * E18, vec![], -6000, 6000);
        for zero_for_one in [true, false] {
            let rate = spot_rate_q128(&s, zero_for_one, 3000);
            let q = quote_exact_in(&s, 50 * E18, zero_for_one, 3000).unwrap();
            assert!(U256::from(q.amount_out) <= apply_rate_up(q.amount_in, rate));
        }
    }

    #[test]
    fn window_edge_yields_partial_fill() {
        // Tiny range around the current price, huge input.
        let s = state(1_000 * E18, vec![], -60, 60);
        let q = quote_exact_in(&s, 1_000_000 * E18, true, 3000).unwrap();
        assert!(q.exhausted);
        assert!(q.amount_in < 1_000_000 * E18);
        assert!(q.amount_out > 0);
        assert!(q.price_impact_bps > 0);
    }

    #[test]
    fn crossing_into_empty_range_stops_output() {
        // Liquidity only in [-120, 120]; crossing -120 downward removes it all.
        let ticks = vec![
            TickLiquidity { tick: -120, liquidity_net: (1_000 * E18) as i128 },
            TickLiquidity { tick: 120, liquidity_net: -((1_000 * E18) as i128) },
        ];
        let s = state(1_000 * E18, ticks, -6000, 6000);
        let partial = quote_exact_in(&s, 1_000_000 * E18, true, 3000).unwrap();
        assert!(partial.exhausted);

        let bounded = state(1_000 * E18, vec![], -120, 6000);
        let edge = quote_exact_in(&bounded, 1_000_000 * E18, true, 3000).unwrap();
        assert_eq!(partial.amount_out, edge.amount_out);
    }

    #[test]
    fn zero_liquidity_reports_no_liquidity() {
        let s = state(0, vec![], -6000, 6000);
        assert_eq!(quote_exact_in(&s, E18, true, 3000), Err(WalkError::NoLiquidity));
    }

    #[test]
    fn virtual_reserves_at_unit_price() {
        let s = state(1_000 * E18, vec![], -60, 60);
        assert_eq!(virtual_reserves(&s), (1_000 * E18, 1_000 * E18));
    }
}
