//! Fixed-point helpers: 512-bit mul-div and Q128 rates.

use alloy::primitives::{U256, U512};

/// 2^96.
pub const Q96: U256 = U256::from_limbs([0, 1 << 32, 0, 0]);

/// 2^128, the unit of a Q128 rate.
pub const Q128: U256 = U256::from_limbs([0, 0, 1, 0]);

fn widen(x: U256) -> U512 {
    let l = x.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(x: U512) -> Option<U256> {
    let l = x.as_limbs();
    if l[4..].iter().any(|&limb| limb != 0) {
        return None;
    }
    Some(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// `floor(a * b / d)` with a 512-bit intermediate. `None` on zero divisor or
/// when the result does not fit 256 bits.
pub fn mul_div(a: U256, b: U256, d: U256) -> Option<U256> {
    if d.is_zero() {
        return None;
    }
    narrow(widen(a) * widen(b) / widen(d))
}

/// `ceil(a * b / d)` with a 512-bit intermediate.
pub fn mul_div_up(a: U256, b: U256, d: U256) -> Option<U256> {
    if d.is_zero() {
        return None;
    }
    let product = widen(a) * widen(b);
    let wd = widen(d);
    let q = product / wd;
    let q = if (product % wd).is_zero() { q } else { q + U512::from(1u8) };
    narrow(q)
}

/// `ceil(a / b)`.
pub fn div_up(a: U256, b: U256) -> Option<U256> {
    if b.is_zero() {
        return None;
    }
    let q = a / b;
    if (a % b).is_zero() {
        Some(q)
    } else {
        q.checked_add(U256::from(1u8))
    }
}

/// Narrow to u128, `None` if it does not fit.
pub fn to_amount(x: U256) -> Option<u128> {
    u128::try_from(x).ok()
}

/// Multiply two Q128 rates, rounding up and saturating at `U256::MAX`.
///
/// Saturation keeps the product an upper bound.
pub fn rate_mul_up(a: U256, b: U256) -> U256 {
    mul_div_up(a, b, Q128).unwrap_or(U256::MAX)
}

/// Apply a Q128 rate to an amount, rounding up and saturating.
pub fn apply_rate_up(amount: u128, rate: U256) -> U256 {
    mul_div_up(U256::from(amount), rate, Q128).unwrap_or(U256::MAX)
}

/// `value * (1e6 - fee_pips) / 1e6` rounded up, saturating.
pub fn less_fee_up(value: U256, fee_pips: u32) -> U256 {
    let keep = U256::from(super::types::PIPS_DENOMINATOR.saturating_sub(fee_pips));
    mul_div_up(value, keep, U256::from(super::types::PIPS_DENOMINATOR)).unwrap_or(U256::MAX)
}
