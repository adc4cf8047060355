//! Priority fee selection under a gas-price ceiling.

use super::backend::TxParams;
use crate::venue::BPS_DENOMINATOR;

/// Fee policy for executor transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeePolicy {
    /// Hard ceiling on `max_fee_per_gas`, in wei.
    pub max_gas_price_wei: u128,
    /// Floor for the priority fee, in wei.
    pub min_priority_fee_wei: u128,
    /// Fee-history percentile targeted for inclusion.
    pub inclusion_percentile: u8,
    /// Tip increase on each retry, in bps.
    pub fee_bump_bps: u32,
}

/// Why fees could not be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasCeilingExceeded {
    /// Current base fee.
    pub base_fee: u128,
    /// Configured ceiling.
    pub ceiling: u128,
}

impl FeePolicy {
    /// Fees for a first attempt: the suggested tip (at least the floor),
    /// clamped so `base_fee + tip` stays within the ceiling.
    pub fn initial(
        &self,
        base_fee: u128,
        suggested_tip: u128,
        gas_limit: u64,
    ) -> Result<TxParams, GasCeilingExceeded> {
        let ceiling = self.max_gas_price_wei;
        if base_fee >= ceiling {
            return Err(GasCeilingExceeded { base_fee, ceiling });
        }
        let tip = suggested_tip
            .max(self.min_priority_fee_wei)
            .min(ceiling - base_fee);
        Ok(self.params(base_fee, tip, gas_limit))
    }

    /// Fees for a retry: the previous tip raised by `fee_bump_bps` (at least
    /// one wei). `None` when the ceiling leaves no room for a strictly
    /// higher tip.
    pub fn bump(&self, previous: &TxParams, base_fee: u128) -> Option<TxParams> {
        let ceiling = self.max_gas_price_wei;
        if base_fee >= ceiling {
            return None;
        }
        let prev_tip = previous.max_priority_fee_per_gas;
        let step = (prev_tip.saturating_mul(u128::from(self.fee_bump_bps)) / u128::from(BPS_DENOMINATOR)).max(1);
        let tip = prev_tip.saturating_add(step).min(ceiling - base_fee);
        if tip <= prev_tip {
            return None;
        }
        Some(self.params(base_fee, tip, previous.gas_limit))
    }

    fn params(&self, base_fee: u128, tip: u128, gas_limit: u64) -> TxParams {
        // Headroom for one base-fee doubling, capped at the ceiling.
        let max_fee = base_fee
            .saturating_mul(2)
            .saturating_add(tip)
            .min(self.max_gas_price_wei);
        TxParams {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: tip,
            gas_limit,
        }
    }
}
