//! Bundle and operation types.

use alloy::primitives::{Address, B256};
use time::OffsetDateTime;

use crate::error::BundleError;
use crate::venue::{Amount, ProtocolKind, TokenId, VenueId};

/// One step of an atomic bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Flash-borrow the principal.
    Borrow {
        /// Borrowed token.
        token: Address,
        /// Principal.
        amount: Amount,
    },
    /// Exact-input swap on one venue.
    Swap {
        /// Hop index, starting at zero.
        step: u8,
        /// Venue handle.
        venue: VenueId,
        /// Pool contract.
        pool: Address,
        /// Pool protocol.
        kind: ProtocolKind,
        /// Token sold.
        token_in: Address,
        /// Token bought.
        token_out: Address,
        /// Whether token0 is sold.
        zero_for_one: bool,
        /// Input amount (the previous hop's simulated output).
        amount_in: Amount,
        /// Simulated output.
        amount_out: Amount,
        /// Output below which the executor reverts.
        min_amount_out: Amount,
    },
    /// Repay principal plus loan fee.
    Repay {
        /// Repaid token.
        token: Address,
        /// Principal plus fee.
        amount: Amount,
    },
}

/// An atomic borrow → swaps → repay sequence with its projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Content hash of the operations and creation time.
    pub id: B256,
    /// Base token handle.
    pub base: TokenId,
    /// Base token contract.
    pub base_token: Address,
    /// Ordered operations.
    pub operations: Vec<Operation>,
    /// Borrowed amount.
    pub principal: Amount,
    /// Flash-loan fee.
    pub loan_fee: Amount,
    /// Simulated output of the final hop.
    pub expected_output: Amount,
    /// `expected_output − repay − gas_cost`.
    pub expected_profit: i128,
    /// Net profit below which execution aborts.
    pub min_net_profit: i128,
    /// Gas units assumed for the projection.
    pub gas_estimate: u64,
    /// Projected gas cost in base-token units.
    pub gas_cost: Amount,
    /// Raw base-token units per native token, for converting actual gas.
    pub native_price_in_base: Amount,
    /// Snapshot the bundle was built from.
    pub snapshot_version: u64,
    /// Build time.
    pub created_at: OffsetDateTime,
}

impl Bundle {
    /// Principal plus loan fee.
    pub fn repay_amount(&self) -> Amount {
        self.principal.saturating_add(self.loan_fee)
    }

    /// Number of swap hops.
    pub fn hops(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Swap { .. }))
            .count()
    }

    /// Venues touched by the swaps, in hop order.
    pub fn touched_venues(&self) -> Vec<VenueId> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Swap { venue, .. } => Some(*venue),
                _ => None,
            })
            .collect()
    }

    /// Check the structural invariants: borrow first, repay last, swaps
    /// chained from the base token back to it, repay equal to principal
    /// plus fee and covered by the final output.
    pub fn validate(&self) -> Result<(), BundleError> {
        let invalid = |msg: &str| Err(BundleError::Invalid(msg.to_string()));

        let (Some(first), Some(last)) = (self.operations.first(), self.operations.last()) else {
            return invalid("empty bundle");
        };
        match first {
            Operation::Borrow { token, amount } if *token == self.base_token && *amount == self.principal => {}
            Operation::Borrow { .. } => return invalid("borrow does not match principal"),
            _ => return invalid("first operation must borrow"),
        }
        match last {
            Operation::Repay { token, amount } if *token == self.base_token && *amount == self.repay_amount() => {}
            Operation::Repay { .. } => return invalid("repay does not match principal plus fee"),
            _ => return invalid("last operation must repay"),
        }

        let swaps = &self.operations[1..self.operations.len() - 1];
        if swaps.len() < 2 {
            return invalid("a cycle needs at least two swaps");
        }
        let mut holding = self.base_token;
        let mut amount = self.principal;
        for (i, op) in swaps.iter().enumerate() {
            let Operation::Swap {
                step,
                token_in,
                token_out,
                amount_in,
                amount_out,
                min_amount_out,
                ..
            } = op
            else {
                return invalid("borrow or repay in the middle of the bundle");
            };
            if usize::from(*step) != i {
                return invalid("swap steps out of order");
            }
            if *token_in != holding || *amount_in != amount {
                return invalid("swap does not consume the previous output");
            }
            if min_amount_out > amount_out {
                return invalid("minimum output above expected output");
            }
            holding = *token_out;
            amount = *amount_out;
        }
        if holding != self.base_token {
            return invalid("swaps do not return to the base token");
        }
        if amount != self.expected_output {
            return invalid("final swap output does not match expected output");
        }
        if self.expected_output < self.repay_amount() {
            return invalid("final output does not cover repayment");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    pub(crate) fn sample_bundle() -> Bundle {
        let (x, y) = (addr(0x01), addr(0x02));
        Bundle {
            id: B256::ZERO,
            base: TokenId(0),
            base_token: x,
            operations: vec![
                Operation::Borrow { token: x, amount: 1_000 },
                Operation::Swap {
                    step: 0,
                    venue: VenueId(1),
                    pool: addr(0xb1),
                    kind: ProtocolKind::ConstantProduct,
                    token_in: x,
                    token_out: y,
                    zero_for_one: true,
                    amount_in: 1_000,
                    amount_out: 2_300,
                    min_amount_out: 2_288,
                },
                Operation::Swap {
                    step: 1,
                    venue: VenueId(0),
                    pool: addr(0xa0),
                    kind: ProtocolKind::Concentrated,
                    token_in: y,
                    token_out: x,
                    zero_for_one: false,
                    amount_in: 2_300,
                    amount_out: 1_100,
                    min_amount_out: 1_094,
                },
                Operation::Repay { token: x, amount: 1_001 },
            ],
            principal: 1_000,
            loan_fee: 1,
            expected_output: 1_100,
            expected_profit: 99,
            min_net_profit: 10,
            gas_estimate: 0,
            gas_cost: 0,
            native_price_in_base: 0,
            snapshot_version: 3,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn well_formed_bundle_validates() {
        let bundle = sample_bundle();
        assert_eq!(bundle.validate(), Ok(()));
        assert_eq!(bundle.hops(), 2);
        assert_eq!(bundle.touched_venues(), vec![VenueId(1), VenueId(0)]);
        assert_eq!(bundle.repay_amount(), 1_001);
    }

    #[test]
    fn broken_chains_are_rejected() {
        let mut bundle = sample_bundle();
        bundle.operations.swap(1, 2);
        assert!(bundle.validate().is_err());

        let mut bundle = sample_bundle();
        bundle.operations.pop();
        assert!(bundle.validate().is_err());

        let mut bundle = sample_bundle();
        bundle.loan_fee = 2;
        assert!(bundle.validate().is_err());

        let mut bundle = sample_bundle();
        bundle.expected_output = 900;
        assert!(bundle.validate().is_err());
    }
}
