//! Venue adapters: a uniform quote interface over liquidity pools.
//!
//! This module handles:
//! - Token and venue types
//! - Constant-product and concentrated-liquidity pricing
//! - The external price/liquidity source (JSON-RPC and mock)

pub mod concentrated;
pub mod constant_product;
pub mod math;
pub mod mock;
pub mod source;
pub mod types;

use alloy::primitives::U256;

pub use mock::{MockSourceConfig, MockVenueSource};
pub use source::{RpcVenueSource, VenueSource};
pub use types::{
    Amount, ConcentratedState, ProtocolKind, Quote, TickLiquidity, Token, TokenId, Venue,
    VenueId, VenueState, BPS_DENOMINATOR, PIPS_DENOMINATOR,
};

use crate::error::VenueError;

impl Venue {
    /// Protocol kind of this venue.
    pub fn kind(&self) -> ProtocolKind {
        self.state.kind()
    }

    /// Whether the venue trades `token`.
    pub fn has_token(&self, token: TokenId) -> bool {
        self.token0 == token || self.token1 == token
    }

    /// The other side of the pair.
    pub fn counterpart(&self, token: TokenId) -> Option<TokenId> {
        if token == self.token0 {
            Some(self.token1)
        } else if token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }

    /// Swap direction for a token pair: `true` when selling token0.
    pub fn direction(&self, token_in: TokenId, token_out: TokenId) -> Result<bool, VenueError> {
        if token_in == self.token0 && token_out == self.token1 {
            Ok(true)
        } else if token_in == self.token1 && token_out == self.token0 {
            Ok(false)
        } else {
            let token = if self.has_token(token_in) { token_out } else { token_in };
            Err(VenueError::TokenNotInVenue { venue: self.id, token })
        }
    }

    /// Quote an exact-input swap. Never mutates the venue.
    pub fn quote(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
    ) -> Result<Quote, VenueError> {
        let zero_for_one = self.direction(token_in, token_out)?;
        self.quote_directed(zero_for_one, amount_in)
    }

    /// Quote in a known direction.
    pub fn quote_directed(&self, zero_for_one: bool, amount_in: Amount) -> Result<Quote, VenueError> {
        if amount_in == 0 {
            return Err(VenueError::ZeroAmount);
        }
        match &self.state {
            VenueState::ConstantProduct { reserve0, reserve1 } => {
                let (r_in, r_out) = if zero_for_one {
                    (*reserve0, *reserve1)
                } else {
                    (*reserve1, *reserve0)
                };
                constant_product::quote_exact_in(amount_in, r_in, r_out, self.fee_pips)
                    .ok_or(VenueError::InsufficientLiquidity { venue: self.id })
            }
            VenueState::Concentrated(state) => {
                concentrated::quote_exact_in(state, amount_in, zero_for_one, self.fee_pips)
                    .map_err(|e| match e {
                        concentrated::WalkError::NoLiquidity => {
                            VenueError::InsufficientLiquidity { venue: self.id }
                        }
                        concentrated::WalkError::Overflow => VenueError::Overflow { venue: self.id },
                    })
            }
        }
    }

    /// Reserve of `token` available at the current price (virtual reserve for
    /// concentrated pools). Zero for tokens not in the pair.
    pub fn depth(&self, token: TokenId) -> Amount {
        let (d0, d1) = match &self.state {
            VenueState::ConstantProduct { reserve0, reserve1 } => (*reserve0, *reserve1),
            VenueState::Concentrated(state) => concentrated::virtual_reserves(state),
        };
        if token == self.token0 {
            d0
        } else if token == self.token1 {
            d1
        } else {
            0
        }
    }

    /// Fee-adjusted marginal exchange rate in Q128, rounded up. An upper
    /// bound on `amount_out / amount_in` for any trade size.
    pub fn spot_rate_q128(&self, zero_for_one: bool) -> U256 {
        match &self.state {
            VenueState::ConstantProduct { reserve0, reserve1 } => {
                let (r_in, r_out) = if zero_for_one {
                    (*reserve0, *reserve1)
                } else {
                    (*reserve1, *reserve0)
                };
                constant_product::spot_rate_q128(r_in, r_out, self.fee_pips)
            }
            VenueState::Concentrated(state) => {
                concentrated::spot_rate_q128(state, zero_for_one, self.fee_pips)
            }
        }
    }

    /// Seconds since the last refresh.
    pub fn age_secs(&self, now: time::OffsetDateTime) -> i64 {
        (now - self.refreshed_at).whole_seconds()
    }

    /// Whether the venue's data is older than `bound`.
    pub fn is_stale(&self, now: time::OffsetDateTime, bound: std::time::Duration) -> bool {
        (now - self.refreshed_at) > bound
    }
}
