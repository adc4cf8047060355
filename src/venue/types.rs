//! Token and venue types shared by the graph, finder and builder.

use std::fmt;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Raw on-chain token amount (no decimal scaling applied).
pub type Amount = u128;

/// One million: fee denominator in pips.
pub const PIPS_DENOMINATOR: u32 = 1_000_000;

/// Basis-point denominator.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Arena handle for a token inside a graph snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub u32);

impl TokenId {
    /// Arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Arena handle for a venue inside a graph snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(pub u32);

impl VenueId {
    /// Arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// An ERC-20 token. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Arena handle.
    pub id: TokenId,
    /// Contract address.
    pub address: Address,
    /// Display symbol.
    pub symbol: String,
    /// Decimal precision.
    pub decimals: u8,
}

/// Exchange protocol of a venue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProtocolKind {
    /// x*y=k pool (Uniswap V2 family).
    ConstantProduct,
    /// Tick-based concentrated liquidity pool (Uniswap V3 family).
    Concentrated,
}

/// Net liquidity change when crossing an initialized tick left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickLiquidity {
    /// Tick index.
    pub tick: i32,
    /// Liquidity added when price crosses upward.
    pub liquidity_net: i128,
}

/// Concentrated-liquidity pool state within a fetched tick window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcentratedState {
    /// Current sqrt price, Q64.96.
    pub sqrt_price_x96: U256,
    /// Current tick.
    pub tick: i32,
    /// In-range liquidity.
    pub liquidity: u128,
    /// Tick spacing of the pool.
    pub tick_spacing: i32,
    /// Initialized ticks inside the window, sorted ascending.
    pub ticks: Vec<TickLiquidity>,
    /// Lowest tick whose liquidity is known.
    pub window_lower: i32,
    /// Highest tick whose liquidity is known.
    pub window_upper: i32,
}

/// Current liquidity state of a venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueState {
    /// Reserves of a constant-product pool.
    ConstantProduct {
        /// Reserve of token0.
        reserve0: u128,
        /// Reserve of token1.
        reserve1: u128,
    },
    /// Concentrated liquidity state.
    Concentrated(ConcentratedState),
}

impl VenueState {
    /// Protocol kind implied by the state variant.
    pub fn kind(&self) -> ProtocolKind {
        match self {
            VenueState::ConstantProduct { .. } => ProtocolKind::ConstantProduct,
            VenueState::Concentrated(_) => ProtocolKind::Concentrated,
        }
    }

    /// An empty state of the given kind.
    pub fn empty(kind: ProtocolKind, tick_spacing: i32) -> Self {
        match kind {
            ProtocolKind::ConstantProduct => VenueState::ConstantProduct {
                reserve0: 0,
                reserve1: 0,
            },
            ProtocolKind::Concentrated => VenueState::Concentrated(ConcentratedState {
                sqrt_price_x96: U256::ZERO,
                tick: 0,
                liquidity: 0,
                tick_spacing,
                ticks: Vec::new(),
                window_lower: 0,
                window_upper: 0,
            }),
        }
    }
}

/// A single liquidity pool. Mutated only by the graph refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Venue {
    /// Arena handle.
    pub id: VenueId,
    /// Pool contract address.
    pub address: Address,
    /// Lower-address token of the pair.
    pub token0: TokenId,
    /// Higher-address token of the pair.
    pub token1: TokenId,
    /// Swap fee in pips.
    pub fee_pips: u32,
    /// Liquidity state.
    pub state: VenueState,
    /// When the state was last refreshed.
    pub refreshed_at: OffsetDateTime,
}

/// Result of quoting an exact-input swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Input actually consumed (less than requested on a partial fill).
    pub amount_in: Amount,
    /// Output produced.
    pub amount_out: Amount,
    /// Execution price deviation from the pre-trade spot price, fee excluded.
    pub price_impact_bps: u32,
    /// True when liquidity inside the known range ran out before the input
    /// was fully consumed.
    pub exhausted: bool,
}
