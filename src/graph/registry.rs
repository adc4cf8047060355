//! Venue registry loaded from a JSON file.
//!
//! ```json
//! {
//!   "tokens": [{ "symbol": "WETH", "address": "0xC02a…", "decimals": 18 }],
//!   "venues": [{ "address": "0xB4e1…", "kind": "concentrated",
//!                "token0": "USDC", "token1": "WETH", "fee_pips": 500,
//!                "tick_spacing": 10, "refresh_interval_ms": 12000 }]
//! }
//! ```
//!
//! Venue token references may be symbols or addresses. Every venue starts
//! with an empty state and an epoch refresh time, so nothing is searchable
//! until the first refresh lands.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::Deserialize;
use time::OffsetDateTime;

use super::snapshot::GraphSnapshot;
use crate::error::GraphError;
use crate::venue::{ProtocolKind, Token, TokenId, Venue, VenueId, VenueState};

/// Token entry in the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    /// Display symbol.
    pub symbol: String,
    /// Contract address.
    pub address: String,
    /// Decimal precision.
    pub decimals: u8,
}

/// Venue entry in the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueEntry {
    /// Pool address.
    pub address: String,
    /// Protocol kind.
    pub kind: ProtocolKind,
    /// First token (symbol or address).
    pub token0: String,
    /// Second token (symbol or address).
    pub token1: String,
    /// Swap fee in pips.
    pub fee_pips: u32,
    /// Tick spacing (concentrated pools only).
    #[serde(default)]
    pub tick_spacing: i32,
    /// Polling interval for this venue, overriding the global one.
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
}

/// Static token/venue registry.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueRegistry {
    /// Registered tokens.
    pub tokens: Vec<TokenEntry>,
    /// Registered venues.
    pub venues: Vec<VenueEntry>,
}

fn parse_address(value: &str) -> Result<Address, GraphError> {
    Address::from_str(value).map_err(|e| GraphError::Registry(format!("bad address {value}: {e}")))
}

impl VenueRegistry {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Registry(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        serde_json::from_str(text).map_err(|e| GraphError::Registry(e.to_string()))
    }

    /// Per-venue polling intervals, keyed by the ids [`build`](Self::build) assigns.
    pub fn refresh_intervals(&self) -> HashMap<VenueId, Duration> {
        self.venues
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let ms = entry.refresh_interval_ms.filter(|ms| *ms > 0)?;
                Some((VenueId(i as u32), Duration::from_millis(ms)))
            })
            .collect()
    }

    /// Build the initial graph snapshot.
    pub fn build(&self) -> Result<GraphSnapshot, GraphError> {
        let mut tokens = Vec::with_capacity(self.tokens.len());
        for (i, entry) in self.tokens.iter().enumerate() {
            tokens.push(Token {
                id: TokenId(i as u32),
                address: parse_address(&entry.address)?,
                symbol: entry.symbol.clone(),
                decimals: entry.decimals,
            });
        }

        let resolve = |reference: &str| -> Result<&Token, GraphError> {
            let by_symbol = tokens.iter().find(|t| t.symbol.eq_ignore_ascii_case(reference));
            let found = match by_symbol {
                Some(t) => Some(t),
                None => Address::from_str(reference)
                    .ok()
                    .and_then(|a| tokens.iter().find(|t| t.address == a)),
            };
            found.ok_or_else(|| GraphError::UnknownToken(reference.to_string()))
        };

        let mut venues = Vec::with_capacity(self.venues.len());
        for (i, entry) in self.venues.iter().enumerate() {
            let a = resolve(&entry.token0)?;
            let b = resolve(&entry.token1)?;
            // Pools order their pair by address.
            let (token0, token1) = if a.address <= b.address { (a.id, b.id) } else { (b.id, a.id) };
            if entry.kind == ProtocolKind::Concentrated && entry.tick_spacing <= 0 {
                return Err(GraphError::Registry(format!(
                    "venue {} needs a positive tick_spacing",
                    entry.address
                )));
            }
            venues.push(Venue {
                id: VenueId(i as u32),
                address: parse_address(&entry.address)?,
                token0,
                token1,
                fee_pips: entry.fee_pips,
                state: VenueState::empty(entry.kind, entry.tick_spacing),
                refreshed_at: OffsetDateTime::UNIX_EPOCH,
            });
        }

        GraphSnapshot::new(tokens, venues)
    }
}
