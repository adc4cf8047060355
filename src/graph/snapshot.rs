//! Immutable point-in-time view of the token/venue graph.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::Address;
use time::OffsetDateTime;

use crate::error::{GraphError, VenueError};
use crate::venue::{Amount, Quote, Token, TokenId, Venue, VenueId};

/// Directed view of a venue: a handle plus a swap direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeRef {
    /// Venue handle.
    pub venue: VenueId,
    /// `true` when the edge sells token0 for token1.
    pub zero_for_one: bool,
}

/// Borrowed edge: a venue in a fixed direction. Quotes are recomputed from
/// the venue state on every call.
#[derive(Debug, Clone, Copy)]
pub struct Edge<'a> {
    /// Underlying venue.
    pub venue: &'a Venue,
    /// Swap direction.
    pub zero_for_one: bool,
}

impl Edge<'_> {
    /// Input token.
    pub fn token_in(&self) -> TokenId {
        if self.zero_for_one {
            self.venue.token0
        } else {
            self.venue.token1
        }
    }

    /// Output token.
    pub fn token_out(&self) -> TokenId {
        if self.zero_for_one {
            self.venue.token1
        } else {
            self.venue.token0
        }
    }

    /// Pure quote for this direction.
    pub fn amount_out(&self, amount_in: Amount) -> Result<Quote, VenueError> {
        self.venue.quote_directed(self.zero_for_one, amount_in)
    }

    /// Liquidity available on the input side.
    pub fn depth_in(&self) -> Amount {
        self.venue.depth(self.token_in())
    }

    /// Fee-adjusted spot rate (Q128).
    pub fn spot_rate_q128(&self) -> alloy::primitives::U256 {
        self.venue.spot_rate_q128(self.zero_for_one)
    }
}

/// Arena of tokens and venues with per-token adjacency.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    version: u64,
    taken_at: OffsetDateTime,
    tokens: Vec<Token>,
    venues: Vec<Venue>,
    degraded: Vec<bool>,
    adjacency: Vec<Vec<EdgeRef>>,
    by_address: HashMap<Address, TokenId>,
}

impl GraphSnapshot {
    /// Build the initial snapshot, validating token references.
    pub fn new(tokens: Vec<Token>, venues: Vec<Venue>) -> Result<Self, GraphError> {
        let mut by_address = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if token.id.index() != i {
                return Err(GraphError::Registry(format!(
                    "token {} has handle {} at position {i}",
                    token.symbol, token.id
                )));
            }
            if by_address.insert(token.address, token.id).is_some() {
                return Err(GraphError::DuplicateToken(token.address.to_string()));
            }
        }

        let mut seen = std::collections::HashSet::with_capacity(venues.len());
        for (i, venue) in venues.iter().enumerate() {
            if venue.id.index() != i {
                return Err(GraphError::Registry(format!(
                    "venue {} has handle {} at position {i}",
                    venue.address, venue.id
                )));
            }
            if !seen.insert(venue.address) {
                return Err(GraphError::DuplicateVenue(venue.address.to_string()));
            }
            for t in [venue.token0, venue.token1] {
                if t.index() >= tokens.len() {
                    return Err(GraphError::UnknownToken(t.to_string()));
                }
            }
            if venue.token0 == venue.token1 {
                return Err(GraphError::SelfPair(venue.address.to_string()));
            }
        }

        let degraded = vec![false; venues.len()];
        let adjacency = build_adjacency(tokens.len(), &venues, &degraded);
        Ok(Self {
            version: 0,
            taken_at: OffsetDateTime::now_utc(),
            tokens,
            venues,
            degraded,
            adjacency,
            by_address,
        })
    }

    /// Successor snapshot with new venue states and degraded flags.
    /// Tokens and venue identities are unchanged.
    pub(crate) fn successor(&self, venues: Vec<Venue>, degraded: Vec<bool>, now: OffsetDateTime) -> Self {
        let adjacency = build_adjacency(self.tokens.len(), &venues, &degraded);
        Self {
            version: self.version + 1,
            taken_at: now,
            tokens: self.tokens.clone(),
            venues,
            degraded,
            adjacency,
            by_address: self.by_address.clone(),
        }
    }

    /// Monotonic snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When this snapshot was published.
    pub fn taken_at(&self) -> OffsetDateTime {
        self.taken_at
    }

    /// All tokens.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// All venues, including degraded ones.
    pub fn venues(&self) -> &[Venue] {
        &self.venues
    }

    /// Token by handle.
    pub fn token(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id.index())
    }

    /// Venue by handle.
    pub fn venue(&self, id: VenueId) -> Option<&Venue> {
        self.venues.get(id.index())
    }

    /// Token by contract address.
    pub fn token_by_address(&self, address: &Address) -> Option<&Token> {
        self.by_address.get(address).and_then(|id| self.token(*id))
    }

    /// Token by symbol (case-insensitive, first match).
    pub fn token_by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Whether a venue is currently degraded.
    pub fn is_degraded(&self, id: VenueId) -> bool {
        self.degraded.get(id.index()).copied().unwrap_or(true)
    }

    /// Number of degraded venues.
    pub fn degraded_count(&self) -> usize {
        self.degraded.iter().filter(|d| **d).count()
    }

    /// Outgoing edges of a token over non-degraded venues, sorted.
    pub fn edges_from(&self, token: TokenId) -> &[EdgeRef] {
        self.adjacency.get(token.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve an edge handle.
    pub fn edge(&self, edge: EdgeRef) -> Option<Edge<'_>> {
        self.venue(edge.venue).map(|venue| Edge {
            venue,
            zero_for_one: edge.zero_for_one,
        })
    }

    /// Venues usable for search at `now`: neither degraded nor stale.
    pub fn is_usable(&self, id: VenueId, now: OffsetDateTime, staleness: Duration) -> bool {
        !self.is_degraded(id) && self.venue(id).is_some_and(|v| !v.is_stale(now, staleness))
    }
}

fn build_adjacency(token_count: usize, venues: &[Venue], degraded: &[bool]) -> Vec<Vec<EdgeRef>> {
    let mut adjacency = vec![Vec::new(); token_count];
    for venue in venues {
        if degraded.get(venue.id.index()).copied().unwrap_or(false) {
            continue;
        }
        if let Some(list) = adjacency.get_mut(venue.token0.index()) {
            list.push(EdgeRef { venue: venue.id, zero_for_one: true });
        }
        if let Some(list) = adjacency.get_mut(venue.token1.index()) {
            list.push(EdgeRef { venue: venue.id, zero_for_one: false });
        }
    }
    for list in &mut adjacency {
        list.sort();
    }
    adjacency
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::venue::VenueState;

    pub(crate) fn token(id: u32, symbol: &str) -> Token {
        Token {
            id: TokenId(id),
            address: Address::with_last_byte(id as u8 + 1),
            symbol: symbol.to_string(),
            decimals: 18,
        }
    }

    pub(crate) fn cp_venue(id: u32, t0: u32, t1: u32, r0: u128, r1: u128, at: OffsetDateTime) -> Venue {
        Venue {
            id: VenueId(id),
            address: Address::repeat_byte(0xa0 + id as u8),
            token0: TokenId(t0),
            token1: TokenId(t1),
            fee_pips: 3000,
            state: VenueState::ConstantProduct { reserve0: r0, reserve1: r1 },
            refreshed_at: at,
        }
    }

    #[test]
    fn adjacency_is_sorted_and_directed() {
        let now = OffsetDateTime::now_utc();
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y"), token(2, "Z")],
            vec![
                cp_venue(0, 0, 1, 10, 10, now),
                cp_venue(1, 1, 2, 10, 10, now),
                cp_venue(2, 0, 2, 10, 10, now),
            ],
        )
        .unwrap();

        let from_x = snap.edges_from(TokenId(0));
        assert_eq!(
            from_x,
            &[
                EdgeRef { venue: VenueId(0), zero_for_one: true },
                EdgeRef { venue: VenueId(2), zero_for_one: true },
            ]
        );
        let e = snap.edge(from_x[0]).unwrap();
        assert_eq!(e.token_in(), TokenId(0));
        assert_eq!(e.token_out(), TokenId(1));
        assert_eq!(snap.token_by_symbol("y").unwrap().id, TokenId(1));
    }

    #[test]
    fn unknown_token_reference_is_fatal() {
        let now = OffsetDateTime::now_utc();
        let err = GraphSnapshot::new(vec![token(0, "X")], vec![cp_venue(0, 0, 1, 1, 1, now)]);
        assert!(matches!(err, Err(GraphError::UnknownToken(_))));
    }

    #[test]
    fn degraded_venues_leave_adjacency() {
        let now = OffsetDateTime::now_utc();
        let snap = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![cp_venue(0, 0, 1, 10, 10, now), cp_venue(1, 0, 1, 10, 10, now)],
        )
        .unwrap();
        let next = snap.successor(snap.venues().to_vec(), vec![true, false], now);
        assert_eq!(next.version(), 1);
        assert_eq!(next.edges_from(TokenId(0)).len(), 1);
        assert!(next.is_degraded(VenueId(0)));
        assert_eq!(next.degraded_count(), 1);
        // The old snapshot is untouched.
        assert_eq!(snap.edges_from(TokenId(0)).len(), 2);
    }
}
