//! Unified error types for the cycle arbitrage engine.

use thiserror::Error;

use crate::execution::AttemptState;
use crate::venue::{TokenId, VenueId};

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Venue quoting error.
    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    /// Price/liquidity source error.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Liquidity graph construction error.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Path search error.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Bundle construction error.
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// Execution state machine error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Chain/relay backend error.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// JSON-RPC transport error.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Quote errors raised by a single venue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// One side of the pool is empty, or the trade would produce nothing.
    #[error("insufficient liquidity in venue {venue}")]
    InsufficientLiquidity {
        /// Venue that could not fill.
        venue: VenueId,
    },

    /// The requested token pair is not traded by this venue.
    #[error("token {token} is not traded by venue {venue}")]
    TokenNotInVenue {
        /// Venue queried.
        venue: VenueId,
        /// Offending token.
        token: TokenId,
    },

    /// Quote requested for a zero input amount.
    #[error("amount in must be positive")]
    ZeroAmount,

    /// Fixed-point arithmetic overflowed.
    #[error("arithmetic overflow in venue {venue}")]
    Overflow {
        /// Venue being quoted.
        venue: VenueId,
    },
}

/// Errors from the external price/liquidity source.
///
/// These are transient: the venue is retried on the next refresh cycle and
/// marked degraded after repeated failure.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source did not answer within the per-call timeout.
    #[error("venue {venue} refresh timed out after {timeout_ms}ms")]
    Timeout {
        /// Venue being refreshed.
        venue: VenueId,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The source answered with something we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The source is temporarily unavailable.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// HTTP transport failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Liquidity graph construction errors. These are configuration errors and
/// fatal to the process.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A venue references a token that was never registered.
    #[error("unknown token: {0}")]
    UnknownToken(String),

    /// The same token address was registered twice.
    #[error("duplicate token: {0}")]
    DuplicateToken(String),

    /// The same venue address was registered twice.
    #[error("duplicate venue: {0}")]
    DuplicateVenue(String),

    /// A venue lists the same token on both sides.
    #[error("venue {0} trades a token against itself")]
    SelfPair(String),

    /// The registry file could not be parsed.
    #[error("registry error: {0}")]
    Registry(String),
}

/// Path search errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The base token is not part of the graph.
    #[error("unknown base token: {0}")]
    UnknownBaseToken(String),

    /// The search was abandoned because a fresher snapshot arrived.
    #[error("search cancelled by a newer snapshot")]
    Cancelled,
}

/// Bundle construction errors. None of these are system faults: each rejects
/// a single candidate path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    /// A venue on the path is older than the staleness bound.
    #[error("venue {venue} is stale ({age_secs}s old)")]
    StaleData {
        /// Stale venue.
        venue: VenueId,
        /// Age of its last refresh in seconds.
        age_secs: i64,
    },

    /// Repayment cannot be covered.
    #[error("infeasible at step {step}: need {required}, best case {available}")]
    Infeasible {
        /// Hop index at which feasibility failed (path length = final check).
        step: usize,
        /// Principal plus loan fee.
        required: u128,
        /// Best achievable output at that point.
        available: u128,
    },

    /// Projected net profit is below the configured minimum.
    #[error("projected profit {projected} below minimum {minimum}")]
    BelowMinimumProfit {
        /// Projected net profit.
        projected: i128,
        /// Required minimum.
        minimum: i128,
    },

    /// A hop could not be quoted.
    #[error("quote failed at step {step}: {source}")]
    Quote {
        /// Hop index.
        step: usize,
        /// Underlying venue error.
        source: VenueError,
    },

    /// Borrow sizing produced nothing to borrow.
    #[error("no borrowable amount for this path")]
    ZeroBorrow,

    /// Structural invariant violated.
    #[error("invalid bundle: {0}")]
    Invalid(String),

    /// Encoded bundle could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors raised by the execution state machine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Illegal state transition.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: AttemptState,
        /// Requested state.
        to: AttemptState,
    },
}

/// Errors from the chain/simulation backend or private relay.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The call did not complete within its timeout.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// Simulation reverted.
    #[error("simulation reverted: {0}")]
    Revert(String),

    /// Relay refused the bundle.
    #[error("relay rejected bundle: {0}")]
    RelayRejected(String),

    /// Unexpected response shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Transaction or request signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// HTTP transport failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// JSON-RPC transport errors, shared by the venue source and the relay.
#[derive(Error, Debug)]
pub enum RpcError {
    /// HTTP transport failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// Unexpected response shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<RpcError> for SourceError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Http(e) if e.is_timeout() || e.is_connect() => {
                SourceError::Unavailable(e.to_string())
            }
            RpcError::Http(e) => SourceError::Http(e),
            RpcError::Rpc { code, message } => {
                SourceError::Unavailable(format!("rpc error {code}: {message}"))
            }
            RpcError::InvalidResponse(msg) => SourceError::InvalidResponse(msg),
        }
    }
}

impl From<RpcError> for BackendError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Http(e) => BackendError::Http(e),
            RpcError::Rpc { code, message } => BackendError::Rpc { code, message },
            RpcError::InvalidResponse(msg) => BackendError::InvalidResponse(msg),
        }
    }
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Message parsing failed.
    #[error("failed to parse websocket message: {0}")]
    ParseError(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
