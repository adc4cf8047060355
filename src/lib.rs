//! Multi-hop DEX cycle arbitrage.
//!
//! The bot keeps a versioned snapshot of on-chain liquidity, searches it for
//! cycles that start and end in a base token and return more than they
//! borrow, and executes the best cycle atomically: a flash loan funds the
//! first hop, every swap carries a minimum output, and the loan is repaid
//! from the final hop in the same transaction.
//!
//! ```text
//! borrow 10 WETH ──► WETH→USDC (venue A) ──► USDC→DAI (venue B)
//!                 ──► DAI→WETH (venue C) ──► repay 10.005 WETH, keep the rest
//! ```
//!
//! # Modules
//!
//! - [`venue`]: Venue models, quoting math and state sources
//! - [`graph`]: Liquidity graph snapshots, refresh and block feed
//! - [`pathfinder`]: Bounded cycle search and borrow sizing
//! - [`bundle`]: Flash-loan bundle construction and encoding
//! - [`execution`]: Simulation, relay submission and inclusion tracking
//! - [`engine`]: Discovery and execution control loop
//! - [`sink`]: Result reporting
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`api`]: HTTP API for health/metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod bundle;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod metrics;
pub mod pathfinder;
pub mod rpc;
pub mod signing;
pub mod sink;
pub mod utils;
pub mod venue;

pub use config::Config;
pub use error::{BotError, Result};
