//! Liquidity graph: tokens as nodes, venues as bidirectional edges.
//!
//! This module handles:
//! - Registry loading and initial snapshot construction
//! - Immutable snapshots with per-token adjacency
//! - Bounded, timed venue refresh and degraded-venue tracking
//! - The new-block feed that drives refresh

pub mod refresh;
pub mod registry;
pub mod snapshot;
pub mod watcher;

pub use refresh::{
    spawn_refresh_loop, LiquidityGraph, RefreshConfig, RefreshReport, SnapshotUpdate,
    UpdateTrigger,
};
pub use registry::VenueRegistry;
pub use snapshot::{Edge, EdgeRef, GraphSnapshot};
pub use watcher::{BlockWatcher, ReconnectConfig};
