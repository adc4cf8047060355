//! Bundle builder: atomic flash-loan operation sequences.
//!
//! This module handles:
//! - Borrow sizing against the shallowest hop and the capital ceiling
//! - Hop-by-hop simulation with fail-fast repayment checks
//! - The binary operation codec and executor calldata

pub mod builder;
pub mod codec;
pub mod types;

pub use builder::{BundleBuilder, BundleConfig};
pub use codec::{bundle_id, decode_operations, encode_operations, executor_calldata, ICycleExecutor};
pub use types::{Bundle, Operation};
