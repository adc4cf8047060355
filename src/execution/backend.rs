//! External chain/simulation backend interface.

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::Serialize;

use crate::bundle::Bundle;
use crate::error::BackendError;

/// Fees and gas limit for the executor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxParams {
    /// EIP-1559 fee cap in wei.
    pub max_fee_per_gas: u128,
    /// EIP-1559 tip in wei.
    pub max_priority_fee_per_gas: u128,
    /// Gas limit.
    pub gas_limit: u64,
}

/// Outcome of simulating a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    /// Whether the bundle executed without reverting.
    pub success: bool,
    /// Profit reported by the executor in base-token units, before gas.
    pub profit: i128,
    /// Gas consumed.
    pub gas_used: u64,
    /// Revert reason, if any.
    pub revert_reason: Option<String>,
}

/// Acknowledgement from the private relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Relay bundle hash.
    pub bundle_hash: String,
    /// Executor transaction hash.
    pub tx_hash: B256,
    /// First target block.
    pub target_from: u64,
    /// Last target block.
    pub target_to: u64,
}

/// Inclusion status of a submitted bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionStatus {
    /// Not seen on-chain yet.
    Pending,
    /// Mined successfully.
    Included {
        /// Block number.
        block: u64,
        /// Gas consumed.
        gas_used: u64,
        /// Effective gas price in wei.
        effective_gas_price: u128,
        /// Realized profit in base-token units before gas, when the backend
        /// can observe it.
        actual_profit: Option<i128>,
    },
    /// Mined but reverted, or refused by the relay after submission.
    Failed(String),
}

/// Chain, simulation and private-relay operations the coordinator needs.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, BackendError>;

    /// Base fee for the next block, in wei.
    async fn base_fee(&self) -> Result<u128, BackendError>;

    /// Recent priority fee at `percentile` (0–100), in wei.
    async fn priority_fee_percentile(&self, percentile: u8) -> Result<u128, BackendError>;

    /// Dry-run the bundle on top of `block`.
    async fn simulate(
        &self,
        bundle: &Bundle,
        params: &TxParams,
        block: u64,
    ) -> Result<SimulationResult, BackendError>;

    /// Submit privately for blocks `target_from..=target_to`.
    async fn submit(
        &self,
        bundle: &Bundle,
        params: &TxParams,
        target_from: u64,
        target_to: u64,
    ) -> Result<SubmissionReceipt, BackendError>;

    /// Current inclusion status of a submission.
    async fn inclusion(&self, receipt: &SubmissionReceipt) -> Result<InclusionStatus, BackendError>;
}
