//! Mock chain backend for unit testing.
//!
//! Serves a block counter that advances on every query, fixed fees, a
//! scripted simulation result and a queue of inclusion statuses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{keccak256, B256};
use async_trait::async_trait;

use super::backend::{ChainBackend, InclusionStatus, SimulationResult, SubmissionReceipt, TxParams};
use crate::bundle::Bundle;
use crate::error::BackendError;

const GWEI: u128 = 1_000_000_000;

/// Configuration for mock backend behavior.
#[derive(Debug, Clone)]
pub struct MockBackendConfig {
    /// First block number served.
    pub start_block: u64,
    /// Base fee in wei.
    pub base_fee: u128,
    /// Priority fee returned for every percentile, in wei.
    pub priority_fee: u128,
    /// Result of every simulation.
    pub simulation: SimulationResult,
    /// Refuse every submission with this message.
    pub reject_submissions: Option<String>,
}

impl Default for MockBackendConfig {
    fn default() -> Self {
        Self {
            start_block: 100,
            base_fee: 30 * GWEI,
            priority_fee: 2 * GWEI,
            simulation: SimulationResult {
                success: true,
                profit: 99,
                gas_used: 100_000,
                revert_reason: None,
            },
            reject_submissions: None,
        }
    }
}

/// A recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSubmission {
    /// Bundle id.
    pub bundle_id: B256,
    /// Fees used.
    pub params: TxParams,
    /// First target block.
    pub target_from: u64,
    /// Last target block.
    pub target_to: u64,
}

/// Mock chain backend for testing.
#[derive(Debug, Clone)]
pub struct MockBackend {
    config: MockBackendConfig,
    block: Arc<AtomicU64>,
    simulations: Arc<AtomicU64>,
    inclusions: Arc<Mutex<VecDeque<InclusionStatus>>>,
    submissions: Arc<Mutex<Vec<MockSubmission>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockBackend {
    /// Create a mock backend.
    pub fn new(config: MockBackendConfig) -> Self {
        Self {
            block: Arc::new(AtomicU64::new(config.start_block)),
            config,
            simulations: Arc::new(AtomicU64::new(0)),
            inclusions: Arc::new(Mutex::new(VecDeque::new())),
            submissions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue the status returned by the next inclusion poll. Once the queue
    /// is empty every poll reports `Pending`.
    pub fn push_inclusion(&self, status: InclusionStatus) {
        lock(&self.inclusions).push_back(status);
    }

    /// Submissions accepted so far.
    pub fn submissions(&self) -> Vec<MockSubmission> {
        lock(&self.submissions).clone()
    }

    /// Simulations served so far.
    pub fn simulations(&self) -> u64 {
        self.simulations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainBackend for MockBackend {
    async fn block_number(&self) -> Result<u64, BackendError> {
        Ok(self.block.fetch_add(1, Ordering::SeqCst))
    }

    async fn base_fee(&self) -> Result<u128, BackendError> {
        Ok(self.config.base_fee)
    }

    async fn priority_fee_percentile(&self, _percentile: u8) -> Result<u128, BackendError> {
        Ok(self.config.priority_fee)
    }

    async fn simulate(
        &self,
        _bundle: &Bundle,
        _params: &TxParams,
        _block: u64,
    ) -> Result<SimulationResult, BackendError> {
        self.simulations.fetch_add(1, Ordering::SeqCst);
        Ok(self.config.simulation.clone())
    }

    async fn submit(
        &self,
        bundle: &Bundle,
        params: &TxParams,
        target_from: u64,
        target_to: u64,
    ) -> Result<SubmissionReceipt, BackendError> {
        if let Some(msg) = &self.config.reject_submissions {
            return Err(BackendError::RelayRejected(msg.clone()));
        }
        let mut submissions = lock(&self.submissions);
        submissions.push(MockSubmission {
            bundle_id: bundle.id,
            params: *params,
            target_from,
            target_to,
        });
        let tx_hash = keccak256((submissions.len() as u64).to_be_bytes());
        Ok(SubmissionReceipt {
            bundle_hash: format!("{tx_hash:#x}"),
            tx_hash,
            target_from,
            target_to,
        })
    }

    async fn inclusion(&self, _receipt: &SubmissionReceipt) -> Result<InclusionStatus, BackendError> {
        Ok(lock(&self.inclusions)
            .pop_front()
            .unwrap_or(InclusionStatus::Pending))
    }
}
