//! Bundle execution against the chain.
//!
//! This module provides:
//! - The per-attempt state machine
//! - The external chain/relay backend interface and its relay implementation
//! - Fee selection under a gas price ceiling
//! - The coordinator driving simulate, submit, monitor and retry

pub mod attempt;
pub mod backend;
pub mod coordinator;
pub mod fees;
pub mod mock;
pub mod relay;

pub use attempt::{AttemptState, ExecutionAttempt};
pub use backend::{ChainBackend, InclusionStatus, SimulationResult, SubmissionReceipt, TxParams};
pub use coordinator::{ExecutionConfig, ExecutionCoordinator, ExecutionReport, Outcome, RejectReason};
pub use fees::{FeePolicy, GasCeilingExceeded};
pub use mock::{MockBackend, MockBackendConfig, MockSubmission};
pub use relay::RelayBackend;
