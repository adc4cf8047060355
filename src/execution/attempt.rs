//! Execution attempt state machine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use super::backend::{SimulationResult, SubmissionReceipt, TxParams};
use crate::bundle::Bundle;
use crate::error::ExecutionError;

/// Lifecycle of one submission attempt.
///
/// `Built → Simulated → Submitted → {Included, Expired, Rejected}`; an
/// attempt may also be rejected before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptState {
    /// Bundle constructed, nothing sent yet.
    Built,
    /// Dry-run against chain state succeeded.
    Simulated,
    /// Sent to the private relay.
    Submitted,
    /// Confirmed on-chain.
    Included,
    /// Target block window elapsed without inclusion.
    Expired,
    /// Refused by simulation, fee policy or the relay.
    Rejected,
}

impl AttemptState {
    /// Check if state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Included | Self::Expired | Self::Rejected)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Built, Simulated)
                | (Built, Rejected)
                | (Simulated, Submitted)
                | (Simulated, Rejected)
                | (Submitted, Included)
                | (Submitted, Expired)
                | (Submitted, Rejected)
        )
    }
}

/// One pass through the state machine for a bundle. Retries create a new
/// attempt; a submitted attempt is never reused.
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Bundle being executed.
    pub bundle: Arc<Bundle>,
    /// Current state.
    pub state: AttemptState,
    /// Fees and gas limit.
    pub params: TxParams,
    /// First and last target block, once submitted.
    pub target_blocks: Option<(u64, u64)>,
    /// Simulation outcome.
    pub simulation: Option<SimulationResult>,
    /// Relay receipt.
    pub receipt: Option<SubmissionReceipt>,
    /// Why the attempt ended unsuccessfully.
    pub failure: Option<String>,
    /// State changes with timestamps.
    pub history: Vec<(AttemptState, OffsetDateTime)>,
}

impl ExecutionAttempt {
    /// First attempt for a bundle.
    pub fn new(bundle: Arc<Bundle>, params: TxParams) -> Self {
        Self {
            number: 1,
            bundle,
            state: AttemptState::Built,
            params,
            target_blocks: None,
            simulation: None,
            receipt: None,
            failure: None,
            history: vec![(AttemptState::Built, OffsetDateTime::now_utc())],
        }
    }

    /// Move to `next`, refusing illegal transitions.
    pub fn transition(&mut self, next: AttemptState) -> Result<(), ExecutionError> {
        if !self.state.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push((next, OffsetDateTime::now_utc()));
        Ok(())
    }

    /// Terminate as rejected with a reason.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), ExecutionError> {
        self.transition(AttemptState::Rejected)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Terminate as expired with a reason.
    pub fn expire(&mut self, reason: impl Into<String>) -> Result<(), ExecutionError> {
        self.transition(AttemptState::Expired)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Fresh attempt for the same bundle with new fees. Only expired attempts
    /// are retried.
    pub fn retry(&self, params: TxParams) -> Result<Self, ExecutionError> {
        if self.state != AttemptState::Expired {
            return Err(ExecutionError::InvalidTransition {
                from: self.state,
                to: AttemptState::Built,
            });
        }
        Ok(Self {
            number: self.number + 1,
            ..Self::new(self.bundle.clone(), params)
        })
    }
}
