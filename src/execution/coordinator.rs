//! Bundle execution: simulate, submit privately, monitor, retry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{B256, U256};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use super::attempt::{AttemptState, ExecutionAttempt};
use super::backend::{ChainBackend, InclusionStatus, SubmissionReceipt, TxParams};
use super::fees::FeePolicy;
use crate::bundle::Bundle;
use crate::error::{BackendError, ExecutionError};
use crate::metrics;
use crate::pathfinder::GasModel;
use crate::venue::{Amount, TokenId, BPS_DENOMINATOR};

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Stop after simulation.
    pub dry_run: bool,
    /// Retries after an expired attempt.
    pub max_retries: u32,
    /// Number of consecutive blocks a submission targets.
    pub target_block_window: u64,
    /// Extra gas on top of the bundle estimate, in bps.
    pub gas_limit_buffer_bps: u32,
    /// Simulation timeout.
    pub simulation_timeout_ms: u64,
    /// Submission timeout.
    pub submit_timeout_ms: u64,
    /// Timeout for fee, block and inclusion queries.
    pub query_timeout_ms: u64,
    /// Delay between inclusion polls.
    pub poll_interval_ms: u64,
    /// Consecutive failed polls before the attempt is treated as expired.
    pub max_poll_errors: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_retries: 1,
            target_block_window: 3,
            gas_limit_buffer_bps: 2_000,
            simulation_timeout_ms: 2_000,
            submit_timeout_ms: 2_000,
            query_timeout_ms: 1_000,
            poll_interval_ms: 1_000,
            max_poll_errors: 3,
        }
    }
}

/// Why an attempt was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Base fee alone exceeds the gas price ceiling.
    GasCeiling {
        /// Current base fee in wei.
        base_fee: u128,
        /// Configured ceiling in wei.
        ceiling: u128,
    },
    /// Simulation backend returned an error.
    SimulationFailed(String),
    /// Bundle reverted in simulation.
    SimulationReverted(String),
    /// Simulation did not answer in time.
    SimulationTimeout,
    /// Simulated net profit is below the minimum.
    BelowMinimumProfit {
        /// Simulated profit net of gas.
        simulated: i128,
        /// Required minimum.
        minimum: i128,
    },
    /// Relay refused the submission.
    RelayRejected(String),
    /// Mined but reverted, or invalidated after submission.
    ExecutionFailed(String),
    /// Fee or block queries failed before anything was sent.
    Backend(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GasCeiling { base_fee, ceiling } => {
                write!(f, "base fee {base_fee} exceeds gas ceiling {ceiling}")
            }
            Self::SimulationFailed(msg) => write!(f, "simulation failed: {msg}"),
            Self::SimulationReverted(msg) => write!(f, "simulation reverted: {msg}"),
            Self::SimulationTimeout => write!(f, "simulation timed out"),
            Self::BelowMinimumProfit { simulated, minimum } => {
                write!(f, "simulated profit {simulated} below minimum {minimum}")
            }
            Self::RelayRejected(msg) => write!(f, "relay rejected: {msg}"),
            Self::ExecutionFailed(msg) => write!(f, "execution failed: {msg}"),
            Self::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

/// Final outcome of executing a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Confirmed on-chain.
    Included,
    /// Refused; never retried.
    Rejected(RejectReason),
    /// Every attempt expired, or no higher fee was possible.
    Abandoned,
    /// Simulated successfully; submission disabled.
    DryRun,
}

impl Outcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Included => "included",
            Self::Rejected(_) => "rejected",
            Self::Abandoned => "abandoned",
            Self::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "rejected ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of [`ExecutionCoordinator::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Bundle executed.
    pub bundle: Arc<Bundle>,
    /// Bundle id.
    pub bundle_id: B256,
    /// Base token.
    pub base: TokenId,
    /// Final outcome.
    pub outcome: Outcome,
    /// Every attempt, in order.
    pub attempts: Vec<ExecutionAttempt>,
    /// Profit projected by the builder.
    pub projected_profit: i128,
    /// Net profit from the last successful simulation.
    pub simulated_profit: Option<i128>,
    /// Realized net profit, once included.
    pub actual_profit: Option<i128>,
    /// Gas consumed on-chain.
    pub gas_used: Option<u64>,
    /// Gas paid, in wei.
    pub gas_cost_wei: Option<u128>,
    /// Gas paid, in base-token units.
    pub gas_cost: Option<Amount>,
    /// Block the bundle landed in.
    pub included_block: Option<u64>,
    /// Wall time from start to final outcome.
    pub latency: Duration,
    /// Whether a fresh discovery cycle should run.
    pub requeue_discovery: bool,
}

impl ExecutionReport {
    fn new(bundle: Arc<Bundle>) -> Self {
        Self {
            bundle_id: bundle.id,
            base: bundle.base,
            projected_profit: bundle.expected_profit,
            bundle,
            outcome: Outcome::Abandoned,
            attempts: Vec::new(),
            simulated_profit: None,
            actual_profit: None,
            gas_used: None,
            gas_cost_wei: None,
            gas_cost: None,
            included_block: None,
            latency: Duration::ZERO,
            requeue_discovery: false,
        }
    }

    /// Whether the bundle landed on-chain.
    pub fn is_included(&self) -> bool {
        self.outcome == Outcome::Included
    }
}

/// How an attempt ended.
enum AttemptEnd {
    Terminal(Outcome),
    Included {
        block: u64,
        gas_used: u64,
        effective_gas_price: u128,
        actual_profit: Option<i128>,
    },
    Expired,
}

/// Drives bundles through simulate, submit and monitor.
pub struct ExecutionCoordinator {
    backend: Arc<dyn ChainBackend>,
    fees: FeePolicy,
    config: ExecutionConfig,
}

impl ExecutionCoordinator {
    /// Create a coordinator.
    pub fn new(backend: Arc<dyn ChainBackend>, fees: FeePolicy, config: ExecutionConfig) -> Self {
        Self { backend, fees, config }
    }

    /// Coordinator settings.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute a bundle to a final outcome.
    #[instrument(skip(self, bundle), fields(bundle_id = %bundle.id, base = %bundle.base))]
    pub async fn execute(&self, bundle: Arc<Bundle>) -> ExecutionReport {
        let start = Instant::now();
        let mut report = ExecutionReport::new(bundle.clone());
        self.run(bundle, &mut report).await;

        report.latency = start.elapsed();
        metrics::record_execution_latency(start);
        metrics::inc_execution_outcome(report.outcome.label());
        info!(
            outcome = %report.outcome,
            attempts = report.attempts.len(),
            projected_profit = report.projected_profit,
            simulated_profit = ?report.simulated_profit,
            actual_profit = ?report.actual_profit,
            latency_ms = report.latency.as_millis() as u64,
            "Execution finished"
        );
        report
    }

    async fn run(&self, bundle: Arc<Bundle>, report: &mut ExecutionReport) {
        let gas_limit = self.gas_limit(&bundle);
        let params = match self.initial_params(gas_limit).await {
            Ok(params) => params,
            Err(reason) => {
                let mut attempt = ExecutionAttempt::new(bundle, TxParams {
                    max_fee_per_gas: 0,
                    max_priority_fee_per_gas: 0,
                    gas_limit,
                });
                if let Err(e) = attempt.reject(reason.to_string()) {
                    error!(error = %e, "Attempt state corrupted");
                }
                report.attempts.push(attempt);
                report.outcome = Outcome::Rejected(reason);
                return;
            }
        };

        let mut attempt = ExecutionAttempt::new(bundle, params);
        loop {
            let end = self.run_attempt(&mut attempt, report).await;
            report.attempts.push(attempt.clone());

            let end = match end {
                Ok(end) => end,
                Err(e) => {
                    error!(error = %e, attempt = attempt.number, "Attempt state corrupted");
                    report.outcome = Outcome::Abandoned;
                    report.requeue_discovery = true;
                    return;
                }
            };

            match end {
                AttemptEnd::Terminal(outcome) => {
                    report.outcome = outcome;
                    return;
                }
                AttemptEnd::Included {
                    block,
                    gas_used,
                    effective_gas_price,
                    actual_profit,
                } => {
                    let gas_cost_wei = u128::from(gas_used).saturating_mul(effective_gas_price);
                    let gas_cost = gas_in_base(&attempt.bundle, U256::from(gas_cost_wei));
                    let gross = actual_profit
                        .or_else(|| attempt.simulation.as_ref().map(|s| s.profit))
                        .unwrap_or(report.projected_profit);
                    report.outcome = Outcome::Included;
                    report.included_block = Some(block);
                    report.gas_used = Some(gas_used);
                    report.gas_cost_wei = Some(gas_cost_wei);
                    report.gas_cost = Some(gas_cost);
                    report.actual_profit = Some(gross.saturating_sub(gas_cost as i128));
                    return;
                }
                AttemptEnd::Expired => {
                    if attempt.number > self.config.max_retries {
                        warn!(attempts = attempt.number, "Retries exhausted, abandoning");
                        report.outcome = Outcome::Abandoned;
                        report.requeue_discovery = true;
                        return;
                    }
                    let bumped = match self.query("base_fee", self.backend.base_fee()).await {
                        Ok(base_fee) => self.fees.bump(&attempt.params, base_fee),
                        Err(e) => {
                            warn!(error = %e, "Base fee unavailable for retry");
                            None
                        }
                    };
                    let Some(params) = bumped else {
                        warn!(
                            tip = attempt.params.max_priority_fee_per_gas,
                            "No higher fee possible under the ceiling, abandoning"
                        );
                        report.outcome = Outcome::Abandoned;
                        report.requeue_discovery = true;
                        return;
                    };
                    match attempt.retry(params) {
                        Ok(next) => {
                            info!(
                                attempt = next.number,
                                tip = params.max_priority_fee_per_gas,
                                "Retrying with higher priority fee"
                            );
                            attempt = next;
                        }
                        Err(e) => {
                            error!(error = %e, "Retry refused");
                            report.outcome = Outcome::Abandoned;
                            report.requeue_discovery = true;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn gas_limit(&self, bundle: &Bundle) -> u64 {
        let buffer = bundle.gas_estimate.saturating_mul(u64::from(self.config.gas_limit_buffer_bps))
            / u64::from(BPS_DENOMINATOR);
        bundle.gas_estimate.saturating_add(buffer)
    }

    async fn initial_params(&self, gas_limit: u64) -> Result<TxParams, RejectReason> {
        let base_fee = self
            .query("base_fee", self.backend.base_fee())
            .await
            .map_err(|e| RejectReason::Backend(e.to_string()))?;
        let tip = self
            .query(
                "priority_fee",
                self.backend.priority_fee_percentile(self.fees.inclusion_percentile),
            )
            .await
            .map_err(|e| RejectReason::Backend(e.to_string()))?;
        self.fees
            .initial(base_fee, tip, gas_limit)
            .map_err(|e| RejectReason::GasCeiling {
                base_fee: e.base_fee,
                ceiling: e.ceiling,
            })
    }

    async fn run_attempt(
        &self,
        attempt: &mut ExecutionAttempt,
        report: &mut ExecutionReport,
    ) -> Result<AttemptEnd, ExecutionError> {
        let bundle = attempt.bundle.clone();
        let params = attempt.params;

        let block = match self.query("block_number", self.backend.block_number()).await {
            Ok(block) => block,
            Err(e) => return reject(attempt, RejectReason::Backend(e.to_string())),
        };

        // Simulate
        let sim_start = Instant::now();
        let simulated = timeout(
            Duration::from_millis(self.config.simulation_timeout_ms),
            self.backend.simulate(&bundle, &params, block),
        )
        .await;
        metrics::record_simulation_latency(sim_start);

        let simulation = match simulated {
            Err(_) => return reject(attempt, RejectReason::SimulationTimeout),
            Ok(Err(BackendError::Revert(msg))) => {
                return reject(attempt, RejectReason::SimulationReverted(msg))
            }
            Ok(Err(e)) => return reject(attempt, RejectReason::SimulationFailed(e.to_string())),
            Ok(Ok(sim)) if !sim.success => {
                let msg = sim.revert_reason.clone().unwrap_or_else(|| "unknown".to_string());
                attempt.simulation = Some(sim);
                return reject(attempt, RejectReason::SimulationReverted(msg));
            }
            Ok(Ok(sim)) => sim,
        };

        // Net of gas at the fee cap.
        let gas_cost = gas_in_base(
            &bundle,
            U256::from(simulation.gas_used) * U256::from(params.max_fee_per_gas),
        );
        let net = simulation.profit.saturating_sub(gas_cost as i128);
        attempt.simulation = Some(simulation);
        if net < bundle.min_net_profit {
            return reject(
                attempt,
                RejectReason::BelowMinimumProfit {
                    simulated: net,
                    minimum: bundle.min_net_profit,
                },
            );
        }
        report.simulated_profit = Some(net);
        attempt.transition(AttemptState::Simulated)?;
        debug!(attempt = attempt.number, block, net, "Simulation passed");

        if self.config.dry_run {
            info!(net, "DRY RUN - bundle simulated, not submitted");
            return Ok(AttemptEnd::Terminal(Outcome::DryRun));
        }

        // Submit
        let target_from = block + 1;
        let target_to = block + self.config.target_block_window.max(1);
        attempt.target_blocks = Some((target_from, target_to));
        let submitted = timeout(
            Duration::from_millis(self.config.submit_timeout_ms),
            self.backend.submit(&bundle, &params, target_from, target_to),
        )
        .await;

        let receipt = match submitted {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(BackendError::RelayRejected(msg))) => {
                return reject(attempt, RejectReason::RelayRejected(msg));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Submission failed");
                attempt.transition(AttemptState::Submitted)?;
                attempt.expire(format!("submission failed: {e}"))?;
                return Ok(AttemptEnd::Expired);
            }
            Err(_) => {
                warn!("Submission timed out");
                attempt.transition(AttemptState::Submitted)?;
                attempt.expire("submission timed out")?;
                return Ok(AttemptEnd::Expired);
            }
        };
        attempt.transition(AttemptState::Submitted)?;
        attempt.receipt = Some(receipt.clone());
        metrics::inc_bundles_submitted();
        info!(
            attempt = attempt.number,
            target_from,
            target_to,
            tip = params.max_priority_fee_per_gas,
            tx_hash = %receipt.tx_hash,
            "Bundle submitted"
        );

        self.monitor(attempt, &receipt).await
    }

    async fn monitor(
        &self,
        attempt: &mut ExecutionAttempt,
        receipt: &SubmissionReceipt,
    ) -> Result<AttemptEnd, ExecutionError> {
        let mut errors = 0u32;
        loop {
            match self.query("inclusion", self.backend.inclusion(receipt)).await {
                Ok(InclusionStatus::Included {
                    block,
                    gas_used,
                    effective_gas_price,
                    actual_profit,
                }) => {
                    attempt.transition(AttemptState::Included)?;
                    return Ok(AttemptEnd::Included {
                        block,
                        gas_used,
                        effective_gas_price,
                        actual_profit,
                    });
                }
                Ok(InclusionStatus::Failed(msg)) => {
                    return reject(attempt, RejectReason::ExecutionFailed(msg));
                }
                Ok(InclusionStatus::Pending) => errors = 0,
                Err(e) => {
                    errors += 1;
                    debug!(error = %e, errors, "Inclusion poll failed");
                }
            }

            match self.query("block_number", self.backend.block_number()).await {
                Ok(block) if block > receipt.target_to => {
                    attempt.expire(format!("target window ended at block {}", receipt.target_to))?;
                    return Ok(AttemptEnd::Expired);
                }
                Ok(_) => {}
                Err(e) => {
                    errors += 1;
                    debug!(error = %e, errors, "Block poll failed");
                }
            }

            if errors >= self.config.max_poll_errors {
                attempt.expire("inclusion status unavailable")?;
                return Ok(AttemptEnd::Expired);
            }
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    async fn query<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let timeout_ms = self.config.query_timeout_ms;
        timeout(Duration::from_millis(timeout_ms), fut)
            .await
            .map_err(|_| BackendError::Timeout { operation, timeout_ms })?
    }
}

fn reject(attempt: &mut ExecutionAttempt, reason: RejectReason) -> Result<AttemptEnd, ExecutionError> {
    warn!(attempt = attempt.number, reason = %reason, "Attempt rejected");
    attempt.reject(reason.to_string())?;
    Ok(AttemptEnd::Terminal(Outcome::Rejected(reason)))
}

fn gas_in_base(bundle: &Bundle, wei: U256) -> Amount {
    GasModel {
        native_price_in_base: bundle.native_price_in_base,
        ..GasModel::free()
    }
    .wei_to_base(wei)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::types::tests::sample_bundle;
    use crate::execution::backend::SimulationResult;
    use crate::execution::mock::{MockBackend, MockBackendConfig};
    use pretty_assertions::assert_eq;

    const GWEI: u128 = 1_000_000_000;

    fn fees() -> FeePolicy {
        FeePolicy {
            max_gas_price_wei: 100 * GWEI,
            min_priority_fee_wei: GWEI,
            inclusion_percentile: 90,
            fee_bump_bps: 2_000,
        }
    }

    fn live() -> ExecutionConfig {
        ExecutionConfig {
            dry_run: false,
            poll_interval_ms: 0,
            ..ExecutionConfig::default()
        }
    }

    fn coordinator(mock: &Arc<MockBackend>, fees: FeePolicy, config: ExecutionConfig) -> ExecutionCoordinator {
        ExecutionCoordinator::new(mock.clone(), fees, config)
    }

    #[tokio::test]
    async fn expired_attempt_is_retried_once_then_abandoned() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig::default()));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(report.outcome, Outcome::Abandoned);
        assert!(report.requeue_discovery);
        assert_eq!(report.attempts.len(), 2);
        assert!(report.attempts.iter().all(|a| a.state == AttemptState::Expired));

        let submissions = mock.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(
            submissions[1].params.max_priority_fee_per_gas
                > submissions[0].params.max_priority_fee_per_gas
        );
        assert_eq!(submissions[0].target_to - submissions[0].target_from, 2);
        assert_eq!(mock.simulations(), 2);
    }

    #[tokio::test]
    async fn included_bundle_reports_actual_profit() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig::default()));
        mock.push_inclusion(InclusionStatus::Pending);
        mock.push_inclusion(InclusionStatus::Included {
            block: 102,
            gas_used: 200_000,
            effective_gas_price: 40 * GWEI,
            actual_profit: Some(95),
        });

        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert!(report.is_included());
        assert!(!report.requeue_discovery);
        assert_eq!(report.included_block, Some(102));
        assert_eq!(report.gas_used, Some(200_000));
        assert_eq!(report.gas_cost_wei, Some(200_000 * 40 * GWEI));
        // Native price of zero makes gas free in base units.
        assert_eq!(report.actual_profit, Some(95));
        assert_eq!(report.simulated_profit, Some(99));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(mock.submissions().len(), 1);
    }

    #[tokio::test]
    async fn unprofitable_simulation_is_never_submitted() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig {
            simulation: SimulationResult {
                success: true,
                profit: 5,
                gas_used: 150_000,
                revert_reason: None,
            },
            ..MockBackendConfig::default()
        }));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(
            report.outcome,
            Outcome::Rejected(RejectReason::BelowMinimumProfit { simulated: 5, minimum: 10 })
        );
        assert!(mock.submissions().is_empty());
        assert_eq!(report.attempts[0].state, AttemptState::Rejected);
    }

    #[tokio::test]
    async fn gas_cost_counts_against_simulated_profit() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig::default()));
        let mut bundle = sample_bundle();
        // 1 base unit per 1e9 wei: 100k gas at the 62 gwei cap costs 6_200_000 units.
        bundle.native_price_in_base = 1_000_000_000;
        let report = coordinator(&mock, fees(), live()).execute(Arc::new(bundle)).await;

        assert!(matches!(
            report.outcome,
            Outcome::Rejected(RejectReason::BelowMinimumProfit { .. })
        ));
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn reverted_simulation_is_rejected() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig {
            simulation: SimulationResult {
                success: false,
                profit: 0,
                gas_used: 90_000,
                revert_reason: Some("insufficient output".to_string()),
            },
            ..MockBackendConfig::default()
        }));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(
            report.outcome,
            Outcome::Rejected(RejectReason::SimulationReverted("insufficient output".to_string()))
        );
        assert!(!report.requeue_discovery);
    }

    #[tokio::test]
    async fn dry_run_stops_after_simulation() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig::default()));
        let report = coordinator(&mock, fees(), ExecutionConfig::default())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(report.outcome, Outcome::DryRun);
        assert_eq!(report.attempts[0].state, AttemptState::Simulated);
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn base_fee_over_ceiling_is_rejected() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig {
            base_fee: 120 * GWEI,
            ..MockBackendConfig::default()
        }));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(
            report.outcome,
            Outcome::Rejected(RejectReason::GasCeiling { base_fee: 120 * GWEI, ceiling: 100 * GWEI })
        );
        assert_eq!(mock.simulations(), 0);
    }

    #[tokio::test]
    async fn failed_inclusion_is_not_retried() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig::default()));
        mock.push_inclusion(InclusionStatus::Failed("bundle invalidated".to_string()));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(
            report.outcome,
            Outcome::Rejected(RejectReason::ExecutionFailed("bundle invalidated".to_string()))
        );
        assert_eq!(mock.submissions().len(), 1);
        assert!(!report.requeue_discovery);
    }

    #[tokio::test]
    async fn relay_rejection_is_final() {
        let mock = Arc::new(MockBackend::new(MockBackendConfig {
            reject_submissions: Some("nonce too low".to_string()),
            ..MockBackendConfig::default()
        }));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(
            report.outcome,
            Outcome::Rejected(RejectReason::RelayRejected("nonce too low".to_string()))
        );
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn ceiling_blocking_the_bump_abandons() {
        // Suggested tip already fills the headroom under the ceiling.
        let mock = Arc::new(MockBackend::new(MockBackendConfig {
            base_fee: 90 * GWEI,
            priority_fee: 50 * GWEI,
            ..MockBackendConfig::default()
        }));
        let report = coordinator(&mock, fees(), live())
            .execute(Arc::new(sample_bundle()))
            .await;

        assert_eq!(report.outcome, Outcome::Abandoned);
        assert!(report.requeue_discovery);
        assert_eq!(mock.submissions().len(), 1);
    }
}
