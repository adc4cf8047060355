//! Chain backend over a JSON-RPC node and a private bundle relay.
//!
//! Fees and receipts come from the node; simulation (`eth_callBundle`) and
//! submission (`eth_sendBundle`) go to the relay, each request signed with
//! the relay authentication key.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::backend::{ChainBackend, InclusionStatus, SimulationResult, SubmissionReceipt, TxParams};
use crate::bundle::{executor_calldata, Bundle, ICycleExecutor};
use crate::error::BackendError;
use crate::rpc::{parse_data, parse_quantity, quantity, JsonRpcClient};
use crate::signing::{relay_auth_header, CallRequest, SignedTx, TransactionSigner, RELAY_SIGNATURE_HEADER};

/// Blocks of fee history sampled for the priority fee.
const FEE_HISTORY_BLOCKS: u64 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeHistory {
    base_fee_per_gas: Vec<String>,
    #[serde(default)]
    reward: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CallBundleResponse {
    results: Vec<CallBundleTx>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallBundleTx {
    gas_used: u64,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    revert: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBundleResponse {
    bundle_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    status: String,
    block_number: String,
    gas_used: String,
    #[serde(default)]
    effective_gas_price: Option<String>,
}

/// Backend submitting bundles through a private relay.
pub struct RelayBackend {
    node: JsonRpcClient,
    relay: JsonRpcClient,
    auth: PrivateKeySigner,
    tx_signer: Arc<dyn TransactionSigner>,
    executor: Address,
}

impl RelayBackend {
    /// Create a backend. `auth` signs relay requests; `tx_signer` signs the
    /// executor transaction sent to `executor`.
    pub fn new(
        node: JsonRpcClient,
        relay: JsonRpcClient,
        auth: PrivateKeySigner,
        tx_signer: Arc<dyn TransactionSigner>,
        executor: Address,
    ) -> Self {
        Self {
            node,
            relay,
            auth,
            tx_signer,
            executor,
        }
    }

    async fn relay_call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, BackendError> {
        let body = self.relay.request_body(method, params);
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| BackendError::Signing(format!("request encoding failed: {e}")))?;
        let signature = relay_auth_header(&self.auth, &bytes).await?;
        Ok(self
            .relay
            .send(method, &body, &[(RELAY_SIGNATURE_HEADER, signature)])
            .await?)
    }

    async fn fee_history(&self, blocks: u64, percentiles: &[f64]) -> Result<FeeHistory, BackendError> {
        Ok(self
            .node
            .call("eth_feeHistory", json!([quantity(blocks), "latest", percentiles]))
            .await?)
    }

    async fn signed_tx(&self, bundle: &Bundle, params: &TxParams) -> Result<SignedTx, BackendError> {
        let from = self.tx_signer.address();
        let nonce: String = self
            .node
            .call("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let nonce = u64::try_from(parse_quantity(&nonce)?)
            .map_err(|_| BackendError::InvalidResponse(format!("nonce out of range: {nonce}")))?;
        self.tx_signer.sign_call(&CallRequest {
            to: self.executor,
            data: executor_calldata(bundle),
            nonce,
            gas_limit: params.gas_limit,
            max_fee_per_gas: params.max_fee_per_gas,
            max_priority_fee_per_gas: params.max_priority_fee_per_gas,
        })
    }
}

#[async_trait]
impl ChainBackend for RelayBackend {
    async fn block_number(&self) -> Result<u64, BackendError> {
        let block: String = self.node.call("eth_blockNumber", json!([])).await?;
        u64::try_from(parse_quantity(&block)?)
            .map_err(|_| BackendError::InvalidResponse(format!("block out of range: {block}")))
    }

    async fn base_fee(&self) -> Result<u128, BackendError> {
        next_base_fee(&self.fee_history(1, &[]).await?)
    }

    async fn priority_fee_percentile(&self, percentile: u8) -> Result<u128, BackendError> {
        let history = self
            .fee_history(FEE_HISTORY_BLOCKS, &[f64::from(percentile.min(100))])
            .await?;
        median_reward(&history)
    }

    #[instrument(skip(self, bundle, params), fields(bundle_id = %bundle.id))]
    async fn simulate(
        &self,
        bundle: &Bundle,
        params: &TxParams,
        block: u64,
    ) -> Result<SimulationResult, BackendError> {
        let tx = self.signed_tx(bundle, params).await?;
        let response: CallBundleResponse = self
            .relay_call(
                "eth_callBundle",
                json!([{
                    "txs": [tx.raw_hex()],
                    "blockNumber": quantity(block + 1),
                    "stateBlockNumber": "latest",
                }]),
            )
            .await?;
        let result = simulation_result(response)?;
        debug!(success = result.success, profit = result.profit, gas_used = result.gas_used, "Relay simulation");
        Ok(result)
    }

    #[instrument(skip(self, bundle, params), fields(bundle_id = %bundle.id))]
    async fn submit(
        &self,
        bundle: &Bundle,
        params: &TxParams,
        target_from: u64,
        target_to: u64,
    ) -> Result<SubmissionReceipt, BackendError> {
        let tx = self.signed_tx(bundle, params).await?;
        let raw = tx.raw_hex();

        // The relay targets one block per request.
        let mut sent = Vec::new();
        for block in target_from..=target_to {
            let result: Result<SendBundleResponse, BackendError> = self
                .relay_call(
                    "eth_sendBundle",
                    json!([{ "txs": [raw], "blockNumber": quantity(block) }]),
                )
                .await
                .map_err(|e| match e {
                    BackendError::Rpc { message, .. } => BackendError::RelayRejected(message),
                    other => other,
                });
            match &result {
                Ok(response) => debug!(block, bundle_hash = %response.bundle_hash, "Bundle sent"),
                Err(e) => warn!(block, error = %e, "Bundle not accepted for block"),
            }
            sent.push(result.map(|r| r.bundle_hash));
        }

        Ok(SubmissionReceipt {
            bundle_hash: accepted_hash(sent)?,
            tx_hash: tx.hash,
            target_from,
            target_to,
        })
    }

    async fn inclusion(&self, receipt: &SubmissionReceipt) -> Result<InclusionStatus, BackendError> {
        let tx_receipt: Option<TxReceipt> = self
            .node
            .call("eth_getTransactionReceipt", json!([receipt.tx_hash]))
            .await?;
        inclusion_status(tx_receipt)
    }
}

/// First bundle hash the relay accepted. Fails with the last error only when
/// no target block was accepted.
fn accepted_hash(
    results: impl IntoIterator<Item = Result<String, BackendError>>,
) -> Result<String, BackendError> {
    let mut last_error = None;
    for result in results {
        match result {
            Ok(hash) => return Ok(hash),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| BackendError::RelayRejected("no target blocks".to_string())))
}

fn next_base_fee(history: &FeeHistory) -> Result<u128, BackendError> {
    // The last entry is the base fee of the block after the newest one.
    let last = history
        .base_fee_per_gas
        .last()
        .ok_or_else(|| BackendError::InvalidResponse("empty fee history".to_string()))?;
    Ok(parse_quantity(last)?)
}

fn median_reward(history: &FeeHistory) -> Result<u128, BackendError> {
    let mut rewards = history
        .reward
        .iter()
        .filter_map(|block| block.first())
        .map(|r| parse_quantity(r))
        .collect::<Result<Vec<u128>, _>>()?;
    if rewards.is_empty() {
        return Err(BackendError::InvalidResponse("fee history has no rewards".to_string()));
    }
    rewards.sort_unstable();
    Ok(rewards[rewards.len() / 2])
}

fn simulation_result(response: CallBundleResponse) -> Result<SimulationResult, BackendError> {
    let tx = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("callBundle returned no results".to_string()))?;

    if let Some(reason) = tx.revert.or(tx.error) {
        return Ok(SimulationResult {
            success: false,
            profit: 0,
            gas_used: tx.gas_used,
            revert_reason: Some(reason),
        });
    }

    let data = parse_data(tx.value.as_deref().unwrap_or("0x"))?;
    let profit = ICycleExecutor::executeBundleCall::abi_decode_returns(&data)
        .map_err(|e| BackendError::InvalidResponse(format!("executor return data: {e}")))?;
    let profit = i128::try_from(profit)
        .map_err(|_| BackendError::InvalidResponse(format!("executor profit out of range: {profit}")))?;
    Ok(SimulationResult {
        success: true,
        profit,
        gas_used: tx.gas_used,
        revert_reason: None,
    })
}

fn inclusion_status(receipt: Option<TxReceipt>) -> Result<InclusionStatus, BackendError> {
    let Some(receipt) = receipt else {
        return Ok(InclusionStatus::Pending);
    };
    let block = u64::try_from(parse_quantity(&receipt.block_number)?)
        .map_err(|_| BackendError::InvalidResponse("block out of range".to_string()))?;
    if parse_quantity(&receipt.status)? != 1 {
        return Ok(InclusionStatus::Failed(format!("reverted in block {block}")));
    }
    let gas_used = u64::try_from(parse_quantity(&receipt.gas_used)?)
        .map_err(|_| BackendError::InvalidResponse("gas used out of range".to_string()))?;
    let effective_gas_price = receipt
        .effective_gas_price
        .as_deref()
        .map(parse_quantity)
        .transpose()?
        .unwrap_or(0);
    Ok(InclusionStatus::Included {
        block,
        gas_used,
        effective_gas_price,
        actual_profit: None,
    })
}
