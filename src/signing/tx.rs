//! Executor transaction signing.
//!
//! Key custody is external to the engine; it only needs something that turns
//! a call into a signed raw transaction. [`LocalTxSigner`] signs EIP-1559
//! transactions with an in-process key.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;

use crate::error::BackendError;

/// A contract call to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Target contract.
    pub to: Address,
    /// Calldata.
    pub data: Vec<u8>,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// EIP-1559 fee cap in wei.
    pub max_fee_per_gas: u128,
    /// EIP-1559 tip in wei.
    pub max_priority_fee_per_gas: u128,
}

/// A signed, 2718-encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// Raw encoded bytes.
    pub raw: Vec<u8>,
    /// Transaction hash.
    pub hash: B256,
}

impl SignedTx {
    /// `0x`-prefixed raw transaction.
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Produces signed executor transactions.
pub trait TransactionSigner: Send + Sync {
    /// Sending account.
    fn address(&self) -> Address;

    /// Sign `call`.
    fn sign_call(&self, call: &CallRequest) -> Result<SignedTx, BackendError>;
}

/// EIP-1559 signer backed by a local private key.
#[derive(Debug, Clone)]
pub struct LocalTxSigner {
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl LocalTxSigner {
    /// Create a signer for `chain_id`.
    pub fn new(signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self { signer, chain_id }
    }
}

impl TransactionSigner for LocalTxSigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    fn sign_call(&self, call: &CallRequest) -> Result<SignedTx, BackendError> {
        let mut tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce: call.nonce,
            gas_limit: call.gas_limit,
            max_fee_per_gas: call.max_fee_per_gas,
            max_priority_fee_per_gas: call.max_priority_fee_per_gas,
            to: TxKind::Call(call.to),
            value: U256::ZERO,
            access_list: Default::default(),
            input: Bytes::from(call.data.clone()),
        };
        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| BackendError::Signing(format!("Failed to sign transaction: {}", e)))?;
        let envelope: TxEnvelope = tx.into_signed(signature).into();

        Ok(SignedTx {
            raw: envelope.encoded_2718(),
            hash: *envelope.tx_hash(),
        })
    }
}
