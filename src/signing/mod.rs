//! Signing and authentication utilities.
//!
//! This module provides utilities for:
//! - Creating signers from private keys
//! - Computing wallet addresses
//! - Authenticating private-relay requests
//! - Signing executor transactions (see [`tx`])

pub mod tx;

use alloy::primitives::keccak256;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use tracing::debug;

use crate::error::BackendError;

pub use tx::{CallRequest, LocalTxSigner, SignedTx, TransactionSigner};

/// Relay authentication header name.
pub const RELAY_SIGNATURE_HEADER: &str = "X-Flashbots-Signature";

/// Create a LocalSigner from a hex-encoded private key.
///
/// The private key can be with or without the "0x" prefix.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, BackendError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| BackendError::Signing(format!("Invalid private key hex: {}", e)))?;

    if bytes.len() != 32 {
        return Err(BackendError::Signing(format!(
            "Private key must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes);

    PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| BackendError::Signing(format!("Failed to create signer: {}", e)))
}

/// Get the wallet address from a private key.
pub fn address_from_private_key(private_key: &str) -> Result<String, BackendError> {
    let signer = create_signer(private_key)?;
    // Format address as checksummed hex
    Ok(format!("{:?}", signer.address()))
}

/// Sign a message (EIP-191 personal message).
pub async fn sign_message(signer: &PrivateKeySigner, message: &[u8]) -> Result<Vec<u8>, BackendError> {
    let signature = signer
        .sign_message(message)
        .await
        .map_err(|e| BackendError::Signing(format!("Failed to sign message: {}", e)))?;
    Ok(signature.as_bytes().to_vec())
}

/// Value of the relay authentication header for a JSON-RPC `body`:
/// `address:signature`, where the signed message is the hex keccak256 of
/// the body.
pub async fn relay_auth_header(signer: &PrivateKeySigner, body: &[u8]) -> Result<String, BackendError> {
    let digest = format!("0x{}", hex::encode(keccak256(body)));
    let signature = sign_message(signer, digest.as_bytes()).await?;
    let address = format!("{:?}", signer.address());

    debug!(address = %address, "Signed relay request");
    Ok(format!("{}:0x{}", address, hex::encode(signature)))
}
