//! Binary encoding of a bundle's operation sequence.
//!
//! Layout: version byte, big-endian u16 operation count, then per operation
//! a tag byte followed by fixed-width big-endian fields:
//!
//! | tag | operation | fields |
//! |-----|-----------|--------|
//! | 1 | borrow | token(20) amount(16) |
//! | 2 | swap | step(1) venue(4) pool(20) kind(1) token_in(20) token_out(20) flags(1) amount_in(16) amount_out(16) min_amount_out(16) |
//! | 3 | repay | token(20) amount(16) |

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol;
use alloy::sol_types::SolCall;
use time::OffsetDateTime;

use super::types::{Bundle, Operation};
use crate::error::BundleError;
use crate::venue::{ProtocolKind, VenueId};

/// Encoding version.
pub const CODEC_VERSION: u8 = 1;

const TAG_BORROW: u8 = 1;
const TAG_SWAP: u8 = 2;
const TAG_REPAY: u8 = 3;

const FLAG_ZERO_FOR_ONE: u8 = 0x01;

sol! {
    /// On-chain executor: runs an encoded operation list in one transaction
    /// and returns the profit left after repayment.
    interface ICycleExecutor {
        function executeBundle(bytes calldata operations) external returns (int256 profit);
    }
}

fn kind_byte(kind: ProtocolKind) -> u8 {
    match kind {
        ProtocolKind::ConstantProduct => 0,
        ProtocolKind::Concentrated => 1,
    }
}

/// Encode an operation sequence.
pub fn encode_operations(operations: &[Operation]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + operations.len() * 128);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&(operations.len() as u16).to_be_bytes());
    for op in operations {
        match op {
            Operation::Borrow { token, amount } => {
                out.push(TAG_BORROW);
                out.extend_from_slice(token.as_slice());
                out.extend_from_slice(&amount.to_be_bytes());
            }
            Operation::Swap {
                step,
                venue,
                pool,
                kind,
                token_in,
                token_out,
                zero_for_one,
                amount_in,
                amount_out,
                min_amount_out,
            } => {
                out.push(TAG_SWAP);
                out.push(*step);
                out.extend_from_slice(&venue.0.to_be_bytes());
                out.extend_from_slice(pool.as_slice());
                out.push(kind_byte(*kind));
                out.extend_from_slice(token_in.as_slice());
                out.extend_from_slice(token_out.as_slice());
                out.push(if *zero_for_one { FLAG_ZERO_FOR_ONE } else { 0 });
                out.extend_from_slice(&amount_in.to_be_bytes());
                out.extend_from_slice(&amount_out.to_be_bytes());
                out.extend_from_slice(&min_amount_out.to_be_bytes());
            }
            Operation::Repay { token, amount } => {
                out.push(TAG_REPAY);
                out.extend_from_slice(token.as_slice());
                out.extend_from_slice(&amount.to_be_bytes());
            }
        }
    }
    out
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BundleError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len()).ok_or_else(|| {
            BundleError::Decode(format!("truncated at byte {} (wanted {n})", self.pos))
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BundleError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, BundleError> {
        Ok(self.array::<1>()?[0])
    }

    fn address(&mut self) -> Result<Address, BundleError> {
        Ok(Address::from(self.array::<20>()?))
    }

    fn amount(&mut self) -> Result<u128, BundleError> {
        Ok(u128::from_be_bytes(self.array::<16>()?))
    }
}

/// Decode an operation sequence produced by [`encode_operations`].
pub fn decode_operations(data: &[u8]) -> Result<Vec<Operation>, BundleError> {
    let mut r = Reader { data, pos: 0 };
    let version = r.u8()?;
    if version != CODEC_VERSION {
        return Err(BundleError::Decode(format!("unsupported version {version}")));
    }
    let count = u16::from_be_bytes(r.array::<2>()?);
    let mut operations = Vec::with_capacity(usize::from(count));

    for _ in 0..count {
        let op = match r.u8()? {
            TAG_BORROW => Operation::Borrow {
                token: r.address()?,
                amount: r.amount()?,
            },
            TAG_SWAP => {
                let step = r.u8()?;
                let venue = VenueId(u32::from_be_bytes(r.array::<4>()?));
                let pool = r.address()?;
                let kind = match r.u8()? {
                    0 => ProtocolKind::ConstantProduct,
                    1 => ProtocolKind::Concentrated,
                    other => return Err(BundleError::Decode(format!("unknown protocol kind {other}"))),
                };
                let token_in = r.address()?;
                let token_out = r.address()?;
                let flags = r.u8()?;
                Operation::Swap {
                    step,
                    venue,
                    pool,
                    kind,
                    token_in,
                    token_out,
                    zero_for_one: flags & FLAG_ZERO_FOR_ONE != 0,
                    amount_in: r.amount()?,
                    amount_out: r.amount()?,
                    min_amount_out: r.amount()?,
                }
            }
            TAG_REPAY => Operation::Repay {
                token: r.address()?,
                amount: r.amount()?,
            },
            tag => return Err(BundleError::Decode(format!("unknown operation tag {tag}"))),
        };
        operations.push(op);
    }

    if r.pos != data.len() {
        return Err(BundleError::Decode(format!(
            "{} trailing bytes",
            data.len() - r.pos
        )));
    }
    Ok(operations)
}

/// Content id: keccak256 of the encoded operations and the build time.
pub fn bundle_id(operations: &[Operation], created_at: OffsetDateTime) -> B256 {
    let mut preimage = encode_operations(operations);
    preimage.extend_from_slice(&created_at.unix_timestamp_nanos().to_be_bytes());
    keccak256(preimage)
}

/// ABI calldata for the on-chain executor: `executeBundle(bytes)`.
pub fn executor_calldata(bundle: &Bundle) -> Vec<u8> {
    ICycleExecutor::executeBundleCall {
        operations: encode_operations(&bundle.operations).into(),
    }
    .abi_encode()
}
