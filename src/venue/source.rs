//! External price/liquidity source.

use std::time::{Duration, Instant};

use alloy::primitives::aliases::I24;
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use super::concentrated::{MAX_TICK, MIN_TICK};
use super::types::{ConcentratedState, TickLiquidity, Venue, VenueState};
use crate::error::{RpcError, SourceError};
use crate::metrics;
use crate::rpc::{parse_data, JsonRpcClient};

sol! {
    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }

    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
        function liquidity() external view returns (uint128);
        function tickSpacing() external view returns (int24);
        function tickBitmap(int16 wordPosition) external view returns (uint256);
        function ticks(int24 tick) external view returns (
            uint128 liquidityGross,
            int128 liquidityNet,
            uint256 feeGrowthOutside0X128,
            uint256 feeGrowthOutside1X128,
            int56 tickCumulativeOutside,
            uint160 secondsPerLiquidityOutsideX128,
            uint32 secondsOutside,
            bool initialized
        );
    }
}

/// Source of fresh venue state.
#[async_trait]
pub trait VenueSource: Send + Sync {
    /// Fetch the current state of `venue`. The venue's current state is only
    /// used for its protocol kind and pool parameters.
    async fn fetch(&self, venue: &Venue) -> Result<VenueState, SourceError>;
}

/// Reads pool state from a node with batched `eth_call`s.
#[derive(Debug)]
pub struct RpcVenueSource {
    rpc: JsonRpcClient,
    tick_window_words: i32,
}

impl RpcVenueSource {
    /// Create a source against `url`. `tick_window_words` bitmap words are
    /// read on each side of the current tick for concentrated pools.
    pub fn new(url: &str, timeout: Duration, tick_window_words: u8) -> Result<Self, RpcError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, timeout)?,
            tick_window_words: i32::from(tick_window_words),
        })
    }

    async fn call_batch(&self, calls: Vec<(Address, Vec<u8>)>) -> Result<Vec<Vec<u8>>, SourceError> {
        let params = calls
            .iter()
            .map(|(to, data)| {
                json!([{ "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) }, "latest"])
            })
            .collect();
        let results = self.rpc.batch("eth_call", params).await?;

        results
            .into_iter()
            .map(|r| {
                let value = r.map_err(|e| match e {
                    RpcError::Rpc { code, message } => {
                        SourceError::InvalidResponse(format!("eth_call failed {code}: {message}"))
                    }
                    other => other.into(),
                })?;
                let text = value
                    .as_str()
                    .ok_or_else(|| SourceError::InvalidResponse("eth_call result not a string".into()))?;
                Ok(parse_data(text)?)
            })
            .collect()
    }

    async fn fetch_constant_product(&self, venue: &Venue) -> Result<VenueState, SourceError> {
        let mut out = self
            .call_batch(vec![(venue.address, IUniswapV2Pair::getReservesCall {}.abi_encode())])
            .await?;
        let data = out
            .pop()
            .ok_or_else(|| SourceError::InvalidResponse("empty batch".into()))?;
        let (reserve0, reserve1) = decode_reserves(&data)?;
        Ok(VenueState::ConstantProduct { reserve0, reserve1 })
    }

    async fn fetch_concentrated(&self, venue: &Venue) -> Result<VenueState, SourceError> {
        let invalid = |what: &str| SourceError::InvalidResponse(format!("{}: {what}", venue.address));

        let head = self
            .call_batch(vec![
                (venue.address, IUniswapV3Pool::slot0Call {}.abi_encode()),
                (venue.address, IUniswapV3Pool::liquidityCall {}.abi_encode()),
                (venue.address, IUniswapV3Pool::tickSpacingCall {}.abi_encode()),
            ])
            .await?;
        let [slot0, liquidity, spacing] = <[Vec<u8>; 3]>::try_from(head)
            .map_err(|_| invalid("short batch"))?;

        let (sqrt_price_x96, tick) = decode_slot0(&slot0)?;
        let liquidity = decode::<IUniswapV3Pool::liquidityCall>(&liquidity)?;
        let tick_spacing = tick_to_i32(decode::<IUniswapV3Pool::tickSpacingCall>(&spacing)?);
        if tick_spacing <= 0 {
            return Err(invalid("non-positive tick spacing"));
        }

        let word_pos = tick.div_euclid(tick_spacing) >> 8;
        let first = (word_pos - self.tick_window_words).max(i32::from(i16::MIN));
        let last = (word_pos + self.tick_window_words).min(i32::from(i16::MAX));

        let words: Vec<i32> = (first..=last).collect();
        let bitmaps = self
            .call_batch(
                words
                    .iter()
                    .map(|&w| -> Result<_, SourceError> {
                        let word_position = i16::try_from(w).map_err(|_| invalid("bitmap word out of range"))?;
                        let call = IUniswapV3Pool::tickBitmapCall { wordPosition: word_position };
                        Ok((venue.address, call.abi_encode()))
                    })
                    .collect::<Result<_, _>>()?,
            )
            .await?;

        let mut initialized = Vec::new();
        for (&w, data) in words.iter().zip(&bitmaps) {
            let bitmap = decode::<IUniswapV3Pool::tickBitmapCall>(data)?;
            for bit in 0..256usize {
                if bitmap.bit(bit) {
                    initialized.push(((w << 8) + bit as i32) * tick_spacing);
                }
            }
        }

        let tick_data = self
            .call_batch(
                initialized
                    .iter()
                    .map(|&t| -> Result<_, SourceError> {
                        let tick = I24::try_from(t).map_err(|_| invalid("tick out of range"))?;
                        Ok((venue.address, IUniswapV3Pool::ticksCall { tick }.abi_encode()))
                    })
                    .collect::<Result<_, _>>()?,
            )
            .await?;

        let mut ticks = Vec::with_capacity(initialized.len());
        for (&t, data) in initialized.iter().zip(&tick_data) {
            let liquidity_net = decode::<IUniswapV3Pool::ticksCall>(data)?.liquidityNet;
            ticks.push(TickLiquidity { tick: t, liquidity_net });
        }
        ticks.sort_by_key(|t| t.tick);

        let window_lower = ((first << 8) * tick_spacing).max(MIN_TICK);
        let window_upper = (((last + 1) << 8) * tick_spacing).min(MAX_TICK);

        debug!(
            venue = %venue.id,
            tick,
            initialized = ticks.len(),
            window_lower,
            window_upper,
            "fetched concentrated state"
        );

        Ok(VenueState::Concentrated(ConcentratedState {
            sqrt_price_x96,
            tick,
            liquidity,
            tick_spacing,
            ticks,
            window_lower,
            window_upper,
        }))
    }
}

#[async_trait]
impl VenueSource for RpcVenueSource {
    #[instrument(skip(self, venue), fields(venue = %venue.id, kind = %venue.kind()))]
    async fn fetch(&self, venue: &Venue) -> Result<VenueState, SourceError> {
        let start = Instant::now();
        let result = match &venue.state {
            VenueState::ConstantProduct { .. } => self.fetch_constant_product(venue).await,
            VenueState::Concentrated(_) => self.fetch_concentrated(venue).await,
        };
        metrics::record_venue_fetch_latency(start, venue.kind());
        result
    }
}


/// Decode the return data of call `C`.
fn decode<C: SolCall>(data: &[u8]) -> Result<C::Return, SourceError> {
    C::abi_decode_returns(data)
        .map_err(|e| SourceError::InvalidResponse(format!("{}: {e}", C::SIGNATURE)))
}

fn decode_reserves(data: &[u8]) -> Result<(u128, u128), SourceError> {
    let reserves = decode::<IUniswapV2Pair::getReservesCall>(data)?;
    Ok((reserves.reserve0.to::<u128>(), reserves.reserve1.to::<u128>()))
}

fn decode_slot0(data: &[u8]) -> Result<(U256, i32), SourceError> {
    let slot0 = decode::<IUniswapV3Pool::slot0Call>(data)?;
    Ok((U256::from(slot0.sqrtPriceX96), tick_to_i32(slot0.tick)))
}

fn tick_to_i32(tick: I24) -> i32 {
    tick.as_i32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::I256;

    fn word(value: U256) -> [u8; 32] {
        value.to_be_bytes::<32>()
    }

    fn signed_word(value: i64) -> [u8; 32] {
        I256::try_from(value).unwrap().into_raw().to_be_bytes::<32>()
    }

    fn returns(words: &[[u8; 32]]) -> Vec<u8> {
        words.concat()
    }

    #[test]
    fn selectors_match_the_pool_interfaces() {
        assert_eq!(IUniswapV2Pair::getReservesCall::SELECTOR, [0x09, 0x02, 0xf1, 0xac]);
        assert_eq!(IUniswapV3Pool::slot0Call::SELECTOR, [0x38, 0x50, 0xc7, 0xbd]);
        assert_eq!(IUniswapV3Pool::liquidityCall::SELECTOR, [0x1a, 0x68, 0x65, 0x02]);
        assert_eq!(IUniswapV3Pool::tickSpacingCall::SELECTOR, [0xd0, 0xc9, 0x3a, 0x7c]);
        assert_eq!(IUniswapV3Pool::tickBitmapCall::SELECTOR, [0x53, 0x39, 0xc2, 0x96]);
        assert_eq!(IUniswapV3Pool::ticksCall::SELECTOR, [0xf3, 0x0d, 0xba, 0x93]);
    }

    #[test]
    fn negative_ticks_are_sign_extended_in_calldata() {
        let calldata = IUniswapV3Pool::ticksCall { tick: I24::try_from(-60).unwrap() }.abi_encode();
        assert_eq!(calldata.len(), 4 + 32);
        assert_eq!(&calldata[4..], &signed_word(-60));

        let calldata = IUniswapV3Pool::tickBitmapCall { wordPosition: -1 }.abi_encode();
        assert_eq!(&calldata[4..], &signed_word(-1));
    }

    #[test]
    fn reserves_are_read_from_the_first_two_words() {
        let data = returns(&[
            word(U256::from(1_000u64)),
            word(U256::from(2_000_000u64)),
            word(U256::from(1_700_000_000u64)),
        ]);
        assert_eq!(decode_reserves(&data).unwrap(), (1_000, 2_000_000));
    }

    #[test]
    fn slot0_yields_price_and_negative_tick() {
        let sqrt_price = U256::from(1u8) << 96;
        let data = returns(&[
            word(sqrt_price),
            signed_word(-887),
            word(U256::from(1u8)),
            word(U256::from(1u8)),
            word(U256::from(1u8)),
            word(U256::ZERO),
            word(U256::from(1u8)),
        ]);
        assert_eq!(decode_slot0(&data).unwrap(), (sqrt_price, -887));
    }

    #[test]
    fn tick_data_yields_signed_liquidity_net() {
        let data = returns(&[
            word(U256::from(500u64)),
            signed_word(-500),
            word(U256::ZERO),
            word(U256::ZERO),
            signed_word(0),
            word(U256::ZERO),
            word(U256::ZERO),
            word(U256::from(1u8)),
        ]);
        let tick = decode::<IUniswapV3Pool::ticksCall>(&data).unwrap();
        assert_eq!(tick.liquidityNet, -500);
        assert_eq!(tick.liquidityGross, 500);
    }

    #[test]
    fn short_return_data_is_an_invalid_response() {
        let data = returns(&[word(U256::from(1u8))]);
        let err = decode_reserves(&data).unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(msg) if msg.starts_with("getReserves()")));
    }
}
