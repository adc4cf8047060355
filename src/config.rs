//! Application configuration loaded from environment variables.
//!
//! Monetary thresholds (`MIN_PROFIT`, `CAPITAL_CEILING`) are expressed in the
//! chain's native token and converted to each base token's raw units with
//! the base token's native price from `BASE_TOKENS`.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::bundle::BundleConfig;
use crate::engine::EngineConfig;
use crate::execution::{ExecutionConfig, FeePolicy};
use crate::graph::{GraphSnapshot, ReconnectConfig, RefreshConfig};
use crate::pathfinder::{BaseToken, BorrowSizer, GasModel, PathFinderConfig};
use crate::utils::to_raw;
use crate::venue::{BPS_DENOMINATOR, PIPS_DENOMINATOR};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Chain Endpoints ===
    /// Node JSON-RPC URL.
    pub rpc_url: String,

    /// Node WebSocket URL for `newHeads`; polling only when unset.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Private relay URL.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Chain id for transaction signing.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    // === Keys and Contracts ===
    /// Key signing executor transactions (hex, starts with 0x).
    pub searcher_private_key: String,

    /// Key authenticating relay requests; the searcher key when unset.
    #[serde(default)]
    pub relay_auth_key: Option<String>,

    /// On-chain executor contract.
    pub executor_address: String,

    // === Liquidity Graph ===
    /// Token and venue registry (JSON).
    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    /// Polling interval when no block feed is available.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Venue fetches in flight at once.
    #[serde(default = "default_refresh_concurrency")]
    pub refresh_concurrency: usize,

    /// Per-venue fetch timeout.
    #[serde(default = "default_venue_timeout_ms")]
    pub venue_timeout_ms: u64,

    /// Consecutive failures before a venue is degraded.
    #[serde(default = "default_degraded_after_failures")]
    pub degraded_after_failures: u32,

    /// Longest backoff between fetches of a failing venue.
    #[serde(default = "default_max_refresh_backoff_ms")]
    pub max_refresh_backoff_ms: u64,

    /// Tick bitmap words fetched on each side of the current tick.
    #[serde(default = "default_tick_window_words")]
    pub tick_window_words: u8,

    /// Maximum WebSocket reconnect delay.
    #[serde(default = "default_ws_max_reconnect_delay_s")]
    pub ws_max_reconnect_delay_s: u64,

    /// WebSocket heartbeat interval.
    #[serde(default = "default_ws_heartbeat_interval_s")]
    pub ws_heartbeat_interval_s: u64,

    // === Discovery ===
    /// Base tokens as `SYMBOL[:NATIVE_PRICE]`, comma separated. The price
    /// is base tokens per native token and defaults to 1.
    #[serde(default = "default_base_tokens")]
    pub base_tokens: String,

    /// Maximum hops per cycle.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Maximum edge expansions per search.
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Maximum candidates per search.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Maximum venue age.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Minimum net profit, in native tokens.
    #[serde(default = "default_min_profit")]
    pub min_profit: Decimal,

    /// Largest borrow, in native tokens.
    #[serde(default = "default_capital_ceiling")]
    pub capital_ceiling: Decimal,

    /// Maximum share of any hop's reserve one trade may take, in bps.
    #[serde(default = "default_max_reserve_fraction_bps")]
    pub max_reserve_fraction_bps: u32,

    // === Bundle ===
    /// Flash-loan fee in pips.
    #[serde(default = "default_loan_fee_pips")]
    pub loan_fee_pips: u32,

    /// Per-swap slippage tolerance in bps.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,

    /// Fixed gas per bundle.
    #[serde(default = "default_base_gas")]
    pub base_gas: u64,

    /// Gas per swap hop.
    #[serde(default = "default_per_hop_gas")]
    pub per_hop_gas: u64,

    /// Gas price assumed for projections, in gwei.
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: Decimal,

    // === Execution ===
    /// Simulation only (no submissions).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Gas price ceiling in gwei.
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: Decimal,

    /// Priority fee floor in gwei.
    #[serde(default = "default_min_priority_fee_gwei")]
    pub min_priority_fee_gwei: Decimal,

    /// Fee-history percentile targeted for inclusion.
    #[serde(default = "default_inclusion_percentile")]
    pub inclusion_percentile: u8,

    /// Priority fee increase per retry, in bps.
    #[serde(default = "default_fee_bump_bps")]
    pub fee_bump_bps: u32,

    /// Retries after expiry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Blocks targeted per submission.
    #[serde(default = "default_target_block_window")]
    pub target_block_window: u64,

    /// Simulation timeout.
    #[serde(default = "default_simulation_timeout_ms")]
    pub simulation_timeout_ms: u64,

    /// Submission timeout.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    /// Concurrent executions per base token.
    #[serde(default = "default_max_inflight_per_base")]
    pub max_inflight_per_base: usize,

    // === Result Sink ===
    /// Endpoint receiving result events; log only when unset.
    #[serde(default)]
    pub sink_url: Option<String>,

    /// Result events buffered before dropping.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_relay_url() -> String {
    "https://relay.flashbots.net".to_string()
}

fn default_chain_id() -> u64 {
    1
}

fn default_registry_path() -> String {
    "venues.json".to_string()
}

fn default_refresh_interval_ms() -> u64 {
    2_000
}

fn default_refresh_concurrency() -> usize {
    16
}

fn default_venue_timeout_ms() -> u64 {
    1_500
}

fn default_max_refresh_backoff_ms() -> u64 {
    60_000
}

fn default_degraded_after_failures() -> u32 {
    3
}

fn default_tick_window_words() -> u8 {
    2
}

fn default_ws_max_reconnect_delay_s() -> u64 {
    30
}

fn default_ws_heartbeat_interval_s() -> u64 {
    30
}

fn default_base_tokens() -> String {
    "WETH".to_string()
}

fn default_max_hops() -> usize {
    3
}

fn default_max_expansions() -> usize {
    5_000
}

fn default_max_results() -> usize {
    10
}

fn default_staleness_secs() -> u64 {
    60
}

fn default_min_profit() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_capital_ceiling() -> Decimal {
    Decimal::new(50, 0)
}

fn default_max_reserve_fraction_bps() -> u32 {
    1_000
}

fn default_loan_fee_pips() -> u32 {
    500
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_base_gas() -> u64 {
    120_000
}

fn default_per_hop_gas() -> u64 {
    90_000
}

fn default_gas_price_gwei() -> Decimal {
    Decimal::new(20, 0)
}

fn default_true() -> bool {
    true
}

fn default_max_gas_price_gwei() -> Decimal {
    Decimal::new(150, 0)
}

fn default_min_priority_fee_gwei() -> Decimal {
    Decimal::new(1, 0)
}

fn default_inclusion_percentile() -> u8 {
    90
}

fn default_fee_bump_bps() -> u32 {
    2_000
}

fn default_max_retries() -> u32 {
    1
}

fn default_target_block_window() -> u64 {
    3
}

fn default_simulation_timeout_ms() -> u64 {
    2_000
}

fn default_submit_timeout_ms() -> u64 {
    2_000
}

fn default_max_inflight_per_base() -> usize {
    1
}

fn default_sink_capacity() -> usize {
    1_024
}

fn default_port() -> u16 {
    8080
}

/// One entry of `BASE_TOKENS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTokenSpec {
    /// Registry symbol.
    pub symbol: String,
    /// Base tokens per native token.
    pub native_price: Decimal,
}

const GWEI_DECIMALS: u8 = 9;

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        check_url("RPC_URL", &self.rpc_url, &["http", "https"])?;
        check_url("RELAY_URL", &self.relay_url, &["http", "https"])?;
        if let Some(ws) = &self.ws_url {
            check_url("WS_URL", ws, &["ws", "wss"])?;
        }
        if let Some(sink) = &self.sink_url {
            check_url("SINK_URL", sink, &["http", "https"])?;
        }

        check_key("SEARCHER_PRIVATE_KEY", &self.searcher_private_key)?;
        if let Some(key) = &self.relay_auth_key {
            check_key("RELAY_AUTH_KEY", key)?;
        }
        if self.executor_address.parse::<alloy::primitives::Address>().is_err() {
            return Err("EXECUTOR_ADDRESS must be a 20-byte hex address".to_string());
        }

        if !(2..=6).contains(&self.max_hops) {
            return Err("MAX_HOPS must be between 2 and 6".to_string());
        }
        if self.max_expansions == 0 || self.max_results == 0 {
            return Err("MAX_EXPANSIONS and MAX_RESULTS must be positive".to_string());
        }
        if self.staleness_secs == 0 {
            return Err("STALENESS_SECS must be positive".to_string());
        }
        if self.min_profit.is_sign_negative() {
            return Err("MIN_PROFIT must not be negative".to_string());
        }
        if self.capital_ceiling <= Decimal::ZERO {
            return Err("CAPITAL_CEILING must be positive".to_string());
        }
        if self.max_reserve_fraction_bps == 0 || self.max_reserve_fraction_bps > BPS_DENOMINATOR {
            return Err("MAX_RESERVE_FRACTION_BPS must be in 1..=10000".to_string());
        }
        if self.loan_fee_pips >= PIPS_DENOMINATOR {
            return Err("LOAN_FEE_PIPS must be below 1000000".to_string());
        }
        if self.slippage_bps >= BPS_DENOMINATOR {
            return Err("SLIPPAGE_BPS must be below 10000".to_string());
        }
        if self.max_gas_price_gwei <= Decimal::ZERO {
            return Err("MAX_GAS_PRICE_GWEI must be positive".to_string());
        }
        if self.min_priority_fee_gwei > self.max_gas_price_gwei {
            return Err("MIN_PRIORITY_FEE_GWEI must not exceed MAX_GAS_PRICE_GWEI".to_string());
        }
        if self.inclusion_percentile > 100 {
            return Err("INCLUSION_PERCENTILE must be at most 100".to_string());
        }
        if self.fee_bump_bps == 0 {
            return Err("FEE_BUMP_BPS must be positive".to_string());
        }
        if self.target_block_window == 0 {
            return Err("TARGET_BLOCK_WINDOW must be positive".to_string());
        }
        if self.max_inflight_per_base == 0 {
            return Err("MAX_INFLIGHT_PER_BASE must be positive".to_string());
        }
        if self.refresh_concurrency == 0 {
            return Err("REFRESH_CONCURRENCY must be positive".to_string());
        }
        if self.refresh_interval_ms == 0 {
            return Err("REFRESH_INTERVAL_MS must be positive".to_string());
        }
        if self.max_refresh_backoff_ms < self.refresh_interval_ms {
            return Err("MAX_REFRESH_BACKOFF_MS must not be below REFRESH_INTERVAL_MS".to_string());
        }

        self.base_token_specs().map(|_| ())
    }

    /// Parse `BASE_TOKENS`.
    pub fn base_token_specs(&self) -> Result<Vec<BaseTokenSpec>, String> {
        let mut specs: Vec<BaseTokenSpec> = Vec::new();
        for entry in self.base_tokens.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (symbol, price) = match entry.split_once(':') {
                Some((symbol, price)) => {
                    let price: Decimal = price
                        .trim()
                        .parse()
                        .map_err(|e| format!("BASE_TOKENS: bad native price for {symbol}: {e}"))?;
                    (symbol.trim(), price)
                }
                None => (entry, Decimal::ONE),
            };
            if symbol.is_empty() {
                return Err(format!("BASE_TOKENS: empty symbol in '{entry}'"));
            }
            if price <= Decimal::ZERO {
                return Err(format!("BASE_TOKENS: native price for {symbol} must be positive"));
            }
            if specs.iter().any(|s| s.symbol == symbol) {
                return Err(format!("BASE_TOKENS: {symbol} listed twice"));
            }
            specs.push(BaseTokenSpec {
                symbol: symbol.to_string(),
                native_price: price,
            });
        }
        if specs.is_empty() {
            return Err("BASE_TOKENS must name at least one token".to_string());
        }
        Ok(specs)
    }

    /// Resolve base tokens against the registry, converting thresholds into
    /// each token's raw units.
    pub fn base_tokens(&self, snapshot: &GraphSnapshot) -> Result<Vec<BaseToken>, String> {
        let gas_price_wei = to_raw(self.gas_price_gwei, GWEI_DECIMALS)
            .ok_or_else(|| "GAS_PRICE_GWEI out of range".to_string())?;

        self.base_token_specs()?
            .into_iter()
            .map(|spec| {
                let token = snapshot
                    .token_by_symbol(&spec.symbol)
                    .ok_or_else(|| format!("base token {} is not in the registry", spec.symbol))?;
                let in_base = |native: Decimal, what: &str| {
                    native
                        .checked_mul(spec.native_price)
                        .and_then(|v| to_raw(v, token.decimals))
                        .ok_or_else(|| format!("{what} out of range for {}", spec.symbol))
                };
                let min_profit = in_base(self.min_profit, "MIN_PROFIT")?;
                Ok(BaseToken {
                    token: token.id,
                    min_profit: i128::try_from(min_profit)
                        .map_err(|_| format!("MIN_PROFIT out of range for {}", spec.symbol))?,
                    capital_ceiling: in_base(self.capital_ceiling, "CAPITAL_CEILING")?,
                    gas: GasModel {
                        base_gas: self.base_gas,
                        per_hop_gas: self.per_hop_gas,
                        gas_price_wei,
                        native_price_in_base: in_base(Decimal::ONE, "native price")?,
                    },
                })
            })
            .collect()
    }

    /// Address of the executor contract.
    pub fn executor(&self) -> Result<alloy::primitives::Address, String> {
        self.executor_address
            .parse()
            .map_err(|e| format!("EXECUTOR_ADDRESS: {e}"))
    }

    /// Key used for relay authentication.
    pub fn relay_key(&self) -> &str {
        self.relay_auth_key
            .as_deref()
            .unwrap_or(&self.searcher_private_key)
    }

    fn sizer(&self) -> BorrowSizer {
        BorrowSizer {
            max_reserve_fraction_bps: self.max_reserve_fraction_bps,
            loan_fee_pips: self.loan_fee_pips,
        }
    }

    /// Path search settings.
    pub fn path_finder_config(&self) -> PathFinderConfig {
        PathFinderConfig {
            max_hops: self.max_hops,
            max_expansions: self.max_expansions,
            max_results: self.max_results,
            staleness: Duration::from_secs(self.staleness_secs),
            sizer: self.sizer(),
        }
    }

    /// Bundle construction settings.
    pub fn bundle_config(&self) -> BundleConfig {
        BundleConfig {
            slippage_bps: self.slippage_bps,
            staleness: Duration::from_secs(self.staleness_secs),
            sizer: self.sizer(),
        }
    }

    /// Fee policy.
    pub fn fee_policy(&self) -> Result<FeePolicy, String> {
        Ok(FeePolicy {
            max_gas_price_wei: to_raw(self.max_gas_price_gwei, GWEI_DECIMALS)
                .ok_or_else(|| "MAX_GAS_PRICE_GWEI out of range".to_string())?,
            min_priority_fee_wei: to_raw(self.min_priority_fee_gwei, GWEI_DECIMALS)
                .ok_or_else(|| "MIN_PRIORITY_FEE_GWEI out of range".to_string())?,
            inclusion_percentile: self.inclusion_percentile,
            fee_bump_bps: self.fee_bump_bps,
        })
    }

    /// Execution settings.
    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            dry_run: self.dry_run,
            max_retries: self.max_retries,
            target_block_window: self.target_block_window,
            simulation_timeout_ms: self.simulation_timeout_ms,
            submit_timeout_ms: self.submit_timeout_ms,
            ..ExecutionConfig::default()
        }
    }

    /// Graph refresh settings. Per-venue intervals come from the registry.
    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            concurrency: self.refresh_concurrency,
            timeout: Duration::from_millis(self.venue_timeout_ms),
            degraded_after_failures: self.degraded_after_failures,
            interval: Duration::from_millis(self.refresh_interval_ms),
            venue_intervals: HashMap::new(),
            max_backoff: Duration::from_millis(self.max_refresh_backoff_ms),
        }
    }

    /// Block feed reconnect settings.
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from_config(self.ws_max_reconnect_delay_s, self.ws_heartbeat_interval_s)
    }

    /// Engine settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_inflight_per_base: self.max_inflight_per_base,
        }
    }
}

fn check_url(name: &str, value: &str, schemes: &[&str]) -> Result<(), String> {
    let url = Url::parse(value).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!("{name} must use one of {}", schemes.join(", ")));
    }
    Ok(())
}

fn check_key(name: &str, key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err(format!("{name} is required"));
    }
    if !key.starts_with("0x") {
        return Err(format!("{name} must start with 0x"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot::tests::{cp_venue, token};
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;

    fn config() -> Config {
        envy::from_iter([
            ("RPC_URL".to_string(), "http://localhost:8545".to_string()),
            (
                "SEARCHER_PRIVATE_KEY".to_string(),
                crate::signing::tests::TEST_KEY.to_string(),
            ),
            (
                "EXECUTOR_ADDRESS".to_string(),
                "0x00000000000000000000000000000000000000e1".to_string(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn default_values_are_sensible() {
        let config = config();
        assert!(config.dry_run);
        assert_eq!(config.max_hops, 3);
        assert_eq!(config.staleness_secs, 60);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.target_block_window, 3);
        assert_eq!(config.min_profit, dec!(0.001));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_invalid_private_key_prefix() {
        let mut config = config();
        config.searcher_private_key = "abc123".to_string();
        assert!(config.validate().is_err());

        config.searcher_private_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_endpoints_and_limits() {
        let mut config = config();
        config.ws_url = Some("http://localhost:8546".to_string());
        assert!(config.validate().is_err());

        let mut config = super::tests::config();
        config.max_hops = 1;
        assert!(config.validate().is_err());

        let mut config = super::tests::config();
        config.min_priority_fee_gwei = dec!(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_token_specs_parse_prices() {
        let mut config = config();
        config.base_tokens = "WETH, USDC:2500.5 ,".to_string();
        assert_eq!(
            config.base_token_specs().unwrap(),
            vec![
                BaseTokenSpec { symbol: "WETH".to_string(), native_price: Decimal::ONE },
                BaseTokenSpec { symbol: "USDC".to_string(), native_price: dec!(2500.5) },
            ]
        );

        config.base_tokens = "USDC:-1".to_string();
        assert!(config.base_token_specs().is_err());
        config.base_tokens = "WETH,WETH".to_string();
        assert!(config.base_token_specs().is_err());
        config.base_tokens = " , ".to_string();
        assert!(config.base_token_specs().is_err());
    }

    #[test]
    fn thresholds_convert_into_base_units() {
        let at = OffsetDateTime::UNIX_EPOCH;
        let snapshot = GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![cp_venue(0, 0, 1, 1_000, 1_000, at)],
        )
        .unwrap();
        let mut config = config();
        config.base_tokens = "Y:2".to_string();

        let bases = config.base_tokens(&snapshot).unwrap();
        assert_eq!(bases.len(), 1);
        let y = &bases[0];
        let decimals = snapshot.token(y.token).unwrap().decimals;
        let unit = 10u128.pow(u32::from(decimals));
        // 0.001 native at 2 Y per native.
        assert_eq!(y.min_profit, (2 * unit / 1_000) as i128);
        assert_eq!(y.capital_ceiling, 100 * unit);
        assert_eq!(y.gas.native_price_in_base, 2 * unit);
        assert_eq!(y.gas.gas_price_wei, 20_000_000_000);

        config.base_tokens = "DAI".to_string();
        assert!(config.base_tokens(&snapshot).is_err());
    }

    #[test]
    fn finder_and_builder_share_the_sizing_rule() {
        let mut config = config();
        config.loan_fee_pips = 900;
        let finder = config.path_finder_config();
        let builder = config.bundle_config();
        assert_eq!(finder.sizer, builder.sizer);
        assert_eq!(finder.sizer.loan_fee_pips, 900);
    }

    #[test]
    fn refresh_backoff_settings() {
        let mut config = config();
        let refresh = config.refresh_config();
        assert_eq!(refresh.interval, Duration::from_millis(config.refresh_interval_ms));
        assert_eq!(refresh.max_backoff, Duration::from_secs(60));

        config.max_refresh_backoff_ms = config.refresh_interval_ms - 1;
        assert!(config.validate().is_err());
    }
}
