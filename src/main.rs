//! Cycle arbitrage bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cycle_arb::api::{create_router, AppState};
use cycle_arb::bundle::BundleBuilder;
use cycle_arb::config::Config;
use cycle_arb::engine::Engine;
use cycle_arb::execution::{ExecutionCoordinator, RelayBackend};
use cycle_arb::graph::{spawn_refresh_loop, BlockWatcher, LiquidityGraph, RefreshConfig, VenueRegistry};
use cycle_arb::metrics;
use cycle_arb::pathfinder::PathFinder;
use cycle_arb::rpc::JsonRpcClient;
use cycle_arb::signing::{address_from_private_key, create_signer, LocalTxSigner};
use cycle_arb::sink::{spawn_forwarder, ChannelSink};
use cycle_arb::utils::{format_units, shutdown_signal};
use cycle_arb::venue::RpcVenueSource;

/// Multi-hop DEX cycle arbitrage bot.
#[derive(Parser, Debug)]
#[command(name = "cycle-arb")]
#[command(about = "Finds and executes flash-loan funded DEX arbitrage cycles")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true, env = "LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the discovery and execution loop (default).
    Run {
        /// Simulate only; `--dry-run false` enables submissions.
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/metrics.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Refresh every registered venue once and print its state.
    Venues,

    /// Refresh once and print the best cycles per base token.
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("cycle_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    // Initialize metrics
    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::Venues) => cmd_venues().await,
        Some(Command::Scan) => cmd_scan().await,
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(None, None).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;
    Ok(config)
}

/// Build the graph from the registry. Venue state is empty until the first
/// refresh.
fn load_graph(config: &Config) -> anyhow::Result<LiquidityGraph> {
    let registry = VenueRegistry::load(&config.registry_path)?;
    let initial = registry.build()?;
    let source = RpcVenueSource::new(
        &config.rpc_url,
        Duration::from_millis(config.venue_timeout_ms),
        config.tick_window_words,
    )?;
    let refresh = RefreshConfig {
        venue_intervals: registry.refresh_intervals(),
        ..config.refresh_config()
    };
    let graph = LiquidityGraph::new(initial, Arc::new(source), refresh);
    Ok(graph)
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CYCLE ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    print!("Checking searcher key... ");
    match address_from_private_key(&config.searcher_private_key) {
        Ok(addr) => {
            println!("OK");
            println!("  Searcher address: {}", addr);
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Searcher key invalid"));
        }
    }

    print!("Loading registry... ");
    let snapshot = match VenueRegistry::load(&config.registry_path).and_then(|r| r.build()) {
        Ok(s) => {
            println!("OK");
            println!("  Tokens: {}  Venues: {}", s.tokens().len(), s.venues().len());
            s
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Registry invalid"));
        }
    };

    print!("Resolving base tokens... ");
    let bases = match config.base_tokens(&snapshot) {
        Ok(b) => {
            println!("OK");
            b
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Base tokens invalid"));
        }
    };

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Chain ID: {}", config.chain_id);
    println!("  Executor: {}", config.executor_address);
    println!("  Relay: {}", config.relay_url);
    println!("  Block Feed: {}", config.ws_url.as_deref().unwrap_or("polling"));
    println!(
        "  Refresh: every {}ms, backoff up to {}ms",
        config.refresh_interval_ms, config.max_refresh_backoff_ms
    );
    for base in &bases {
        let decimals = snapshot.token(base.token).map(|t| t.decimals).unwrap_or(18);
        let symbol = snapshot.token(base.token).map(|t| t.symbol.as_str()).unwrap_or("?");
        println!(
            "  Base {}: min profit {}, ceiling {}",
            symbol,
            format_units(base.min_profit, decimals),
            format_units(base.capital_ceiling as i128, decimals)
        );
    }
    println!("  Max Hops: {}", config.max_hops);
    println!("  Loan Fee: {} pips", config.loan_fee_pips);
    println!("  Slippage: {} bps", config.slippage_bps);
    println!("  Gas Ceiling: {} gwei", config.max_gas_price_gwei);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Sink: {}", config.sink_url.as_deref().unwrap_or("log only"));
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Refresh every venue once and print its state.
async fn cmd_venues() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CYCLE ARB - VENUE STATE");
    println!("======================================================================");

    let config = load_config()?;
    let graph = load_graph(&config)?;

    let start = Instant::now();
    let report = graph.refresh_all().await;
    println!(
        "Refreshed {} venues in {}ms ({} failed)",
        report.refreshed.len(),
        start.elapsed().as_millis(),
        report.failed.len()
    );
    println!("----------------------------------------------------------------------");

    let snapshot = graph.snapshot();
    for venue in snapshot.venues() {
        let symbol = |id| {
            snapshot
                .token(id)
                .map(|t| t.symbol.clone())
                .unwrap_or_else(|| "?".to_string())
        };
        let status = if report.failed.contains(&venue.id) {
            "FAILED"
        } else if snapshot.is_degraded(venue.id) {
            "DEGRADED"
        } else {
            "OK"
        };
        println!(
            "  {} {}/{} {} fee={}pips [{}]",
            venue.address,
            symbol(venue.token0),
            symbol(venue.token1),
            venue.state.kind(),
            venue.fee_pips,
            status
        );
    }
    println!("======================================================================");

    Ok(())
}

/// Refresh once and print ranked cycles without executing.
async fn cmd_scan() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CYCLE ARB - SCAN");
    println!("======================================================================");

    let config = load_config()?;
    let graph = load_graph(&config)?;
    let report = graph.refresh_all().await;
    println!(
        "Snapshot v{}: {} venues refreshed, {} failed",
        report.version,
        report.refreshed.len(),
        report.failed.len()
    );

    let snapshot = graph.snapshot();
    let bases = config.base_tokens(&snapshot).map_err(anyhow::Error::msg)?;
    let finder = PathFinder::new(config.path_finder_config());
    let builder = BundleBuilder::new(config.bundle_config());
    let now = OffsetDateTime::now_utc();

    for base in &bases {
        let (symbol, decimals) = snapshot
            .token(base.token)
            .map(|t| (t.symbol.clone(), t.decimals))
            .unwrap_or_else(|| (base.token.to_string(), 18));
        println!("----------------------------------------------------------------------");
        println!("Base {}:", symbol);

        let start = Instant::now();
        let paths = finder.find(&snapshot, base, now)?;
        println!("  {} cycles in {}ms", paths.len(), start.elapsed().as_millis());

        for (rank, path) in paths.iter().enumerate() {
            println!(
                "  #{} {} in={} net={} util={}bps",
                rank + 1,
                path.describe(&snapshot),
                format_units(path.amount_in as i128, decimals),
                format_units(path.net_profit, decimals),
                path.max_utilization_bps
            );
            match builder.build(&snapshot, path, base, now) {
                Ok(bundle) => println!(
                    "     bundle {:#x}: principal={} floor={}",
                    bundle.id,
                    format_units(bundle.principal as i128, decimals),
                    format_units(bundle.min_net_profit, decimals)
                ),
                Err(e) => println!("     not buildable: {}", e),
            }
        }
    }
    println!("======================================================================");

    Ok(())
}

/// Run the discovery and execution loop.
async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.dry_run { "SIMULATION" } else { "LIVE" });

    // Liquidity graph
    let (update_tx, update_rx) = mpsc::channel(16);
    let graph = Arc::new(load_graph(&config)?.with_updates(update_tx));
    let report = graph.refresh_all().await;
    info!(
        version = report.version,
        refreshed = report.refreshed.len(),
        failed = report.failed.len(),
        "Initial snapshot ready"
    );

    let bases = config
        .base_tokens(&graph.snapshot())
        .map_err(anyhow::Error::msg)?;

    // Block feed drives refreshes; interval polling is the fallback.
    let blocks = config.ws_url.clone().map(|url| {
        info!("Subscribing to new heads at {}", url);
        Arc::new(BlockWatcher::new(url, config.reconnect_config())).run_with_reconnect()
    });
    let _refresh_handle = spawn_refresh_loop(graph.clone(), blocks);

    // Execution backend
    let rpc_timeout = Duration::from_millis(config.submit_timeout_ms);
    let node = JsonRpcClient::new(config.rpc_url.clone(), rpc_timeout)?;
    let relay = JsonRpcClient::new(config.relay_url.clone(), rpc_timeout)?;
    let searcher = create_signer(&config.searcher_private_key)?;
    let auth = create_signer(config.relay_key())?;
    let executor = config.executor().map_err(anyhow::Error::msg)?;
    let backend = RelayBackend::new(
        node,
        relay,
        auth,
        Arc::new(LocalTxSigner::new(searcher, config.chain_id)),
        executor,
    );
    let fees = config.fee_policy().map_err(anyhow::Error::msg)?;
    let coordinator = Arc::new(ExecutionCoordinator::new(
        Arc::new(backend),
        fees,
        config.execution_config(),
    ));

    // Result sink
    let (sink, sink_rx) = ChannelSink::new(config.sink_capacity);
    let _sink_handle = spawn_forwarder(sink_rx, config.sink_url.clone(), Duration::from_secs(5));

    let engine = Arc::new(Engine::new(
        graph.clone(),
        PathFinder::new(config.path_finder_config()),
        BundleBuilder::new(config.bundle_config()),
        coordinator,
        Arc::new(sink),
        bases,
        config.engine_config(),
    ));

    // HTTP server
    let mut app_state = AppState::new(engine.stats(), config.dry_run);
    match metrics::install_prometheus() {
        Ok(handle) => app_state = app_state.with_prometheus(handle),
        Err(e) => warn!("Prometheus recorder unavailable: {}", e),
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());
    let _server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    info!("========================================");
    info!("CYCLE ARBITRAGE ENGINE STARTED");
    info!("========================================");
    app_state.set_ready(true);

    tokio::select! {
        _ = engine.clone().run(update_rx) => {
            warn!("Snapshot updates ended");
        }
        _ = shutdown_signal() => {}
    }
    app_state.set_ready(false);

    let stats = engine.stats().read().await.clone();
    info!("========================================");
    info!("FINAL SUMMARY");
    info!("========================================");
    info!("Discovery cycles: {}", stats.cycles);
    info!("Opportunities: {}", stats.opportunities);
    info!("Bundles built: {}", stats.bundles_built);
    info!("Executions: {} (included {}, rejected {}, abandoned {}, dry-run {})",
        stats.executions, stats.included, stats.rejected, stats.abandoned, stats.dry_runs);
    info!("========================================");

    Ok(())
}
