//! End-to-end tests for the cycle arbitrage pipeline.
//!
//! Venue state comes from a scripted mock source and execution goes through
//! a mock chain backend, so these run without network access.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;

use cycle_arb::bundle::{
    decode_operations, encode_operations, BundleBuilder, BundleConfig, Operation,
};
use cycle_arb::engine::{Engine, EngineConfig};
use cycle_arb::execution::{
    ExecutionConfig, ExecutionCoordinator, FeePolicy, InclusionStatus, MockBackend,
    MockBackendConfig, Outcome, SimulationResult,
};
use cycle_arb::graph::{LiquidityGraph, RefreshConfig, VenueRegistry};
use cycle_arb::pathfinder::{BaseToken, GasModel, PathFinder, PathFinderConfig};
use cycle_arb::sink::{ChannelSink, SinkEvent};
use cycle_arb::venue::{MockVenueSource, VenueId};

const E18: u128 = 1_000_000_000_000_000_000;

const REGISTRY: &str = r#"{
    "tokens": [
        { "symbol": "WETH", "address": "0x0000000000000000000000000000000000000001", "decimals": 18 },
        { "symbol": "USDC", "address": "0x0000000000000000000000000000000000000002", "decimals": 18 },
        { "symbol": "DAI",  "address": "0x0000000000000000000000000000000000000003", "decimals": 18 }
    ],
    "venues": [
        { "address": "0x00000000000000000000000000000000000000a0", "kind": "constant_product",
          "token0": "WETH", "token1": "USDC", "fee_pips": 3000 },
        { "address": "0x00000000000000000000000000000000000000a1", "kind": "constant_product",
          "token0": "USDC", "token1": "DAI", "fee_pips": 3000 },
        { "address": "0x00000000000000000000000000000000000000a2", "kind": "constant_product",
          "token0": "WETH", "token1": "DAI", "fee_pips": 3000 }
    ]
}"#;

/// One WETH buys 2200 DAI but costs only 2000 USDC, so
/// WETH→DAI→USDC→WETH returns about 10% before fees.
fn mock_source() -> Arc<MockVenueSource> {
    let source = Arc::new(MockVenueSource::new());
    source.set_reserves(VenueId(0), 1_000 * E18, 2_000_000 * E18);
    source.set_reserves(VenueId(1), 5_000_000 * E18, 5_000_000 * E18);
    source.set_reserves(VenueId(2), 1_000 * E18, 2_200_000 * E18);
    source
}

fn graph(source: Arc<MockVenueSource>) -> LiquidityGraph {
    let initial = VenueRegistry::from_json(REGISTRY).unwrap().build().unwrap();
    LiquidityGraph::new(initial, source, RefreshConfig::default())
}

fn weth(graph: &LiquidityGraph) -> BaseToken {
    BaseToken {
        token: graph.snapshot().token_by_symbol("WETH").unwrap().id,
        min_profit: E18 as i128 / 100,
        capital_ceiling: 50 * E18,
        gas: GasModel::free(),
    }
}

fn fees() -> FeePolicy {
    FeePolicy {
        max_gas_price_wei: 100_000_000_000,
        min_priority_fee_wei: 1_000_000_000,
        inclusion_percentile: 90,
        fee_bump_bps: 1_000,
    }
}

fn live_execution() -> ExecutionConfig {
    ExecutionConfig {
        dry_run: false,
        poll_interval_ms: 5,
        ..ExecutionConfig::default()
    }
}

fn profitable_simulation() -> MockBackendConfig {
    MockBackendConfig {
        simulation: SimulationResult {
            success: true,
            profit: 10 * E18 as i128,
            gas_used: 250_000,
            revert_reason: None,
        },
        ..MockBackendConfig::default()
    }
}

#[tokio::test]
async fn nothing_is_searchable_before_the_first_refresh() {
    let graph = graph(mock_source());
    let base = weth(&graph);
    let paths = PathFinder::new(PathFinderConfig::default())
        .find(&graph.snapshot(), &base, OffsetDateTime::now_utc())
        .unwrap();
    assert!(paths.is_empty());
}

#[tokio::test]
async fn refresh_search_and_build_produce_a_consistent_bundle() {
    let graph = graph(mock_source());
    let report = graph.refresh_all().await;
    assert_eq!(report.refreshed.len(), 3);
    assert!(report.failed.is_empty());

    let snapshot = graph.snapshot();
    let base = weth(&graph);
    let now = OffsetDateTime::now_utc();
    let paths = PathFinder::new(PathFinderConfig::default())
        .find(&snapshot, &base, now)
        .unwrap();
    assert!(!paths.is_empty());

    let best = &paths[0];
    assert_eq!(best.hops, 3);
    assert!(best.net_profit >= base.min_profit);
    assert!(best.amount_in <= base.capital_ceiling);
    for pair in paths.windows(2) {
        assert!(pair[0].net_profit >= pair[1].net_profit);
    }

    let bundle = BundleBuilder::new(BundleConfig::default())
        .build(&snapshot, best, &base, now)
        .unwrap();
    bundle.validate().unwrap();
    assert_eq!(bundle.base, base.token);
    assert_eq!(bundle.touched_venues().len(), 3);

    assert!(matches!(bundle.operations.first(), Some(Operation::Borrow { .. })));
    assert!(matches!(bundle.operations.last(), Some(Operation::Repay { .. })));
    let encoded = encode_operations(&bundle.operations);
    assert_eq!(decode_operations(&encoded).unwrap(), bundle.operations);
}

#[tokio::test]
async fn failing_venue_breaks_the_cycle_until_it_recovers() {
    let source = mock_source();
    let graph = graph(source.clone());
    graph.refresh_all().await;

    source.fail(VenueId(1));
    let config = RefreshConfig::default();
    for _ in 0..config.degraded_after_failures {
        graph.refresh_all().await;
    }
    let snapshot = graph.snapshot();
    assert!(snapshot.is_degraded(VenueId(1)));

    let base = weth(&graph);
    let finder = PathFinder::new(PathFinderConfig::default());
    let paths = finder.find(&snapshot, &base, OffsetDateTime::now_utc()).unwrap();
    assert!(paths.iter().all(|p| p.edges.iter().all(|e| e.venue != VenueId(1))));

    source.recover(VenueId(1));
    let report = graph.refresh_all().await;
    assert!(report.recovered.contains(&VenueId(1)));
    let paths = finder
        .find(&graph.snapshot(), &base, OffsetDateTime::now_utc())
        .unwrap();
    assert!(!paths.is_empty());
}

#[tokio::test]
async fn coordinator_submits_and_observes_inclusion() {
    let graph = graph(mock_source());
    graph.refresh_all().await;
    let snapshot = graph.snapshot();
    let base = weth(&graph);
    let now = OffsetDateTime::now_utc();
    let path = PathFinder::new(PathFinderConfig::default())
        .find(&snapshot, &base, now)
        .unwrap()
        .remove(0);
    let bundle = BundleBuilder::new(BundleConfig::default())
        .build(&snapshot, &path, &base, now)
        .unwrap();

    let backend = Arc::new(MockBackend::new(profitable_simulation()));
    backend.push_inclusion(InclusionStatus::Pending);
    backend.push_inclusion(InclusionStatus::Included {
        block: 102,
        gas_used: 240_000,
        effective_gas_price: 31_000_000_000,
        actual_profit: None,
    });

    let coordinator = ExecutionCoordinator::new(backend.clone(), fees(), live_execution());
    let report = coordinator.execute(Arc::new(bundle)).await;

    assert_eq!(report.outcome, Outcome::Included);
    assert_eq!(report.included_block, Some(102));
    assert_eq!(report.gas_used, Some(240_000));
    assert_eq!(backend.submissions().len(), 1);
    assert_eq!(report.attempts.len(), 1);
}

#[tokio::test]
async fn engine_reports_opportunities_and_results_to_the_sink() {
    let (update_tx, update_rx) = mpsc::channel(16);
    let source = mock_source();
    let graph = Arc::new(graph(source).with_updates(update_tx));
    let base = weth(&graph);

    let backend = Arc::new(MockBackend::new(profitable_simulation()));
    backend.push_inclusion(InclusionStatus::Included {
        block: 101,
        gas_used: 200_000,
        effective_gas_price: 32_000_000_000,
        actual_profit: None,
    });
    let coordinator = Arc::new(ExecutionCoordinator::new(
        backend.clone(),
        fees(),
        live_execution(),
    ));
    let (sink, mut events) = ChannelSink::new(64);

    let engine = Arc::new(Engine::new(
        graph.clone(),
        PathFinder::new(PathFinderConfig::default()),
        BundleBuilder::new(BundleConfig::default()),
        coordinator,
        Arc::new(sink),
        vec![base],
        EngineConfig::default(),
    ));
    let run = tokio::spawn(engine.clone().run(update_rx));

    graph.refresh_all().await;

    let mut saw_opportunity = false;
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            match event {
                SinkEvent::OpportunityFound { base, .. } => {
                    assert_eq!(base, "WETH");
                    saw_opportunity = true;
                }
                SinkEvent::ExecutionResult { outcome, included_block, .. } => {
                    return (outcome, included_block);
                }
            }
        }
        panic!("sink closed before an execution result");
    })
    .await
    .unwrap();

    assert!(saw_opportunity);
    assert_eq!(result, ("included".to_string(), Some(101)));
    assert!(!backend.submissions().is_empty());

    let stats = engine.stats().read().await.clone();
    assert!(stats.opportunities >= 1);
    assert!(stats.bundles_built >= 1);
    run.abort();
}

#[tokio::test]
async fn dry_run_engine_never_submits() {
    let (update_tx, update_rx) = mpsc::channel(16);
    let graph = Arc::new(graph(mock_source()).with_updates(update_tx));
    let base = weth(&graph);

    let backend = Arc::new(MockBackend::new(profitable_simulation()));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        backend.clone(),
        fees(),
        ExecutionConfig::default(),
    ));
    let (sink, mut events) = ChannelSink::new(64);
    let engine = Arc::new(Engine::new(
        graph.clone(),
        PathFinder::new(PathFinderConfig::default()),
        BundleBuilder::new(BundleConfig::default()),
        coordinator,
        Arc::new(sink),
        vec![base],
        EngineConfig::default(),
    ));
    let run = tokio::spawn(engine.run(update_rx));

    graph.refresh_all().await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(SinkEvent::ExecutionResult { outcome, .. }) => return outcome,
                Some(_) => continue,
                None => panic!("sink closed"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome, "dry_run");
    assert!(backend.simulations() >= 1);
    assert!(backend.submissions().is_empty());
    run.abort();
}
