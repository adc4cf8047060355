//! Flash-loan bundle construction with fail-fast repayment checks.

use std::time::Duration;

use alloy::primitives::U256;
use smallvec::SmallVec;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::codec::bundle_id;
use super::types::{Bundle, Operation};
use crate::error::BundleError;
use crate::graph::{Edge, GraphSnapshot};
use crate::pathfinder::{BaseToken, BorrowSizer, Path};
use crate::venue::math::{apply_rate_up, mul_div, rate_mul_up, to_amount, Q128};
use crate::venue::{Amount, BPS_DENOMINATOR};

/// Bundle construction policy.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Per-swap slippage tolerance in bps.
    pub slippage_bps: u32,
    /// Maximum venue age at build time.
    pub staleness: Duration,
    /// Borrow sizing rule and flash-loan fee, shared with the path finder.
    pub sizer: BorrowSizer,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 50,
            staleness: Duration::from_secs(60),
            sizer: BorrowSizer::default(),
        }
    }
}

/// Builds bundles from ranked paths.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    config: BundleConfig,
}

impl BundleBuilder {
    /// Create a builder.
    pub fn new(config: BundleConfig) -> Self {
        Self { config }
    }

    /// Builder policy.
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Flash-loan fee on `principal`, rounded up.
    pub fn loan_fee(&self, principal: Amount) -> Amount {
        self.config.sizer.loan_fee(principal)
    }

    /// Lowest acceptable output for a swap expected to return `amount_out`.
    pub fn min_amount_out(&self, amount_out: Amount) -> Amount {
        let keep = BPS_DENOMINATOR.saturating_sub(self.config.slippage_bps);
        mul_div(U256::from(amount_out), U256::from(keep), U256::from(BPS_DENOMINATOR))
            .and_then(to_amount)
            .unwrap_or(0)
    }

    /// Build the borrow → swaps → repay sequence for `path`.
    ///
    /// Each hop is simulated with the previous hop's simulated output. After
    /// every hop the best case for the rest of the path must still cover the
    /// repayment, and the finished bundle must clear the base token's
    /// minimum profit after gas.
    #[instrument(skip_all, fields(hops = path.hops, version = snapshot.version()))]
    pub fn build(
        &self,
        snapshot: &GraphSnapshot,
        path: &Path,
        base: &BaseToken,
        now: OffsetDateTime,
    ) -> Result<Bundle, BundleError> {
        if path.base != base.token || path.edges.len() < 2 {
            return Err(BundleError::Invalid("path is not a cycle through the base token".into()));
        }
        let base_token = snapshot
            .token(base.token)
            .ok_or_else(|| BundleError::Invalid(format!("unknown base token {}", base.token)))?
            .address;

        let mut views: SmallVec<[Edge<'_>; 4]> = SmallVec::with_capacity(path.edges.len());
        for edge_ref in &path.edges {
            let edge = snapshot
                .edge(*edge_ref)
                .ok_or_else(|| BundleError::Invalid(format!("unknown venue {}", edge_ref.venue)))?;
            if edge.venue.is_stale(now, self.config.staleness) {
                return Err(BundleError::StaleData {
                    venue: edge.venue.id,
                    age_secs: edge.venue.age_secs(now),
                });
            }
            views.push(edge);
        }

        // Same profit-maximizing rule the finder used, so an unchanged
        // snapshot reproduces the path's borrow.
        let principal = self.config.sizer.size(&views, base.capital_ceiling);
        if principal == 0 {
            return Err(BundleError::ZeroBorrow);
        }
        // Fee is taken on the final sized principal and checked against the
        // recomputed final output.
        let loan_fee = self.loan_fee(principal);
        let required = principal.saturating_add(loan_fee);

        // remaining[i]: spot-rate product of hops i.. (upper bound on their return).
        let mut remaining = vec![Q128; views.len() + 1];
        for i in (0..views.len()).rev() {
            remaining[i] = rate_mul_up(views[i].spot_rate_q128(), remaining[i + 1]);
        }

        let mut operations = Vec::with_capacity(views.len() + 2);
        operations.push(Operation::Borrow { token: base_token, amount: principal });

        let mut amount = principal;
        for (step, edge) in views.iter().enumerate() {
            let quote = edge
                .amount_out(amount)
                .map_err(|source| BundleError::Quote { step, source })?;
            let best_case = to_amount(apply_rate_up(quote.amount_out, remaining[step + 1])).unwrap_or(Amount::MAX);
            if quote.exhausted || best_case < required {
                debug!(step, best_case, required, exhausted = quote.exhausted, "path cannot repay");
                return Err(BundleError::Infeasible {
                    step,
                    required,
                    available: if quote.exhausted { quote.amount_out } else { best_case },
                });
            }

            let token_in = snapshot.token(edge.token_in()).map(|t| t.address);
            let token_out = snapshot.token(edge.token_out()).map(|t| t.address);
            let (Some(token_in), Some(token_out)) = (token_in, token_out) else {
                return Err(BundleError::Invalid(format!("venue {} references unknown tokens", edge.venue.id)));
            };
            operations.push(Operation::Swap {
                step: u8::try_from(step).map_err(|_| BundleError::Invalid("too many hops".into()))?,
                venue: edge.venue.id,
                pool: edge.venue.address,
                kind: edge.venue.kind(),
                token_in,
                token_out,
                zero_for_one: edge.zero_for_one,
                amount_in: amount,
                amount_out: quote.amount_out,
                min_amount_out: self.min_amount_out(quote.amount_out),
            });
            amount = quote.amount_out;
        }

        let hops = views.len();
        if amount < required {
            return Err(BundleError::Infeasible {
                step: hops,
                required,
                available: amount,
            });
        }

        let gas_cost = base.gas.cost_in_base(hops);
        let expected_profit = crate::pathfinder::search::net(amount, required, gas_cost);
        if expected_profit <= 0 || expected_profit < base.min_profit {
            return Err(BundleError::BelowMinimumProfit {
                projected: expected_profit,
                minimum: base.min_profit,
            });
        }

        operations.push(Operation::Repay { token: base_token, amount: required });

        let bundle = Bundle {
            id: bundle_id(&operations, now),
            base: base.token,
            base_token,
            operations,
            principal,
            loan_fee,
            expected_output: amount,
            expected_profit,
            min_net_profit: base.min_profit,
            gas_estimate: base.gas.gas_units(hops),
            gas_cost,
            native_price_in_base: base.gas.native_price_in_base,
            snapshot_version: snapshot.version(),
            created_at: now,
        };
        bundle.validate()?;

        debug!(
            id = %bundle.id,
            principal,
            loan_fee,
            expected_profit,
            "bundle built"
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot::tests::{cp_venue, token};
    use crate::graph::EdgeRef;
    use crate::pathfinder::{GasModel, PathFinder, PathFinderConfig, WEI_PER_NATIVE};
    use crate::venue::{TokenId, VenueId};

    const E18: u128 = WEI_PER_NATIVE;

    fn base() -> BaseToken {
        BaseToken {
            token: TokenId(0),
            min_profit: 1,
            capital_ceiling: 50 * E18,
            gas: GasModel::free(),
        }
    }

    fn sizer() -> BorrowSizer {
        BorrowSizer { max_reserve_fraction_bps: 1_000, loan_fee_pips: 900 }
    }

    fn builder() -> BundleBuilder {
        BundleBuilder::new(BundleConfig {
            slippage_bps: 50,
            staleness: Duration::from_secs(60),
            sizer: sizer(),
        })
    }

    fn snapshot(now: OffsetDateTime, b_price: u128) -> GraphSnapshot {
        GraphSnapshot::new(
            vec![token(0, "X"), token(1, "Y")],
            vec![
                cp_venue(0, 0, 1, 1_000 * E18, 2_000 * E18, now),
                cp_venue(1, 0, 1, 1_000 * E18, b_price * E18, now),
            ],
        )
        .unwrap()
    }

    fn cycle(snap: &GraphSnapshot) -> Path {
        PathFinder::new(PathFinderConfig {
            sizer: sizer(),
            ..PathFinderConfig::default()
        })
        .find(snap, &base(), OffsetDateTime::now_utc())
        .unwrap()
        .remove(0)
    }

    #[test]
    fn builds_a_valid_bundle() {
        let now = OffsetDateTime::now_utc();
        let snap = snapshot(now, 2_400);
        let path = cycle(&snap);
        let bundle = builder().build(&snap, &path, &base(), now).unwrap();

        assert_eq!(bundle.principal, path.amount_in);
        assert_eq!(bundle.loan_fee, (bundle.principal * 9).div_ceil(10_000));
        assert_eq!(bundle.expected_output, path.amount_out);
        assert_eq!(bundle.expected_profit, path.net_profit);
        assert_eq!(
            bundle.expected_profit,
            bundle.expected_output as i128 - bundle.repay_amount() as i128
        );
        assert_eq!(bundle.operations.len(), 4);
        assert_eq!(bundle.touched_venues(), vec![VenueId(1), VenueId(0)]);
        assert!(bundle.validate().is_ok());

        for op in &bundle.operations {
            if let Operation::Swap { amount_out, min_amount_out, .. } = op {
                assert_eq!(*min_amount_out, amount_out * 9_950 / 10_000);
            }
        }
    }

    #[test]
    fn stale_venue_is_rejected_at_build_time() {
        let now = OffsetDateTime::now_utc();
        let snap = snapshot(now, 2_400);
        let path = cycle(&snap);
        let later = now + Duration::from_secs(61);
        assert!(matches!(
            builder().build(&snap, &path, &base(), later),
            Err(BundleError::StaleData { age_secs: 61, .. })
        ));
    }

    #[test]
    fn unrecoverable_path_fails_fast() {
        let now = OffsetDateTime::now_utc();
        // Balanced pools: the round trip loses both fees.
        let snap = snapshot(now, 2_000);
        let path = Path {
            base: TokenId(0),
            edges: [
                EdgeRef { venue: VenueId(1), zero_for_one: true },
                EdgeRef { venue: VenueId(0), zero_for_one: false },
            ]
            .into_iter()
            .collect(),
            hops: 2,
            amount_in: 0,
            amount_out: 0,
            gas_cost: 0,
            net_profit: 0,
            max_utilization_bps: 0,
            freshness: now,
            oldest_refresh: now,
            snapshot_version: 0,
        };
        // Already after the first hop the best case cannot cover the loan.
        assert!(matches!(
            builder().build(&snap, &path, &base(), now),
            Err(BundleError::Infeasible { step: 0, .. })
        ));
    }

    #[test]
    fn gas_can_push_a_bundle_below_minimum() {
        let now = OffsetDateTime::now_utc();
        let snap = snapshot(now, 2_400);
        let path = cycle(&snap);
        let expensive = BaseToken {
            gas: GasModel {
                base_gas: 1_000_000,
                per_hop_gas: 0,
                gas_price_wei: 10_000_000_000_000,
                native_price_in_base: E18,
            },
            ..base()
        };
        assert!(matches!(
            builder().build(&snap, &path, &expensive, now),
            Err(BundleError::BelowMinimumProfit { .. })
        ));
    }

    #[test]
    fn every_built_bundle_covers_repayment() {
        let now = OffsetDateTime::now_utc();
        let b = builder();
        for price in [2_010u128, 2_050, 2_100, 2_400, 3_000, 5_000] {
            let snap = snapshot(now, price);
            for ceiling in [E18 / 10, E18, 10 * E18, 50 * E18, 500 * E18] {
                let base = BaseToken { capital_ceiling: ceiling, ..base() };
                let finder = PathFinder::new(PathFinderConfig {
                    sizer: sizer(),
                    ..PathFinderConfig::default()
                });
                for path in finder.find(&snap, &base, now).unwrap() {
                    if let Ok(bundle) = b.build(&snap, &path, &base, now) {
                        assert!(bundle.expected_output >= bundle.principal + bundle.loan_fee);
                    }
                }
            }
        }
    }
}
