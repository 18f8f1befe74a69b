//! Long-short equity rebalancer
//!
//! Each cycle ranks the universe by recent momentum, goes long the top
//! quartile and short the bottom quartile, and sizes both buckets from
//! account equity:
//!
//! ```text
//! cancel open orders → rank → reconcile held positions
//!     → batch submit (long ∥ short) → adjust for failures → reorder
//! ```

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use super::batch::{adjusted_quantity, cancel_open_orders, reorder, send_batch};
use super::ranking::{rank, size_buckets, split_buckets};
use super::reconcile::reconcile_positions;
use super::session::liquidate_all;
use super::telemetry::TelemetrySink;
use super::traits::SessionStrategy;
use super::types::{
    BatchResult, Bucket, BucketSizing, CycleContext, CycleReport, TargetSets,
    Universe,
};
use crate::common::errors::Result;
use crate::common::traits::BrokerGateway;
use crate::config::types::LongShortConfig;

/// Long-short equity strategy state
#[derive(Debug, Clone)]
pub struct LongShort {
    symbols: Vec<String>,
    short_fraction: Decimal,
    lookback_bars: u32,
    /// Rankings carried between cycles of one session
    universe: Universe,
    /// Last computed sizing; a bucket with no price keeps its quantity
    sizing: BucketSizing,
}

impl LongShort {
    pub fn new(config: &LongShortConfig) -> Self {
        Self {
            symbols: config.universe.clone(),
            short_fraction: config.short_fraction,
            lookback_bars: config.lookback_bars,
            universe: Universe::new(config.universe.clone()),
            sizing: BucketSizing::default(),
        }
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn sizing(&self) -> &BucketSizing {
        &self.sizing
    }

    /// Forget rankings and quantities
    pub fn reset(&mut self) {
        self.universe = Universe::new(self.symbols.clone());
        self.sizing = BucketSizing::default();
    }

    /// Rank the universe and size both buckets
    pub async fn rerank(&mut self, gateway: &dyn BrokerGateway) -> (TargetSets, BucketSizing) {
        rank(gateway, &mut self.universe, self.lookback_bars).await;
        let targets = split_buckets(&self.universe);
        self.sizing = size_buckets(gateway, &targets, self.short_fraction, &self.sizing).await;
        (targets, self.sizing.clone())
    }

    /// Run one full rebalance cycle
    #[instrument(skip_all)]
    pub async fn rebalance(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> CycleReport {
        cancel_open_orders(gateway).await;

        let (targets, sizing) = self.rerank(gateway).await;
        telemetry.record_event(&format!(
            "We are taking a long position in: {}",
            targets.long.join(",")
        ));
        telemetry.record_event(&format!(
            "We are taking a short position in: {}",
            targets.short.join(",")
        ));
        info!(
            q_long = sizing.q_long,
            q_short = sizing.q_short,
            long_capital = %sizing.long_capital,
            short_capital = %sizing.short_capital,
            "Bucket sizing"
        );

        let positions = match gateway.get_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Failed to fetch positions");
                Vec::new()
            }
        };

        let mut ctx = CycleContext::new(targets, sizing);
        let summary = reconcile_positions(gateway, &positions, &mut ctx).await;

        let (long_batch, short_batch) = tokio::join!(
            send_batch(
                gateway,
                ctx.sizing.q_long,
                &ctx.targets.long,
                Bucket::Long.entry_side(),
                &ctx.blacklist
            ),
            send_batch(
                gateway,
                ctx.sizing.q_short,
                &ctx.targets.short,
                Bucket::Short.entry_side(),
                &ctx.blacklist
            )
        );

        let long_filled = filled_symbols(&long_batch, ctx.executed(Bucket::Long));
        let short_filled = filled_symbols(&short_batch, ctx.executed(Bucket::Short));

        let (adjusted_q_long, adjusted_q_short) = tokio::join!(
            adjusted_quantity(
                gateway,
                ctx.sizing.long_capital,
                &long_batch.incomplete,
                &long_filled
            ),
            adjusted_quantity(
                gateway,
                ctx.sizing.short_capital,
                &short_batch.incomplete,
                &short_filled
            )
        );

        let reorder_long = async {
            if let Some(adjusted) = adjusted_q_long {
                info!(adjusted, original = ctx.sizing.q_long, "Reordering long bucket");
                reorder(gateway, &long_filled, ctx.sizing.q_long, adjusted, Bucket::Long.entry_side())
                    .await;
            }
        };
        let reorder_short = async {
            if let Some(adjusted) = adjusted_q_short {
                info!(adjusted, original = ctx.sizing.q_short, "Reordering short bucket");
                reorder(
                    gateway,
                    &short_filled,
                    ctx.sizing.q_short,
                    adjusted,
                    Bucket::Short.entry_side(),
                )
                .await;
            }
        };
        tokio::join!(reorder_long, reorder_short);

        CycleReport {
            targets: ctx.targets,
            sizing: ctx.sizing,
            liquidated: summary.liquidated,
            flipped: summary.flipped,
            long_batch,
            short_batch,
            adjusted_q_long,
            adjusted_q_short,
        }
    }
}

/// Batch successes followed by symbols already held in the bucket
fn filled_symbols(batch: &BatchResult, already_held: &[String]) -> Vec<String> {
    batch
        .executed
        .iter()
        .chain(already_held.iter())
        .cloned()
        .collect()
}

#[async_trait]
impl SessionStrategy for LongShort {
    fn name(&self) -> &str {
        "long_short"
    }

    async fn on_session_start(
        &mut self,
        _gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        self.reset();
        telemetry.record_event(&format!(
            "Long-short session starting with {} symbols.",
            self.universe.len()
        ));
        Ok(())
    }

    async fn on_tick(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        self.rebalance(gateway, telemetry).await;
        Ok(())
    }

    async fn on_wind_down(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        liquidate_all(gateway, telemetry).await;
        Ok(())
    }
}
