//! Bring held positions in line with the cycle's targets

use futures_util::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::batch::submit_order;
use super::types::{Bucket, BucketSizing, CycleContext, TargetSets};
use crate::common::traits::BrokerGateway;
use crate::common::types::{Position, Side};

/// What to do with one held position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionAction {
    /// Not targeted: close the whole position
    Liquidate { symbol: String, qty: Decimal, side: Side },
    /// Targeted on the other side: close the existing side only
    Flip {
        symbol: String,
        qty: Decimal,
        side: Side,
        to: Bucket,
    },
    /// Already at target
    Hold { symbol: String, bucket: Bucket },
    /// On the right side with the wrong size
    Adjust {
        symbol: String,
        bucket: Bucket,
        qty: Decimal,
        side: Side,
    },
}

impl PositionAction {
    pub fn symbol(&self) -> &str {
        match self {
            PositionAction::Liquidate { symbol, .. }
            | PositionAction::Flip { symbol, .. }
            | PositionAction::Hold { symbol, .. }
            | PositionAction::Adjust { symbol, .. } => symbol,
        }
    }

    /// Bucket the symbol ends the phase positioned in, which exempts it from
    /// batch submission
    pub fn settled_bucket(&self) -> Option<Bucket> {
        match self {
            PositionAction::Hold { bucket, .. } | PositionAction::Adjust { bucket, .. } => {
                Some(*bucket)
            }
            _ => None,
        }
    }
}

/// Classify a position against the targets
pub fn classify(position: &Position, targets: &TargetSets, sizing: &BucketSizing) -> PositionAction {
    let symbol = position.symbol.clone();
    let held = position.abs_qty();

    let bucket = match targets.bucket_of(&position.symbol) {
        Some(bucket) => bucket,
        None => {
            return PositionAction::Liquidate {
                symbol,
                qty: held,
                side: position.side.closing_side(),
            }
        }
    };

    if bucket.position_side() != position.side {
        return PositionAction::Flip {
            symbol,
            qty: held,
            side: position.side.closing_side(),
            to: bucket,
        };
    }

    let target = Decimal::from(sizing.quantity(bucket));
    if held == target {
        return PositionAction::Hold { symbol, bucket };
    }

    let side = match bucket {
        Bucket::Long if target > held => Side::Buy,
        Bucket::Long => Side::Sell,
        // Too many shares short means buying some back
        Bucket::Short if held > target => Side::Buy,
        Bucket::Short => Side::Sell,
    };
    PositionAction::Adjust {
        symbol,
        bucket,
        qty: (target - held).abs(),
        side,
    }
}

/// Outcome of the reconcile phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub liquidated: Vec<String>,
    pub flipped: Vec<String>,
}

/// Submit the order each position needs, concurrently, and record settled
/// symbols in the cycle context once all orders have returned
pub async fn reconcile_positions(
    gateway: &dyn BrokerGateway,
    positions: &[Position],
    ctx: &mut CycleContext,
) -> ReconcileSummary {
    let actions: Vec<PositionAction> = positions
        .iter()
        .map(|p| classify(p, &ctx.targets, &ctx.sizing))
        .collect();

    join_all(actions.iter().map(|action| async move {
        match action {
            PositionAction::Liquidate { symbol, qty, side } => {
                info!(symbol = %symbol, %qty, "Closing untargeted position");
                submit_order(gateway, *qty, symbol, *side).await;
            }
            PositionAction::Flip {
                symbol,
                qty,
                side,
                to,
            } => {
                info!(symbol = %symbol, %qty, bucket = %to, "Target side changed, closing position");
                submit_order(gateway, *qty, symbol, *side).await;
            }
            PositionAction::Hold { symbol, .. } => {
                debug!(symbol = %symbol, "Position is where we want it");
            }
            PositionAction::Adjust {
                symbol, qty, side, ..
            } => {
                submit_order(gateway, *qty, symbol, *side).await;
            }
        }
    }))
    .await;

    let mut summary = ReconcileSummary::default();
    for action in &actions {
        match action {
            PositionAction::Liquidate { symbol, .. } => summary.liquidated.push(symbol.clone()),
            PositionAction::Flip { symbol, .. } => summary.flipped.push(symbol.clone()),
            _ => {}
        }
        if let Some(bucket) = action.settled_bucket() {
            ctx.mark_executed(bucket, action.symbol());
        }
    }
    summary
}
