//! Momentum ranking, bucket selection and bucket sizing

use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::types::{BucketSizing, TargetSets, Universe};
use crate::common::traits::BrokerGateway;
use crate::common::types::{Bar, TimeFrame};

/// `(close(newest) - open(oldest)) / open(oldest)` over bars ordered oldest first
pub fn percent_change(bars: &[Bar]) -> Option<Decimal> {
    let oldest = bars.first()?;
    let newest = bars.last()?;
    (newest.close - oldest.open).checked_div(oldest.open)
}

/// Refresh every entry's percent change concurrently, then sort ascending
///
/// Symbols whose fetch fails or yields no usable bars keep their previous
/// value.
pub async fn rank(gateway: &dyn BrokerGateway, universe: &mut Universe, lookback_bars: u32) {
    let symbols = universe.symbols();
    let changes = join_all(symbols.iter().map(|symbol| async move {
        match gateway.get_bars(TimeFrame::Minute, symbol, lookback_bars).await {
            Ok(bars) => {
                let change = percent_change(&bars);
                if change.is_none() {
                    warn!(symbol = %symbol, "No usable bars, keeping previous ranking value");
                }
                change
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to fetch bars");
                None
            }
        }
    }))
    .await;

    for (entry, change) in universe.entries_mut().iter_mut().zip(changes) {
        if let Some(change) = change {
            entry.percent_change = change;
        }
    }
    universe.sort_ascending();
}

/// Lowest `floor(N/4)` symbols go short, highest `floor(N/4)` go long
///
/// Expects the universe sorted ascending.
pub fn split_buckets(universe: &Universe) -> TargetSets {
    let entries = universe.entries();
    let n = entries.len();
    let bucket_size = n / 4;

    TargetSets {
        short: entries[..bucket_size]
            .iter()
            .map(|e| e.symbol.clone())
            .collect(),
        long: entries[n - bucket_size..]
            .iter()
            .map(|e| e.symbol.clone())
            .collect(),
    }
}

/// Most recent one-minute close
pub async fn latest_close(gateway: &dyn BrokerGateway, symbol: &str) -> Option<Decimal> {
    match gateway.get_bars(TimeFrame::Minute, symbol, 1).await {
        Ok(bars) => bars.last().map(|bar| bar.close),
        Err(e) => {
            warn!(symbol, error = %e, "Failed to fetch latest price");
            None
        }
    }
}

/// Sum of the latest closes of `symbols`; failed fetches contribute nothing
pub async fn aggregate_price(gateway: &dyn BrokerGateway, symbols: &[String]) -> Decimal {
    join_all(symbols.iter().map(|symbol| latest_close(gateway, symbol)))
        .await
        .into_iter()
        .flatten()
        .sum()
}

/// Account equity, or zero when the account cannot be read
pub async fn fetch_equity(gateway: &dyn BrokerGateway) -> Decimal {
    match gateway.get_account().await {
        Ok(account) => account.equity,
        Err(e) => {
            warn!(error = %e, "Failed to fetch account, treating equity as 0");
            Decimal::ZERO
        }
    }
}

/// `floor(capital / aggregate)`, or `previous` when the aggregate is zero
pub fn bucket_quantity(capital: Decimal, aggregate: Decimal, previous: u64) -> u64 {
    if aggregate.is_zero() {
        debug!("Aggregate price is zero, keeping previous quantity {}", previous);
        return previous;
    }
    (capital / aggregate).floor().to_u64().unwrap_or(0)
}

/// Capital split and per-symbol quantities for the given targets
///
/// `short_capital = short_fraction * equity` and
/// `long_capital = short_capital + equity`.
pub async fn size_buckets(
    gateway: &dyn BrokerGateway,
    targets: &TargetSets,
    short_fraction: Decimal,
    previous: &BucketSizing,
) -> BucketSizing {
    let equity = fetch_equity(gateway).await;
    let short_capital = short_fraction * equity;
    let long_capital = short_capital + equity;

    let (long_total, short_total) = futures_util::join!(
        aggregate_price(gateway, &targets.long),
        aggregate_price(gateway, &targets.short)
    );

    BucketSizing {
        long_capital,
        short_capital,
        q_long: bucket_quantity(long_capital, long_total, previous.q_long),
        q_short: bucket_quantity(short_capital, short_total, previous.q_short),
    }
}
