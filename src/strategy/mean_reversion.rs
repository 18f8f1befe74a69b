//! Single-symbol mean reversion
//!
//! Buys into a discount to the running average of recent closes, sized by
//! how deep the discount is, and sells out once the price trades above the
//! average. All orders are day limit orders at the last close.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::batch::{submit_limit_order, submit_order};
use super::telemetry::TelemetrySink;
use super::traits::SessionStrategy;
use crate::common::errors::Result;
use crate::common::traits::BrokerGateway;
use crate::common::types::{Order, Side, TimeFrame};
use crate::config::types::MeanReversionConfig;

/// Inputs to one sizing decision
#[derive(Debug, Clone, PartialEq)]
pub struct MarketState {
    pub running_average: Decimal,
    pub price: Decimal,
    /// Signed shares held
    pub held_qty: Decimal,
    pub position_value: Decimal,
    pub portfolio_value: Decimal,
    pub buying_power: Decimal,
}

/// Order the strategy wants this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Hold,
    Buy { qty: Decimal, limit_price: Decimal },
    Sell { qty: Decimal, limit_price: Decimal },
}

/// Decide the order for one tick
///
/// Above the average the whole long position is sold. Below it the target
/// position value is `portfolio_value * (avg - price) / price * multiplier`;
/// the difference to the current value is bought (capped at buying power) or
/// sold (capped at the shares held).
pub fn decide(state: &MarketState, multiplier: Decimal) -> Decision {
    let price = state.price;
    if price <= Decimal::ZERO {
        return Decision::Hold;
    }

    if price > state.running_average {
        if state.held_qty > Decimal::ZERO {
            return Decision::Sell {
                qty: state.held_qty,
                limit_price: price,
            };
        }
        return Decision::Hold;
    }

    if price < state.running_average {
        let share = (state.running_average - price) / price * multiplier;
        let target_value = state.portfolio_value * share;
        let to_add = target_value - state.position_value;

        if to_add > Decimal::ZERO {
            let to_add = to_add.min(state.buying_power);
            return Decision::Buy {
                qty: (to_add / price).floor(),
                limit_price: price,
            };
        }

        let qty = ((-to_add) / price).floor().min(state.held_qty);
        return Decision::Sell {
            qty,
            limit_price: price,
        };
    }

    Decision::Hold
}

/// Mean reversion strategy state
#[derive(Debug, Clone)]
pub struct MeanReversion {
    symbol: String,
    window: u32,
    multiplier: Decimal,
    last_order: Option<Order>,
}

impl MeanReversion {
    pub fn new(config: &MeanReversionConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            window: config.window.max(1),
            multiplier: config.share_multiplier,
            last_order: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_order(&self) -> Option<&Order> {
        self.last_order.as_ref()
    }

    /// Signed quantity and market value held; zero when flat
    async fn position(&self, gateway: &dyn BrokerGateway) -> Result<(Decimal, Decimal)> {
        match gateway.get_position(&self.symbol).await {
            Ok(position) => Ok((position.qty, position.market_value)),
            Err(e) if e.is_not_found() => Ok((Decimal::ZERO, Decimal::ZERO)),
            Err(e) => Err(e),
        }
    }

    /// Cancel the order placed on the previous tick, if any
    async fn cancel_last_order(&mut self, gateway: &dyn BrokerGateway) {
        if let Some(order) = self.last_order.take() {
            if let Err(e) = gateway.cancel_order(&order.id).await {
                debug!(order_id = %order.id, error = %e, "Previous order not cancelled");
            }
        }
    }
}

#[async_trait]
impl SessionStrategy for MeanReversion {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    async fn on_session_start(
        &mut self,
        _gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        self.last_order = None;
        telemetry.record_event(&format!(
            "Mean reversion on {} over {} bars.",
            self.symbol, self.window
        ));
        Ok(())
    }

    async fn on_tick(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        self.cancel_last_order(gateway).await;

        let bars = gateway
            .get_bars(TimeFrame::Minute, &self.symbol, self.window)
            .await?;
        if bars.len() < self.window as usize {
            telemetry.record_event(&format!(
                "Waiting for {} bars, have {}.",
                self.window,
                bars.len()
            ));
            return Ok(());
        }

        let (held_qty, position_value) = self.position(gateway).await?;
        let price = bars.last().map(|b| b.close).unwrap_or_default();
        let running_average =
            bars.iter().map(|b| b.close).sum::<Decimal>() / Decimal::from(bars.len());

        // Account balances only matter below the average
        let (portfolio_value, buying_power) = if price < running_average {
            let account = gateway.get_account().await?;
            (account.portfolio_value, account.buying_power)
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        let state = MarketState {
            running_average,
            price,
            held_qty,
            position_value,
            portfolio_value,
            buying_power,
        };

        let (qty, limit_price, side) = match decide(&state, self.multiplier) {
            Decision::Hold => {
                debug!(symbol = %self.symbol, %price, %running_average, "No action required");
                return Ok(());
            }
            Decision::Buy { qty, limit_price } => (qty, limit_price, Side::Buy),
            Decision::Sell { qty, limit_price } => (qty, limit_price, Side::Sell),
        };

        info!(symbol = %self.symbol, %qty, %side, %limit_price, %running_average, "Rebalancing");
        self.last_order = submit_limit_order(gateway, qty, &self.symbol, limit_price, side).await;
        if self.last_order.is_some() {
            telemetry.record_event(&format!(
                "Limit order of |{} {} {}| sent.",
                qty, self.symbol, side
            ));
        }
        Ok(())
    }

    async fn on_wind_down(
        &mut self,
        gateway: &dyn BrokerGateway,
        telemetry: &dyn TelemetrySink,
    ) -> Result<()> {
        self.cancel_last_order(gateway).await;

        let (held_qty, _) = match self.position(gateway).await {
            Ok(position) => position,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Failed to fetch position for wind-down");
                return Err(e);
            }
        };
        if held_qty.is_zero() {
            return Ok(());
        }

        let side = if held_qty > Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        };
        if submit_order(gateway, held_qty.abs(), &self.symbol, side).await {
            telemetry.record_event(&format!("Closed position in {}.", self.symbol));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn state(avg: Decimal, price: Decimal) -> MarketState {
        MarketState {
            running_average: avg,
            price,
            held_qty: Decimal::ZERO,
            position_value: Decimal::ZERO,
            portfolio_value: dec!(10000),
            buying_power: dec!(20000),
        }
    }

    #[test]
    fn test_above_average_sells_whole_position() {
        let mut s = state(dec!(100), dec!(101));
        assert_eq!(decide(&s, dec!(200)), Decision::Hold);

        s.held_qty = dec!(12);
        assert_eq!(
            decide(&s, dec!(200)),
            Decision::Sell {
                qty: dec!(12),
                limit_price: dec!(101)
            }
        );
    }

    #[test]
    fn test_discount_buys_proportionally() {
        // share = (100 - 99) / 99 * 200 ~= 2.0202; target ~= 20202
        // capped at buying power 20000 -> floor(20000 / 99) = 202
        let s = state(dec!(100), dec!(99));
        assert_eq!(
            decide(&s, dec!(200)),
            Decision::Buy {
                qty: dec!(202),
                limit_price: dec!(99)
            }
        );
    }

    #[test]
    fn test_overweight_sells_down_to_target_capped_by_holdings() {
        // share = 0.5 / 99.5 * 200 ~= 1.005; target ~= 10050; to_add ~= -19950
        let mut s = state(dec!(100), dec!(99.5));
        s.position_value = dec!(30000);
        s.held_qty = dec!(50);
        assert_eq!(
            decide(&s, dec!(200)),
            Decision::Sell {
                qty: dec!(50),
                limit_price: dec!(99.5)
            }
        );
    }

    #[test]
    fn test_at_average_holds() {
        assert_eq!(decide(&state(dec!(100), dec!(100)), dec!(200)), Decision::Hold);
    }

    #[test]
    fn test_new_from_config() {
        let strategy = MeanReversion::new(&MeanReversionConfig::default());
        assert_eq!(strategy.symbol(), "AAPL");
        assert_eq!(strategy.window, 20);
        assert_eq!(strategy.multiplier, dec!(200));
        assert!(strategy.last_order().is_none());
    }
}
