//! Order submission helpers shared by the strategies
//!
//! None of these propagate gateway errors: a failed order is logged and
//! reported through the return value so that the rest of the batch can
//! proceed.

use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::ranking::aggregate_price;
use super::types::BatchResult;
use crate::common::traits::BrokerGateway;
use crate::common::types::{Order, OrderQuery, OrderRequest, Position, Side};

/// Submit a market/day order; `true` when the gateway accepted it
///
/// A non-positive quantity is a successful no-op and never reaches the
/// gateway.
pub async fn submit_order(
    gateway: &dyn BrokerGateway,
    qty: Decimal,
    symbol: &str,
    side: Side,
) -> bool {
    if qty <= Decimal::ZERO {
        debug!(symbol, %qty, %side, "Quantity is <= 0, order not sent");
        return true;
    }

    let request = OrderRequest::market(symbol, qty, side);
    match gateway.create_order(&request).await {
        Ok(_) => {
            info!(symbol, %qty, %side, "Market order completed");
            true
        }
        Err(e) => {
            warn!(symbol, %qty, %side, error = %e, "Order did not go through");
            false
        }
    }
}

/// Submit a limit/day order, returning the accepted order
pub async fn submit_limit_order(
    gateway: &dyn BrokerGateway,
    qty: Decimal,
    symbol: &str,
    limit_price: Decimal,
    side: Side,
) -> Option<Order> {
    if qty <= Decimal::ZERO {
        debug!(symbol, %qty, %side, "Quantity is <= 0, order not sent");
        return None;
    }

    let request = OrderRequest::limit(symbol, qty, side, limit_price);
    match gateway.create_order(&request).await {
        Ok(order) => {
            info!(symbol, %qty, %side, %limit_price, "Limit order sent");
            Some(order)
        }
        Err(e) => {
            warn!(symbol, %qty, %side, error = %e, "Order did not go through");
            None
        }
    }
}

/// Submit `qty` shares of every non-blacklisted symbol concurrently
///
/// Blacklisted symbols appear in neither list of the result.
pub async fn send_batch(
    gateway: &dyn BrokerGateway,
    qty: u64,
    symbols: &[String],
    side: Side,
    blacklist: &HashSet<String>,
) -> BatchResult {
    let pending: Vec<&String> = symbols.iter().filter(|s| !blacklist.contains(*s)).collect();
    let qty = Decimal::from(qty);

    let outcomes = join_all(
        pending
            .iter()
            .map(|symbol| submit_order(gateway, qty, symbol, side)),
    )
    .await;

    let mut result = BatchResult::default();
    for (symbol, accepted) in pending.into_iter().zip(outcomes) {
        if accepted {
            result.executed.push(symbol.clone());
        } else {
            result.incomplete.push(symbol.clone());
        }
    }
    result
}

/// Share count that spends `capital` across the symbols that did fill
///
/// Only computed when some orders failed and some succeeded; `None` when
/// there is nothing to adjust or the surviving symbols have no price.
pub async fn adjusted_quantity(
    gateway: &dyn BrokerGateway,
    capital: Decimal,
    incomplete: &[String],
    executed: &[String],
) -> Option<u64> {
    if incomplete.is_empty() || executed.is_empty() {
        return None;
    }

    let total = aggregate_price(gateway, executed).await;
    if total.is_zero() {
        return None;
    }
    (capital / total).floor().to_u64()
}

/// Top up every executed symbol by `adjusted - original` shares
pub async fn reorder(
    gateway: &dyn BrokerGateway,
    symbols: &[String],
    original: u64,
    adjusted: u64,
    side: Side,
) {
    let delta = Decimal::from(adjusted) - Decimal::from(original);
    join_all(
        symbols
            .iter()
            .map(|symbol| submit_order(gateway, delta, symbol, side)),
    )
    .await;
}

/// Cancel every open order concurrently, returning how many were cancelled
pub async fn cancel_open_orders(gateway: &dyn BrokerGateway) -> usize {
    let orders = match gateway.get_orders(&OrderQuery::open()).await {
        Ok(orders) => orders,
        Err(e) => {
            warn!(error = %e, "Failed to list open orders");
            return 0;
        }
    };

    let results = join_all(orders.iter().map(|order| async move {
        match gateway.cancel_order(&order.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(order_id = %order.id, symbol = %order.symbol, error = %e, "Failed to cancel order");
                false
            }
        }
    }))
    .await;
    results.into_iter().filter(|cancelled| *cancelled).count()
}

/// Close every position with an opposite-side market order
///
/// Returns the symbols whose closing order was accepted.
pub async fn close_positions(gateway: &dyn BrokerGateway, positions: &[Position]) -> Vec<String> {
    let outcomes = join_all(positions.iter().map(|position| {
        submit_order(
            gateway,
            position.abs_qty(),
            &position.symbol,
            position.side.closing_side(),
        )
    }))
    .await;

    positions
        .iter()
        .zip(outcomes)
        .filter(|(_, accepted)| *accepted)
        .map(|(position, _)| position.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ClientError;
    use crate::common::traits::MockBrokerGateway;
    use crate::common::types::{OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn accepted(request: &OrderRequest) -> Order {
        Order {
            id: format!("order-{}", request.symbol),
            client_order_id: String::new(),
            symbol: request.symbol.clone(),
            qty: request.qty,
            notional: None,
            filled_qty: Decimal::ZERO,
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            status: "accepted".into(),
            limit_price: request.limit_price,
            stop_price: None,
            filled_avg_price: None,
            created_at: None,
            submitted_at: None,
            filled_at: None,
            extended_hours: false,
        }
    }

    #[tokio::test]
    async fn test_zero_quantity_is_noop() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_create_order().never();

        assert!(submit_order(&gateway, Decimal::ZERO, "AAPL", Side::Buy).await);
        assert!(submit_order(&gateway, dec!(-3), "AAPL", Side::Sell).await);
    }

    #[tokio::test]
    async fn test_market_order_shape() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_create_order()
            .withf(|r| {
                r.symbol == "AAPL"
                    && r.qty == Some(dec!(7))
                    && r.side == Side::Buy
                    && r.order_type == OrderType::Market
                    && r.time_in_force == TimeInForce::Day
            })
            .times(1)
            .returning(|r| Ok(accepted(r)));

        assert!(submit_order(&gateway, dec!(7), "AAPL", Side::Buy).await);
    }

    #[tokio::test]
    async fn test_rejection_returns_false() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_create_order().returning(|_| {
            Err(ClientError::Rejected {
                status: 403,
                message: "insufficient buying power".into(),
            })
        });

        assert!(!submit_order(&gateway, dec!(1), "AAPL", Side::Buy).await);
    }

    #[tokio::test]
    async fn test_batch_skips_blacklist_and_splits_outcomes() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_create_order().returning(|r| {
            if r.symbol == "C" {
                Err(ClientError::Rejected {
                    status: 422,
                    message: "rejected".into(),
                })
            } else {
                Ok(accepted(r))
            }
        });

        let symbols: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let blacklist: HashSet<String> = ["B".to_string()].into_iter().collect();

        let result = send_batch(&gateway, 10, &symbols, Side::Buy, &blacklist).await;
        assert_eq!(result.executed, vec!["A", "D"]);
        assert_eq!(result.incomplete, vec!["C"]);
    }

    #[tokio::test]
    async fn test_no_adjustment_without_failures() {
        let gateway = MockBrokerGateway::new();
        let executed = vec!["A".to_string()];
        assert_eq!(adjusted_quantity(&gateway, dec!(1000), &[], &executed).await, None);
    }

    #[tokio::test]
    async fn test_cancel_open_orders_counts_successes() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_get_orders()
            .withf(|q| q.status == Some(crate::common::types::OrderStatusFilter::Open))
            .returning(|_| {
                Ok(vec![
                    accepted(&OrderRequest::market("A", dec!(1), Side::Buy)),
                    accepted(&OrderRequest::market("B", dec!(1), Side::Buy)),
                ])
            });
        gateway.expect_cancel_order().returning(|id| {
            if id == "order-A" {
                Ok(())
            } else {
                Err(ClientError::NotFound(id.to_string()))
            }
        });

        assert_eq!(cancel_open_orders(&gateway).await, 1);
    }

    #[tokio::test]
    async fn test_limit_order_returns_order() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_create_order()
            .withf(|r| r.order_type == OrderType::Limit && r.limit_price == Some(dec!(101.5)))
            .returning(|r| Ok(accepted(r)));

        let order = submit_limit_order(&gateway, dec!(3), "AAPL", dec!(101.5), Side::Sell).await;
        assert_eq!(order.map(|o| o.id), Some("order-AAPL".to_string()));
    }
}
