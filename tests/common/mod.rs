//! Common test utilities and fixtures
//!
//! [`FakeGateway`] is an in-memory broker: market orders fill immediately
//! into positions, limit orders rest as open orders, and symbols can be
//! marked as rejecting orders or failing price lookups.

#![allow(dead_code)]

use alpaca_long_short::common::errors::{ClientError, Result};
use alpaca_long_short::common::traits::BrokerGateway;
use alpaca_long_short::common::types::{
    Account, Bar, CalendarDay, Clock, Order, OrderQuery, OrderRequest, OrderType, Position,
    PositionSide, Side, TimeFrame,
};
use alpaca_long_short::config::types::LongShortConfig;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Build a one-minute bar with the given open and close
pub fn bar(minute: i64, open: Decimal, close: Decimal) -> Bar {
    Bar {
        timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap() + Duration::minutes(minute),
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 1_000,
        trade_count: None,
        vwap: None,
    }
}

/// Market clock `minutes_to_close` minutes before the close
pub fn clock(is_open: bool, minutes_to_close: i64) -> Clock {
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap();
    Clock {
        timestamp: now,
        is_open,
        next_open: now + Duration::hours(18),
        next_close: now + Duration::minutes(minutes_to_close),
    }
}

/// `S00`, `S01`, ...
pub fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{:02}", i)).collect()
}

/// Long-short configuration over the given universe
pub fn long_short_config(universe: Vec<String>) -> LongShortConfig {
    LongShortConfig {
        universe,
        short_fraction: dec!(0.3),
        lookback_bars: 10,
        ..LongShortConfig::default()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    bars: HashMap<String, Vec<Bar>>,
    positions: HashMap<String, Position>,
    rejected: HashSet<String>,
    failing_bars: HashSet<String>,
    submitted: Vec<OrderRequest>,
    open_orders: Vec<Order>,
    cancelled: Vec<String>,
    equity: Decimal,
    clock: Option<Clock>,
    calendar: Vec<CalendarDay>,
    next_id: u64,
}

/// In-memory broker gateway
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new(equity: Decimal) -> Self {
        let gateway = Self::default();
        gateway.state.lock().unwrap().equity = equity;
        gateway
    }

    /// Universe of `n` symbols that all close at 100, ranked by index:
    /// `S00` has the lowest percent change and the last symbol the highest
    pub fn with_ranked_universe(equity: Decimal, n: usize) -> Self {
        let gateway = Self::new(equity);
        for (i, symbol) in symbols(n).iter().enumerate() {
            let open = Decimal::from(100 + n - i);
            gateway.set_bars(symbol, vec![bar(0, open, open), bar(1, dec!(100), dec!(100))]);
        }
        gateway
    }

    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.state.lock().unwrap().bars.insert(symbol.to_string(), bars);
    }

    /// Hold `qty` shares; negative means short
    pub fn set_position(&self, symbol: &str, qty: Decimal) {
        let mut state = self.state.lock().unwrap();
        apply_fill(&mut state.positions, symbol, qty);
    }

    pub fn set_clock(&self, clock: Clock) {
        self.state.lock().unwrap().clock = Some(clock);
    }

    /// Trading day served by the calendar, exchange-local hours
    pub fn add_trading_day(&self, date: NaiveDate, open: &str, close: &str) {
        self.state.lock().unwrap().calendar.push(CalendarDay {
            date,
            open: open.to_string(),
            close: close.to_string(),
            session_open: None,
            session_close: None,
        });
    }

    /// Every order for `symbol` is refused as for insufficient buying power
    pub fn reject(&self, symbol: &str) {
        self.state.lock().unwrap().rejected.insert(symbol.to_string());
    }

    /// Price lookups for `symbol` fail
    pub fn fail_bars(&self, symbol: &str) {
        self.state.lock().unwrap().failing_bars.insert(symbol.to_string());
    }

    /// Rest a limit order without filling it
    pub fn add_open_order(&self, symbol: &str, qty: Decimal, side: Side) -> String {
        let request = OrderRequest::limit(symbol, qty, side, dec!(1));
        let mut state = self.state.lock().unwrap();
        let order = new_order(&mut state, &request);
        state.open_orders.push(order.clone());
        order.id
    }

    /// Orders accepted by `create_order`, in submission order
    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Accepted orders for one symbol as `(side, qty)`
    pub fn submitted_for(&self, symbol: &str) -> Vec<(Side, Decimal)> {
        self.submitted()
            .into_iter()
            .filter(|o| o.symbol == symbol)
            .map(|o| (o.side, o.qty.unwrap_or_default()))
            .collect()
    }

    pub fn clear_submitted(&self) {
        self.state.lock().unwrap().submitted.clear();
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn open_order_count(&self) -> usize {
        self.state.lock().unwrap().open_orders.len()
    }

    /// Signed quantity held, zero when flat
    pub fn held(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .positions
            .get(symbol)
            .map(|p| p.qty)
            .unwrap_or_default()
    }

    pub fn position_count(&self) -> usize {
        self.state.lock().unwrap().positions.len()
    }
}

fn new_order(state: &mut FakeState, request: &OrderRequest) -> Order {
    state.next_id += 1;
    Order {
        id: format!("order-{}", state.next_id),
        client_order_id: String::new(),
        symbol: request.symbol.clone(),
        qty: request.qty,
        notional: None,
        filled_qty: Decimal::ZERO,
        side: request.side,
        order_type: request.order_type,
        time_in_force: request.time_in_force,
        status: "new".to_string(),
        limit_price: request.limit_price,
        stop_price: None,
        filled_avg_price: None,
        created_at: None,
        submitted_at: None,
        filled_at: None,
        extended_hours: false,
    }
}

fn apply_fill(positions: &mut HashMap<String, Position>, symbol: &str, delta: Decimal) {
    let qty = positions.get(symbol).map(|p| p.qty).unwrap_or_default() + delta;
    if qty.is_zero() {
        positions.remove(symbol);
        return;
    }
    positions.insert(
        symbol.to_string(),
        Position {
            symbol: symbol.to_string(),
            side: if qty > Decimal::ZERO {
                PositionSide::Long
            } else {
                PositionSide::Short
            },
            qty,
            market_value: qty * dec!(100),
            unrealized_pl: Decimal::ZERO,
            avg_entry_price: dec!(100),
            current_price: dec!(100),
        },
    );
}

#[async_trait]
impl BrokerGateway for FakeGateway {
    async fn get_clock(&self) -> Result<Clock> {
        self.state
            .lock()
            .unwrap()
            .clock
            .clone()
            .ok_or_else(|| ClientError::InvalidResponse("clock unavailable".into()))
    }

    async fn get_account(&self) -> Result<Account> {
        let equity = self.state.lock().unwrap().equity;
        Ok(Account {
            id: "fake".into(),
            status: "ACTIVE".into(),
            equity,
            portfolio_value: equity,
            buying_power: equity * dec!(2),
            cash: equity,
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let state = self.state.lock().unwrap();
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_position(&self, symbol: &str) -> Result<Position> {
        self.state
            .lock()
            .unwrap()
            .positions
            .get(symbol)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("position for {}", symbol)))
    }

    async fn get_orders(&self, _query: &OrderQuery) -> Result<Vec<Order>> {
        Ok(self.state.lock().unwrap().open_orders.clone())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(&request.symbol) {
            return Err(ClientError::Rejected {
                status: 403,
                message: "insufficient buying power".into(),
            });
        }

        state.submitted.push(request.clone());
        let order = new_order(&mut state, request);
        match request.order_type {
            OrderType::Market => {
                let qty = request.qty.unwrap_or_default();
                let delta = match request.side {
                    Side::Buy => qty,
                    Side::Sell => -qty,
                };
                apply_fill(&mut state.positions, &request.symbol, delta);
            }
            _ => state.open_orders.push(order.clone()),
        }
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.open_orders.len();
        state.open_orders.retain(|o| o.id != order_id);
        if state.open_orders.len() == before {
            return Err(ClientError::NotFound(format!("order {}", order_id)));
        }
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn get_bars(&self, _timeframe: TimeFrame, symbol: &str, limit: u32) -> Result<Vec<Bar>> {
        let state = self.state.lock().unwrap();
        if state.failing_bars.contains(symbol) {
            return Err(ClientError::Timeout(format!("bars for {}", symbol)));
        }
        let bars = state.bars.get(symbol).cloned().unwrap_or_default();
        let skip = bars.len().saturating_sub(limit as usize);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .calendar
            .iter()
            .filter(|day| start <= day.date && day.date <= end)
            .cloned()
            .collect())
    }
}
