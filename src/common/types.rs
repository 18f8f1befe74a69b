//! Broker resource types shared by the REST client, the stream client and
//! the strategies

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened with `self`
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Direction of a held position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that flattens a position held on this side
    pub fn closing_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Opg,
    Cls,
    Ioc,
    Fok,
}

/// Order class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderClass {
    Simple,
    Oco,
    Oto,
    Bracket,
}

/// Market clock as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    /// Current broker time
    pub timestamp: DateTime<Utc>,
    /// Whether the market is open right now
    pub is_open: bool,
    /// Next session open
    pub next_open: DateTime<Utc>,
    /// Next session close
    pub next_close: DateTime<Utc>,
}

impl Clock {
    /// Time remaining until the next close, never negative
    pub fn time_to_close(&self) -> chrono::Duration {
        (self.next_close - self.timestamp).abs()
    }

    /// Time remaining until the next open, never negative
    pub fn time_to_open(&self) -> chrono::Duration {
        (self.next_open - self.timestamp).abs()
    }
}

/// Trading account summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub equity: Decimal,
    pub portfolio_value: Decimal,
    pub buying_power: Decimal,
    #[serde(default)]
    pub cash: Decimal,
}

/// A held position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Signed quantity; short positions are reported negative
    pub qty: Decimal,
    #[serde(default)]
    pub market_value: Decimal,
    #[serde(default)]
    pub unrealized_pl: Decimal,
    #[serde(default)]
    pub avg_entry_price: Decimal,
    #[serde(default)]
    pub current_price: Decimal,
}

impl Position {
    /// Unsigned number of shares held
    pub fn abs_qty(&self) -> Decimal {
        self.qty.abs()
    }
}

/// An order as known to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub notional: Option<Decimal>,
    #[serde(default)]
    pub filled_qty: Decimal,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub status: String,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub filled_avg_price: Option<Decimal>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extended_hours: bool,
}

/// Body of a create or replace order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<Decimal>,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_percent: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_class: Option<OrderClass>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extended_hours: bool,
}

impl OrderRequest {
    /// Market order good for the day
    pub fn market(symbol: impl Into<String>, qty: Decimal, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            qty: Some(qty),
            notional: None,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            limit_price: None,
            stop_price: None,
            trail_price: None,
            trail_percent: None,
            client_order_id: None,
            order_class: None,
            extended_hours: false,
        }
    }

    /// Limit order good for the day
    pub fn limit(symbol: impl Into<String>, qty: Decimal, side: Side, limit_price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            ..Self::market(symbol, qty, side)
        }
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn with_client_order_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }
}

/// Status filter for order listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusFilter {
    Open,
    Closed,
    All,
}

impl OrderStatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatusFilter::Open => "open",
            OrderStatusFilter::Closed => "closed",
            OrderStatusFilter::All => "all",
        }
    }
}

/// Chronological sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Filters for `GET /orders`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQuery {
    pub status: Option<OrderStatusFilter>,
    pub direction: Option<SortDirection>,
    pub limit: Option<u32>,
    pub nested: Option<bool>,
    pub symbols: Vec<String>,
}

impl OrderQuery {
    /// Open orders, newest first
    pub fn open() -> Self {
        Self {
            status: Some(OrderStatusFilter::Open),
            direction: Some(SortDirection::Desc),
            ..Self::default()
        }
    }

    /// Query string pairs with unset filters omitted
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(direction) = self.direction {
            pairs.push(("direction", direction.as_str().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(nested) = self.nested {
            pairs.push(("nested", nested.to_string()));
        }
        if !self.symbols.is_empty() {
            pairs.push(("symbols", self.symbols.join(",")));
        }
        pairs
    }
}

/// Bar aggregation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Minute,
    FiveMinutes,
    FifteenMinutes,
    Hour,
    Day,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::Minute => "1Min",
            TimeFrame::FiveMinutes => "5Min",
            TimeFrame::FifteenMinutes => "15Min",
            TimeFrame::Hour => "1Hour",
            TimeFrame::Day => "1Day",
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV price bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v", default)]
    pub volume: u64,
    #[serde(rename = "n", default)]
    pub trade_count: Option<u64>,
    #[serde(rename = "vw", default)]
    pub vwap: Option<Decimal>,
}

/// One trading day from the market calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    /// Session open, exchange-local "HH:MM"
    pub open: String,
    /// Session close, exchange-local "HH:MM"
    pub close: String,
    #[serde(default)]
    pub session_open: Option<String>,
    #[serde(default)]
    pub session_close: Option<String>,
}

impl CalendarDay {
    pub fn open_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.open, "%H:%M").ok()
    }

    pub fn close_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.close, "%H:%M").ok()
    }
}

/// Tradable instrument metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "class", default)]
    pub asset_class: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tradable: bool,
    #[serde(default)]
    pub marginable: bool,
    #[serde(default)]
    pub shortable: bool,
    #[serde(default)]
    pub easy_to_borrow: bool,
    #[serde(default)]
    pub fractionable: bool,
}

/// Named list of assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: String,
    #[serde(default)]
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A single trade print from the data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: u64,
    pub exchange: String,
    pub price: Decimal,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub tape: String,
}

/// Top-of-book quote from the data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid_exchange: String,
    pub bid_price: Decimal,
    pub bid_size: u64,
    pub ask_exchange: String,
    pub ask_price: Decimal,
    pub ask_size: u64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn midpoint(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::from(2)
    }

    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }
}

/// Order lifecycle event from the trading stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// `new`, `fill`, `partial_fill`, `canceled`, `rejected`, ...
    pub event: String,
    pub order: Order,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Connection status for a stream client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Socket open, not yet authenticated
    Connected,
    /// Credentials accepted
    Authenticated,
    /// Disconnected (with optional reason)
    Disconnected(Option<String>),
    /// Connection error
    Error(String),
}

/// Event emitted by the stream client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    Trade(Trade),
    Quote(Quote),
    Bar { symbol: String, bar: Bar },
    TradeUpdate(TradeUpdate),
    /// Current subscription set acknowledged by the server
    Subscription {
        trades: Vec<String>,
        quotes: Vec<String>,
        bars: Vec<String>,
    },
    ConnectionStatus(ConnectionStatus),
    /// Server-side error frame
    Error { code: u16, message: String },
    /// Raw/unknown message (for debugging)
    Raw(String),
}

impl StreamEvent {
    /// Symbol the event refers to, when it refers to one
    pub fn symbol(&self) -> Option<&str> {
        match self {
            StreamEvent::Trade(trade) => Some(&trade.symbol),
            StreamEvent::Quote(quote) => Some(&quote.symbol),
            StreamEvent::Bar { symbol, .. } => Some(symbol),
            StreamEvent::TradeUpdate(update) => Some(&update.order.symbol),
            _ => None,
        }
    }
}
