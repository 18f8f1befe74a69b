//! Alpaca-specific wire message types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::types::{Bar, Order, Quote, Trade};

// ============================================================================
// REST API Response Types
// ============================================================================

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub message: String,
}

/// Response from GET /v2/stocks/{symbol}/bars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarsResponse {
    /// `null` when the symbol has no bars in range
    #[serde(default)]
    pub bars: Option<Vec<Bar>>,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Response from GET /v2/stocks/bars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiBarsResponse {
    #[serde(default)]
    pub bars: HashMap<String, Vec<Bar>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One entry of DELETE /positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePositionResponse {
    pub symbol: String,
    pub status: u16,
    #[serde(default)]
    pub body: Option<Order>,
}

/// One entry of DELETE /orders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub id: String,
    pub status: u16,
}

/// Body of POST /watchlists and PUT /watchlists/{id}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchlistRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
}

/// Body of POST /watchlists/{id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddToWatchlistRequest {
    pub symbol: String,
}

// ============================================================================
// Stream Messages
// ============================================================================

/// Authentication frame sent right after connecting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsAuthMessage {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_token: Option<String>,
}

/// Subscribe/unsubscribe frame for the data stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSubscribeMessage {
    /// "subscribe" or "unsubscribe"
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bars: Vec<String>,
}

impl WsSubscribeMessage {
    /// Subscribe the same symbols to trades, quotes and bars
    pub fn all_channels(action: &str, symbols: &[String]) -> Self {
        Self {
            action: action.to_string(),
            trades: symbols.to_vec(),
            quotes: symbols.to_vec(),
            bars: symbols.to_vec(),
        }
    }
}

/// Control frame: `success`, `error` or `subscription`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsControlMessage {
    #[serde(rename = "T")]
    pub message_type: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub trades: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
    #[serde(default)]
    pub bars: Vec<String>,
}

/// Trade frame (`"T": "t"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsTrade {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "i")]
    pub id: u64,
    #[serde(rename = "x")]
    pub exchange: String,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "s")]
    pub size: u64,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,
    #[serde(rename = "z", default)]
    pub tape: String,
}

impl From<WsTrade> for Trade {
    fn from(msg: WsTrade) -> Self {
        Trade {
            symbol: msg.symbol,
            trade_id: msg.id,
            exchange: msg.exchange,
            price: msg.price,
            size: msg.size,
            timestamp: msg.timestamp,
            conditions: msg.conditions,
            tape: msg.tape,
        }
    }
}

/// Quote frame (`"T": "q"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsQuote {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "bx", default)]
    pub bid_exchange: String,
    #[serde(rename = "bp")]
    pub bid_price: Decimal,
    #[serde(rename = "bs", default)]
    pub bid_size: u64,
    #[serde(rename = "ax", default)]
    pub ask_exchange: String,
    #[serde(rename = "ap")]
    pub ask_price: Decimal,
    #[serde(rename = "as", default)]
    pub ask_size: u64,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

impl From<WsQuote> for Quote {
    fn from(msg: WsQuote) -> Self {
        Quote {
            symbol: msg.symbol,
            bid_exchange: msg.bid_exchange,
            bid_price: msg.bid_price,
            bid_size: msg.bid_size,
            ask_exchange: msg.ask_exchange,
            ask_price: msg.ask_price,
            ask_size: msg.ask_size,
            timestamp: msg.timestamp,
        }
    }
}

/// Minute bar frame (`"T": "b"`); the bar fields share the REST names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsBar {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(flatten)]
    pub bar: Bar,
}

/// `listen` frame for the trading stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsListenMessage {
    pub action: String,
    pub data: WsListenData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsListenData {
    pub streams: Vec<String>,
}

impl WsListenMessage {
    pub fn trade_updates() -> Self {
        Self {
            action: "listen".to_string(),
            data: WsListenData {
                streams: vec!["trade_updates".to_string()],
            },
        }
    }
}

/// Envelope of every trading stream frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingStreamFrame {
    pub stream: String,
    #[serde(default)]
    pub data: serde_json::Value,
}
