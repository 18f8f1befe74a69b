//! Trait definitions for broker clients

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

use super::errors::Result;
use super::types::{
    Account, Bar, CalendarDay, Clock, Order, OrderQuery, OrderRequest, Position, StreamEvent,
    TimeFrame,
};

/// The subset of the broker's trading and data API the strategies rely on.
///
/// Implementations are expected to map HTTP 404 to
/// [`ClientError::NotFound`](super::errors::ClientError::NotFound) and
/// business-rule refusals to
/// [`ClientError::Rejected`](super::errors::ClientError::Rejected);
/// strategies branch on those two and treat everything else as transient.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Market clock
    async fn get_clock(&self) -> Result<Clock>;

    /// Account balances
    async fn get_account(&self) -> Result<Account>;

    /// All open positions
    async fn get_positions(&self) -> Result<Vec<Position>>;

    /// Position in one symbol; `NotFound` when flat
    async fn get_position(&self, symbol: &str) -> Result<Position>;

    /// Orders matching the query
    async fn get_orders(&self, query: &OrderQuery) -> Result<Vec<Order>>;

    /// Submit a new order
    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    /// Cancel an order by id
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Most recent `limit` bars for a symbol, oldest first
    async fn get_bars(&self, timeframe: TimeFrame, symbol: &str, limit: u32) -> Result<Vec<Bar>>;

    /// Trading days between `start` and `end`, inclusive
    async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>>;
}

/// Trait for push-based market data clients
///
/// Mirrors the subscribe/start/disconnect lifecycle of the data stream:
/// subscriptions are collected first and sent once the socket is
/// authenticated.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Subscribe to trades, quotes and bars for the given symbols
    async fn subscribe(&mut self, symbols: &[String]) -> Result<()>;

    /// Drop the given symbols from the subscription set
    async fn unsubscribe(&mut self, symbols: &[String]) -> Result<()>;

    /// Connect, authenticate and forward events to `sender`
    ///
    /// This spawns an internal task that processes incoming messages
    /// and forwards them as `StreamEvent`s.
    async fn start(&mut self, sender: mpsc::Sender<StreamEvent>) -> Result<()>;

    /// Gracefully disconnect
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the client is currently connected
    fn is_connected(&self) -> bool;
}
