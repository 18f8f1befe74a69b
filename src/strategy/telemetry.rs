//! Observers for strategy activity
//!
//! Sinks are pure side effects: nothing in the trading path reads back what
//! was recorded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;
use tracing::info;

use crate::common::types::{Order, Position};

/// Receiver for the event log, the equity curve and order/position snapshots
pub trait TelemetrySink: Send + Sync {
    /// Append a human-readable event line
    fn record_event(&self, message: &str);

    /// Append one point of the equity time series
    fn record_equity(&self, at: DateTime<Utc>, equity: Decimal);

    /// Replace the current view of open orders and positions
    fn record_snapshot(&self, orders: &[Order], positions: &[Position]);

    /// Time bounds of today's equity series
    fn record_session_window(&self, open: DateTime<Utc>, close: DateTime<Utc>);
}

/// Sink that writes everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn record_event(&self, message: &str) {
        info!(target: "telemetry", "{}", message);
    }

    fn record_equity(&self, at: DateTime<Utc>, equity: Decimal) {
        info!(target: "telemetry", at = %at, equity = %equity, "equity");
    }

    fn record_snapshot(&self, orders: &[Order], positions: &[Position]) {
        info!(
            target: "telemetry",
            open_orders = orders.len(),
            positions = positions.len(),
            "snapshot"
        );
    }

    fn record_session_window(&self, open: DateTime<Utc>, close: DateTime<Utc>) {
        info!(target: "telemetry", open = %open, close = %close, "session window");
    }
}

/// Open orders and positions as of the last snapshot
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
}

/// Append-only in-memory sink
///
/// Also mirrors events into `tracing` so it can stand in for
/// [`LogTelemetry`] when an embedder wants the history.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    events: Mutex<Vec<String>>,
    equity: Mutex<Vec<(DateTime<Utc>, Decimal)>>,
    snapshot: Mutex<Snapshot>,
    window: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn equity_series(&self) -> Vec<(DateTime<Utc>, Decimal)> {
        self.equity.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Open and close of the last reported session
    pub fn session_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.window.lock().map(|w| *w).unwrap_or_default()
    }

    /// Whether any recorded event contains `needle`
    pub fn has_event(&self, needle: &str) -> bool {
        self.events().iter().any(|e| e.contains(needle))
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn record_event(&self, message: &str) {
        info!(target: "telemetry", "{}", message);
        if let Ok(mut events) = self.events.lock() {
            events.push(message.to_string());
        }
    }

    fn record_equity(&self, at: DateTime<Utc>, equity: Decimal) {
        if let Ok(mut series) = self.equity.lock() {
            series.push((at, equity));
        }
    }

    fn record_snapshot(&self, orders: &[Order], positions: &[Position]) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.orders = orders.to_vec();
            snapshot.positions = positions.to_vec();
        }
    }

    fn record_session_window(&self, open: DateTime<Utc>, close: DateTime<Utc>) {
        if let Ok(mut window) = self.window.lock() {
            *window = Some((open, close));
        }
    }
}
