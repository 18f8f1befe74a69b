//! Alpaca long-short library
//!
//! An async client for the Alpaca trading and market data APIs, plus a
//! long-short equity rebalancer and a mean-reversion strategy driven by a
//! market-hours session loop.

pub mod alpaca;
pub mod common;
pub mod config;
pub mod strategy;

// Re-export commonly used types
pub use alpaca::{AlpacaClient, AlpacaRestClient, AlpacaStreamClient};
pub use common::errors::{ClientError, Result};
pub use common::traits::{BrokerGateway, StreamClient};
pub use common::types::{
    Account, Bar, Clock, Order, OrderRequest, Position, PositionSide, Side, StreamEvent,
    TimeFrame,
};
pub use config::types::AppConfig;

// Strategy types
pub use strategy::{
    InMemoryTelemetry, LogTelemetry, LongShort, MeanReversion, Session, SessionStrategy,
    SessionTiming, TelemetrySink, TickOutcome,
};
