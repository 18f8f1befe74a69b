//! Alpaca module - client implementation for the Alpaca trading and market data APIs

pub mod auth;
pub mod client;
pub mod messages;
pub mod rest;
pub mod websocket;

pub use client::AlpacaClient;
pub use rest::AlpacaRestClient;
pub use websocket::AlpacaStreamClient;
