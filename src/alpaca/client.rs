//! Main Alpaca client that combines REST and WebSocket functionality

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, instrument};

use super::rest::AlpacaRestClient;
use super::websocket::AlpacaStreamClient;
use crate::common::errors::Result;
use crate::common::traits::StreamClient;
use crate::common::types::StreamEvent;
use crate::config::types::{AlpacaConfig, ApiCredentials};

/// Combined Alpaca client for the REST API and the market data stream
pub struct AlpacaClient {
    /// REST API client, shared with strategies as their gateway
    rest_client: Arc<AlpacaRestClient>,
    /// Stream client (created on start)
    stream_client: Option<AlpacaStreamClient>,
    /// Configuration
    config: AlpacaConfig,
    /// API credentials (optional)
    credentials: Option<ApiCredentials>,
    /// Stream heartbeat interval in seconds
    heartbeat_interval: u64,
    /// Current subscribed symbols
    subscribed_symbols: Arc<RwLock<Vec<String>>>,
}

impl AlpacaClient {
    /// Create a new Alpaca client from configuration
    pub fn new(config: AlpacaConfig) -> Result<Self> {
        Self::with_timeout(config, Duration::from_secs(30))
    }

    /// Create a new Alpaca client with a custom REST timeout
    pub fn with_timeout(config: AlpacaConfig, timeout: Duration) -> Result<Self> {
        let rest_client = AlpacaRestClient::from_config(&config, timeout)?;
        let credentials = config.credentials();

        Ok(Self {
            rest_client: Arc::new(rest_client),
            stream_client: None,
            config,
            credentials,
            heartbeat_interval: 10,
            subscribed_symbols: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Set the stream heartbeat interval
    pub fn with_heartbeat_interval(mut self, seconds: u64) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    /// Get a reference to the REST client
    pub fn rest(&self) -> &AlpacaRestClient {
        &self.rest_client
    }

    /// Shared handle to the REST client for use as a `BrokerGateway`
    pub fn gateway(&self) -> Arc<AlpacaRestClient> {
        self.rest_client.clone()
    }

    /// Whether credentials were configured
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

#[async_trait]
impl StreamClient for AlpacaClient {
    #[instrument(skip(self))]
    async fn subscribe(&mut self, symbols: &[String]) -> Result<()> {
        let mut subscribed = self.subscribed_symbols.write().await;
        for symbol in symbols {
            if !subscribed.contains(symbol) {
                subscribed.push(symbol.clone());
            }
        }
        info!("Subscribed to {} symbols", subscribed.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unsubscribe(&mut self, symbols: &[String]) -> Result<()> {
        let mut subscribed = self.subscribed_symbols.write().await;
        subscribed.retain(|s| !symbols.contains(s));
        info!("Unsubscribed from symbols, {} remaining", subscribed.len());
        Ok(())
    }

    #[instrument(skip(self, sender))]
    async fn start(&mut self, sender: mpsc::Sender<StreamEvent>) -> Result<()> {
        let symbols = self.subscribed_symbols.read().await.clone();

        let mut stream_client = AlpacaStreamClient::new(
            &self.config.stream_url,
            &self.config.feed,
            self.credentials.clone(),
        )
        .with_heartbeat_interval(self.heartbeat_interval);

        stream_client.connect_and_subscribe(symbols, sender).await?;
        self.stream_client = Some(stream_client);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream_client) = self.stream_client.take() {
            stream_client.close().await;
        }
        info!("Disconnected from Alpaca data stream");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream_client
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }
}
