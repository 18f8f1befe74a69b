//! REST API client for the Alpaca trading and market data APIs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use super::auth::AuthHeaders;
use super::messages::*;
use crate::common::errors::{ClientError, Result};
use crate::common::traits::BrokerGateway;
use crate::common::types::{
    Account, Asset, Bar, CalendarDay, Clock, Order, OrderQuery, OrderRequest, Position,
    TimeFrame, Watchlist,
};
use crate::config::types::{AlpacaConfig, ApiCredentials};

/// REST API client for Alpaca
#[derive(Debug, Clone)]
pub struct AlpacaRestClient {
    /// HTTP client
    client: Client,
    /// Trading API base including the version segment
    base_url: String,
    /// Market data API base including the version segment
    data_url: String,
    /// Market data feed
    feed: String,
    /// Authentication headers for every request
    auth: Option<AuthHeaders>,
}

impl AlpacaRestClient {
    /// Create a new REST client (unauthenticated) against API version v2
    pub fn new(base_url: &str, data_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, data_url, "v2", Duration::from_secs(30))
    }

    /// Create a new REST client with custom API version and timeout
    pub fn with_timeout(
        base_url: &str,
        data_url: &str,
        api_version: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Url::parse(base_url)?;
        Url::parse(data_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}/{}", base_url.trim_end_matches('/'), api_version),
            data_url: format!("{}/v2", data_url.trim_end_matches('/')),
            feed: "iex".to_string(),
            auth: None,
        })
    }

    /// Build a client from configuration, including credentials when present
    pub fn from_config(config: &AlpacaConfig, timeout: Duration) -> Result<Self> {
        let client = Self::with_timeout(
            &config.resolved_base_url(),
            &config.data_url,
            &config.api_version,
            timeout,
        )?
        .with_feed(&config.feed);

        match config.credentials() {
            Some(credentials) => client.with_credentials(&credentials),
            None => Ok(client),
        }
    }

    /// Set API credentials for authenticated requests
    pub fn with_credentials(mut self, credentials: &ApiCredentials) -> Result<Self> {
        self.auth = Some(AuthHeaders::from_credentials(credentials)?);
        Ok(self)
    }

    /// Select the market data feed (`iex` or `sip`)
    pub fn with_feed(mut self, feed: &str) -> Self {
        self.feed = feed.to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Get the trading account
    #[instrument(skip(self))]
    pub async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/account", self.base_url);
        self.send(self.request(Method::GET, &url), "account").await
    }

    // ========================================================================
    // Positions
    // ========================================================================

    /// Get all open positions
    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let url = format!("{}/positions", self.base_url);
        self.send(self.request(Method::GET, &url), "positions").await
    }

    /// Get the open position in one symbol
    #[instrument(skip(self))]
    pub async fn get_position(&self, symbol: &str) -> Result<Position> {
        let url = format!("{}/positions/{}", self.base_url, symbol);
        self.send(self.request(Method::GET, &url), &format!("position {}", symbol))
            .await
    }

    /// Liquidate every open position
    #[instrument(skip(self))]
    pub async fn close_all_positions(&self) -> Result<Vec<ClosePositionResponse>> {
        let url = format!("{}/positions", self.base_url);
        self.send(self.request(Method::DELETE, &url), "positions").await
    }

    /// Liquidate the position in one symbol
    #[instrument(skip(self))]
    pub async fn close_position(&self, symbol: &str) -> Result<Order> {
        let url = format!("{}/positions/{}", self.base_url, symbol);
        self.send(self.request(Method::DELETE, &url), &format!("position {}", symbol))
            .await
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// List orders
    #[instrument(skip(self))]
    pub async fn get_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let url = format!("{}/orders", self.base_url);
        let request = self
            .request(Method::GET, &url)
            .query(&query.to_query_pairs());
        self.send(request, "orders").await
    }

    /// Get one order by id
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        let url = format!("{}/orders/{}", self.base_url, order_id);
        self.send(self.request(Method::GET, &url), &format!("order {}", order_id))
            .await
    }

    /// Get one order by the client-assigned id
    #[instrument(skip(self))]
    pub async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<Order> {
        let url = format!("{}/orders:by_client_order_id", self.base_url);
        let request = self
            .request(Method::GET, &url)
            .query(&[("client_order_id", client_order_id)]);
        self.send(request, &format!("order {}", client_order_id)).await
    }

    /// Submit a new order
    #[instrument(skip(self), fields(symbol = %order.symbol, side = %order.side))]
    pub async fn create_order(&self, order: &OrderRequest) -> Result<Order> {
        let url = format!("{}/orders", self.base_url);
        let request = self.request(Method::POST, &url).json(order);
        self.send(request, &format!("order for {}", order.symbol)).await
    }

    /// Replace an open order
    #[instrument(skip(self, order))]
    pub async fn replace_order(&self, order_id: &str, order: &OrderRequest) -> Result<Order> {
        let url = format!("{}/orders/{}", self.base_url, order_id);
        let request = self.request(Method::PATCH, &url).json(order);
        self.send(request, &format!("order {}", order_id)).await
    }

    /// Cancel an open order
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/orders/{}", self.base_url, order_id);
        self.send_empty(self.request(Method::DELETE, &url), &format!("order {}", order_id))
            .await
    }

    /// Cancel every open order
    #[instrument(skip(self))]
    pub async fn cancel_all_orders(&self) -> Result<Vec<CancelOrderResponse>> {
        let url = format!("{}/orders", self.base_url);
        self.send(self.request(Method::DELETE, &url), "orders").await
    }

    // ========================================================================
    // Clock, Calendar, Assets
    // ========================================================================

    /// Get the market clock
    #[instrument(skip(self))]
    pub async fn get_clock(&self) -> Result<Clock> {
        let url = format!("{}/clock", self.base_url);
        self.send(self.request(Method::GET, &url), "clock").await
    }

    /// Get trading days between two dates, inclusive
    #[instrument(skip(self))]
    pub async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>> {
        let url = format!("{}/calendar", self.base_url);
        let request = self.request(Method::GET, &url).query(&[
            ("start", start.format("%Y-%m-%d").to_string()),
            ("end", end.format("%Y-%m-%d").to_string()),
        ]);
        self.send(request, "calendar").await
    }

    /// List assets, optionally filtered by status and class
    #[instrument(skip(self))]
    pub async fn get_assets(
        &self,
        status: Option<&str>,
        asset_class: Option<&str>,
    ) -> Result<Vec<Asset>> {
        let url = format!("{}/assets", self.base_url);
        let mut params = vec![];
        if let Some(s) = status {
            params.push(("status", s));
        }
        if let Some(c) = asset_class {
            params.push(("asset_class", c));
        }
        let request = self.request(Method::GET, &url).query(&params);
        self.send(request, "assets").await
    }

    /// Get one asset by symbol or id
    #[instrument(skip(self))]
    pub async fn get_asset(&self, symbol: &str) -> Result<Asset> {
        let url = format!("{}/assets/{}", self.base_url, symbol);
        self.send(self.request(Method::GET, &url), &format!("asset {}", symbol))
            .await
    }

    // ========================================================================
    // Watchlists
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn get_watchlists(&self) -> Result<Vec<Watchlist>> {
        let url = format!("{}/watchlists", self.base_url);
        self.send(self.request(Method::GET, &url), "watchlists").await
    }

    #[instrument(skip(self))]
    pub async fn get_watchlist(&self, id: &str) -> Result<Watchlist> {
        let url = format!("{}/watchlists/{}", self.base_url, id);
        self.send(self.request(Method::GET, &url), &format!("watchlist {}", id))
            .await
    }

    /// Create a watchlist holding the given symbols
    #[instrument(skip(self))]
    pub async fn create_watchlist(&self, name: &str, symbols: &[String]) -> Result<Watchlist> {
        let url = format!("{}/watchlists", self.base_url);
        let body = WatchlistRequest {
            name: Some(name.to_string()),
            symbols: Some(symbols.to_vec()),
        };
        let request = self.request(Method::POST, &url).json(&body);
        self.send(request, "watchlists").await
    }

    /// Append one symbol to a watchlist
    #[instrument(skip(self))]
    pub async fn add_to_watchlist(&self, id: &str, symbol: &str) -> Result<Watchlist> {
        let url = format!("{}/watchlists/{}", self.base_url, id);
        let body = AddToWatchlistRequest {
            symbol: symbol.to_string(),
        };
        let request = self.request(Method::POST, &url).json(&body);
        self.send(request, &format!("watchlist {}", id)).await
    }

    /// Rename a watchlist and/or replace its symbols
    #[instrument(skip(self, update))]
    pub async fn update_watchlist(&self, id: &str, update: &WatchlistRequest) -> Result<Watchlist> {
        let url = format!("{}/watchlists/{}", self.base_url, id);
        let request = self.request(Method::PUT, &url).json(update);
        self.send(request, &format!("watchlist {}", id)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_watchlist(&self, id: &str) -> Result<()> {
        let url = format!("{}/watchlists/{}", self.base_url, id);
        self.send_empty(self.request(Method::DELETE, &url), &format!("watchlist {}", id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_from_watchlist(&self, id: &str, symbol: &str) -> Result<Watchlist> {
        let url = format!("{}/watchlists/{}/{}", self.base_url, id, symbol);
        self.send(self.request(Method::DELETE, &url), &format!("watchlist {}", id))
            .await
    }

    // ========================================================================
    // Market Data
    // ========================================================================

    /// Most recent `limit` bars for one symbol, oldest first
    #[instrument(skip(self))]
    pub async fn get_bars(&self, timeframe: TimeFrame, symbol: &str, limit: u32) -> Result<Vec<Bar>> {
        let url = format!("{}/stocks/{}/bars", self.data_url, symbol);
        debug!("Fetching bars from: {}", url);

        let request = self.request(Method::GET, &url).query(&[
            ("timeframe", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
            ("feed", self.feed.clone()),
            ("sort", "desc".to_string()),
        ]);
        let response: BarsResponse = self.send(request, &format!("bars for {}", symbol)).await?;

        let mut bars = response.bars.unwrap_or_default();
        bars.reverse();
        Ok(bars)
    }

    /// Bars for several symbols since `start`, keeping the last `limit` per
    /// symbol in chronological order
    #[instrument(skip(self))]
    pub async fn get_multi_bars(
        &self,
        timeframe: TimeFrame,
        symbols: &[String],
        start: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        let url = format!("{}/stocks/bars", self.data_url);
        let mut collected: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("symbols", symbols.join(",")),
                ("timeframe", timeframe.as_str().to_string()),
                ("feed", self.feed.clone()),
            ];
            if let Some(start) = start {
                params.push(("start", start.to_rfc3339()));
            }
            if let Some(token) = &page_token {
                params.push(("page_token", token.clone()));
            }

            let request = self.request(Method::GET, &url).query(&params);
            let page: MultiBarsResponse = self.send(request, "bars").await?;
            for (symbol, bars) in page.bars {
                collected.entry(symbol).or_default().extend(bars);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        for bars in collected.values_mut() {
            bars.sort_by_key(|bar| bar.timestamp);
            if bars.len() > limit {
                let excess = bars.len() - limit;
                bars.drain(..excess);
            }
        }
        Ok(collected)
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    /// Start a request with authentication applied
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth {
            Some(auth) => auth.apply_to_request(request),
            None => request,
        }
    }

    /// Send a request and decode the JSON body
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, context: &str) -> Result<T> {
        let response = request.send().await?;
        let response = Self::check_status(response, context).await?;
        Ok(response.json().await?)
    }

    /// Send a request whose success body is ignored
    async fn send_empty(&self, request: RequestBuilder, context: &str) -> Result<()> {
        let response = request.send().await?;
        Self::check_status(response, context).await?;
        Ok(())
    }

    /// Map non-2xx responses onto the error taxonomy
    async fn check_status(response: Response, context: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| body.clone());

        warn!(status = %status, context, "Request failed: {}", message);

        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(context.to_string()),
            StatusCode::UNAUTHORIZED => ClientError::Authentication(message),
            StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => ClientError::Rejected {
                status: status.as_u16(),
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimit {
                message,
                retry_after_seconds,
            },
            _ => ClientError::InvalidResponse(format!(
                "Server returned status {}: {}",
                status, body
            )),
        })
    }
}

#[async_trait]
impl BrokerGateway for AlpacaRestClient {
    async fn get_clock(&self) -> Result<Clock> {
        AlpacaRestClient::get_clock(self).await
    }

    async fn get_account(&self) -> Result<Account> {
        AlpacaRestClient::get_account(self).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        AlpacaRestClient::get_positions(self).await
    }

    async fn get_position(&self, symbol: &str) -> Result<Position> {
        AlpacaRestClient::get_position(self, symbol).await
    }

    async fn get_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        AlpacaRestClient::get_orders(self, query).await
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        AlpacaRestClient::create_order(self, request).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        AlpacaRestClient::cancel_order(self, order_id).await
    }

    async fn get_bars(&self, timeframe: TimeFrame, symbol: &str, limit: u32) -> Result<Vec<Bar>> {
        AlpacaRestClient::get_bars(self, timeframe, symbol, limit).await
    }

    async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>> {
        AlpacaRestClient::get_calendar(self, start, end).await
    }
}
