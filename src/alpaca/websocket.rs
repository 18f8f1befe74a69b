//! WebSocket client for Alpaca real-time market data

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, instrument, warn};

use super::auth::stream_auth_message;
use super::messages::*;
use crate::common::errors::{ClientError, Result};
use crate::common::types::{ConnectionStatus, StreamEvent, TradeUpdate};
use crate::config::types::ApiCredentials;

/// WebSocket client for the market data stream
pub struct AlpacaStreamClient {
    /// WebSocket URL including version and feed
    url: String,
    /// Credentials sent in the auth frame
    credentials: Option<ApiCredentials>,
    /// Ping interval in seconds
    heartbeat_interval: u64,
    /// Connected state flag
    is_connected: Arc<AtomicBool>,
    /// Symbols sent in the subscribe frame
    subscribed_symbols: Vec<String>,
    /// Stops the reader task and closes the socket
    close_tx: Option<mpsc::Sender<()>>,
}

impl AlpacaStreamClient {
    /// Create a client for `{stream_url}/v2/{feed}`
    pub fn new(stream_url: &str, feed: &str, credentials: Option<ApiCredentials>) -> Self {
        Self {
            url: format!("{}/v2/{}", stream_url.trim_end_matches('/'), feed),
            credentials,
            heartbeat_interval: 10,
            is_connected: Arc::new(AtomicBool::new(false)),
            subscribed_symbols: Vec::new(),
            close_tx: None,
        }
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, seconds: u64) -> Self {
        self.heartbeat_interval = seconds.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    /// Connect, authenticate, subscribe, then forward events until closed
    ///
    /// The auth frame is sent before the subscribe frame; the server
    /// acknowledges each with a `success` or `subscription` message which
    /// is forwarded like any other event.
    #[instrument(skip(self, event_sender))]
    pub async fn connect_and_subscribe(
        &mut self,
        symbols: Vec<String>,
        event_sender: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let credentials = self
            .credentials
            .clone()
            .ok_or_else(|| ClientError::Authentication("Stream requires credentials".into()))?;

        info!("Connecting to Alpaca data stream: {}", self.url);

        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .map_err(|e| ClientError::WebSocketConnection(e.to_string()))?;

        info!("WebSocket connection established");
        self.is_connected.store(true, Ordering::SeqCst);
        self.subscribed_symbols = symbols.clone();

        let _ = event_sender
            .send(StreamEvent::ConnectionStatus(ConnectionStatus::Connected))
            .await;

        let (mut write, mut read) = ws_stream.split();

        let auth_json = serde_json::to_string(&stream_auth_message(&credentials))?;
        write.send(Message::Text(auth_json)).await?;

        if !symbols.is_empty() {
            let subscribe_msg = WsSubscribeMessage::all_channels("subscribe", &symbols);
            let msg_json = serde_json::to_string(&subscribe_msg)?;
            debug!("Sending subscription message: {}", msg_json);
            write.send(Message::Text(msg_json)).await?;
        }

        let is_connected = self.is_connected.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let (close_tx, mut close_rx) = mpsc::channel::<()>(1);
        self.close_tx = Some(close_tx);

        tokio::spawn(async move {
            let mut ping_interval = interval(Duration::from_secs(heartbeat_interval));

            loop {
                tokio::select! {
                    msg = read.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Dropping non-UTF8 binary frame: {}", e);
                                    continue;
                                }
                            },
                            Some(Ok(Message::Ping(_))) => {
                                debug!("Received Ping");
                                continue;
                            }
                            Some(Ok(Message::Pong(_))) => {
                                debug!("Received Pong");
                                continue;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed: {:?}", frame);
                                is_connected.store(false, Ordering::SeqCst);
                                let _ = event_sender
                                    .send(StreamEvent::ConnectionStatus(
                                        ConnectionStatus::Disconnected(
                                            frame.map(|f| f.reason.to_string()),
                                        ),
                                    ))
                                    .await;
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                is_connected.store(false, Ordering::SeqCst);
                                let _ = event_sender
                                    .send(StreamEvent::ConnectionStatus(ConnectionStatus::Error(
                                        e.to_string(),
                                    )))
                                    .await;
                                break;
                            }
                            None => {
                                info!("WebSocket stream ended");
                                is_connected.store(false, Ordering::SeqCst);
                                let _ = event_sender
                                    .send(StreamEvent::ConnectionStatus(
                                        ConnectionStatus::Disconnected(None),
                                    ))
                                    .await;
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let events = match Self::parse_message(&text) {
                            Ok(events) => events,
                            Err(e) => {
                                warn!("Failed to parse message: {} - {}", e, text);
                                vec![StreamEvent::Raw(text)]
                            }
                        };
                        for event in events {
                            if let Err(e) = event_sender.send(event).await {
                                error!("Failed to send event: {}", e);
                                is_connected.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                    _ = ping_interval.tick() => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            warn!("Failed to send ping: {}", e);
                        }
                    }
                    _ = close_rx.recv() => {
                        debug!("Closing data stream");
                        let _ = write.send(Message::Close(None)).await;
                        is_connected.store(false, Ordering::SeqCst);
                        let _ = event_sender
                            .send(StreamEvent::ConnectionStatus(ConnectionStatus::Disconnected(
                                Some("client requested".to_string()),
                            )))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the reader task and close the socket
    pub async fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(()).await;
        }
        self.is_connected.store(false, Ordering::SeqCst);
    }

    /// Parse one text frame into zero or more events
    ///
    /// Data stream frames are JSON arrays of `T`-tagged messages; trading
    /// stream frames are `{"stream": ..., "data": ...}` objects.
    pub fn parse_message(text: &str) -> Result<Vec<StreamEvent>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Self::parse_data_message)
                .collect(),
            serde_json::Value::Object(_) => {
                let frame: TradingStreamFrame = serde_json::from_value(value)?;
                Ok(vec![Self::parse_trading_frame(frame, text)?])
            }
            _ => Ok(vec![StreamEvent::Raw(text.to_string())]),
        }
    }

    fn parse_data_message(value: serde_json::Value) -> Result<StreamEvent> {
        let message_type = value
            .get("T")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let event = match message_type.as_str() {
            "t" => StreamEvent::Trade(serde_json::from_value::<WsTrade>(value)?.into()),
            "q" => StreamEvent::Quote(serde_json::from_value::<WsQuote>(value)?.into()),
            "b" => {
                let bar: WsBar = serde_json::from_value(value)?;
                StreamEvent::Bar {
                    symbol: bar.symbol,
                    bar: bar.bar,
                }
            }
            "success" => {
                let control: WsControlMessage = serde_json::from_value(value)?;
                match control.msg.as_deref() {
                    Some("authenticated") => {
                        StreamEvent::ConnectionStatus(ConnectionStatus::Authenticated)
                    }
                    Some("connected") => StreamEvent::ConnectionStatus(ConnectionStatus::Connected),
                    other => StreamEvent::Raw(other.unwrap_or_default().to_string()),
                }
            }
            "subscription" => {
                let control: WsControlMessage = serde_json::from_value(value)?;
                StreamEvent::Subscription {
                    trades: control.trades,
                    quotes: control.quotes,
                    bars: control.bars,
                }
            }
            "error" => {
                let control: WsControlMessage = serde_json::from_value(value)?;
                StreamEvent::Error {
                    code: control.code.unwrap_or_default(),
                    message: control.msg.unwrap_or_default(),
                }
            }
            _ => StreamEvent::Raw(value.to_string()),
        };
        Ok(event)
    }

    fn parse_trading_frame(frame: TradingStreamFrame, text: &str) -> Result<StreamEvent> {
        match frame.stream.as_str() {
            "trade_updates" => {
                let update: TradeUpdate = serde_json::from_value(frame.data)?;
                Ok(StreamEvent::TradeUpdate(update))
            }
            "authorization" => {
                let authorized = frame
                    .data
                    .get("status")
                    .and_then(|s| s.as_str())
                    .map(|s| s == "authorized")
                    .unwrap_or(false);
                Ok(if authorized {
                    StreamEvent::ConnectionStatus(ConnectionStatus::Authenticated)
                } else {
                    StreamEvent::ConnectionStatus(ConnectionStatus::Error(
                        "authorization failed".to_string(),
                    ))
                })
            }
            _ => Ok(StreamEvent::Raw(text.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stream_url() {
        let client = AlpacaStreamClient::new("wss://stream.data.alpaca.markets/", "iex", None);
        assert_eq!(client.url(), "wss://stream.data.alpaca.markets/v2/iex");
        assert!(!client.is_connected());
    }

    #[test]
    fn test_parse_trade_and_quote_batch() {
        let json = r#"[
            {"T":"t","S":"AAPL","i":96921,"x":"D","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"],"z":"C"},
            {"T":"q","S":"AMD","bx":"U","bp":87.66,"bs":1,"ax":"Q","ap":87.68,"as":4,"t":"2021-02-22T15:51:45.335689322Z","c":["R"],"z":"C"}
        ]"#;

        let events = AlpacaStreamClient::parse_message(json).unwrap();
        assert_eq!(events.len(), 2);

        match &events[0] {
            StreamEvent::Trade(trade) => {
                assert_eq!(trade.symbol, "AAPL");
                assert_eq!(trade.trade_id, 96921);
                assert_eq!(trade.price, dec!(126.55));
                assert_eq!(trade.conditions, vec!["@", "I"]);
            }
            other => panic!("Expected Trade, got {:?}", other),
        }
        match &events[1] {
            StreamEvent::Quote(quote) => {
                assert_eq!(quote.symbol, "AMD");
                assert_eq!(quote.ask_size, 4);
                assert_eq!(quote.spread(), dec!(0.02));
            }
            other => panic!("Expected Quote, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bar() {
        let json = r#"[{"T":"b","S":"SPY","o":388.985,"h":389.13,"l":388.975,"c":389.12,"v":49378,"t":"2021-02-22T19:15:00Z"}]"#;
        let events = AlpacaStreamClient::parse_message(json).unwrap();

        match &events[0] {
            StreamEvent::Bar { symbol, bar } => {
                assert_eq!(symbol, "SPY");
                assert_eq!(bar.close, dec!(389.12));
                assert_eq!(bar.volume, 49378);
            }
            other => panic!("Expected Bar, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_messages() {
        let json = r#"[
            {"T":"success","msg":"authenticated"},
            {"T":"subscription","trades":["AAPL"],"quotes":["AMD","CLDR"],"bars":[]},
            {"T":"error","code":402,"msg":"auth failed"}
        ]"#;
        let events = AlpacaStreamClient::parse_message(json).unwrap();

        assert!(matches!(
            events[0],
            StreamEvent::ConnectionStatus(ConnectionStatus::Authenticated)
        ));
        match &events[1] {
            StreamEvent::Subscription { trades, quotes, bars } => {
                assert_eq!(trades, &vec!["AAPL".to_string()]);
                assert_eq!(quotes.len(), 2);
                assert!(bars.is_empty());
            }
            other => panic!("Expected Subscription, got {:?}", other),
        }
        match &events[2] {
            StreamEvent::Error { code, message } => {
                assert_eq!(*code, 402);
                assert_eq!(message, "auth failed");
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_trade_update() {
        let json = r#"{
            "stream": "trade_updates",
            "data": {
                "event": "fill",
                "price": "179.08",
                "qty": "1",
                "timestamp": "2021-02-22T15:51:44.208Z",
                "order": {
                    "id": "7b7653c4-7468-494a-aeb3-d5f255789473",
                    "client_order_id": "7b7653c4",
                    "symbol": "AAPL",
                    "qty": "1",
                    "filled_qty": "1",
                    "side": "buy",
                    "type": "market",
                    "time_in_force": "day",
                    "status": "filled"
                }
            }
        }"#;

        let events = AlpacaStreamClient::parse_message(json).unwrap();
        match &events[0] {
            StreamEvent::TradeUpdate(update) => {
                assert_eq!(update.event, "fill");
                assert_eq!(update.order.side, Side::Buy);
                assert_eq!(update.price, Some(dec!(179.08)));
            }
            other => panic!("Expected TradeUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_raw() {
        let events = AlpacaStreamClient::parse_message(r#"[{"T":"x","foo":1}]"#).unwrap();
        assert!(matches!(events[0], StreamEvent::Raw(_)));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(AlpacaStreamClient::parse_message("not json").is_err());
    }
}
