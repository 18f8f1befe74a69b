//! Error types for the application

use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// HTTP transport errors (connection refused, timeouts, TLS)
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {message}, retry after {retry_after_seconds:?} seconds")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// The broker refused the request on business grounds
    /// (insufficient buying power or quantity, invalid order)
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Requested resource does not exist (no position, unknown order id)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Channel receive errors
    #[error("Channel receive error: {0}")]
    ChannelReceive(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// True when the gateway reported the resource as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// True for business-rule rejections of an otherwise valid request
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::Rejected { .. })
    }

    /// True for failures that may clear up on the next attempt
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::HttpRequest(_)
            | ClientError::RateLimit { .. }
            | ClientError::Timeout(_)
            | ClientError::WebSocketConnection(_)
            | ClientError::WebSocketCommunication(_) => true,
            ClientError::InvalidResponse(message) => message.starts_with("Server returned status 5"),
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocketCommunication(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::Configuration(format!("Invalid URL: {}", err))
    }
}
