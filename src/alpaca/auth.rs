//! Authentication utilities for the Alpaca API

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use super::messages::WsAuthMessage;
use crate::common::errors::{ClientError, Result};
use crate::config::types::ApiCredentials;

pub const KEY_ID_HEADER: &str = "APCA-API-KEY-ID";
pub const SECRET_KEY_HEADER: &str = "APCA-API-SECRET-KEY";

/// Authentication headers for API requests
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    headers: HeaderMap,
}

impl AuthHeaders {
    /// Build the header set for the given credentials
    pub fn from_credentials(credentials: &ApiCredentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        match credentials {
            ApiCredentials::KeyPair { key_id, secret_key } => {
                headers.insert(KEY_ID_HEADER, header_value(key_id)?);
                headers.insert(SECRET_KEY_HEADER, header_value(secret_key)?);
            }
            ApiCredentials::OAuth(token) => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            }
        }
        Ok(Self { headers })
    }

    /// Add authentication headers to a reqwest RequestBuilder
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.headers(self.headers.clone())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|e| ClientError::Authentication(format!("Invalid header value: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Stream authentication frame for the given credentials
pub fn stream_auth_message(credentials: &ApiCredentials) -> WsAuthMessage {
    match credentials {
        ApiCredentials::KeyPair { key_id, secret_key } => WsAuthMessage {
            action: "auth".to_string(),
            key: Some(key_id.clone()),
            secret: Some(secret_key.clone()),
            oauth_token: None,
        },
        ApiCredentials::OAuth(token) => WsAuthMessage {
            action: "auth".to_string(),
            key: None,
            secret: None,
            oauth_token: Some(token.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_headers() {
        let creds = ApiCredentials::key_pair("test_key".into(), "test_secret".into());
        let auth = AuthHeaders::from_credentials(&creds).unwrap();

        assert_eq!(auth.headers().get(KEY_ID_HEADER).unwrap(), "test_key");
        assert_eq!(auth.headers().get(SECRET_KEY_HEADER).unwrap(), "test_secret");
        assert!(auth.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_oauth_header() {
        let creds = ApiCredentials::OAuth("tok123".into());
        let auth = AuthHeaders::from_credentials(&creds).unwrap();

        assert_eq!(auth.headers().get(AUTHORIZATION).unwrap(), "Bearer tok123");
        assert!(auth.headers().get(KEY_ID_HEADER).is_none());
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let creds = ApiCredentials::key_pair("bad\nkey".into(), "secret".into());
        let result = AuthHeaders::from_credentials(&creds);
        assert!(matches!(result, Err(ClientError::Authentication(_))));
    }

    #[test]
    fn test_stream_auth_message() {
        let msg = stream_auth_message(&ApiCredentials::key_pair("k".into(), "s".into()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "auth");
        assert_eq!(json["key"], "k");
        assert_eq!(json["secret"], "s");
        assert!(json.get("oauth_token").is_none());
    }
}
