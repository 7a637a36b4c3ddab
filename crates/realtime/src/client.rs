//! WebSocket connector for the push channel.
//!
//! [`PushClient`] holds the push endpoint URL. Call
//! [`PushClient::connect`] with a bearer token to open a live
//! [`WsStream`].

use reqwest::Url;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used by the channel.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Query parameter carrying the bearer token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Connection settings for one push endpoint.
#[derive(Debug, Clone)]
pub struct PushClient {
    ws_url: String,
}

impl PushClient {
    /// * `ws_url` - push endpoint, e.g. `wss://host/ws/notifications`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Build the connect URL with the token appended as a query parameter.
    pub fn connect_url(&self, token: &str) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| ChannelError::InvalidUrl(format!("{}: {e}", self.ws_url)))?;
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        Ok(url)
    }

    /// Open the WebSocket. The token is never logged.
    pub async fn connect(&self, token: &str) -> Result<WsStream, ChannelError> {
        let url = self.connect_url(token)?;

        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            ChannelError::Connection(format!(
                "Failed to connect to push channel at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(ws_url = %self.ws_url, "Connected to push channel");
        Ok(ws_stream)
    }
}

/// Errors from the push channel transport.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The configured push URL cannot be parsed.
    #[error("Invalid push channel URL: {0}")]
    InvalidUrl(String),

    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_as_query_param() {
        let client = PushClient::new("ws://localhost:8000/ws/notifications");
        let url = client.connect_url("abc.def").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ws/notifications?token=abc.def"
        );
    }

    #[test]
    fn existing_query_is_preserved() {
        let client = PushClient::new("wss://host/ws?v=2");
        let url = client.connect_url("t").unwrap();
        assert_eq!(url.query(), Some("v=2&token=t"));
    }

    #[test]
    fn token_is_escaped() {
        let client = PushClient::new("ws://host/ws");
        let url = client.connect_url("a b&c").unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let client = PushClient::new("not a url");
        assert!(matches!(
            client.connect_url("t"),
            Err(ChannelError::InvalidUrl(_))
        ));
    }
}
