use crate::types::ConnectionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradeWireError {
    #[error("WebSocket connection error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("TLS configuration error: {0}")]
    TlsError(#[from] rustls::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Channel is not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("No bearer credential available")]
    MissingCredential,

    #[error("Broker rejected the session: {message}")]
    Protocol { message: String },

    #[error("Maximum reconnection attempts ({attempts}) exceeded")]
    MaxReconnectsExceeded { attempts: u32 },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("No tokio runtime available to drive the channel")]
    NoRuntime,

    #[error("Metrics server error: {0}")]
    MetricsError(String),
}

impl TradeWireError {
    /// Whether waiting and reopening the transport could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TradeWireError::WebSocketError(_)
                | TradeWireError::IoError(_)
                | TradeWireError::Timeout
                | TradeWireError::ConnectionClosed
        )
    }
}

pub type Result<T, E = TradeWireError> = std::result::Result<T, E>;
