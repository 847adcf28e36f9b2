// file: src/transport.rs
// description: transport seam and the tungstenite-backed WebSocket implementation
// reference: https://docs.rs/tokio-tungstenite/latest/tokio_tungstenite/

use crate::error::{Result, TradeWireError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::Message,
};
use tracing::{debug, trace, warn};
use url::Url;

/// A live, text-framed duplex connection.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound text frame. `None` once the peer has closed the stream.
    async fn next_text(&mut self) -> Option<Result<String>>;

    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}

/// Opens transports against an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketConnector {
    tls: Arc<rustls::ClientConfig>,
}

impl WebSocketConnector {
    pub fn new() -> Result<Self> {
        let tls = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .with_root_certificates(rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        })
        .with_no_client_auth();

        Ok(Self { tls: Arc::new(tls) })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Transport>> {
        let tls = match endpoint.scheme() {
            "wss" | "https" => Some(TlsConnector::Rustls(self.tls.clone())),
            _ => None,
        };

        let (stream, response) =
            connect_async_tls_with_config(endpoint.as_str(), None, true, tls).await?;
        debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket handshake completed"
        );

        Ok(Box::new(WebSocketTransport { stream }))
    }
}

pub struct WebSocketTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => {
                    trace!("Received text frame: {}", text);
                    return Some(Ok(text.to_string()));
                }
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("Dropping non UTF-8 binary frame of {} bytes", data.len()),
                },
                Message::Ping(_) | Message::Pong(_) => {
                    // Pongs are queued by tungstenite itself.
                    trace!("Control frame received");
                }
                Message::Close(frame) => {
                    debug!("Received close frame: {:?}", frame);
                    return None;
                }
                Message::Frame(_) => {
                    debug!("Received raw frame");
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing WebSocket: {}", e);
        }
    }
}

/// Wrap a connect attempt in the configured timeout.
pub async fn open_with_timeout(
    connector: &dyn Connector,
    endpoint: &Url,
    timeout: std::time::Duration,
) -> Result<Box<dyn Transport>> {
    match tokio::time::timeout(timeout, connector.open(endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(TradeWireError::Timeout),
    }
}
