#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tradewire::{
    ConnectionState, TradeWireError,
    transport::{Connector, Transport},
};
use url::Url;

enum ServerFrame {
    Text(String),
    Fail,
}

enum Outcome {
    Refuse,
    Accept(MockTransport),
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub endpoint: Url,
    pub at: Instant,
}

/// Scripted in-memory connector. Each `open` consumes the next scripted
/// outcome; an empty script refuses the connection.
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<Attempt>>,
    live: Arc<AtomicUsize>,
    peak_live: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue an accepted connection and return the server end of it.
    pub fn accept(&self) -> MockServer {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.script.lock().push_back(Outcome::Accept(MockTransport {
            inbound,
            outbound,
            live: self.live.clone(),
            counted: false,
        }));
        MockServer {
            to_client,
            from_client,
        }
    }

    pub fn refuse(&self) {
        self.script.lock().push_back(Outcome::Refuse);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn live_transports(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak_live_transports(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn Transport>, TradeWireError> {
        self.attempts.lock().push(Attempt {
            endpoint: endpoint.clone(),
            at: Instant::now(),
        });

        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Refuse);
        match outcome {
            Outcome::Refuse => Err(TradeWireError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            Outcome::Accept(mut transport) => {
                let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_live.fetch_max(now_live, Ordering::SeqCst);
                transport.counted = true;
                Ok(Box::new(transport))
            }
        }
    }
}

pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
    outbound: mpsc::UnboundedSender<String>,
    live: Arc<AtomicUsize>,
    counted: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn next_text(&mut self) -> Option<Result<String, TradeWireError>> {
        match self.inbound.recv().await? {
            ServerFrame::Text(text) => Some(Ok(text)),
            ServerFrame::Fail => Some(Err(TradeWireError::ConnectionClosed)),
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TradeWireError> {
        self.outbound
            .send(text)
            .map_err(|_| TradeWireError::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.counted {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Server end of an accepted mock connection. Dropping it ends the stream.
pub struct MockServer {
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockServer {
    pub fn push(&self, text: &str) {
        let _ = self.to_client.send(ServerFrame::Text(text.to_string()));
    }

    pub fn fail(&self) {
        let _ = self.to_client.send(ServerFrame::Fail);
    }

    /// Next frame written by the client, if one arrives within a second.
    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for state")
        .expect("state sender dropped");
}
