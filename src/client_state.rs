/// file: src/client_state.rs
/// description: per-channel counters and the handle to a channel's background driver
use crate::monitoring::ChannelHealth;
use crate::types::ConnectionState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on how long a cancelled driver may spend closing its transport.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct ChannelStats {
    connection_id: Mutex<Option<String>>,
    reconnect_attempts: AtomicU32,
    connections_opened: AtomicU64,
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
    listener_panics: AtomicU64,
    commands_sent: AtomicU64,
    last_message_at: Mutex<Option<DateTime<Utc>>>,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh transport is live; returns its connection id.
    pub fn record_open(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        *self.connection_id.lock() = Some(id.clone());
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        id
    }

    pub fn record_transport_gone(&self) {
        *self.connection_id.lock() = None;
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        *self.last_message_at.lock() = Some(Utc::now());
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_panic(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    pub fn listener_panics(&self) -> u64 {
        self.listener_panics.load(Ordering::Relaxed)
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent.load(Ordering::Relaxed)
    }

    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, state: ConnectionState) -> ChannelHealth {
        ChannelHealth {
            state,
            connection_id: self.connection_id.lock().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened(),
            messages_received: self.messages_received(),
            malformed_messages: self.malformed_messages(),
            listener_panics: self.listener_panics(),
            commands_sent: self.commands_sent(),
            last_message_at: *self.last_message_at.lock(),
        }
    }
}

/// The spawned task that owns a channel's transport, plus its cancel switch.
pub struct Driver {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Driver {
    pub fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { token, handle }
    }

    /// Signal the driver to stop. The returned handle resolves once its
    /// transport has been torn down.
    pub fn cancel(self) -> JoinHandle<()> {
        self.token.cancel();
        self.handle
    }
}

/// Wait for a retired driver, if any, to release its transport.
pub async fn await_retired(previous: Option<JoinHandle<()>>) {
    if let Some(handle) = previous
        && let Err(e) = handle.await
        && e.is_panic()
    {
        tracing::error!("Channel driver panicked: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_resets_attempts_and_assigns_id() {
        let stats = ChannelStats::new();
        stats.set_reconnect_attempts(3);
        let id = stats.record_open();

        let health = stats.snapshot(ConnectionState::Open);
        assert_eq!(health.reconnect_attempts, 0);
        assert_eq!(health.connection_id.as_deref(), Some(id.as_str()));
        assert_eq!(health.connections_opened, 1);

        stats.record_transport_gone();
        assert!(stats.snapshot(ConnectionState::Reconnecting).connection_id.is_none());
    }

    #[test]
    fn message_counters_accumulate() {
        let stats = ChannelStats::new();
        stats.record_message();
        stats.record_message();
        stats.record_malformed();
        stats.record_listener_panic();

        let health = stats.snapshot(ConnectionState::Open);
        assert_eq!(health.messages_received, 2);
        assert_eq!(health.malformed_messages, 1);
        assert_eq!(health.listener_panics, 1);
        assert!(health.last_message_at.is_some());
    }

    #[tokio::test]
    async fn cancelling_driver_stops_task() {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move { child.cancelled().await });
        let driver = Driver::new(token, handle);

        await_retired(Some(driver.cancel())).await;
    }
}
