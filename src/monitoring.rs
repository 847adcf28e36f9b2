use crate::error::TradeWireError;
use crate::types::ConnectionState;
use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{Counter, counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::{net::SocketAddr, sync::LazyLock};
use tracing::{error, info};

// Global metrics
pub static EVENTS_RECEIVED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_events_received_total"));
pub static EVENTS_DROPPED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_events_dropped_total"));
pub static LISTENER_PANICS_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_listener_panics_total"));
pub static RECONNECT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_reconnects_total"));
pub static CONNECTIONS_OPENED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_connections_opened_total"));
pub static COMMANDS_SENT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_commands_sent_total"));
pub static COMMANDS_REJECTED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("tradewire_commands_rejected_total"));

pub async fn setup_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "tradewire")
        .add_global_label("version", env!("CARGO_PKG_VERSION"));

    match builder.install() {
        Ok(_handle) => {
            info!(
                "Prometheus metrics server started on http://{}/metrics",
                addr
            );

            EVENTS_RECEIVED_COUNTER.absolute(0);
            EVENTS_DROPPED_COUNTER.absolute(0);
            LISTENER_PANICS_COUNTER.absolute(0);
            RECONNECT_COUNTER.absolute(0);
            CONNECTIONS_OPENED_COUNTER.absolute(0);
            COMMANDS_SENT_COUNTER.absolute(0);
            COMMANDS_REJECTED_COUNTER.absolute(0);

            Ok(())
        }
        Err(e) => {
            error!("Failed to start metrics server: {}", e);
            Err(TradeWireError::MetricsError(e.to_string()).into())
        }
    }
}

/// Point-in-time view of a channel, suitable for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    pub state: ConnectionState,
    pub connection_id: Option<String>,
    pub reconnect_attempts: u32,
    pub connections_opened: u64,
    pub messages_received: u64,
    pub malformed_messages: u64,
    pub listener_panics: u64,
    pub commands_sent: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ChannelHealth {
    pub fn is_healthy(&self) -> bool {
        self.state.is_open()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": if self.is_healthy() { "healthy" } else { "unhealthy" },
            "state": self.state,
            "connection_id": self.connection_id,
            "reconnect_attempts": self.reconnect_attempts,
            "connections_opened": self.connections_opened,
            "messages_received": self.messages_received,
            "malformed_messages": self.malformed_messages,
            "listener_panics": self.listener_panics,
            "commands_sent": self.commands_sent,
            "last_message_time": self.last_message_at,
            "timestamp": Utc::now()
        })
    }
}
