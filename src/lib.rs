//! Real-time trade/match event client.
//!
//! [`EventChannel`] keeps one auto-reconnecting push stream per user session
//! and fans decoded events out to listeners registered per [`EventKind`].
//! [`ActionChannel`] publishes trade commands (payment, confirmation) over an
//! authenticated STOMP session. The two are independent; results of a command
//! come back as events, correlated by the trade id in their payload.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tradewire::{EventChannel, EventKind, SessionIdentity};
//! use tradewire::config::EventChannelConfig;
//! use tradewire::transport::WebSocketConnector;
//!
//! # async fn demo() -> tradewire::error::Result<()> {
//! let events = EventChannel::new(
//!     EventChannelConfig::default(),
//!     Arc::new(WebSocketConnector::new()?),
//! );
//! events.add_event_listener(EventKind::MatchFound, |payload| {
//!     println!("matched: {:?}", payload.get("tradeId"));
//! });
//! events.connect(SessionIdentity::user("u1"))?;
//! # Ok(())
//! # }
//! ```

/// Authenticated STOMP command channel.
pub mod action_channel;
/// Command-line argument definitions.
pub mod cli;
/// Per-channel counters and driver task handles.
pub mod client_state;
/// Runtime configuration model.
pub mod config;
/// Bearer token sources.
pub mod credentials;
/// Error types used across the crate.
pub mod error;
/// Auto-reconnecting push event channel.
pub mod event_channel;
/// Terminal output formatters.
pub mod formatter;
/// Listener registry.
pub mod listeners;
/// Metrics and health status structures.
pub mod monitoring;
/// Retry/delay policy.
pub mod reconnect;
/// STOMP 1.2 frame codec.
pub mod stomp;
/// Tracing/logging initialization.
pub mod tracing_setup;
/// Transport seam and WebSocket implementation.
pub mod transport;
/// Event, command and lifecycle types.
pub mod types;

pub use action_channel::ActionChannel;
/// Primary crate error type.
pub use error::TradeWireError;
pub use event_channel::EventChannel;
pub use listeners::ListenerId;
pub use reconnect::ReconnectPolicy;
pub use types::{Command, ConnectionState, Event, EventKind, Payload, SessionIdentity};
