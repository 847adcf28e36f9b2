/// file: src/config.rs
/// description: channel configuration and CLI argument mapping
use crate::cli::Args;
use crate::error::{Result, TradeWireError};
use crate::formatter::OutputFormat;
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::types::SessionIdentity;
use std::time::Duration;
use url::Url;

pub const EVENTS_PATH: [&str; 2] = ["matching", "events"];
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub events: EventChannelConfig,
    pub actions: ActionChannelConfig,
    pub metrics: MetricsConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct EventChannelConfig {
    pub url: Url,
    pub timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone)]
pub struct ActionChannelConfig {
    pub url: Url,
    pub timeout: Duration,
    /// Virtual host announced in the STOMP CONNECT frame.
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub colored: bool,
}

impl EventChannelConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// `{url}/matching/events?userId=..[&transactionId=..]`
    pub fn endpoint_for(&self, identity: &SessionIdentity) -> Result<Url> {
        let mut endpoint = self.url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| TradeWireError::InvalidEndpoint(self.url.to_string()))?
            .pop_if_empty()
            .extend(EVENTS_PATH);

        {
            let mut query = endpoint.query_pairs_mut();
            query.clear().append_pair("userId", &identity.user_id);
            if let Some(transaction_id) = &identity.transaction_id {
                query.append_pair("transactionId", transaction_id);
            }
        }

        Ok(endpoint)
    }
}

impl Default for EventChannelConfig {
    fn default() -> Self {
        Self::new(Url::parse("ws://localhost:8080/api").expect("static URL is valid"))
    }
}

impl ActionChannelConfig {
    pub fn new(url: Url) -> Self {
        let host = url.host_str().unwrap_or("localhost").to_string();
        Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            host,
        }
    }
}

impl Default for ActionChannelConfig {
    fn default() -> Self {
        Self::new(Url::parse("ws://localhost:8080/ws").expect("static URL is valid"))
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let timeout = Duration::from_secs(args.timeout);

        let backoff = if args.exponential_backoff {
            Backoff::Exponential
        } else {
            Backoff::Linear
        };
        let reconnect = ReconnectPolicy::new(
            Duration::from_millis(args.reconnect_delay_ms),
            args.max_reconnects,
        )
        .with_backoff(backoff);

        let mut actions = ActionChannelConfig::new(Url::parse(&args.action_url)?);
        actions.timeout = timeout;

        Ok(Config {
            events: EventChannelConfig {
                url: Url::parse(&args.event_url)?,
                timeout,
                reconnect,
            },
            actions,
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
            output: OutputConfig {
                format: OutputFormat::from(args.format.as_str()),
                colored: !args.no_color,
            },
        })
    }
}
