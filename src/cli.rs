use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tradewire",
    about = "real-time trade/match event listener and trade command publisher",
    version
)]
pub struct Args {
    /// Base WebSocket URL of the push event service
    #[arg(long, global = true, default_value = "ws://localhost:8080/api")]
    pub event_url: String,

    /// STOMP-over-WebSocket endpoint used for trade commands
    #[arg(long, global = true, default_value = "ws://localhost:8080/ws")]
    pub action_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, global = true, default_value = "9090")]
    pub metrics_port: u16,

    /// Connection timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    pub timeout: u64,

    /// Base reconnection delay in milliseconds
    #[arg(long, global = true, default_value = "1000")]
    pub reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts before giving up
    #[arg(long, global = true, default_value = "5")]
    pub max_reconnects: u32,

    /// Double the delay on every attempt instead of growing it linearly
    #[arg(long, global = true)]
    pub exponential_backoff: bool,

    /// Output format: table, json, minimal
    #[arg(long, global = true, default_value = "table")]
    pub format: String,

    /// Disable colored output (useful for piping to files)
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Stream match and trade events for a user
    Listen {
        #[arg(long)]
        user_id: String,

        /// Narrow the stream to one transaction
        #[arg(long)]
        transaction_id: Option<String>,
    },

    /// Submit a payment for a trade
    Pay {
        #[arg(long)]
        trade_id: i64,

        #[arg(long)]
        money: i64,

        #[arg(long, default_value = "0")]
        point: i64,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Confirm a trade
    Confirm {
        #[arg(long)]
        trade_id: i64,

        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct AuthArgs {
    /// Bearer token for the command channel
    #[arg(long, env = "TRADEWIRE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Persisted auth state file to read the access token from
    #[arg(long, conflicts_with = "token")]
    pub auth_file: Option<PathBuf>,
}
