use crate::types::{ConnectionState, Event, EventKind};
use chrono::{DateTime, Local};

// ANSI color codes
pub struct Colors;

impl Colors {
    pub const RESET: &'static str = "\x1b[0m";
    pub const BOLD: &'static str = "\x1b[1m";
    pub const DIM: &'static str = "\x1b[2m";

    pub const RED: &'static str = "\x1b[31m";
    pub const GRAY: &'static str = "\x1b[90m";

    pub const BRIGHT_RED: &'static str = "\x1b[91m";
    pub const BRIGHT_GREEN: &'static str = "\x1b[92m";
    pub const BRIGHT_YELLOW: &'static str = "\x1b[93m";
    pub const BRIGHT_BLUE: &'static str = "\x1b[94m";
    pub const BRIGHT_MAGENTA: &'static str = "\x1b[95m";
    pub const BRIGHT_CYAN: &'static str = "\x1b[96m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Minimal,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "minimal" => OutputFormat::Minimal,
            _ => OutputFormat::Table,
        }
    }
}

pub struct EventFormatter {
    format: OutputFormat,
    colored: bool,
    event_count: u64,
}

impl EventFormatter {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self {
            format,
            colored,
            event_count: 0,
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn header(&self) -> Option<String> {
        match self.format {
            OutputFormat::Table => Some(self.paint(
                &format!(
                    "{:<7} {:<22} {:<10} {:<8} PAYLOAD",
                    "COUNT", "EVENT", "TRADE", "TIME"
                ),
                Colors::BOLD,
            )),
            OutputFormat::Json | OutputFormat::Minimal => None,
        }
    }

    pub fn format_event(&mut self, event: &Event, received_at: DateTime<Local>) -> String {
        self.event_count += 1;

        match self.format {
            OutputFormat::Table => {
                let trade = event
                    .trade_id()
                    .map(|id| id.to_string().trim_matches('"').to_string())
                    .unwrap_or_else(|| "-".to_string());
                let payload = serde_json::to_string(&event.payload).unwrap_or_default();
                format!(
                    "{:<7} {} {:<10} {:<8} {}",
                    self.event_count,
                    self.paint(&format!("{:<22}", event.kind.as_str()), kind_color(event.kind)),
                    trade,
                    received_at.format("%H:%M:%S"),
                    self.paint(&payload, Colors::DIM)
                )
            }
            OutputFormat::Json => serde_json::json!({
                "count": self.event_count,
                "type": event.kind,
                "data": event.payload,
                "received_at": received_at.to_rfc3339(),
            })
            .to_string(),
            OutputFormat::Minimal => format!(
                "{} {}",
                event.kind,
                serde_json::to_string(&event.payload).unwrap_or_default()
            ),
        }
    }

    pub fn format_state(&self, state: ConnectionState) -> String {
        let color = match state {
            ConnectionState::Open => Colors::BRIGHT_GREEN,
            ConnectionState::Connecting | ConnectionState::Reconnecting => Colors::BRIGHT_YELLOW,
            ConnectionState::Closed => Colors::BRIGHT_RED,
            ConnectionState::Idle => Colors::GRAY,
        };
        self.paint(&format!("[{}]", state.as_str().to_uppercase()), color)
    }

    pub fn print_event(&mut self, event: &Event) {
        let line = self.format_event(event, Local::now());
        println!("{}", line);
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.colored {
            format!("{}{}{}", color, text, Colors::RESET)
        } else {
            text.to_string()
        }
    }
}

fn kind_color(kind: EventKind) -> &'static str {
    match kind {
        EventKind::MatchFound | EventKind::TransactionCompleted => Colors::BRIGHT_GREEN,
        EventKind::PaymentCompleted => Colors::BRIGHT_CYAN,
        EventKind::TradingUpdate | EventKind::TransferStatus => Colors::BRIGHT_BLUE,
        EventKind::MatchCancelled => Colors::BRIGHT_MAGENTA,
        EventKind::ConnectionFailed => Colors::RED,
    }
}
