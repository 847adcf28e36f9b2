/// file: src/types.rs
/// description: event, command and lifecycle types shared by both channels
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Kind-dependent event body, forwarded verbatim to listeners.
pub type Payload = Map<String, Value>;

pub const PAYMENT_DESTINATION: &str = "/app/trade/payment";
pub const TRADE_CONFIRM_DESTINATION: &str = "/app/trade/confirm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MatchFound,
    MatchCancelled,
    TradingUpdate,
    PaymentCompleted,
    TransferStatus,
    TransactionCompleted,
    ConnectionFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::MatchFound,
        EventKind::MatchCancelled,
        EventKind::TradingUpdate,
        EventKind::PaymentCompleted,
        EventKind::TransferStatus,
        EventKind::TransactionCompleted,
        EventKind::ConnectionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MatchFound => "match_found",
            EventKind::MatchCancelled => "match_cancelled",
            EventKind::TradingUpdate => "trading_update",
            EventKind::PaymentCompleted => "payment_completed",
            EventKind::TransferStatus => "transfer_status",
            EventKind::TransactionCompleted => "transaction_completed",
            EventKind::ConnectionFailed => "connection_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded push event. Wire shape: `{ "type": <kind>, "data": { .. } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "data", default, deserialize_with = "null_as_empty")]
    pub payload: Payload,
}

// `"data": null` means no payload, same as an absent field.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

impl Event {
    pub fn new(kind: EventKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Event synthesized locally once the reconnect budget is spent.
    pub fn connection_failed(attempts: u32) -> Self {
        let mut payload = Payload::new();
        payload.insert(
            "message".to_string(),
            Value::String(
                "Lost connection to the trade event stream. Please reconnect to keep receiving updates."
                    .to_string(),
            ),
        );
        payload.insert("attempts".to_string(), Value::from(attempts));
        Self::new(EventKind::ConnectionFailed, payload)
    }

    /// Transaction correlation id, when the server included one.
    pub fn trade_id(&self) -> Option<&Value> {
        self.payload
            .get("tradeId")
            .or_else(|| self.payload.get("transactionId"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an event stream is opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub user_id: String,
    pub transaction_id: Option<String>,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<String>, transaction_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            transaction_id,
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(user_id, None)
    }
}

/// Outbound message published over the action channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub destination: String,
    pub body: Value,
}

impl Command {
    pub fn new(destination: impl Into<String>, body: Value) -> Self {
        Self {
            destination: destination.into(),
            body,
        }
    }

    pub fn payment(trade_id: i64, money: i64, point: i64) -> Self {
        Self::new(
            PAYMENT_DESTINATION,
            json!({ "tradeId": trade_id, "money": money, "point": point }),
        )
    }

    pub fn trade_confirm(trade_id: i64) -> Self {
        Self::new(TRADE_CONFIRM_DESTINATION, json!({ "tradeId": trade_id }))
    }
}
