// file: src/stomp.rs
// description: minimal STOMP 1.2 frame codec for the command channel
// reference: https://stomp.github.io/stomp-specification-1.2.html

use crate::error::{Result, TradeWireError};
use std::fmt;

pub const ACCEPT_VERSION: &str = "1.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Connected,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
            StompCommand::Disconnect => "DISCONNECT",
        }
    }

    fn parse(line: &str) -> Result<Self> {
        Ok(match line {
            "CONNECT" | "STOMP" => StompCommand::Connect,
            "CONNECTED" => StompCommand::Connected,
            "SEND" => StompCommand::Send,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            "DISCONNECT" => StompCommand::Disconnect,
            other => {
                return Err(TradeWireError::InvalidMessage(format!(
                    "unknown STOMP command '{other}'"
                )));
            }
        })
    }

    // CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, token: &str) -> Self {
        Frame::new(StompCommand::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {token}"))
    }

    pub fn send(destination: &str, json_body: String) -> Self {
        Frame::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", json_body.len().to_string())
            .with_body(json_body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(StompCommand::Disconnect).header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame. `Ok(None)` for a bare heart-beat.
    pub fn decode(raw: &str) -> Result<Option<Self>> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(raw)
            .ok_or_else(|| TradeWireError::InvalidMessage("STOMP frame has no header end".into()))?;

        let mut lines = head.lines();
        let command = StompCommand::parse(lines.next().unwrap_or_default().trim_end())?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TradeWireError::InvalidMessage(format!("malformed STOMP header '{line}'"))
            })?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        let declared = frame
            .get("content-length")
            .and_then(|len| len.trim().parse::<usize>().ok());
        frame.body = match declared {
            Some(len) if len <= rest.len() && rest.is_char_boundary(len) => rest[..len].to_string(),
            Some(_) => {
                return Err(TradeWireError::InvalidMessage(
                    "STOMP content-length exceeds frame".into(),
                ));
            }
            None => rest.split('\0').next().unwrap_or_default().to_string(),
        };

        Ok(Some(frame))
    }
}

/// Split at the first empty line, which ends the headers. EOLs may be
/// `\n` or `\r\n`; the body is returned untouched.
fn split_head(raw: &str) -> Option<(&str, &str)> {
    let mut start = 0;
    while let Some(offset) = raw[start..].find('\n') {
        let end = start + offset;
        let line = &raw[start..end];
        if line.is_empty() || line == "\r" {
            return Some((&raw[..start], &raw[end + 1..]));
        }
        start = end + 1;
    }
    None
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(TradeWireError::InvalidMessage(format!(
                    "undefined STOMP escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
