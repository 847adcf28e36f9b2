// file: src/action_channel.rs
// description: authenticated STOMP command channel for trade actions

use crate::{
    client_state::{ChannelStats, Driver, await_retired, CLOSE_GRACE},
    config::ActionChannelConfig,
    credentials::CredentialSource,
    error::{Result, TradeWireError},
    monitoring::{
        self, COMMANDS_REJECTED_COUNTER, COMMANDS_SENT_COUNTER, CONNECTIONS_OPENED_COUNTER,
    },
    stomp::{Frame, StompCommand},
    transport::{Connector, Transport, open_with_timeout},
    types::{Command, ConnectionState},
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Persistent command channel. Commands are published fire-and-forget; any
/// server acknowledgment arrives later as an event on the event channel.
///
/// Unlike [`crate::EventChannel`] this channel never reconnects by itself: a
/// blind reconnect could resubmit a stateful command such as a payment, so
/// every failure leaves the channel `Closed` until the owner calls
/// [`ActionChannel::connect`] again.
pub struct ActionChannel {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    config: ActionChannelConfig,
}

struct Shared {
    core: Mutex<Core>,
    state: watch::Sender<ConnectionState>,
    stats: ChannelStats,
}

#[derive(Default)]
struct Core {
    generation: u64,
    outbox: Option<mpsc::UnboundedSender<Outbound>>,
    driver: Option<Driver>,
    retired: Option<JoinHandle<()>>,
    last_error: Option<Failure>,
}

/// Why the last session attempt ended.
#[derive(Debug, Clone)]
enum Failure {
    MissingCredential,
    NoRuntime,
    Session(String),
}

impl Failure {
    fn from_error(err: &TradeWireError) -> Self {
        match err {
            TradeWireError::MissingCredential => Failure::MissingCredential,
            TradeWireError::NoRuntime => Failure::NoRuntime,
            TradeWireError::Protocol { message } => Failure::Session(message.clone()),
            other => Failure::Session(other.to_string()),
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::MissingCredential => TradeWireError::MissingCredential.to_string(),
            Failure::NoRuntime => TradeWireError::NoRuntime.to_string(),
            Failure::Session(message) => message.clone(),
        }
    }

    fn into_error(self) -> TradeWireError {
        match self {
            Failure::MissingCredential => TradeWireError::MissingCredential,
            Failure::NoRuntime => TradeWireError::NoRuntime,
            Failure::Session(message) => TradeWireError::Protocol { message },
        }
    }
}

struct Outbound {
    destination: String,
    frame: String,
}

impl ActionChannel {
    pub fn new(
        config: ActionChannelConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::default()),
                state,
                stats: ChannelStats::new(),
            }),
            connector,
            credentials,
            config,
        }
    }

    /// Resolve a credential and start the session. A missing credential fails
    /// immediately, leaves the channel `Closed` and is never retried.
    pub fn connect(&self) -> Result<()> {
        let Ok(runtime) = Handle::try_current() else {
            return Err(self.abandon(TradeWireError::NoRuntime));
        };
        let Some(bearer) = self.credentials.bearer_token() else {
            return Err(self.abandon(TradeWireError::MissingCredential));
        };

        let mut core = self.shared.core.lock();
        core.generation += 1;
        core.last_error = None;
        let previous = match core.driver.take() {
            Some(driver) => Some(driver.cancel()),
            None => core.retired.take(),
        };

        let (outbox, inbox) = mpsc::unbounded_channel();
        core.outbox = Some(outbox);
        self.shared.state.send_replace(ConnectionState::Connecting);
        info!("Connecting command channel to {}", self.config.url);

        let token = CancellationToken::new();
        let task = ActionDriver {
            shared: self.shared.clone(),
            connector: self.connector.clone(),
            endpoint: self.config.url.clone(),
            host: self.config.host.clone(),
            timeout: self.config.timeout,
            bearer,
            inbox,
            token: token.clone(),
            generation: core.generation,
        };
        let handle = runtime.spawn(task.run(previous));
        core.driver = Some(Driver::new(token, handle));
        Ok(())
    }

    /// Serialize `body` and publish it to `destination`. Fails with
    /// `NotConnected` unless the session is open; nothing is queued for later.
    pub fn send<T: Serialize + ?Sized>(&self, destination: &str, body: &T) -> Result<()> {
        let json = serde_json::to_string(body)?;

        let core = self.shared.core.lock();
        let state = *self.shared.state.borrow();
        let outbox = match (&core.outbox, state) {
            (Some(outbox), ConnectionState::Open) => outbox,
            _ => {
                COMMANDS_REJECTED_COUNTER.increment(1);
                warn!(destination, state = %state, "Rejecting command: channel not connected");
                return Err(TradeWireError::NotConnected { state });
            }
        };

        let frame = Frame::send(destination, json).encode();
        outbox
            .send(Outbound {
                destination: destination.to_string(),
                frame,
            })
            .map_err(|_| {
                COMMANDS_REJECTED_COUNTER.increment(1);
                TradeWireError::NotConnected {
                    state: ConnectionState::Closed,
                }
            })
    }

    pub fn send_command(&self, command: &Command) -> Result<()> {
        self.send(&command.destination, &command.body)
    }

    pub fn send_payment(&self, trade_id: i64, money: i64, point: i64) -> Result<()> {
        self.send_command(&Command::payment(trade_id, money, point))
    }

    pub fn send_trade_confirm(&self, trade_id: i64) -> Result<()> {
        self.send_command(&Command::trade_confirm(trade_id))
    }

    /// Close the session. Commands accepted before this call are still
    /// flushed before the DISCONNECT frame. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut core = self.shared.core.lock();
        core.generation += 1;
        core.outbox = None;
        if let Some(driver) = core.driver.take() {
            core.retired = Some(driver.cancel());
        }

        let previous = self.shared.state.send_replace(ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            info!("Command channel disconnected");
        }
    }

    /// Give up on a connect before any transport is opened. Any previous
    /// session is torn down so the channel ends up `Closed`.
    fn abandon(&self, err: TradeWireError) -> TradeWireError {
        error!("Cannot open command channel: {}", err);
        let mut core = self.shared.core.lock();
        core.generation += 1;
        core.outbox = None;
        if let Some(driver) = core.driver.take() {
            core.retired = Some(driver.cancel());
        }
        core.last_error = Some(Failure::from_error(&err));
        self.shared.state.send_replace(ConnectionState::Closed);
        err
    }

    /// Resolve once the session is open, or fail with the reason it closed.
    pub async fn wait_until_open(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        let reached = state
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
            .await
            .map(|s| *s)
            .map_err(|_| TradeWireError::ConnectionClosed)?;

        if reached.is_open() {
            return Ok(());
        }
        let failure = self.shared.core.lock().last_error.clone();
        match failure {
            Some(failure) => Err(failure.into_error()),
            None => Err(TradeWireError::NotConnected { state: reached }),
        }
    }

    pub async fn wait_closed(&self) {
        let retired = self.shared.core.lock().retired.take();
        await_retired(retired).await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Why the last session attempt ended, if it ended in failure.
    pub fn last_error(&self) -> Option<String> {
        self.shared.core.lock().last_error.as_ref().map(Failure::message)
    }

    pub fn stats(&self) -> monitoring::ChannelHealth {
        self.shared.stats.snapshot(self.state())
    }
}

impl Drop for ActionChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    fn on_open(&self, generation: u64) -> Option<String> {
        let core = self.core.lock();
        if core.generation != generation {
            return None;
        }
        let connection_id = self.stats.record_open();
        self.state.send_replace(ConnectionState::Open);
        CONNECTIONS_OPENED_COUNTER.increment(1);
        Some(connection_id)
    }

    fn fail(&self, generation: u64, err: &TradeWireError) {
        let mut core = self.core.lock();
        if core.generation != generation {
            return;
        }
        core.outbox = None;
        core.last_error = Some(Failure::from_error(err));
        self.stats.record_transport_gone();
        self.state.send_replace(ConnectionState::Closed);
    }
}

fn protocol_error(frame: &Frame) -> TradeWireError {
    let message = frame
        .get("message")
        .map(str::to_string)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| frame.body.trim().to_string());
    TradeWireError::Protocol { message }
}

struct ActionDriver {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    endpoint: Url,
    host: String,
    timeout: Duration,
    bearer: String,
    inbox: mpsc::UnboundedReceiver<Outbound>,
    token: CancellationToken,
    generation: u64,
}

impl ActionDriver {
    async fn run(mut self, previous: Option<JoinHandle<()>>) {
        await_retired(previous).await;
        if self.token.is_cancelled() {
            return;
        }

        let opened = tokio::select! {
            _ = self.token.cancelled() => return,
            result = open_with_timeout(self.connector.as_ref(), &self.endpoint, self.timeout) => result,
        };
        let mut transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to open command channel: {}", e);
                self.shared.fail(self.generation, &e);
                return;
            }
        };

        let handshake = tokio::select! {
            _ = self.token.cancelled() => return,
            result = self.handshake(transport.as_mut()) => result,
        };
        if let Err(e) = handshake {
            error!("Command channel handshake failed: {}", e);
            self.shared.fail(self.generation, &e);
            let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
            return;
        }

        let Some(connection_id) = self.shared.on_open(self.generation) else {
            let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
            return;
        };
        info!(connection_id = %connection_id, "Command channel open");

        self.pump(transport, &connection_id).await;
    }

    async fn handshake(&self, transport: &mut dyn Transport) -> Result<()> {
        transport
            .send_text(Frame::connect(&self.host, &self.bearer).encode())
            .await?;

        let await_connected = async {
            loop {
                let text = match transport.next_text().await {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => return Err(e),
                    None => return Err(TradeWireError::ConnectionClosed),
                };
                match Frame::decode(&text) {
                    Ok(Some(frame)) if frame.command == StompCommand::Connected => {
                        debug!(version = ?frame.get("version"), "STOMP session established");
                        return Ok(());
                    }
                    Ok(Some(frame)) if frame.command == StompCommand::Error => {
                        return Err(protocol_error(&frame));
                    }
                    Ok(Some(frame)) => debug!("Ignoring {} before CONNECTED", frame.command),
                    Ok(None) => trace!("Heart-beat"),
                    Err(e) => warn!("Skipping undecodable frame during handshake: {}", e),
                }
            }
        };

        match tokio::time::timeout(self.timeout, await_connected).await {
            Ok(result) => result,
            Err(_) => Err(TradeWireError::Timeout),
        }
    }

    async fn pump(&mut self, mut transport: Box<dyn Transport>, connection_id: &str) {
        loop {
            tokio::select! {
                biased;

                Some(outbound) = self.inbox.recv() => {
                    if let Err(e) = transport.send_text(outbound.frame).await {
                        error!(destination = %outbound.destination, "Failed to publish command: {}", e);
                        self.shared.fail(self.generation, &e);
                        return;
                    }
                    self.shared.stats.record_command();
                    COMMANDS_SENT_COUNTER.increment(1);
                    debug!(destination = %outbound.destination, "Command published");
                }
                _ = self.token.cancelled() => {
                    let receipt = format!("disconnect-{connection_id}");
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        if let Err(e) = transport.send_text(Frame::disconnect(&receipt).encode()).await {
                            debug!("DISCONNECT not delivered: {}", e);
                        }
                        transport.close().await;
                    })
                    .await;
                    return;
                }
                frame = transport.next_text() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = self.handle_frame(&text) {
                            error!("Command channel closed by broker: {}", e);
                            self.shared.fail(self.generation, &e);
                            let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Command channel transport error: {}", e);
                        self.shared.fail(self.generation, &e);
                        return;
                    }
                    None => {
                        warn!("Command channel closed by server");
                        self.shared.fail(self.generation, &TradeWireError::ConnectionClosed);
                        return;
                    }
                },
            }
        }
    }

    /// `Err` only for a broker ERROR frame, which ends the session.
    fn handle_frame(&self, text: &str) -> Result<()> {
        match Frame::decode(text) {
            Ok(None) => trace!("Heart-beat"),
            Ok(Some(frame)) => match frame.command {
                StompCommand::Error => return Err(protocol_error(&frame)),
                StompCommand::Receipt => {
                    debug!(receipt = ?frame.get("receipt-id"), "Receipt received")
                }
                StompCommand::Message => {
                    debug!(destination = ?frame.get("destination"), "Ignoring broker message")
                }
                other => debug!("Ignoring unexpected {} frame", other),
            },
            Err(e) => warn!("Skipping undecodable STOMP frame: {}", e),
        }
        Ok(())
    }
}
