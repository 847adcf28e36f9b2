// file: src/event_channel.rs
// description: auto-reconnecting push event stream with a per-kind listener registry

use crate::{
    client_state::{ChannelStats, Driver, await_retired, CLOSE_GRACE},
    config::EventChannelConfig,
    error::{Result, TradeWireError},
    listeners::{Listener, ListenerId, ListenerRegistry, invoke_isolated},
    monitoring::{
        self, CONNECTIONS_OPENED_COUNTER, EVENTS_DROPPED_COUNTER, EVENTS_RECEIVED_COUNTER,
        LISTENER_PANICS_COUNTER, RECONNECT_COUNTER,
    },
    reconnect::{ReconnectDecision, ReconnectPolicy, saturating_millis},
    transport::{Connector, Transport, open_with_timeout},
    types::{ConnectionState, Event, EventKind, Payload, SessionIdentity},
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::{runtime::Handle, sync::watch, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Server-push event stream for one user (and optionally one transaction).
///
/// Listeners survive reconnects and are only dropped by [`EventChannel::disconnect`]
/// or when the channel itself is dropped. Every `connect` bumps the channel
/// generation; work belonging to an older generation is discarded, so a pending
/// reconnect can never revive a channel that has since been disconnected.
pub struct EventChannel {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: EventChannelConfig,
}

struct Shared {
    core: Mutex<Core>,
    state: watch::Sender<ConnectionState>,
    stats: ChannelStats,
}

#[derive(Default)]
struct Core {
    generation: u64,
    attempts: u32,
    identity: Option<SessionIdentity>,
    registry: ListenerRegistry,
    driver: Option<Driver>,
    retired: Option<JoinHandle<()>>,
}

impl EventChannel {
    pub fn new(config: EventChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::default()),
                state,
                stats: ChannelStats::new(),
            }),
            connector,
            config,
        }
    }

    /// Open the stream for `identity`, tearing down any live transport first.
    /// Returns once the connection task is scheduled; progress is observable
    /// through [`EventChannel::watch_state`] and the registered listeners.
    pub fn connect(&self, identity: SessionIdentity) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| TradeWireError::NoRuntime)?;
        let endpoint = self.config.endpoint_for(&identity)?;

        let mut core = self.shared.core.lock();
        core.generation += 1;
        core.attempts = 0;
        core.identity = Some(identity.clone());
        self.shared.stats.set_reconnect_attempts(0);

        let previous = match core.driver.take() {
            Some(driver) => Some(driver.cancel()),
            None => core.retired.take(),
        };

        self.shared.state.send_replace(ConnectionState::Connecting);
        info!(
            user_id = %identity.user_id,
            transaction_id = ?identity.transaction_id,
            "Connecting event channel to {}",
            endpoint
        );

        let token = CancellationToken::new();
        let task = EventDriver {
            shared: self.shared.clone(),
            connector: self.connector.clone(),
            endpoint,
            policy: self.config.reconnect,
            timeout: self.config.timeout,
            token: token.clone(),
            generation: core.generation,
            identity,
        };
        let handle = runtime.spawn(task.run(previous));
        core.driver = Some(Driver::new(token, handle));
        Ok(())
    }

    /// Tear down the transport, cancel any pending reconnect and drop every
    /// listener. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut core = self.shared.core.lock();
        core.generation += 1;
        core.attempts = 0;
        core.identity = None;
        core.registry.clear();
        if let Some(driver) = core.driver.take() {
            core.retired = Some(driver.cancel());
        }
        self.shared.stats.set_reconnect_attempts(0);
        self.shared.stats.record_transport_gone();

        let previous = self.shared.state.send_replace(ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            info!("Event channel disconnected");
        }
    }

    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.add_listener(kind, Arc::new(listener))
    }

    pub fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = self.shared.core.lock().registry.add(kind, listener);
        debug!(kind = %kind, ?id, "Listener registered");
        id
    }

    /// No-op when `id` is not registered for `kind`.
    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.shared.core.lock().registry.remove(kind, id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.core.lock().registry.count(kind)
    }

    pub fn total_listeners(&self) -> usize {
        self.shared.core.lock().registry.len()
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.shared.core.lock().identity.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.core.lock().attempts
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> monitoring::ChannelHealth {
        self.shared.stats.snapshot(self.state())
    }

    /// Wait until the transport released by the last `disconnect` is gone.
    pub async fn wait_closed(&self) {
        let retired = self.shared.core.lock().retired.take();
        await_retired(retired).await;
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().generation == generation
    }

    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        let core = self.core.lock();
        if core.generation != generation {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    fn on_open(&self, generation: u64) -> Option<String> {
        let mut core = self.core.lock();
        if core.generation != generation {
            return None;
        }
        core.attempts = 0;
        let connection_id = self.stats.record_open();
        self.state.send_replace(ConnectionState::Open);
        CONNECTIONS_OPENED_COUNTER.increment(1);
        Some(connection_id)
    }

    /// Consult the policy after a failure. `None` if this generation is stale.
    fn next_retry(&self, generation: u64, policy: &ReconnectPolicy) -> Option<ReconnectDecision> {
        let mut core = self.core.lock();
        if core.generation != generation {
            return None;
        }
        self.stats.record_transport_gone();

        let decision = policy.decide(core.attempts);
        match decision {
            ReconnectDecision::Retry { attempt, .. } => {
                core.attempts = attempt;
                self.stats.set_reconnect_attempts(attempt);
                self.state.send_replace(ConnectionState::Reconnecting);
            }
            ReconnectDecision::GiveUp => {
                self.state.send_replace(ConnectionState::Closed);
            }
        }
        Some(decision)
    }

    fn on_message(&self, generation: u64, raw: &str) {
        self.stats.record_message();
        EVENTS_RECEIVED_COUNTER.increment(1);

        match Event::from_json(raw) {
            Ok(event) => {
                debug!(kind = %event.kind, "Dispatching event");
                self.dispatch(generation, &event);
            }
            Err(e) => {
                self.stats.record_malformed();
                EVENTS_DROPPED_COUNTER.increment(1);
                warn!(
                    "Dropping malformed event: {}. Message: {}",
                    e,
                    raw.chars().take(100).collect::<String>()
                );
            }
        }
    }

    fn dispatch(&self, generation: u64, event: &Event) {
        let listeners = {
            let core = self.core.lock();
            if core.generation != generation {
                return;
            }
            core.registry.snapshot(event.kind)
        };

        for (id, listener) in listeners {
            // Skip listeners removed (or torn down) by an earlier listener.
            let live = {
                let core = self.core.lock();
                core.generation == generation && core.registry.contains(event.kind, id)
            };
            if !live {
                continue;
            }
            if !invoke_isolated(&listener, &event.payload) {
                self.stats.record_listener_panic();
                LISTENER_PANICS_COUNTER.increment(1);
                error!(kind = %event.kind, ?id, "Listener panicked while handling event");
            }
        }
    }
}

enum PumpOutcome {
    Cancelled,
    Lost(String),
}

struct EventDriver {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    endpoint: Url,
    policy: ReconnectPolicy,
    timeout: Duration,
    token: CancellationToken,
    generation: u64,
    identity: SessionIdentity,
}

impl EventDriver {
    async fn run(self, previous: Option<JoinHandle<()>>) {
        // At most one live transport per channel: the old one goes first.
        await_retired(previous).await;

        loop {
            if self.token.is_cancelled() || !self.shared.is_current(self.generation) {
                return;
            }

            let opened = tokio::select! {
                _ = self.token.cancelled() => return,
                result = open_with_timeout(self.connector.as_ref(), &self.endpoint, self.timeout) => result,
            };

            match opened {
                Ok(mut transport) => {
                    let Some(connection_id) = self.shared.on_open(self.generation) else {
                        transport.close().await;
                        return;
                    };
                    info!(
                        user_id = %self.identity.user_id,
                        connection_id = %connection_id,
                        "Event channel open"
                    );

                    match self.pump(transport).await {
                        PumpOutcome::Cancelled => return,
                        PumpOutcome::Lost(reason) => {
                            warn!(user_id = %self.identity.user_id, "Event stream lost: {}", reason);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        user_id = %self.identity.user_id,
                        transient = e.is_transient(),
                        "Failed to open event stream: {}",
                        e
                    );
                }
            }

            match self.shared.next_retry(self.generation, &self.policy) {
                None => return,
                Some(ReconnectDecision::Retry { attempt, delay }) => {
                    RECONNECT_COUNTER.increment(1);
                    warn!(
                        user_id = %self.identity.user_id,
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = saturating_millis(delay),
                        "Reconnecting event channel"
                    );

                    tokio::select! {
                        _ = self.token.cancelled() => return,
                        _ = sleep(delay) => {}
                    }

                    if !self.shared.transition(self.generation, ConnectionState::Connecting) {
                        return;
                    }
                }
                Some(ReconnectDecision::GiveUp) => {
                    let attempts = self.policy.max_attempts();
                    error!(
                        user_id = %self.identity.user_id,
                        "{}",
                        TradeWireError::MaxReconnectsExceeded { attempts }
                    );
                    self.shared
                        .dispatch(self.generation, &Event::connection_failed(attempts));
                    return;
                }
            }
        }
    }

    async fn pump(&self, mut transport: Box<dyn Transport>) -> PumpOutcome {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
                    return PumpOutcome::Cancelled;
                }
                frame = transport.next_text() => match frame {
                    Some(Ok(text)) => self.shared.on_message(self.generation, &text),
                    Some(Err(e)) => return PumpOutcome::Lost(e.to_string()),
                    None => return PumpOutcome::Lost("stream closed by server".to_string()),
                },
            }
        }
    }
}
