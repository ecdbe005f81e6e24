//! Session manager: connection state machine and message routing.

use std::{pin::Pin, sync::Arc};

use deckbridge_core::{
    Activity, Connectivity, ConnectivityStatus, DeckConfig, DispatchContext, Endpoint, SessionId,
    StatusSink,
};
use deckbridge_transport::{
    Connector, Envelope, Message, ProtocolError, SignalSink, Transport, TransportEvent,
    TransportSignal, protocol::ChangeActiveSessionMessage,
};
use tokio::{
    sync::mpsc,
    time::{self, Sleep},
};

use crate::{
    dispatch::{Dispatcher, Subscriber, SubscriptionId},
    policy::{self, Immediate, ReconnectPolicy},
};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Session manager stopped")]
    Stopped,
}

/// Owns the connection to the deck companion and routes its messages.
///
/// The manager holds exactly one transport, bound to the current endpoint.
/// It starts in `Connecting`, moves to `Connected` when the transport opens,
/// and goes back to `Connecting` and retries (per its [`ReconnectPolicy`])
/// every time the transport drops. Only [`SessionManager::deactivate`] stops
/// the loop.
///
/// All methods are synchronous and never block. Transport signals arrive on
/// an internal channel and are applied by [`SessionManager::poll_once`], or
/// by the task started with [`SessionManager::spawn`].
pub struct SessionManager<C: Connector> {
    connector: C,
    session_id: SessionId,
    endpoint: Endpoint,
    transport: C::Transport,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    dispatcher: Dispatcher,
    status: ConnectivityStatus,
    status_sink: Arc<dyn StatusSink>,
    policy: Box<dyn ReconnectPolicy>,
    failures: u32,
    retry: Option<Pin<Box<Sleep>>>,
    deactivated: bool,
}

impl<C: Connector> SessionManager<C> {
    /// Create a manager bound to `endpoint`. Nothing connects until
    /// [`SessionManager::activate`].
    pub fn new(
        connector: C,
        endpoint: Endpoint,
        session_id: SessionId,
        status_sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let signals = SignalSink::new(0, events_tx.clone());
        let transport = connector.bind(endpoint.clone(), &session_id, signals);

        let status = ConnectivityStatus::default();
        status_sink.update(status);

        Self {
            connector,
            session_id,
            endpoint,
            transport,
            generation: 0,
            events_tx,
            events_rx,
            dispatcher: Dispatcher::new(),
            status,
            status_sink,
            policy: Box::new(Immediate),
            failures: 0,
            retry: None,
            deactivated: false,
        }
    }

    /// Create a manager from a loaded configuration.
    pub fn from_config(
        connector: C,
        config: &DeckConfig,
        session_id: SessionId,
        status_sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self::new(connector, config.endpoint(), session_id, status_sink)
            .with_boxed_policy(policy::from_config(&config.reconnect))
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn with_policy(self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.with_boxed_policy(Box::new(policy))
    }

    fn with_boxed_policy(mut self, policy: Box<dyn ReconnectPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectivityStatus {
        self.status
    }

    /// Endpoint of the current transport.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Local session identity.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The current transport.
    #[must_use]
    pub const fn transport(&self) -> &C::Transport {
        &self.transport
    }

    /// Subscription registry.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Whether a delayed reconnect is pending.
    #[must_use]
    pub const fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// Whether [`SessionManager::deactivate`] has run.
    #[must_use]
    pub const fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    /// Make the first connection attempt.
    pub fn activate(&mut self) {
        self.connect();
    }

    /// Connect again now, whatever the current state.
    ///
    /// Resets the reconnect policy's attempt count.
    pub fn reconnect(&mut self) {
        tracing::info!(endpoint = %self.endpoint, "reconnecting to deck");
        self.failures = 0;
        self.connect();
    }

    /// Apply a new endpoint.
    ///
    /// Equal endpoints are ignored. Otherwise the current transport is
    /// disconnected and dropped, and a fresh one bound to `endpoint` connects.
    pub fn configuration_changed(&mut self, endpoint: Endpoint) {
        if endpoint == self.endpoint {
            tracing::debug!(%endpoint, "endpoint unchanged, keeping connection");
            return;
        }
        if self.deactivated {
            tracing::debug!(%endpoint, "configuration change after deactivate ignored");
            return;
        }

        tracing::info!(from = %self.endpoint, to = %endpoint, "configuration changed, restarting");

        self.transport.disconnect();
        self.generation += 1;
        let signals = SignalSink::new(self.generation, self.events_tx.clone());
        self.transport = self.connector.bind(endpoint.clone(), &self.session_id, signals);
        self.endpoint = endpoint;
        self.failures = 0;

        self.connect();
    }

    /// Send a typed message. Dropped if the connection is not open.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded.
    pub fn send<M: Message>(&mut self, message: &M) -> Result<(), SessionError> {
        let envelope = Envelope::wrap(message)?;
        self.send_envelope(&envelope);
        Ok(())
    }

    /// Send an already wrapped envelope.
    pub fn send_envelope(&mut self, envelope: &Envelope) {
        if self.deactivated {
            tracing::trace!(id = %envelope.id, "deactivated, frame dropped");
            return;
        }
        tracing::debug!(id = %envelope.id, "sending message");
        self.transport.send(envelope);
    }

    /// Tell the deck to drive `session_id`.
    ///
    /// # Errors
    /// Returns error if the notification cannot be encoded.
    pub fn change_active_session(&mut self, session_id: &SessionId) -> Result<(), SessionError> {
        tracing::info!(%session_id, "requesting active session");
        self.send(&ChangeActiveSessionMessage {
            session_id: session_id.to_string(),
        })
    }

    /// Mark this session as the one the deck drives.
    pub fn set_session_as_active(&mut self) {
        self.status.activity = Activity::Active;
        self.publish_status();
    }

    /// Mark this session as not driven by the deck.
    pub fn set_session_as_inactive(&mut self) {
        self.status.activity = Activity::Inactive;
        self.publish_status();
    }

    /// Register `handler` for inbound messages of type `M`.
    pub fn subscribe<M, F>(&mut self, handler: F) -> SubscriptionId
    where
        M: Message,
        F: Fn(&DispatchContext, &M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe::<M, F>(handler)
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub(crate) fn add_subscriber(&mut self, subscriber: Subscriber) {
        self.dispatcher.insert(subscriber);
    }

    pub(crate) fn subscription_sequence(&self) -> Arc<std::sync::atomic::AtomicU64> {
        self.dispatcher.sequence()
    }

    /// Drop every subscription and close the connection for good.
    pub fn deactivate(&mut self) {
        if self.deactivated {
            return;
        }
        tracing::info!(endpoint = %self.endpoint, "deactivating deck session");
        self.deactivated = true;
        self.retry = None;
        self.dispatcher.clear();
        self.transport.disconnect();
    }

    /// Apply one transport event.
    ///
    /// Events from a transport that has since been replaced are ignored.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.deactivated {
            return;
        }
        if event.generation != self.generation {
            tracing::trace!(
                generation = event.generation,
                current = self.generation,
                "stale transport event ignored"
            );
            return;
        }

        match event.signal {
            TransportSignal::Connected => self.on_connected(),
            TransportSignal::Disconnected => self.on_disconnected(),
            TransportSignal::MessageReceived(raw) => self.on_message_received(&raw),
        }
    }

    /// Wait for the next transport event or pending retry, and apply it.
    ///
    /// Cancel-safe.
    pub async fn poll_once(&mut self) {
        tokio::select! {
            Some(event) = self.events_rx.recv() => self.handle_event(event),
            () = retry_elapsed(&mut self.retry) => {
                self.retry = None;
                self.connect();
            }
        }
    }

    fn connect(&mut self) {
        if self.deactivated {
            tracing::debug!("deactivated, not connecting");
            return;
        }
        tracing::info!(endpoint = %self.endpoint, "connecting to deck");
        self.retry = None;
        self.status.connectivity = Connectivity::Connecting;
        self.publish_status();
        self.transport.connect();
    }

    fn on_connected(&mut self) {
        tracing::info!(endpoint = %self.endpoint, "connected to deck");
        self.failures = 0;
        self.status.connectivity = Connectivity::Connected;
        self.publish_status();
    }

    fn on_disconnected(&mut self) {
        tracing::info!(endpoint = %self.endpoint, "disconnected from deck");
        self.status.connectivity = Connectivity::Connecting;
        self.publish_status();

        self.failures = self.failures.saturating_add(1);
        match self.policy.next_delay(self.failures) {
            Some(delay) if delay.is_zero() => self.connect(),
            Some(delay) => {
                tracing::info!(?delay, attempt = self.failures, "reconnect scheduled");
                self.retry = Some(Box::pin(time::sleep(delay)));
            }
            None => tracing::warn!(
                attempts = self.failures,
                "giving up on reconnecting, waiting for a manual reconnect"
            ),
        }
    }

    fn on_message_received(&mut self, raw: &str) {
        let envelope = match Envelope::from_wire(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "dropping malformed frame");
                return;
            }
        };

        tracing::debug!(id = %envelope.id, "message received");
        let context = DispatchContext::new(self.endpoint.clone(), self.session_id.clone());
        self.dispatcher.dispatch(&envelope, &context);
    }

    fn publish_status(&self) {
        self.status_sink.update(self.status);
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
