//! Command handle for a session manager running as a task.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use deckbridge_core::{DispatchContext, Endpoint, SessionId};
use deckbridge_transport::{Connector, Envelope, Message, protocol::ChangeActiveSessionMessage};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    dispatch::{Subscriber, SubscriptionId},
    manager::{SessionError, SessionManager},
};

pub(crate) enum Command {
    Activate,
    Reconnect,
    ConfigurationChanged(Endpoint),
    Send(Envelope),
    SetActive(bool),
    Subscribe(Subscriber),
    Unsubscribe(SubscriptionId),
    Deactivate(oneshot::Sender<()>),
}

/// Cloneable handle to a spawned [`SessionManager`].
///
/// Every method queues a command and returns at once; commands are applied
/// in the order they were sent. The manager task stops after
/// [`SessionHandle::deactivate`], or once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    sequence: Arc<AtomicU64>,
    session_id: SessionId,
}

impl SessionHandle {
    /// Identity of the managed session.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether the manager task is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// See [`SessionManager::activate`].
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn activate(&self) -> Result<(), SessionError> {
        self.command(Command::Activate)
    }

    /// See [`SessionManager::reconnect`].
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.command(Command::Reconnect)
    }

    /// See [`SessionManager::configuration_changed`].
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn configuration_changed(&self, endpoint: Endpoint) -> Result<(), SessionError> {
        self.command(Command::ConfigurationChanged(endpoint))
    }

    /// Send a typed message. Dropped by the transport if not connected.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded or the manager task
    /// has ended.
    pub fn send<M: Message>(&self, message: &M) -> Result<(), SessionError> {
        let envelope = Envelope::wrap(message)?;
        self.command(Command::Send(envelope))
    }

    /// Tell the deck to drive `session_id`.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded or the manager task
    /// has ended.
    pub fn change_active_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.send(&ChangeActiveSessionMessage {
            session_id: session_id.to_string(),
        })
    }

    /// Ask the deck to drive this session.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded or the manager task
    /// has ended.
    pub fn claim_active_session(&self) -> Result<(), SessionError> {
        self.change_active_session(&self.session_id)
    }

    /// Claim the deck when the host window gains focus. Losing focus does
    /// nothing; another window claims it instead.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded or the manager task
    /// has ended.
    pub fn window_focus_changed(&self, focused: bool) -> Result<(), SessionError> {
        if focused {
            tracing::debug!(session_id = %self.session_id, "window focused, claiming deck");
            self.claim_active_session()
        } else {
            Ok(())
        }
    }

    /// See [`SessionManager::set_session_as_active`].
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn set_session_as_active(&self) -> Result<(), SessionError> {
        self.command(Command::SetActive(true))
    }

    /// See [`SessionManager::set_session_as_inactive`].
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn set_session_as_inactive(&self) -> Result<(), SessionError> {
        self.command(Command::SetActive(false))
    }

    /// Register `handler` for inbound messages of type `M`.
    ///
    /// The id is allocated here, so it is valid before the manager applies
    /// the subscription.
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn subscribe<M, F>(&self, handler: F) -> Result<SubscriptionId, SessionError>
    where
        M: Message,
        F: Fn(&DispatchContext, &M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber::typed::<M, F>(seq, handler);
        let id = subscriber.id();
        self.command(Command::Subscribe(subscriber))?;
        Ok(id)
    }

    /// Remove a subscription.
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task has ended.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SessionError> {
        self.command(Command::Unsubscribe(id))
    }

    /// Deactivate the manager and wait for the task to stop.
    ///
    /// # Errors
    /// Returns [`SessionError::Stopped`] if the manager task had already
    /// ended.
    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Deactivate(tx))?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Stopped)
    }
}

impl<C: Connector> SessionManager<C> {
    /// Run the manager as a task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: tx,
            sequence: self.subscription_sequence(),
            session_id: self.session_id().clone(),
        };
        let task = tokio::spawn(run(self, rx));
        (handle, task)
    }

    fn apply(&mut self, command: Command) -> Option<oneshot::Sender<()>> {
        match command {
            Command::Activate => self.activate(),
            Command::Reconnect => self.reconnect(),
            Command::ConfigurationChanged(endpoint) => self.configuration_changed(endpoint),
            Command::Send(envelope) => self.send_envelope(&envelope),
            Command::SetActive(true) => self.set_session_as_active(),
            Command::SetActive(false) => self.set_session_as_inactive(),
            Command::Subscribe(subscriber) => self.add_subscriber(subscriber),
            Command::Unsubscribe(id) => {
                if !self.unsubscribe(id) {
                    tracing::debug!(?id, "unsubscribe of unknown subscription");
                }
            }
            Command::Deactivate(ack) => {
                self.deactivate();
                return Some(ack);
            }
        }
        None
    }
}

async fn run<C: Connector>(mut manager: SessionManager<C>, mut commands: mpsc::UnboundedReceiver<Command>) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("all session handles dropped");
                    manager.deactivate();
                    break;
                };
                if let Some(ack) = manager.apply(command) {
                    let _ = ack.send(());
                    break;
                }
            }
            () = manager.poll_once() => {}
        }
    }
}
