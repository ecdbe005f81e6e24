//! Transport traits.

use deckbridge_core::{Endpoint, SessionId};

use crate::{Envelope, SignalSink};

/// A single-connection socket wrapper.
///
/// A transport owns at most one live connection. It never retries and never
/// buffers for later: lifecycle changes are reported through the
/// [`SignalSink`] it was bound with, and whoever owns it decides what to do.
/// None of the methods block.
pub trait Transport: Send + 'static {
    /// Endpoint this transport is bound to.
    fn endpoint(&self) -> &Endpoint;

    /// Start opening a connection, replacing any existing one.
    ///
    /// Failures are not returned; they surface as a `Disconnected` signal.
    fn connect(&mut self);

    /// Detach the listeners, then close the connection.
    ///
    /// No signal is delivered after this returns.
    fn disconnect(&mut self);

    /// Hand an envelope to the open connection. Dropped if none is open.
    fn send(&mut self, envelope: &Envelope);
}

/// Creates transports bound to an endpoint.
///
/// The session manager builds a fresh transport whenever the endpoint
/// changes instead of retargeting a live one.
pub trait Connector: Send + 'static {
    /// Transport type produced.
    type Transport: Transport;

    /// Bind a new transport to `endpoint`, reporting through `signals`.
    fn bind(&self, endpoint: Endpoint, session_id: &SessionId, signals: SignalSink) -> Self::Transport;
}
