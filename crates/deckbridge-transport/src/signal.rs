//! Transport lifecycle signals.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Lifecycle signal raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The socket opened.
    Connected,
    /// The socket closed, failed to open, or errored.
    Disconnected,
    /// One raw inbound frame, not yet decoded.
    MessageReceived(String),
}

/// A signal tagged with the generation of the transport that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Generation of the transport binding.
    pub generation: u64,
    /// The signal.
    pub signal: TransportSignal,
}

/// Listener registration handed to a transport.
///
/// Clones share one registration: [`SignalSink::detach`] on any clone
/// silences every clone, including those held by in-flight socket tasks.
#[derive(Debug, Clone)]
pub struct SignalSink {
    generation: u64,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
}

impl SignalSink {
    /// Create a sink delivering into `tx`, tagged with `generation`.
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            generation,
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Generation this sink tags events with.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a signal. Returns false if the sink is detached or the
    /// receiver is gone.
    pub fn emit(&self, signal: TransportSignal) -> bool {
        let Ok(guard) = self.tx.lock() else {
            return false;
        };
        let Some(tx) = guard.as_ref() else {
            tracing::trace!(generation = self.generation, ?signal, "signal after detach dropped");
            return false;
        };
        tx.send(TransportEvent {
            generation: self.generation,
            signal,
        })
        .is_ok()
    }

    /// Remove the listener. Later signals are dropped.
    pub fn detach(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }

    /// Whether a listener is still registered.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tx.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}
