//! Subscription registry and asynchronous dispatch.
//!
//! Decoded payloads are queued to a single worker task, so the receive path
//! never waits on subscribers. The worker runs the subscribers of one message
//! in subscription order and isolates them: an error or a panic in one is
//! logged and the rest still run.

use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use deckbridge_core::DispatchContext;
use deckbridge_transport::{Envelope, Message, MessageKind, Payload};
use tokio::sync::mpsc;

type Handler = Arc<dyn Fn(&DispatchContext, &Payload) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: MessageKind,
    seq: u64,
}

impl SubscriptionId {
    /// Message kind the subscription listens to.
    #[must_use]
    pub const fn kind(self) -> MessageKind {
        self.kind
    }
}

/// A registered callback.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

impl Subscriber {
    /// Wrap a typed callback for messages of type `M`.
    pub(crate) fn typed<M, F>(seq: u64, handler: F) -> Self
    where
        M: Message,
        F: Fn(&DispatchContext, &M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |context, payload| match M::from_payload(payload) {
            Some(message) => handler(context, message),
            None => Ok(()),
        });
        Self {
            id: SubscriptionId { kind: M::KIND, seq },
            handler,
        }
    }

    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish_non_exhaustive()
    }
}

struct Job {
    context: DispatchContext,
    payload: Payload,
    subscribers: Vec<Subscriber>,
}

/// Per-kind subscriber lists plus the dispatch worker.
///
/// The worker task is spawned on first dispatch, so dispatching requires a
/// tokio runtime; subscribing does not.
pub struct Dispatcher {
    subscribers: HashMap<MessageKind, Vec<Subscriber>>,
    sequence: Arc<AtomicU64>,
    queue: Option<mpsc::UnboundedSender<Job>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscribers)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            queue: None,
        }
    }

    /// Shared counter for subscription ids allocated outside the dispatcher.
    pub(crate) fn sequence(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sequence)
    }

    /// Register `handler` for messages of type `M`.
    pub fn subscribe<M, F>(&mut self, handler: F) -> SubscriptionId
    where
        M: Message,
        F: Fn(&DispatchContext, &M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber::typed::<M, F>(seq, handler);
        let id = subscriber.id();
        self.insert(subscriber);
        id
    }

    /// Register a prepared subscriber.
    pub(crate) fn insert(&mut self, subscriber: Subscriber) {
        self.subscribers
            .entry(subscriber.id.kind)
            .or_default()
            .push(subscriber);
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(list) = self.subscribers.get_mut(&id.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        before != list.len()
    }

    /// Number of subscribers for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: MessageKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    /// Total number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.values().map(Vec::len).sum()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every subscription.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Decode the payload of `envelope` and queue it for its subscribers.
    ///
    /// Unknown type ids and kinds without subscribers are ignored. A
    /// malformed payload is logged and dropped.
    pub fn dispatch(&mut self, envelope: &Envelope, context: &DispatchContext) {
        let Some(kind) = envelope.kind() else {
            tracing::debug!(id = %envelope.id, "unknown message type ignored");
            return;
        };

        let payload = match kind.decode(&envelope.data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(id = %envelope.id, error = %e, "dropping message with malformed payload");
                return;
            }
        };

        self.dispatch_payload(payload, context);
    }

    fn dispatch_payload(&mut self, payload: Payload, context: &DispatchContext) {
        let kind = payload.kind();
        let subscribers = match self.subscribers.get(&kind) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => {
                tracing::trace!(id = kind.id(), "no subscribers");
                return;
            }
        };

        let job = Job {
            context: context.clone(),
            payload,
            subscribers,
        };

        if self.queue.as_ref().is_some_and(mpsc::UnboundedSender::is_closed) {
            self.queue = None;
        }
        let queue = self.queue.get_or_insert_with(spawn_worker);
        if queue.send(job).is_err() {
            tracing::error!(id = kind.id(), "dispatch worker gone, message dropped");
        }
    }
}

fn spawn_worker() -> mpsc::UnboundedSender<Job> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_worker(rx));
    tx
}

async fn run_worker(mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let id = job.payload.kind().id();
        for subscriber in &job.subscribers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (subscriber.handler)(&job.context, &job.payload)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(id, error = %e, "subscriber failed"),
                Err(_) => tracing::error!(id, "subscriber panicked"),
            }
        }
    }
}
