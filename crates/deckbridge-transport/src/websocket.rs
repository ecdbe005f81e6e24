//! WebSocket transport to the deck companion.
//!
//! Each `connect` spawns one task that owns the socket: it performs the
//! handshake, forwards queued outbound frames, and reports inbound frames and
//! lifecycle changes through the bound [`SignalSink`]. Socket errors are
//! logged and turned into a `Disconnected` signal, never returned.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use deckbridge_core::{Endpoint, SessionId};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{HeaderName, HeaderValue},
};

use crate::{Connector, Envelope, SignalSink, Transport, TransportSignal};

/// Connection-time header carrying the host session id.
pub const SESSION_HEADER: &str = "X-VSSessionID";

/// Builds [`WsTransport`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn bind(&self, endpoint: Endpoint, session_id: &SessionId, signals: SignalSink) -> WsTransport {
        WsTransport::new(endpoint, session_id.clone(), signals)
    }
}

/// WebSocket transport bound to one endpoint.
///
/// Must be used from within a tokio runtime: `connect` spawns the socket task.
#[derive(Debug)]
pub struct WsTransport {
    endpoint: Endpoint,
    session_id: SessionId,
    signals: SignalSink,
    connection: Option<Connection>,
}

/// Handle to the task owning one socket.
#[derive(Debug)]
struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Connection {
    /// Silence the task and ask it to close the socket.
    fn close(mut self) {
        self.live.store(false, Ordering::Release);
        self.open.store(false, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Signal emitter for one connection; goes quiet once the connection is replaced.
#[derive(Debug, Clone)]
struct Emitter {
    signals: SignalSink,
    live: Arc<AtomicBool>,
}

impl Emitter {
    fn emit(&self, signal: TransportSignal) {
        if self.live.load(Ordering::Acquire) {
            self.signals.emit(signal);
        }
    }
}

impl WsTransport {
    /// Create a transport. Nothing is opened until [`Transport::connect`].
    #[must_use]
    pub const fn new(endpoint: Endpoint, session_id: SessionId, signals: SignalSink) -> Self {
        Self {
            endpoint,
            session_id,
            signals,
            connection: None,
        }
    }

    /// Whether the socket is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.open.load(Ordering::Acquire))
    }
}

impl Transport for WsTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connect(&mut self) {
        if let Some(previous) = self.connection.take() {
            tracing::debug!(endpoint = %self.endpoint, "replacing existing connection");
            previous.close();
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let open = Arc::new(AtomicBool::new(false));
        let live = Arc::new(AtomicBool::new(true));

        let emitter = Emitter {
            signals: self.signals.clone(),
            live: Arc::clone(&live),
        };

        tokio::spawn(run_connection(
            self.endpoint.url(),
            self.session_id.clone(),
            emitter,
            Arc::clone(&open),
            outbound_rx,
            shutdown_rx,
        ));

        self.connection = Some(Connection {
            outbound: outbound_tx,
            open,
            live,
            shutdown: Some(shutdown_tx),
        });
    }

    fn disconnect(&mut self) {
        self.signals.detach();

        match self.connection.take() {
            Some(connection) => {
                tracing::debug!(endpoint = %self.endpoint, "closing connection");
                connection.close();
            }
            None => tracing::debug!(endpoint = %self.endpoint, "disconnect without a connection"),
        }
    }

    fn send(&mut self, envelope: &Envelope) {
        let Some(connection) = self
            .connection
            .as_ref()
            .filter(|c| c.open.load(Ordering::Acquire))
        else {
            tracing::trace!(id = %envelope.id, "not connected, frame dropped");
            return;
        };

        match envelope.to_wire() {
            Ok(frame) => {
                if connection.outbound.send(frame).is_err() {
                    tracing::trace!(id = %envelope.id, "socket task gone, frame dropped");
                }
            }
            Err(e) => tracing::error!(id = %envelope.id, error = %e, "failed to encode envelope"),
        }
    }
}

fn build_request(url: &str, session_id: &SessionId) -> Result<Request, tungstenite::Error> {
    let mut request = url.into_client_request()?;

    let name = HeaderName::from_bytes(SESSION_HEADER.as_bytes())
        .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
    let value = HeaderValue::from_str(session_id.as_str())
        .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
    request.headers_mut().insert(name, value);

    Ok(request)
}

async fn run_connection(
    url: String,
    session_id: SessionId,
    emitter: Emitter,
    open: Arc<AtomicBool>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let request = match build_request(&url, &session_id) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(%url, error = %e, "invalid WebSocket request");
            emitter.emit(TransportSignal::Disconnected);
            return;
        }
    };

    let stream = tokio::select! {
        _ = &mut shutdown => return,
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                tracing::debug!(%url, error = %e, "socket error suppressed");
                emitter.emit(TransportSignal::Disconnected);
                return;
            }
        },
    };

    open.store(true, Ordering::Release);
    emitter.emit(TransportSignal::Connected);

    let (mut sink, mut frames) = stream.split();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::debug!(%url, error = %e, "socket error suppressed");
                    break;
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    emitter.emit(TransportSignal::MessageReceived(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => emitter.emit(TransportSignal::MessageReceived(text)),
                    Err(_) => tracing::debug!(%url, "non-UTF-8 binary frame dropped"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%url, error = %e, "socket error suppressed");
                    break;
                }
            },
        }
    }

    open.store(false, Ordering::Release);
    emitter.emit(TransportSignal::Disconnected);
}
