//! Recording mock transport shared by the unit tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use deckbridge_core::{
    Activity, Connectivity, ConnectivityStatus, Endpoint, SessionId, StatusSink,
};
use deckbridge_transport::{Connector, Envelope, SignalSink, Transport, TransportSignal};

use crate::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Bind { transport: usize, endpoint: Endpoint },
    Connect(usize),
    Disconnect(usize),
    Send(usize, String),
    Status(ConnectivityStatus),
}

pub const fn connecting() -> ConnectivityStatus {
    ConnectivityStatus {
        connectivity: Connectivity::Connecting,
        activity: Activity::Inactive,
    }
}

pub const fn connected() -> ConnectivityStatus {
    ConnectivityStatus {
        connectivity: Connectivity::Connected,
        activity: Activity::Inactive,
    }
}

pub const fn active() -> ConnectivityStatus {
    ConnectivityStatus {
        connectivity: Connectivity::Connecting,
        activity: Activity::Active,
    }
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    sinks: Vec<SignalSink>,
}

/// Records transport calls and status updates in one ordered log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<State>>,
}

impl Recorder {
    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Raise `signal` from transport number `transport`.
    pub fn emit(&self, transport: usize, signal: TransportSignal) -> bool {
        let sink = self.state.lock().unwrap().sinks[transport].clone();
        sink.emit(signal)
    }

    pub fn connects(&self, transport: usize) -> usize {
        self.count(&Call::Connect(transport))
    }

    pub fn count_status(&self, status: ConnectivityStatus) -> usize {
        self.count(&Call::Status(status))
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Frames sent through transport number `transport`.
    pub fn frames(&self, transport: usize) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(id, frame) if id == transport => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            recorder: self.clone(),
        }
    }

    /// Manager for session "me" at the default endpoint.
    pub fn manager(&self) -> SessionManager<MockConnector> {
        SessionManager::new(
            self.connector(),
            Endpoint::new("127.0.0.1", 48969),
            SessionId::new("me"),
            Arc::new(self.clone()),
        )
    }
}

impl StatusSink for Recorder {
    fn update(&self, status: ConnectivityStatus) {
        self.record(Call::Status(status));
    }
}

#[derive(Debug)]
pub struct MockConnector {
    recorder: Recorder,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn bind(&self, endpoint: Endpoint, _session_id: &SessionId, signals: SignalSink) -> MockTransport {
        let id = {
            let mut state = self.recorder.state.lock().unwrap();
            state.sinks.push(signals.clone());
            state.sinks.len() - 1
        };
        self.recorder.record(Call::Bind {
            transport: id,
            endpoint: endpoint.clone(),
        });
        MockTransport {
            id,
            endpoint,
            signals,
            recorder: self.recorder.clone(),
        }
    }
}

#[derive(Debug)]
pub struct MockTransport {
    id: usize,
    endpoint: Endpoint,
    signals: SignalSink,
    recorder: Recorder,
}

impl MockTransport {
    pub const fn id(&self) -> usize {
        self.id
    }
}

impl Transport for MockTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connect(&mut self) {
        self.recorder.record(Call::Connect(self.id));
    }

    fn disconnect(&mut self) {
        self.signals.detach();
        self.recorder.record(Call::Disconnect(self.id));
    }

    fn send(&mut self, envelope: &Envelope) {
        self.recorder
            .record(Call::Send(self.id, envelope.to_wire().unwrap()));
    }
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
