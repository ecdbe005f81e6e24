//! Wire protocol and socket transport for the deck control channel.
//!
//! Provides:
//! - Wire protocol (`{id, data}` envelopes around typed JSON payloads)
//! - `Transport` / `Connector` traits and lifecycle signals
//! - WebSocket transport (feature: websocket)

pub mod protocol;
pub mod signal;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{Envelope, Message, MessageKind, Payload, ProtocolError};
pub use signal::{SignalSink, TransportEvent, TransportSignal};
pub use traits::{Connector, Transport};

#[cfg(feature = "websocket")]
pub use websocket::{WsConnector, WsTransport};
