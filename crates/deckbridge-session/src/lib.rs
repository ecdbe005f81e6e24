//! Session manager and typed message dispatch for the deck control channel.
//!
//! Provides:
//! - `SessionManager` - Connection state machine, reconnect loop and dispatch
//! - `SessionHandle` - Cloneable handle to a manager running as a task
//! - Reconnect policies (immediate, fixed delay, exponential backoff, capped)
//! - `HostActions` - Binding of inbound requests to host-side actions

pub mod dispatch;
pub mod handle;
pub mod host;
pub mod manager;
pub mod policy;

#[cfg(test)]
mod testing;

pub use dispatch::{Dispatcher, SubscriptionId};
pub use handle::SessionHandle;
pub use host::{HostActions, bind_host, track_active_session};
pub use manager::{SessionError, SessionManager};
pub use policy::ReconnectPolicy;

#[cfg(feature = "websocket")]
pub use deckbridge_transport::WsConnector;
