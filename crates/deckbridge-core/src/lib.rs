//! Core types for the deck control channel.
//!
//! This crate provides the fundamental building blocks:
//! - `Endpoint` - Where the deck companion listens
//! - `SessionId` / `DispatchContext` - Host session identity and dispatch origin
//! - `DeckConfig` - Configuration from settings documents and the environment
//! - `ConnectivityStatus` - Display status and the sinks that render it

pub mod config;
pub mod context;
pub mod endpoint;
pub mod status;

pub use config::{Backoff, ConfigError, ConfigTracker, DeckConfig, ReconnectConfig};
pub use context::{DispatchContext, SessionId};
pub use endpoint::Endpoint;
pub use status::{Activity, Connectivity, ConnectivityStatus, LogStatus, StatusSink};
