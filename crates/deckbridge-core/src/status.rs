//! Connectivity status shown to the user.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connection half of the status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// A connection attempt is in flight or pending.
    #[default]
    Connecting,
    /// The socket is open.
    Connected,
}

/// Whether the deck currently targets this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    /// The deck drives this session.
    Active,
    /// The deck drives another session, or none.
    #[default]
    Inactive,
}

/// Display-only status: connectivity crossed with activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityStatus {
    pub connectivity: Connectivity,
    pub activity: Activity,
}

impl ConnectivityStatus {
    /// Whether the socket is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self.connectivity, Connectivity::Connected)
    }

    /// Whether the deck targets this session.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self.activity, Activity::Active)
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connectivity = match self.connectivity {
            Connectivity::Connecting => "Connecting",
            Connectivity::Connected => "Connected",
        };
        write!(f, "Deck | {connectivity}")?;
        if self.is_active() {
            f.write_str(" | Active")?;
        }
        Ok(())
    }
}

/// Write-only sink receiving every status change.
///
/// Implement this to drive a status bar or indicator.
pub trait StatusSink: Send + Sync {
    /// Render a new status.
    fn update(&self, status: ConnectivityStatus);
}

impl StatusSink for watch::Sender<ConnectivityStatus> {
    fn update(&self, status: ConnectivityStatus) {
        self.send_replace(status);
    }
}

/// Sink that writes each status to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn update(&self, status: ConnectivityStatus) {
        tracing::info!(%status, "status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut status = ConnectivityStatus::default();
        assert_eq!(status.to_string(), "Deck | Connecting");
        assert!(!status.is_connected());

        status.connectivity = Connectivity::Connected;
        assert_eq!(status.to_string(), "Deck | Connected");
        assert!(status.is_connected());

        status.activity = Activity::Active;
        assert_eq!(status.to_string(), "Deck | Connected | Active");

        status.connectivity = Connectivity::Connecting;
        assert_eq!(status.to_string(), "Deck | Connecting | Active");
    }

    #[test]
    fn test_watch_sink() {
        let (tx, mut rx) = watch::channel(ConnectivityStatus::default());
        let connected = ConnectivityStatus {
            connectivity: Connectivity::Connected,
            activity: Activity::Inactive,
        };
        tx.update(connected);

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), connected);
        tokio_test::assert_ok!(rx.has_changed());
    }
}
