//! Handle shared between the feed connection and the heartbeat watchdog.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::info;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct LinkState {
    /// Cancelled to tear the current connection down
    connection: Option<CancellationToken>,
    /// Arrival of the last complete frame on the current connection
    last_received: Option<Instant>,
}

/// Open connection state of the feed.
///
/// Closing is serialized by a lock: whichever of the read loop or the watchdog
/// closes first tears the connection down, the other close is a no-op.
#[derive(Debug, Default)]
pub struct FeedLink {
    state: Mutex<LinkState>,
}

impl FeedLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection and returns the token cancelled on close.
    pub fn open(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = self.state();
        if let Some(previous) = state.connection.replace(token.clone()) {
            previous.cancel();
        }
        state.last_received = None;
        token
    }

    /// Tears the current connection down.
    ///
    /// Returns `false` if no connection was open. The frame timestamp is reset
    /// either way, so the watchdog stays quiet until a new frame arrives.
    pub fn close(&self) -> bool {
        let mut state = self.state();
        state.last_received = None;
        match state.connection.take() {
            Some(token) => {
                info!("closing alert feed connection");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state().connection.is_some()
    }

    /// Records the arrival of a complete frame.
    pub fn mark_received(&self) {
        self.state().last_received = Some(Instant::now());
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.state().last_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_cancels_connection_once() {
        let link = FeedLink::new();
        let token = link.open();
        assert!(link.is_open());

        assert!(link.close());
        assert!(token.is_cancelled());
        assert!(!link.is_open());
        assert!(!link.close());
    }

    #[test]
    fn test_close_resets_last_received() {
        let link = FeedLink::new();
        link.open();
        link.mark_received();
        assert!(link.last_received().is_some());

        link.close();
        assert!(link.last_received().is_none());
    }

    #[test]
    fn test_open_replaces_previous_connection() {
        let link = FeedLink::new();
        let first = link.open();
        let second = link.open();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
