//! Upstream Session State
//!
//! The connection lifecycle of the single upstream session, held in an
//! atomic cell so that concurrent `connect()` triggers race on one
//! compare-and-swap and at most one of them wins.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Open ──► Closing
//!                                 │                     │
//!                                 ▼                     ▼
//!                            Reconnecting ◄─────────────┘
//!                                 │ (fixed delay)
//!                                 └──────► Connecting ...
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle state of the upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    /// No connection and no retry scheduled.
    Disconnected = 0,
    /// Transport connection in progress.
    Connecting = 1,
    /// Connected and relaying.
    Open = 2,
    /// Connection is being torn down.
    Closing = 3,
    /// Connection lost; a retry is scheduled after the reconnect delay.
    Reconnecting = 4,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    /// Whether a session task owns the lifecycle (anything but `Disconnected`).
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Whether the upstream connection is established.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for [`SessionState`].
#[derive(Debug)]
pub struct SessionStateCell {
    state: AtomicU8,
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    /// Create a cell in the `Disconnected` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
        }
    }

    /// Current state.
    #[must_use]
    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Claim the session: `Disconnected → Connecting`.
    ///
    /// Returns `false` (and changes nothing) from any other state.
    pub fn try_begin_connect(&self) -> bool {
        self.compare_and_set(SessionState::Disconnected, SessionState::Connecting)
    }

    /// Transition from `from` to `to` if the cell is still in `from`.
    pub fn compare_and_set(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally set the state. Only the session task that owns the
    /// lifecycle calls this.
    pub fn set(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_disconnected() {
        let cell = SessionStateCell::new();
        assert_eq!(cell.load(), SessionState::Disconnected);
        assert!(!cell.load().is_active());
    }

    #[test]
    fn begin_connect_only_from_disconnected() {
        let cell = SessionStateCell::new();
        assert!(cell.try_begin_connect());
        assert_eq!(cell.load(), SessionState::Connecting);

        for state in [
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
            SessionState::Reconnecting,
        ] {
            cell.set(state);
            assert!(!cell.try_begin_connect(), "connect allowed from {state}");
            assert_eq!(cell.load(), state);
        }

        cell.set(SessionState::Disconnected);
        assert!(cell.try_begin_connect());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let cell = Arc::new(SessionStateCell::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || cell.try_begin_connect())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(cell.load(), SessionState::Connecting);
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::Open.to_string(), "open");
        assert_eq!(SessionState::Reconnecting.as_str(), "reconnecting");
        assert!(SessionState::Open.is_open());
        assert!(SessionState::Reconnecting.is_active());
    }
}
