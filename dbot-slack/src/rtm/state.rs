//! Connection lifecycle state.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use dbot_core::CloseEvent;
use tracing::{debug, warn};

/// `Idle → Connecting → Open → Closing → Closed`; `Connecting` and `Open` may also go
/// straight to `Closed` when the session ends on its own, and a shutdown requested during the
/// handshake moves `Connecting → Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    close: Option<CloseEvent>,
}

/// State shared between the caller's thread and the loop thread.
#[derive(Debug)]
pub(crate) struct SessionState {
    inner: Mutex<Inner>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                close: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.lock().state
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether the state changed.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.lock();
        if inner.state == next {
            return false;
        }
        if !inner.state.can_transition_to(next) {
            warn!(from = %inner.state, to = %next, "rtm: ignoring illegal state transition");
            return false;
        }
        debug!(from = %inner.state, to = %next, "rtm: state transition");
        inner.state = next;
        true
    }

    /// `Open | Connecting → Closing`. Returns the state it left, or `None` (and changes
    /// nothing) from any other state.
    pub(crate) fn begin_closing(&self) -> Option<ConnectionState> {
        let mut inner = self.lock();
        let from = inner.state;
        if !matches!(from, ConnectionState::Open | ConnectionState::Connecting) {
            return None;
        }
        debug!(from = %from, to = %ConnectionState::Closing, "rtm: state transition");
        inner.state = ConnectionState::Closing;
        Some(from)
    }

    /// Records the first close event and moves to `Closed`.
    pub(crate) fn record_close(&self, close: CloseEvent) {
        let mut inner = self.lock();
        if inner.close.is_none() {
            inner.close = Some(close);
        }
        if inner.state != ConnectionState::Closed {
            debug!(from = %inner.state, to = %ConnectionState::Closed, "rtm: state transition");
            inner.state = ConnectionState::Closed;
        }
    }

    pub(crate) fn close_event(&self) -> Option<CloseEvent> {
        self.lock().close.clone()
    }

    /// Forces `Closed` once the loop has returned, whatever the transport reported.
    pub(crate) fn finish(&self) {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Closed {
            debug!(from = %inner.state, "rtm: loop returned, forcing closed");
            inner.state = ConnectionState::Closed;
        }
    }
}
