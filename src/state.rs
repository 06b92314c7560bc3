//! Session state flag
//!
//! A lock-free cell read by status queries. Writers are the controller (start/stop)
//! and the reader thread (fatal read error); reading it never has side effects.

use std::sync::atomic::{AtomicU8, Ordering};

/// Capture session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Streaming,
    Stopping,
}

impl SessionState {
    fn as_raw(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Starting => 1,
            SessionState::Streaming => 2,
            SessionState::Stopping => 3,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SessionState::Starting,
            2 => SessionState::Streaming,
            3 => SessionState::Stopping,
            _ => SessionState::Idle,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Atomic holder for [`SessionState`]
#[derive(Debug, Default)]
pub struct StateCell {
    raw: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_raw(self.raw.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: SessionState) {
        let prev = SessionState::from_raw(self.raw.swap(state.as_raw(), Ordering::SeqCst));
        if prev != state {
            tracing::debug!("Session state {} -> {}", prev, state);
        }
    }

    /// Move to `to` only if the cell currently holds `from`
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .raw
            .compare_exchange(from.as_raw(), to.as_raw(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            tracing::debug!("Session state {} -> {}", from, to);
        }
        moved
    }

    pub fn is_streaming(&self) -> bool {
        self.get() == SessionState::Streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), SessionState::Idle);
        assert!(!cell.is_streaming());
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let cell = StateCell::new();
        assert!(!cell.transition(SessionState::Streaming, SessionState::Idle));
        assert!(cell.transition(SessionState::Idle, SessionState::Starting));
        cell.set(SessionState::Streaming);
        assert!(cell.is_streaming());
        assert!(cell.transition(SessionState::Streaming, SessionState::Stopping));
        assert!(!cell.is_streaming());
    }
}
