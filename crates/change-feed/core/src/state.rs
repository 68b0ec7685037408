//! # Listener State Machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │ error / end
//!      │                       err                 ▼
//!      └────────────────────────┘            Reconnecting ──ok──▶ Connected
//!                                              │    ▲
//!                                         fail │    │ retry allowed
//!                                              └────┘
//!                                              │ attempts exhausted
//!                                              ▼
//!                                           GivingUp
//! ```
//!
//! `disconnect()` moves any phase to `Disconnected`. `connected` and
//! `reconnecting` are derived from the phase, so they can never both hold.

use serde::Serialize;
use std::fmt;

use crate::backoff::BackoffConfig;

/// Lifecycle phase of the listener's dedicated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    GivingUp,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::GivingUp => "giving_up",
        };
        f.write_str(s)
    }
}

/// Outcome of asking the state machine to schedule a reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule attempt with this 0-indexed backoff exponent
    Schedule { attempt: u32 },
    /// A reconnection is already pending; do nothing
    AlreadyReconnecting,
    /// The listener was disconnected on purpose; do nothing
    Stopped,
    /// The configured maximum has been reached; report and stop
    Exhausted { attempts: u32 },
}

/// The single mutable lifecycle object of a listener.
#[derive(Debug, Clone)]
pub struct ListenerState {
    phase: ConnectionPhase,
    intentional_disconnect: bool,
    reconnect_attempt: u32,
}

impl Default for ListenerState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            intentional_disconnect: false,
            reconnect_attempt: 0,
        }
    }
}

impl ListenerState {
    /// Create a disconnected state with no failed attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether the phase is `Connected`.
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Whether the phase is `Reconnecting`.
    pub fn is_reconnecting(&self) -> bool {
        self.phase == ConnectionPhase::Reconnecting
    }

    /// Whether the last disconnect was requested by the caller.
    pub fn intentional_disconnect(&self) -> bool {
        self.intentional_disconnect
    }

    /// Failed reconnection attempts since the last successful connection.
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Start an explicit connect. Clears a previous intentional disconnect.
    pub fn begin_connect(&mut self) {
        self.intentional_disconnect = false;
        self.reconnect_attempt = 0;
        self.phase = ConnectionPhase::Connecting;
    }

    /// Initial connect failed; the caller decides what happens next.
    pub fn connect_failed(&mut self) {
        self.phase = ConnectionPhase::Disconnected;
    }

    /// A connection (initial or replacement) is live and listening.
    pub fn mark_connected(&mut self) {
        self.phase = ConnectionPhase::Connected;
        self.reconnect_attempt = 0;
    }

    /// The live connection reported an error or closed unexpectedly.
    pub fn connection_lost(&mut self) {
        if self.phase == ConnectionPhase::Connected {
            self.phase = ConnectionPhase::Disconnected;
        }
    }

    /// Decide whether a reconnection timer should be armed.
    pub fn begin_reconnect(&mut self, policy: &BackoffConfig) -> ReconnectDecision {
        if self.intentional_disconnect {
            return ReconnectDecision::Stopped;
        }
        if self.phase == ConnectionPhase::Reconnecting {
            return ReconnectDecision::AlreadyReconnecting;
        }
        if !policy.can_retry(self.reconnect_attempt) {
            self.phase = ConnectionPhase::GivingUp;
            return ReconnectDecision::Exhausted {
                attempts: self.reconnect_attempt,
            };
        }
        self.phase = ConnectionPhase::Reconnecting;
        ReconnectDecision::Schedule {
            attempt: self.reconnect_attempt,
        }
    }

    /// A scheduled reconnection attempt failed at connect or listen.
    pub fn reconnect_failed(&mut self) {
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        if self.phase == ConnectionPhase::Reconnecting {
            self.phase = ConnectionPhase::Disconnected;
        }
    }

    /// Explicit teardown; terminal until the next `begin_connect`.
    pub fn mark_disconnected(&mut self) {
        self.intentional_disconnect = true;
        self.phase = ConnectionPhase::Disconnected;
        self.reconnect_attempt = 0;
    }

    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            phase: self.phase,
            is_connected: self.is_connected(),
            is_reconnecting: self.is_reconnecting(),
            consecutive_failures: self.reconnect_attempt,
        }
    }
}

/// Read-only copy of the listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListenerSnapshot {
    pub phase: ConnectionPhase,
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub consecutive_failures: u32,
}
