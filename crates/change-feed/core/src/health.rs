//! Listener health reporting.
//!
//! The listener never escalates on its own. [`ListenerHealth`] gives an
//! external check enough to decide when an outage has lasted too long.

use serde::Serialize;

use crate::state::{ConnectionPhase, ListenerSnapshot};

/// Default number of consecutive reconnection failures tolerated before unhealthy
pub const DEFAULT_UNHEALTHY_AFTER_FAILURES: u32 = 5;

/// Health status of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and receiving
    Healthy,
    /// Recovering; events may be delayed
    Degraded,
    /// Not recovering on its own, or failing for too long
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerHealth {
    pub status: HealthStatus,
    pub phase: ConnectionPhase,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl ListenerHealth {
    pub fn evaluate(
        snapshot: &ListenerSnapshot,
        unhealthy_after_failures: u32,
        last_error: Option<String>,
    ) -> Self {
        let status = match snapshot.phase {
            ConnectionPhase::Connected => HealthStatus::Healthy,
            ConnectionPhase::GivingUp => HealthStatus::Unhealthy,
            _ if snapshot.consecutive_failures >= unhealthy_after_failures => {
                HealthStatus::Unhealthy
            }
            ConnectionPhase::Connecting | ConnectionPhase::Reconnecting => HealthStatus::Degraded,
            // Between a failed attempt and the next timer the phase reads
            // Disconnected, but recovery is still under way.
            ConnectionPhase::Disconnected if snapshot.consecutive_failures > 0 => {
                HealthStatus::Degraded
            }
            ConnectionPhase::Disconnected => HealthStatus::Unhealthy,
        };

        Self {
            status,
            phase: snapshot.phase,
            consecutive_failures: snapshot.consecutive_failures,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(phase: ConnectionPhase, failures: u32) -> ListenerSnapshot {
        ListenerSnapshot {
            phase,
            is_connected: phase == ConnectionPhase::Connected,
            is_reconnecting: phase == ConnectionPhase::Reconnecting,
            consecutive_failures: failures,
        }
    }

    #[test]
    fn test_connected_is_healthy() {
        let health = ListenerHealth::evaluate(&snapshot(ConnectionPhase::Connected, 0), 5, None);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.status.is_healthy());
    }

    #[test]
    fn test_reconnecting_below_threshold_is_degraded() {
        let health = ListenerHealth::evaluate(
            &snapshot(ConnectionPhase::Reconnecting, 2),
            5,
            Some("Connection error: reset".to_string()),
        );
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.status.is_operational());
        assert_eq!(health.last_error.as_deref(), Some("Connection error: reset"));
    }

    #[test]
    fn test_failed_attempt_pending_retry_is_degraded() {
        let health = ListenerHealth::evaluate(&snapshot(ConnectionPhase::Disconnected, 1), 5, None);
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_threshold_reached_is_unhealthy() {
        let health = ListenerHealth::evaluate(&snapshot(ConnectionPhase::Reconnecting, 5), 5, None);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.status.is_operational());
    }

    #[test]
    fn test_giving_up_and_idle_are_unhealthy() {
        for phase in [ConnectionPhase::GivingUp, ConnectionPhase::Disconnected] {
            let health = ListenerHealth::evaluate(&snapshot(phase, 0), 5, None);
            assert_eq!(health.status, HealthStatus::Unhealthy, "{phase}");
        }
    }

    #[test]
    fn test_health_serializes_lowercase() {
        let health = ListenerHealth::evaluate(&snapshot(ConnectionPhase::Connected, 0), 5, None);
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["phase"], "connected");
    }
}
