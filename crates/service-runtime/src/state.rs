//! Service state, health and kind enums

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServiceState {
    /// Start in progress
    Starting,
    /// Started and serving
    Running,
    /// Teardown in progress
    Stopping,
    /// Not running; also the state of a service that was never started
    #[default]
    Stopped,
    /// Start or runtime failure
    Failed,
}

impl ServiceState {
    /// Terminal states can be (re)started
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Check if a state transition is valid
    ///
    /// Same-state updates are always accepted: they carry health or error
    /// changes without moving the lifecycle.
    pub fn can_transition_to(self, to: ServiceState) -> bool {
        use ServiceState::*;

        if self == to {
            return true;
        }

        match (self, to) {
            // Starting transitions
            (Stopped, Starting) => true,
            (Failed, Starting) => true,

            // Running transitions
            (Starting, Running) => true,

            // Failed is reachable from Starting or Running only
            (Starting, Failed) => true,
            (Running, Failed) => true,

            // Stopping transitions
            (Running, Stopping) => true,
            (Starting, Stopping) => true,

            // Stopped transitions
            (Stopping, Stopped) => true,

            // Invalid transitions
            _ => false,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Health of a service, orthogonal to its lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HealthStatus {
    /// Not checked yet
    #[default]
    Unknown,
    /// A check is in flight
    Checking,
    /// Last check passed
    Healthy,
    /// Last check failed
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Checking => "Checking",
            Self::Healthy => "Healthy",
            Self::Unhealthy => "Unhealthy",
        };
        f.write_str(name)
    }
}

/// Kind tag of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Kubernetes cluster session
    K8sConnection,
    /// Local port-forward tunnel
    PortForward,
    /// Auxiliary proxy process
    Proxy,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::K8sConnection => "k8s-connection",
            Self::PortForward => "port-forward",
            Self::Proxy => "proxy",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use ServiceState::*;

        // Valid transitions
        assert!(Stopped.can_transition_to(Starting));
        assert!(Failed.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Starting.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));

        // Failed only from Starting or Running
        assert!(Starting.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Stopping.can_transition_to(Failed));
        assert!(!Stopped.can_transition_to(Failed));

        // Invalid transitions
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Stopping));
        assert!(!Stopped.can_transition_to(Stopping));
    }

    #[test]
    fn test_same_state_is_allowed() {
        for state in [
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Stopping,
            ServiceState::Stopped,
            ServiceState::Failed,
        ] {
            assert!(state.can_transition_to(state));
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ServiceState::default(), ServiceState::Stopped);
        assert_eq!(HealthStatus::default(), HealthStatus::Unknown);
        assert!(ServiceState::Failed.is_terminal());
        assert!(!ServiceState::Running.is_terminal());
    }
}
