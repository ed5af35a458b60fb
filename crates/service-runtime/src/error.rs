//! Error types for the service runtime

use crate::state::ServiceState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime error taxonomy
///
/// Errors are cloneable so that the last failure of a service can be kept on
/// its record and copied into every state event.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Error {
    /// Collaborator login failed
    #[error("Authentication failed for '{target}': {message}")]
    Authentication {
        /// Login target (cluster name)
        target: String,
        /// Collaborator output describing the failure
        message: String,
    },

    /// A required capability was not satisfied in time, or was revoked
    #[error("Capability '{capability_type}' unavailable: {reason}")]
    CapabilityUnavailable {
        /// Capability type that could not be satisfied
        capability_type: String,
        /// Why it is unavailable
        reason: String,
    },

    /// A hard dependency failed to reach Running
    #[error("Service '{service}' not started: dependency '{dependency}' did not reach Running")]
    DependencyFailure {
        /// Service that was skipped
        service: String,
        /// Dependency that failed
        dependency: String,
    },

    /// A health probe failed
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// Invalid configuration (cyclic graph, malformed port spec, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Control operation on an unknown label
    #[error("Service not found: {0}")]
    NotFound(String),

    /// The state machine rejected a transition
    #[error("Invalid state transition for '{label}': {from} -> {to}")]
    InvalidStateTransition {
        /// Service label
        label: String,
        /// Current state
        from: ServiceState,
        /// Requested state
        to: ServiceState,
    },

    /// The operation's context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation's context deadline elapsed
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Capability handle was already returned to the registry
    #[error("Capability handle '{0}' already released")]
    HandleReleased(String),

    /// External collaborator failure that fits no other category
    #[error("Provider error: {0}")]
    Provider(String),
}

impl Error {
    /// Create an authentication error
    pub fn authentication(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a capability-unavailable error
    pub fn capability_unavailable(
        capability_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CapabilityUnavailable {
            capability_type: capability_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a dependency failure error
    pub fn dependency_failure(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::DependencyFailure {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a health check error
    pub fn health_check(message: impl Into<String>) -> Self {
        Self::HealthCheck(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::authentication("mc", "authentication failed");
        assert_eq!(
            err.to_string(),
            "Authentication failed for 'mc': authentication failed"
        );

        let err = Error::dependency_failure("b", "a");
        assert_eq!(
            err.to_string(),
            "Service 'b' not started: dependency 'a' did not reach Running"
        );
    }

    #[test]
    fn test_error_serializes_with_kind_tag() {
        let err = Error::NotFound("missing".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
    }
}
