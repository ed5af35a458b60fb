//! The service abstraction every managed unit implements

use crate::capability::CapabilityRequirement;
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::machine::{StateChangeCallback, StateMachine};
use crate::state::{HealthStatus, ServiceState, ServiceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Type-specific data blob exposed by a service
pub type ServiceData = serde_json::Map<String, serde_json::Value>;

/// Uniform lifecycle for managed services
///
/// Implementors embed a [`StateMachine`] and expose it through
/// [`Service::machine`]; every accessor below reads from it.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// The embedded state machine
    fn machine(&self) -> &StateMachine;

    /// Start the service
    ///
    /// Idempotent on a running service. Start failures leave the service in
    /// `Failed` and are returned.
    async fn start(&self, ctx: &ServiceContext) -> Result<()>;

    /// Stop the service and wait for its background tasks to exit
    async fn stop(&self, ctx: &ServiceContext) -> Result<()>;

    /// Stop, then start again
    async fn restart(&self, ctx: &ServiceContext) -> Result<()> {
        self.stop(ctx).await?;
        self.start(ctx).await
    }

    /// Unique label
    fn label(&self) -> &str {
        self.machine().label()
    }

    /// Service kind
    fn service_type(&self) -> ServiceType {
        self.machine().service_type()
    }

    /// Labels of services that must be `Running` before this one starts
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Capability requirements declared at construction
    fn capability_requirements(&self) -> Vec<CapabilityRequirement> {
        Vec::new()
    }

    /// Capability types this service advertises while running
    fn provided_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Current lifecycle state
    fn state(&self) -> ServiceState {
        self.machine().state()
    }

    /// Current health
    fn health(&self) -> HealthStatus {
        self.machine().health()
    }

    /// Last recorded error
    fn last_error(&self) -> Option<Error> {
        self.machine().last_error()
    }

    /// Install the change callback
    fn set_state_change_callback(&self, callback: StateChangeCallback) {
        self.machine().set_state_change_callback(callback);
    }

    /// Periodic health check extension
    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }

    /// Data blob extension
    fn data_provider(&self) -> Option<&dyn DataProvider> {
        None
    }

    /// Read model for the control surface
    fn status(&self) -> ServiceStatus {
        let snapshot = self.machine().snapshot();
        ServiceStatus {
            label: self.label().to_string(),
            service_type: self.service_type(),
            state: snapshot.state,
            health: snapshot.health,
            last_error: snapshot.last_error,
            last_health_check: snapshot.last_health_check,
            dependencies: self.dependencies(),
            data: self
                .data_provider()
                .map(DataProvider::service_data)
                .unwrap_or_default(),
        }
    }
}

/// Health check extension polled by the orchestrator
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe the service and record the result on its state machine
    ///
    /// Only health and last error change; the lifecycle state is untouched.
    async fn check_health(&self, ctx: &ServiceContext) -> Result<HealthStatus>;

    /// Polling interval; `None` uses the orchestrator default
    fn health_check_interval(&self) -> Option<Duration> {
        None
    }
}

/// Data blob extension
pub trait DataProvider: Send + Sync {
    /// Type-specific data for status output
    fn service_data(&self) -> ServiceData;
}

/// Snapshot of one service for the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Unique label
    pub label: String,
    /// Service kind
    pub service_type: ServiceType,
    /// Lifecycle state
    pub state: ServiceState,
    /// Health
    pub health: HealthStatus,
    /// Last recorded error
    pub last_error: Option<Error>,
    /// When health was last determined by a check
    pub last_health_check: Option<DateTime<Utc>>,
    /// Hard dependency labels
    pub dependencies: Vec<String>,
    /// Type-specific data
    pub data: ServiceData,
}
