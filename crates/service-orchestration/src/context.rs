//! Orchestration context for runtime-agnostic service management
//!
//! Carries the runtime dependencies the orchestrator needs (the async
//! spawner, the shared capability registry and the settings) without coupling
//! it to a specific executor.

use crate::{Error, OrchestratorConfig, Result};
use async_runtime_compat::Spawner;
use service_runtime::CapabilityRegistry;
use std::sync::Arc;

/// Context object for service orchestration
#[derive(Clone)]
pub struct OrchestrationContext {
    /// Runtime spawner for background tasks
    pub spawner: Arc<dyn Spawner>,

    /// Capability registry shared by providers and requirers
    pub capabilities: Arc<CapabilityRegistry>,

    /// Orchestrator settings
    pub config: Arc<OrchestratorConfig>,
}

impl OrchestrationContext {
    /// Create a context using the spawner selected by runtime features
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let spawner = async_runtime_compat::default_spawner().ok_or_else(|| {
            Error::Config(
                "no async runtime available: enable the `smol` or `tokio` feature".to_string(),
            )
        })?;
        Ok(Self::with_spawner(config, spawner))
    }

    /// Create a context with a specific spawner
    pub fn with_spawner(config: OrchestratorConfig, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            spawner,
            capabilities: Arc::new(CapabilityRegistry::new()),
            config: Arc::new(config),
        }
    }

    /// Share an existing capability registry
    pub fn with_capabilities(mut self, capabilities: Arc<CapabilityRegistry>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Get a reference to the settings
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}
