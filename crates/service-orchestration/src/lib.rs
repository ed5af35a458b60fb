//! # Orchestration
//!
//! Dependency-driven lifecycle management for envctl services.
//!
//! The [`Orchestrator`] owns a [`ServiceRegistry`] of `Arc<dyn Service>`,
//! derives a [`DependencyGraph`] from hard dependencies and capability
//! requirements, starts independent subgraphs concurrently, polls health
//! through the [`HealthScheduler`] and republishes every state change on an
//! [`EventBus`](service_runtime::EventBus).
//!
//! ## Example
//!
//! ```rust,no_run
//! use service_orchestration::{OrchestrationContext, Orchestrator, OrchestratorConfig};
//! use service_runtime::ServiceContext;
//!
//! # async fn example() -> Result<(), service_orchestration::Error> {
//! let context = OrchestrationContext::new(OrchestratorConfig::default())?;
//! let orchestrator = Orchestrator::new(context);
//!
//! // orchestrator.register(service)?;
//! for err in orchestrator.start(&ServiceContext::background()).await {
//!     eprintln!("{err}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod context;
mod graph;
mod health;
mod orchestrator;
mod registry;

pub use config::OrchestratorConfig;
pub use context::OrchestrationContext;
pub use graph::{DependencyGraph, DependencyNode};
pub use health::{HealthReport, HealthScheduler};
pub use orchestrator::Orchestrator;
pub use registry::ServiceRegistry;

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Error reported by a service or the runtime
    #[error(transparent)]
    Service(#[from] service_runtime::Error),

    /// A service failed its start attempt
    #[error("Failed to start service '{label}': {source}")]
    Start {
        /// Service label
        label: String,
        /// Underlying failure
        source: service_runtime::Error,
    },

    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Configuration error (cycles, duplicate labels, unknown dependencies)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The runtime error carried by this error, if any
    pub fn runtime_error(&self) -> Option<&service_runtime::Error> {
        match self {
            Self::Service(err) | Self::Start { source: err, .. } => Some(err),
            _ => None,
        }
    }

    /// Whether this is a dependency failure report
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self.runtime_error(),
            Some(service_runtime::Error::DependencyFailure { .. })
        )
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;
