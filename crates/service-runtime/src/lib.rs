//! Service runtime for envctl
//!
//! This crate provides the building blocks every managed service shares:
//!
//! - [`ServiceState`] / [`HealthStatus`]: the two orthogonal status axes
//! - [`StateMachine`]: thread-safe state/health/error holder with a change hook
//! - [`Service`]: the uniform lifecycle trait, with [`HealthChecker`] and
//!   [`DataProvider`] extensions
//! - [`capability`]: provider registration, requirement matching and revocable
//!   handles
//! - [`EventBus`]: drop-oldest fan-out of [`ServiceStateEvent`]s
//!
//! The crate is runtime agnostic; timers and cancellation come from
//! `async-runtime-compat` and background tasks are spawned through a
//! [`Spawner`].

#![warn(missing_docs)]

pub mod capability;
pub mod context;
pub mod error;
pub mod events;
pub mod machine;
pub mod service;
pub mod state;

pub use async_runtime_compat::{CancellationToken, Spawner};
pub use capability::{
    CapabilityClient, CapabilityConfig, CapabilityExecutor, CapabilityHandle, CapabilityLost,
    CapabilityRegistry, CapabilityRequirement, LossImpact, ProviderInfo, ProviderRegistration,
};
pub use context::ServiceContext;
pub use error::{Error, Result};
pub use events::{EventBus, EventFilter, ServiceStateEvent, Subscription, DEFAULT_EVENT_BUFFER};
pub use machine::{RecordSnapshot, StateChangeCallback, StateMachine, StopDecision, TaskSlots};
pub use service::{DataProvider, HealthChecker, Service, ServiceData, ServiceStatus};
pub use state::{HealthStatus, ServiceState, ServiceType};
