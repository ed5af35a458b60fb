//! Concrete envctl services
//!
//! Thin adapters implementing [`service_runtime::Service`] on top of injected
//! collaborators:
//!
//! - [`K8sConnectionService`]: cluster session via [`ClusterSessionProvider`]
//! - [`PortForwardService`]: local tunnel via [`TunnelProvider`]
//! - [`ProxyService`]: auxiliary process via [`ProxyBackend`], advertising
//!   capability offers while running
//!
//! [`ServiceFactory`] builds them from [`ServiceDefinition`]s.

#![warn(missing_docs)]

mod factory;
mod k8s;
mod port_forward;
mod providers;
mod proxy;
mod target;

pub use factory::{ServiceDefinition, ServiceFactory};
pub use k8s::{K8sConnectionConfig, K8sConnectionService};
pub use port_forward::{PortForwardConfig, PortForwardService};
pub use providers::{
    ClusterSessionProvider, LoginOutput, NodeHealth, ProxyBackend, ProxyBackendFactory, ProxySpec,
    TunnelHandle, TunnelProvider, TunnelStatus, TunnelUpdateFn,
};
pub use proxy::{CapabilityOffer, ProxyConfig, ProxyService};
pub use target::{ForwardTarget, PortSpec, ResourceKind, TunnelTarget};
