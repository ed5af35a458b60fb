//! Factory turning service definitions into service instances

use crate::k8s::{K8sConnectionConfig, K8sConnectionService};
use crate::port_forward::{PortForwardConfig, PortForwardService};
use crate::providers::{ClusterSessionProvider, ProxyBackendFactory, TunnelProvider};
use crate::proxy::{ProxyConfig, ProxyService};
use async_runtime_compat::Spawner;
use serde::{Deserialize, Serialize};
use service_runtime::{CapabilityRegistry, Service, ServiceType};
use std::sync::Arc;

/// A service kind together with its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceDefinition {
    /// Cluster connection
    K8sConnection(K8sConnectionConfig),
    /// Port-forward
    PortForward(PortForwardConfig),
    /// Auxiliary proxy
    Proxy(ProxyConfig),
}

impl ServiceDefinition {
    /// Label of the defined service
    pub fn label(&self) -> &str {
        match self {
            Self::K8sConnection(config) => &config.label,
            Self::PortForward(config) => &config.label,
            Self::Proxy(config) => &config.label,
        }
    }

    /// Kind of the defined service
    pub fn service_type(&self) -> ServiceType {
        match self {
            Self::K8sConnection(_) => ServiceType::K8sConnection,
            Self::PortForward(_) => ServiceType::PortForward,
            Self::Proxy(_) => ServiceType::Proxy,
        }
    }

    /// Hard dependency labels
    pub fn dependencies(&self) -> &[String] {
        match self {
            Self::K8sConnection(config) => &config.depends_on,
            Self::PortForward(config) => &config.depends_on,
            Self::Proxy(config) => &config.depends_on,
        }
    }
}

/// Factory for creating services with their collaborators
#[derive(Clone)]
pub struct ServiceFactory {
    spawner: Arc<dyn Spawner>,
    capabilities: Arc<CapabilityRegistry>,
    clusters: Arc<dyn ClusterSessionProvider>,
    tunnels: Arc<dyn TunnelProvider>,
    proxies: ProxyBackendFactory,
}

impl ServiceFactory {
    /// Create a factory
    pub fn new(
        spawner: Arc<dyn Spawner>,
        capabilities: Arc<CapabilityRegistry>,
        clusters: Arc<dyn ClusterSessionProvider>,
        tunnels: Arc<dyn TunnelProvider>,
        proxies: ProxyBackendFactory,
    ) -> Self {
        Self {
            spawner,
            capabilities,
            clusters,
            tunnels,
            proxies,
        }
    }

    /// Create a service instance from its definition
    pub fn create_service(&self, definition: &ServiceDefinition) -> Arc<dyn Service> {
        match definition {
            ServiceDefinition::K8sConnection(config) => Arc::new(K8sConnectionService::new(
                config.clone(),
                self.clusters.clone(),
                self.capabilities.clone(),
                self.spawner.clone(),
            )),
            ServiceDefinition::PortForward(config) => Arc::new(PortForwardService::new(
                config.clone(),
                self.tunnels.clone(),
                self.spawner.clone(),
            )),
            ServiceDefinition::Proxy(config) => {
                let backend = (self.proxies)(&config.label, &config.spec);
                Arc::new(ProxyService::new(
                    config.clone(),
                    backend,
                    self.capabilities.clone(),
                ))
            }
        }
    }

    /// Create every service, preserving definition order
    pub fn create_services(&self, definitions: &[ServiceDefinition]) -> Vec<Arc<dyn Service>> {
        definitions
            .iter()
            .map(|definition| self.create_service(definition))
            .collect()
    }
}
