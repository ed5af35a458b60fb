//! Auxiliary proxy service
//!
//! Runs a proxy process through a [`ProxyBackend`] and, while it is running,
//! advertises its configured capability offers on the shared registry so that
//! other services can negotiate for them.

use crate::providers::{ProxyBackend, ProxySpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_runtime::{
    CapabilityConfig, CapabilityExecutor, CapabilityRegistry, DataProvider, Error, HealthChecker,
    HealthStatus, ProviderRegistration, Result, Service, ServiceContext, ServiceData,
    ServiceType, StateMachine, StopDecision,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A capability the proxy provides while running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOffer {
    /// Capability type
    #[serde(rename = "type")]
    pub capability_type: String,
    /// Offered features
    #[serde(default)]
    pub features: Vec<String>,
    /// Provider-side config
    #[serde(default)]
    pub config: CapabilityConfig,
}

/// Settings of one proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Unique label
    pub label: String,
    /// Process to run
    pub spec: ProxySpec,
    /// Capabilities advertised while running
    #[serde(default)]
    pub provides: Vec<CapabilityOffer>,
    /// Labels that must be running first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health polling interval override
    #[serde(default)]
    pub health_check_interval: Option<Duration>,
}

/// Routes capability operations to the proxy backend
struct BackendExecutor {
    backend: Arc<dyn ProxyBackend>,
}

#[async_trait]
impl CapabilityExecutor for BackendExecutor {
    async fn execute(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.backend.invoke(operation, params).await
    }
}

/// Service running one proxy process
pub struct ProxyService {
    machine: StateMachine,
    config: ProxyConfig,
    backend: Arc<dyn ProxyBackend>,
    registry: Arc<CapabilityRegistry>,
    provider_ids: Mutex<Vec<String>>,
}

impl ProxyService {
    /// Create a proxy service
    pub fn new(
        config: ProxyConfig,
        backend: Arc<dyn ProxyBackend>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            machine: StateMachine::new(config.label.clone(), ServiceType::Proxy),
            config,
            backend,
            registry,
            provider_ids: Mutex::new(Vec::new()),
        }
    }

    /// Proxy settings
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn provider_ids(&self) -> MutexGuard<'_, Vec<String>> {
        self.provider_ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn launch(&self, ctx: &ServiceContext) -> Result<()> {
        info!(
            "Launching proxy '{}': {} {}",
            self.config.label,
            self.config.spec.command,
            self.config.spec.args.join(" ")
        );
        ctx.run(self.backend.launch(ctx, &self.config.spec)).await??;
        ctx.run(self.backend.probe(ctx, &self.config.spec))
            .await?
            .map_err(|err| Error::health_check(format!("proxy not serving: {}", err)))
    }

    fn advertise(&self) {
        let executor: Arc<dyn CapabilityExecutor> = Arc::new(BackendExecutor {
            backend: self.backend.clone(),
        });
        let ids: Vec<String> = self
            .config
            .provides
            .iter()
            .map(|offer| {
                self.registry.register_provider(
                    ProviderRegistration::new(&self.config.label, &offer.capability_type)
                        .with_features(offer.features.iter().cloned())
                        .with_config(offer.config.clone())
                        .with_executor(executor.clone()),
                )
            })
            .collect();
        self.provider_ids().extend(ids);
    }

    fn withdraw(&self) {
        let ids: Vec<String> = self.provider_ids().drain(..).collect();
        for id in ids {
            match self.registry.unregister_provider(&id) {
                Ok(lost) => debug!(
                    "Proxy '{}' withdrew provider {} ({} handle(s) revoked)",
                    self.config.label,
                    id,
                    lost.len()
                ),
                Err(err) => debug!("Proxy '{}': {}", self.config.label, err),
            }
        }
    }

    async fn shutdown_backend(&self) {
        if let Err(err) = self.backend.shutdown().await {
            warn!("Proxy '{}' did not shut down cleanly: {}", self.config.label, err);
        }
    }
}

#[async_trait]
impl Service for ProxyService {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    async fn start(&self, ctx: &ServiceContext) -> Result<()> {
        if !self.machine.begin_start()? {
            return Ok(());
        }

        if let Err(err) = self.launch(ctx).await {
            warn!("Proxy '{}' failed to start: {}", self.config.label, err);
            self.shutdown_backend().await;
            self.machine.fail(err.clone())?;
            return Err(err);
        }

        if self.machine.finish_start()? {
            self.advertise();
        } else {
            debug!("Proxy '{}' was stopped while starting", self.config.label);
            self.shutdown_backend().await;
        }
        Ok(())
    }

    async fn stop(&self, _ctx: &ServiceContext) -> Result<()> {
        match self.machine.begin_stop() {
            StopDecision::AlreadyStopped | StopDecision::AlreadyStopping => Ok(()),
            StopDecision::TeardownOnly => {
                self.withdraw();
                Ok(())
            }
            StopDecision::Proceed => {
                info!("Stopping proxy '{}'", self.config.label);
                self.withdraw();
                self.shutdown_backend().await;
                self.machine.finish_stop(None)
            }
        }
    }

    fn dependencies(&self) -> Vec<String> {
        self.config.depends_on.clone()
    }

    fn provided_capabilities(&self) -> Vec<String> {
        self.config
            .provides
            .iter()
            .map(|offer| offer.capability_type.clone())
            .collect()
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self as &dyn HealthChecker)
    }

    fn data_provider(&self) -> Option<&dyn DataProvider> {
        Some(self as &dyn DataProvider)
    }
}

#[async_trait]
impl HealthChecker for ProxyService {
    async fn check_health(&self, ctx: &ServiceContext) -> Result<HealthStatus> {
        match self.backend.probe(ctx, &self.config.spec).await {
            Ok(()) => {
                self.machine.update_health(HealthStatus::Healthy, None)?;
                Ok(HealthStatus::Healthy)
            }
            Err(err) => {
                let err = Error::health_check(format!("proxy probe failed: {}", err));
                self.machine
                    .update_health(HealthStatus::Unhealthy, Some(err.clone()))?;
                Err(err)
            }
        }
    }

    fn health_check_interval(&self) -> Option<Duration> {
        self.config.health_check_interval
    }
}

impl DataProvider for ProxyService {
    fn service_data(&self) -> ServiceData {
        let mut data = ServiceData::new();
        data.insert("command".to_string(), json!(self.config.spec.command));
        data.insert("args".to_string(), json!(self.config.spec.args));
        data.insert("provides".to_string(), json!(self.provided_capabilities()));
        data.insert(
            "advertised_providers".to_string(),
            json!(self.provider_ids().len()),
        );
        data
    }
}
