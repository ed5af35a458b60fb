//! Kubernetes cluster connection service
//!
//! Start sequence: wait for declared capabilities, log in (through an `auth`
//! capability when one is held, otherwise through the session provider), then
//! probe the API server. API reachability decides health; node readiness is
//! collected as advisory telemetry and never changes health or state.

use crate::providers::{ClusterSessionProvider, NodeHealth};
use async_runtime_compat::Spawner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_runtime::{
    CapabilityClient, CapabilityRegistry, CapabilityRequirement, DataProvider, Error,
    HealthChecker, HealthStatus, LossImpact, Result, Service, ServiceContext, ServiceData,
    ServiceType, StateMachine, StopDecision,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const AUTH_CAPABILITY: &str = "auth";
const LOSS_WATCHER: &str = "capability-loss";

/// Settings of one cluster connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sConnectionConfig {
    /// Unique label
    pub label: String,
    /// Kubeconfig context
    pub context: String,
    /// Cluster name used for login
    pub cluster: String,
    /// Free-form role tag (management, workload, ...)
    #[serde(default)]
    pub role: Option<String>,
    /// Whether the cluster is gated behind a login
    #[serde(default)]
    pub login: bool,
    /// Capabilities this connection needs
    #[serde(default)]
    pub requires: Vec<CapabilityRequirement>,
    /// Labels that must be running first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health polling interval override
    #[serde(default)]
    pub health_check_interval: Option<Duration>,
}

impl K8sConnectionConfig {
    /// Minimal config for `context`/`cluster`
    pub fn new(label: impl Into<String>, context: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            context: context.into(),
            cluster: cluster.into(),
            role: None,
            login: false,
            requires: Vec::new(),
            depends_on: Vec::new(),
            health_check_interval: None,
        }
    }
}

/// Service keeping a cluster session alive
pub struct K8sConnectionService {
    machine: Arc<StateMachine>,
    config: K8sConnectionConfig,
    provider: Arc<dyn ClusterSessionProvider>,
    capabilities: Option<Arc<CapabilityClient>>,
    spawner: Arc<dyn Spawner>,
    nodes: Mutex<Option<NodeHealth>>,
}

impl K8sConnectionService {
    /// Create a connection service
    pub fn new(
        config: K8sConnectionConfig,
        provider: Arc<dyn ClusterSessionProvider>,
        registry: Arc<CapabilityRegistry>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let capabilities = (!config.requires.is_empty()).then(|| {
            Arc::new(CapabilityClient::new(
                config.label.clone(),
                registry,
                config.requires.clone(),
            ))
        });
        Self {
            machine: Arc::new(StateMachine::new(config.label.clone(), ServiceType::K8sConnection)),
            config,
            provider,
            capabilities,
            spawner,
            nodes: Mutex::new(None),
        }
    }

    /// Connection settings
    pub fn config(&self) -> &K8sConnectionConfig {
        &self.config
    }

    /// Last observed node readiness
    pub fn node_health(&self) -> Option<NodeHealth> {
        *self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn establish(&self, ctx: &ServiceContext) -> Result<()> {
        if let Some(client) = &self.capabilities {
            client.wait_for_capabilities(ctx).await?;
            self.watch_capability_loss(client.clone());
        }

        if self.config.login {
            ctx.run(self.login()).await??;
        }

        ctx.run(self.provider.check_api_health(ctx, &self.config.context))
            .await?
            .map_err(|err| {
                Error::health_check(format!(
                    "API for context '{}' unreachable: {}",
                    self.config.context, err
                ))
            })?;

        self.refresh_nodes(ctx).await;
        Ok(())
    }

    async fn login(&self) -> Result<()> {
        let cluster = &self.config.cluster;
        let handle = self
            .capabilities
            .as_ref()
            .and_then(|client| client.capability_handle(AUTH_CAPABILITY).map(|h| (client, h)));

        match handle {
            Some((client, handle)) if client.registry().has_executor(&handle.id) => {
                info!(
                    "Logging in to '{}' through capability provider '{}'",
                    cluster, handle.provider_name
                );
                client
                    .registry()
                    .execute(
                        &handle.id,
                        "login",
                        json!({ "cluster": cluster, "context": self.config.context }),
                    )
                    .await
                    .map(|_| ())
                    .map_err(|err| Error::authentication(cluster, err.to_string()))
            }
            _ => {
                info!("Logging in to '{}'", cluster);
                let output = self
                    .provider
                    .login(cluster)
                    .await
                    .map_err(|err| Error::authentication(cluster, err.to_string()))?;
                debug!("Login output for '{}': {}", cluster, output.stdout.trim());
                Ok(())
            }
        }
    }

    async fn refresh_nodes(&self, ctx: &ServiceContext) {
        let probe = self
            .provider
            .get_cluster_node_health(ctx, &self.config.context);
        match ctx.run(probe).await {
            Ok(Ok(nodes)) => {
                if !nodes.all_ready() {
                    warn!(
                        "Cluster '{}': {} of {} nodes ready",
                        self.config.label, nodes.ready, nodes.total
                    );
                }
                *self.nodes.lock().unwrap_or_else(PoisonError::into_inner) = Some(nodes);
            }
            Ok(Err(err)) | Err(err) => {
                debug!("Node health for '{}' unavailable: {}", self.config.label, err);
            }
        }
    }

    /// Stop the service when a required capability goes away
    fn watch_capability_loss(&self, client: Arc<CapabilityClient>) {
        let machine = self.machine.clone();
        self.machine
            .tasks()
            .install(LOSS_WATCHER, self.spawner.as_ref(), move |token| {
                Box::pin(async move {
                    while let Some((notice, impact)) = client.next_loss(&token).await {
                        match impact {
                            LossImpact::Optional(capability_type) => {
                                info!(
                                    "'{}' continues without '{}' (provider '{}' left)",
                                    machine.label(),
                                    capability_type,
                                    notice.provider_name
                                );
                            }
                            LossImpact::Required(capability_type) => {
                                if machine.begin_stop() != StopDecision::Proceed {
                                    continue;
                                }
                                warn!(
                                    "'{}' stopping: required capability '{}' lost",
                                    machine.label(),
                                    capability_type
                                );
                                client.release_all();
                                let reason = Error::capability_unavailable(
                                    capability_type,
                                    format!("provider '{}' unregistered", notice.provider_name),
                                );
                                if let Err(err) = machine.finish_stop(Some(reason)) {
                                    warn!("'{}' could not finish stop: {}", machine.label(), err);
                                }
                                break;
                            }
                        }
                    }
                })
            });
    }

    async fn teardown(&self) {
        self.machine.tasks().shutdown_all().await;
        if let Some(client) = &self.capabilities {
            client.release_all();
        }
    }
}

#[async_trait]
impl Service for K8sConnectionService {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    async fn start(&self, ctx: &ServiceContext) -> Result<()> {
        if !self.machine.begin_start()? {
            debug!("Connection '{}' already running", self.config.label);
            return Ok(());
        }
        info!("Connecting to cluster '{}' ({})", self.config.cluster, self.config.context);

        match self.establish(ctx).await {
            Ok(()) => {
                if !self.machine.finish_start()? {
                    debug!("Connection '{}' was stopped while starting", self.config.label);
                    self.teardown().await;
                }
                Ok(())
            }
            Err(err) => {
                warn!("Connection '{}' failed to start: {}", self.config.label, err);
                self.teardown().await;
                self.machine.fail(err.clone())?;
                Err(err)
            }
        }
    }

    async fn stop(&self, _ctx: &ServiceContext) -> Result<()> {
        match self.machine.begin_stop() {
            StopDecision::AlreadyStopped | StopDecision::AlreadyStopping => Ok(()),
            StopDecision::TeardownOnly => {
                self.teardown().await;
                Ok(())
            }
            StopDecision::Proceed => {
                info!("Disconnecting from cluster '{}'", self.config.cluster);
                self.teardown().await;
                self.machine.finish_stop(None)
            }
        }
    }

    fn dependencies(&self) -> Vec<String> {
        self.config.depends_on.clone()
    }

    fn capability_requirements(&self) -> Vec<CapabilityRequirement> {
        self.config.requires.clone()
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self as &dyn HealthChecker)
    }

    fn data_provider(&self) -> Option<&dyn DataProvider> {
        Some(self as &dyn DataProvider)
    }
}

#[async_trait]
impl HealthChecker for K8sConnectionService {
    async fn check_health(&self, ctx: &ServiceContext) -> Result<HealthStatus> {
        match self
            .provider
            .check_api_health(ctx, &self.config.context)
            .await
        {
            Ok(()) => {
                self.refresh_nodes(ctx).await;
                self.machine.update_health(HealthStatus::Healthy, None)?;
                Ok(HealthStatus::Healthy)
            }
            Err(err) => {
                let err = Error::health_check(format!(
                    "API for context '{}' unreachable: {}",
                    self.config.context, err
                ));
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

impl DataProvider for K8sConnectionService {
    fn service_data(&self) -> ServiceData {
        let mut data = ServiceData::new();
        data.insert("context".to_string(), json!(self.config.context));
        data.insert("cluster".to_string(), json!(self.config.cluster));
        data.insert("role".to_string(), json!(self.config.role));
        data.insert("login".to_string(), json!(self.config.login));
        let nodes = self.node_health();
        data.insert("ready_nodes".to_string(), json!(nodes.map(|n| n.ready)));
        data.insert("total_nodes".to_string(), json!(nodes.map(|n| n.total)));
        if let Some(client) = &self.capabilities {
            data.extend(client.capability_data());
        }
        data
    }
}
