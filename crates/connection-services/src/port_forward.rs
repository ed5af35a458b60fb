//! Port-forward service
//!
//! Wraps a tunnel from the [`TunnelProvider`] in the service lifecycle. The
//! provider reports progress through a status callback; the service is
//! `Running` once the tunnel reports `ForwardingActive`. After startup a
//! data-plane task keeps interpreting status updates: errors degrade health,
//! an unexpected close fails the service.

use crate::providers::{TunnelHandle, TunnelProvider, TunnelStatus, TunnelUpdateFn};
use crate::target::{ForwardTarget, PortSpec, TunnelTarget};
use async_channel::{Receiver, TrySendError};
use async_runtime_compat::{CancellationToken, Spawner};
use async_trait::async_trait;
use futures::future::{select, Either};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_runtime::{
    DataProvider, Error, HealthChecker, HealthStatus, Result, Service, ServiceContext, ServiceData,
    ServiceType, StateMachine, StopDecision,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const DATA_PLANE: &str = "data-plane";

/// Settings of one port-forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortForwardConfig {
    /// Unique label
    pub label: String,
    /// Kubeconfig context
    pub context: String,
    /// Namespace of the target
    pub namespace: String,
    /// Workload to forward to
    pub target: ForwardTarget,
    /// Local and remote ports
    pub ports: PortSpec,
    /// Labels that must be running first (usually the cluster connection)
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health polling interval override
    #[serde(default)]
    pub health_check_interval: Option<Duration>,
}

struct Tunnel {
    handle: Option<Box<dyn TunnelHandle>>,
    status: Option<TunnelStatus>,
}

/// Service owning one local tunnel
pub struct PortForwardService {
    machine: Arc<StateMachine>,
    config: PortForwardConfig,
    provider: Arc<dyn TunnelProvider>,
    spawner: Arc<dyn Spawner>,
    tunnel: Arc<Mutex<Tunnel>>,
}

fn lock(tunnel: &Mutex<Tunnel>) -> MutexGuard<'_, Tunnel> {
    tunnel.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PortForwardService {
    /// Create a port-forward service
    pub fn new(
        config: PortForwardConfig,
        provider: Arc<dyn TunnelProvider>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            machine: Arc::new(StateMachine::new(config.label.clone(), ServiceType::PortForward)),
            config,
            provider,
            spawner,
            tunnel: Arc::new(Mutex::new(Tunnel {
                handle: None,
                status: None,
            })),
        }
    }

    /// Forward settings
    pub fn config(&self) -> &PortForwardConfig {
        &self.config
    }

    /// Most recent status reported by the tunnel
    pub fn tunnel_status(&self) -> Option<TunnelStatus> {
        lock(&self.tunnel).status.clone()
    }

    fn tunnel_target(&self) -> TunnelTarget {
        TunnelTarget {
            context: self.config.context.clone(),
            namespace: self.config.namespace.clone(),
            resource: self.config.target.clone(),
        }
    }

    /// Open the tunnel and wait until it forwards
    async fn open(&self, ctx: &ServiceContext) -> Result<Receiver<TunnelStatus>> {
        let (tx, rx) = async_channel::unbounded();
        let on_update: TunnelUpdateFn = Arc::new(move |status| {
            if let Err(TrySendError::Closed(status)) = tx.try_send(status) {
                debug!("Dropping tunnel status {:?} after close", status);
            }
        });

        let target = self.tunnel_target();
        info!(
            "Forwarding localhost:{} to {}/{}:{}",
            self.config.ports.local, target.namespace, target.resource, self.config.ports.remote
        );
        let handle = ctx
            .run(
                self.provider
                    .start_tunnel(ctx, &target, self.config.ports, on_update),
            )
            .await??;
        lock(&self.tunnel).handle = Some(handle);

        loop {
            let status = {
                let next = std::pin::pin!(rx.recv());
                let done = std::pin::pin!(ctx.done());
                match select(next, done).await {
                    Either::Left((Ok(status), _)) => status,
                    Either::Left((Err(_), _)) => {
                        return Err(Error::provider("tunnel provider dropped its status channel"));
                    }
                    Either::Right((err, _)) => return Err(err),
                }
            };
            lock(&self.tunnel).status = Some(status.clone());

            match status {
                TunnelStatus::Initializing => debug!("Tunnel '{}' initializing", self.config.label),
                TunnelStatus::ForwardingActive => return Ok(rx),
                TunnelStatus::Error(message) => {
                    return Err(Error::provider(format!("tunnel failed: {}", message)));
                }
                TunnelStatus::Stopped => {
                    return Err(Error::provider("tunnel closed during startup"));
                }
            }
        }
    }

    fn spawn_data_plane(&self, updates: Receiver<TunnelStatus>) {
        let machine = self.machine.clone();
        let tunnel = self.tunnel.clone();
        self.machine
            .tasks()
            .install(DATA_PLANE, self.spawner.as_ref(), move |token| {
                Box::pin(data_plane(machine, tunnel, updates, token))
            });
    }

    async fn close_tunnel(&self) {
        let handle = lock(&self.tunnel).handle.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.stop().await {
                warn!("Tunnel '{}' did not stop cleanly: {}", self.config.label, err);
            }
        }
    }
}

/// Interpret tunnel status updates while the service runs
async fn data_plane(
    machine: Arc<StateMachine>,
    tunnel: Arc<Mutex<Tunnel>>,
    updates: Receiver<TunnelStatus>,
    token: CancellationToken,
) {
    loop {
        let status = {
            let next = std::pin::pin!(updates.recv());
            let cancelled = std::pin::pin!(token.cancelled());
            match select(next, cancelled).await {
                Either::Left((Ok(status), _)) => status,
                Either::Left((Err(_), _)) | Either::Right(_) => break,
            }
        };
        lock(&tunnel).status = Some(status.clone());

        let result = match status {
            TunnelStatus::Initializing => continue,
            TunnelStatus::ForwardingActive => machine.update_health(HealthStatus::Healthy, None),
            TunnelStatus::Error(message) => {
                warn!("Tunnel '{}' reported: {}", machine.label(), message);
                machine.update_health(HealthStatus::Unhealthy, Some(Error::health_check(message)))
            }
            TunnelStatus::Stopped => {
                warn!("Tunnel '{}' closed unexpectedly", machine.label());
                let result = machine.fail(Error::provider("tunnel closed unexpectedly"));
                if let Err(err) = result {
                    debug!("'{}': {}", machine.label(), err);
                }
                break;
            }
        };
        if let Err(err) = result {
            debug!("'{}' ignored tunnel update: {}", machine.label(), err);
        }
    }
}

#[async_trait]
impl Service for PortForwardService {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    async fn start(&self, ctx: &ServiceContext) -> Result<()> {
        if !self.machine.begin_start()? {
            return Ok(());
        }

        match self.open(ctx).await {
            Ok(updates) => {
                self.spawn_data_plane(updates);
                if !self.machine.finish_start()? {
                    debug!("Port-forward '{}' was stopped while starting", self.config.label);
                    self.machine.tasks().shutdown(DATA_PLANE).await;
                    self.close_tunnel().await;
                }
                Ok(())
            }
            Err(err) => {
                warn!("Port-forward '{}' failed to start: {}", self.config.label, err);
                self.close_tunnel().await;
                self.machine.fail(err.clone())?;
                Err(err)
            }
        }
    }

    async fn stop(&self, _ctx: &ServiceContext) -> Result<()> {
        match self.machine.begin_stop() {
            StopDecision::AlreadyStopped | StopDecision::AlreadyStopping => Ok(()),
            StopDecision::TeardownOnly => {
                self.machine.tasks().shutdown_all().await;
                self.close_tunnel().await;
                Ok(())
            }
            StopDecision::Proceed => {
                info!("Stopping port-forward '{}'", self.config.label);
                self.machine.tasks().shutdown_all().await;
                self.close_tunnel().await;
                lock(&self.tunnel).status = Some(TunnelStatus::Stopped);
                self.machine.finish_stop(None)
            }
        }
    }

    fn dependencies(&self) -> Vec<String> {
        self.config.depends_on.clone()
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self as &dyn HealthChecker)
    }

    fn data_provider(&self) -> Option<&dyn DataProvider> {
        Some(self as &dyn DataProvider)
    }
}

#[async_trait]
impl HealthChecker for PortForwardService {
    /// Health follows the last status the tunnel reported
    async fn check_health(&self, _ctx: &ServiceContext) -> Result<HealthStatus> {
        match self.tunnel_status() {
            Some(TunnelStatus::ForwardingActive) => {
                self.machine.update_health(HealthStatus::Healthy, None)?;
                Ok(HealthStatus::Healthy)
            }
            Some(TunnelStatus::Error(message)) => {
                let err = Error::health_check(message);
                self.machine
                    .update_health(HealthStatus::Unhealthy, Some(err.clone()))?;
                Err(err)
            }
            other => {
                let err = Error::health_check(format!("tunnel not forwarding ({:?})", other));
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

impl DataProvider for PortForwardService {
    fn service_data(&self) -> ServiceData {
        let mut data = ServiceData::new();
        data.insert("context".to_string(), json!(self.config.context));
        data.insert("namespace".to_string(), json!(self.config.namespace));
        data.insert("target".to_string(), json!(self.config.target.to_string()));
        data.insert("local_port".to_string(), json!(self.config.ports.local));
        data.insert("remote_port".to_string(), json!(self.config.ports.remote));
        data.insert(
            "tunnel_status".to_string(),
            serde_json::to_value(self.tunnel_status()).unwrap_or_default(),
        );
        data
    }
}
