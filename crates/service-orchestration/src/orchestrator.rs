//! Dependency-driven orchestration engine
//!
//! The [`Orchestrator`] owns the service registry, derives the start order
//! from the dependency graph, starts independent services concurrently and
//! keeps going when some of them fail.

use crate::{
    DependencyGraph, Error, HealthReport, HealthScheduler, OrchestrationContext, Result,
    ServiceRegistry,
};
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use service_runtime::{
    CapabilityRegistry, Error as RuntimeError, EventBus, EventFilter, ProviderInfo, Service,
    ServiceContext, ServiceData, ServiceState, ServiceStatus, ServiceType, Subscription,
};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type StartFuture<'a> = Pin<Box<dyn Future<Output = (String, Result<()>)> + Send + 'a>>;

/// Control surface over the managed services
pub struct Orchestrator {
    context: OrchestrationContext,
    registry: ServiceRegistry,
    bus: EventBus,
    health: HealthScheduler,
}

impl Orchestrator {
    /// Create an orchestrator with no services
    pub fn new(context: OrchestrationContext) -> Self {
        let config = context.config();
        let bus = EventBus::with_capacity(config.event_buffer);
        let health = HealthScheduler::new(
            context.spawner.clone(),
            config.health_check_interval,
            config.health_check_timeout,
        );
        Self {
            context,
            registry: ServiceRegistry::new(),
            bus,
            health,
        }
    }

    /// The context this orchestrator was built with
    pub fn context(&self) -> &OrchestrationContext {
        &self.context
    }

    /// The capability registry shared with managed services
    pub fn capability_registry(&self) -> &Arc<CapabilityRegistry> {
        &self.context.capabilities
    }

    /// The event bus every state change is published on
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Add a service and route its state changes to the event bus
    pub fn register(&self, service: Arc<dyn Service>) -> Result<()> {
        let bus = self.bus.clone();
        self.registry.insert(service.clone())?;
        service.set_state_change_callback(Arc::new(move |event| {
            bus.publish(event.clone());
        }));
        Ok(())
    }

    /// Stop and remove a service
    pub async fn unregister(&self, label: &str, ctx: &ServiceContext) -> Result<Arc<dyn Service>> {
        let service = self.registry.get(label)?;
        self.health.stop_monitoring(label).await;
        if let Err(err) = self.stop_one(&service, ctx).await {
            warn!("Service '{}' did not stop cleanly on unregister: {}", label, err);
        }
        service.set_state_change_callback(Arc::new(|_| {}));
        self.health.forget(label);
        self.registry.remove(label)
    }

    /// Start every registered service in dependency order
    ///
    /// Failures are collected rather than aborting the batch, except for a
    /// dependency cycle which aborts before anything starts. A service whose
    /// hard dependency did not reach `Running` is not started and is reported
    /// as a dependency failure.
    pub async fn start(&self, ctx: &ServiceContext) -> Vec<Error> {
        let services = self.registry.all();
        let graph = match DependencyGraph::build(&services) {
            Ok(graph) => graph,
            Err(err) => return vec![err],
        };
        let order = match graph.topological_sort() {
            Ok(order) => order,
            Err(err) => {
                error!("Aborting startup: {}", err);
                return vec![err];
            }
        };
        info!("Start order: {:?}", order);

        let max_parallel = self.context.config().max_parallel_starts.max(1);
        let mut pending: Vec<String> = order;
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut errors = Vec::new();
        let mut in_flight: FuturesUnordered<StartFuture<'_>> = FuturesUnordered::new();

        loop {
            // Launch everything whose ordering dependencies have completed.
            let mut progressed = true;
            while progressed {
                progressed = false;
                let mut index = 0;
                while index < pending.len() && in_flight.len() < max_parallel {
                    let Some(node) = graph.node(&pending[index]) else {
                        pending.remove(index);
                        continue;
                    };
                    if !node.ordering_dependencies().all(|dep| completed.contains(dep)) {
                        index += 1;
                        continue;
                    }

                    let label = pending.remove(index);
                    progressed = true;

                    if let Some(dependency) =
                        node.dependencies.iter().find(|dep| failed.contains(*dep))
                    {
                        warn!(
                            "Skipping '{}': dependency '{}' did not reach Running",
                            label, dependency
                        );
                        errors.push(Error::Service(RuntimeError::dependency_failure(
                            &label, dependency,
                        )));
                        failed.insert(label.clone());
                        completed.insert(label);
                        continue;
                    }

                    match self.registry.get(&label) {
                        Ok(service) => in_flight.push(self.start_future(label, service, ctx)),
                        Err(err) => {
                            errors.push(err);
                            failed.insert(label.clone());
                            completed.insert(label);
                        }
                    }
                }
            }

            let Some((label, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(()) => debug!("Service '{}' reached Running", label),
                Err(err) => {
                    warn!("Service '{}' failed to start: {}", label, err);
                    errors.push(err);
                    failed.insert(label.clone());
                }
            }
            completed.insert(label);
        }

        info!(
            "Startup finished: {} service(s), {} error(s)",
            completed.len(),
            errors.len()
        );
        errors
    }

    fn start_future<'a>(
        &'a self,
        label: String,
        service: Arc<dyn Service>,
        ctx: &'a ServiceContext,
    ) -> StartFuture<'a> {
        Box::pin(async move {
            let result = self.start_one(&service, ctx).await;
            (label, result)
        })
    }

    async fn start_one(&self, service: &Arc<dyn Service>, ctx: &ServiceContext) -> Result<()> {
        let label = service.label().to_string();
        let start_ctx = ctx.with_timeout(self.context.config().startup_timeout);
        info!("Starting service '{}'", label);

        if let Err(source) = service.start(&start_ctx).await {
            return Err(Error::Start { label, source });
        }
        if service.state() != ServiceState::Running {
            return Err(Error::Start {
                label,
                source: service
                    .last_error()
                    .unwrap_or_else(|| RuntimeError::provider("service did not reach Running")),
            });
        }

        self.health.start_monitoring(service.clone());
        Ok(())
    }

    async fn stop_one(&self, service: &Arc<dyn Service>, ctx: &ServiceContext) -> Result<()> {
        let stop_ctx = ctx.with_timeout(self.context.config().stop_timeout);
        info!("Stopping service '{}'", service.label());
        service.stop(&stop_ctx).await.map_err(Error::from)
    }

    /// Start one service
    ///
    /// Every hard dependency must already be `Running`.
    pub async fn start_service(&self, label: &str, ctx: &ServiceContext) -> Result<()> {
        let service = self.registry.get(label)?;
        for dependency in service.dependencies() {
            let running = self
                .registry
                .get(&dependency)
                .map(|dep| dep.state() == ServiceState::Running)
                .unwrap_or(false);
            if !running {
                return Err(Error::Service(RuntimeError::dependency_failure(
                    label, dependency,
                )));
            }
        }
        self.start_one(&service, ctx).await
    }

    /// Stop one service and its health polling
    pub async fn stop_service(&self, label: &str, ctx: &ServiceContext) -> Result<()> {
        let service = self.registry.get(label)?;
        self.health.stop_monitoring(label).await;
        self.stop_one(&service, ctx).await
    }

    /// Stop, then start one service
    pub async fn restart_service(&self, label: &str, ctx: &ServiceContext) -> Result<()> {
        let service = self.registry.get(label)?;
        info!("Restarting service '{}'", label);
        self.health.stop_monitoring(label).await;
        self.stop_one(&service, ctx).await?;
        self.start_service(label, ctx).await
    }

    /// Stop health polling and every service in reverse dependency order
    pub async fn stop_all(&self, ctx: &ServiceContext) -> Vec<Error> {
        self.health.stop_all().await;

        let order = DependencyGraph::build(&self.registry.all())
            .and_then(|graph| graph.topological_sort())
            .unwrap_or_else(|err| {
                debug!("Falling back to registration order for shutdown: {}", err);
                self.registry.labels()
            });

        let mut errors = Vec::new();
        for label in order.iter().rev() {
            let Ok(service) = self.registry.get(label) else {
                continue;
            };
            if let Err(err) = self.stop_one(&service, ctx).await {
                warn!("Service '{}' failed to stop: {}", label, err);
                errors.push(err);
            }
        }
        errors
    }

    /// Status of one service
    pub fn get_service_status(&self, label: &str) -> Result<ServiceStatus> {
        Ok(self.registry.get(label)?.status())
    }

    /// Status of every service in registration order
    pub fn get_all_services(&self) -> Vec<ServiceStatus> {
        self.registry.all().iter().map(|s| s.status()).collect()
    }

    /// Current dependency graph
    pub fn get_dependency_graph(&self) -> Result<DependencyGraph> {
        DependencyGraph::build(&self.registry.all())
    }

    /// Subscribe to every state change
    pub fn subscribe_to_state_changes(&self) -> Subscription {
        self.bus.subscribe(EventFilter::all())
    }

    /// Subscribe with a filter
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.bus.subscribe(filter)
    }

    fn data_of(&self, service_type: ServiceType) -> IndexMap<String, ServiceData> {
        self.registry
            .all()
            .iter()
            .filter(|service| service.service_type() == service_type)
            .map(|service| {
                let data = service
                    .data_provider()
                    .map(|provider| provider.service_data())
                    .unwrap_or_default();
                (service.label().to_string(), data)
            })
            .collect()
    }

    /// Data blobs of cluster connections, keyed by label
    pub fn list_connections(&self) -> IndexMap<String, ServiceData> {
        self.data_of(ServiceType::K8sConnection)
    }

    /// Data blobs of port-forwards, keyed by label
    pub fn list_forwards(&self) -> IndexMap<String, ServiceData> {
        self.data_of(ServiceType::PortForward)
    }

    /// Data blobs of proxies, keyed by label
    pub fn list_proxies(&self) -> IndexMap<String, ServiceData> {
        self.data_of(ServiceType::Proxy)
    }

    /// Health telemetry for one service
    pub fn health_report(&self, label: &str) -> Option<HealthReport> {
        self.health.report(label)
    }

    /// Whether health polling is active for `label`
    pub fn is_monitoring(&self, label: &str) -> bool {
        self.health.is_monitoring(label)
    }

    /// Registered capability providers
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.context.capabilities.list_providers()
    }
}
