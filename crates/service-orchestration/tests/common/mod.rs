//! Fake services shared by the orchestration tests

#![allow(dead_code)]

use async_trait::async_trait;
use service_runtime::{
    CapabilityRequirement, Error, HealthChecker, HealthStatus, Result, Service, ServiceContext,
    ServiceType, StateMachine, StopDecision,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake health check behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Healthy,
    Unhealthy,
    Hang,
}

/// Configurable in-memory service
pub struct FakeService {
    machine: StateMachine,
    deps: Vec<String>,
    requires: Vec<CapabilityRequirement>,
    fail_start: bool,
    probe: Mutex<Probe>,
    interval: Option<Duration>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub checks: AtomicUsize,
    stop_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl FakeService {
    pub fn new(label: &str) -> Self {
        Self {
            machine: StateMachine::new(label, ServiceType::PortForward),
            deps: Vec::new(),
            requires: Vec::new(),
            fail_start: false,
            probe: Mutex::new(Probe::Healthy),
            interval: None,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            stop_log: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn requires(mut self, requirement: CapabilityRequirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn checked_every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn logging_stops(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.stop_log = Some(log);
        self
    }

    pub fn set_probe(&self, probe: Probe) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Service for FakeService {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    async fn start(&self, _ctx: &ServiceContext) -> Result<()> {
        if !self.machine.begin_start()? {
            return Ok(());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        if self.fail_start {
            let err = Error::provider(format!("{} refused to start", self.label()));
            self.machine.fail(err.clone())?;
            return Err(err);
        }
        self.machine.finish_start()?;
        Ok(())
    }

    async fn stop(&self, _ctx: &ServiceContext) -> Result<()> {
        if let Some(log) = &self.stop_log {
            log.lock().unwrap().push(self.label().to_string());
        }
        match self.machine.begin_stop() {
            StopDecision::Proceed => {
                self.stops.fetch_add(1, Ordering::SeqCst);
                self.machine.finish_stop(None)
            }
            _ => Ok(()),
        }
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn capability_requirements(&self) -> Vec<CapabilityRequirement> {
        self.requires.clone()
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        self.interval.map(|_| self as &dyn HealthChecker)
    }
}

#[async_trait]
impl HealthChecker for FakeService {
    async fn check_health(&self, _ctx: &ServiceContext) -> Result<HealthStatus> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let probe = *self.probe.lock().unwrap();
        match probe {
            Probe::Healthy => {
                self.machine.update_health(HealthStatus::Healthy, None)?;
                Ok(HealthStatus::Healthy)
            }
            Probe::Unhealthy => {
                let err = Error::health_check("probe failed");
                self.machine
                    .update_health(HealthStatus::Unhealthy, Some(err.clone()))?;
                Err(err)
            }
            Probe::Hang => {
                async_runtime_compat::sleep(Duration::from_secs(3600)).await;
                Ok(HealthStatus::Healthy)
            }
        }
    }

    fn health_check_interval(&self) -> Option<Duration> {
        self.interval
    }
}
