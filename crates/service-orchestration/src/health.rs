//! Central health polling
//!
//! One background task per monitored service. Each task sleeps for the
//! service's interval, then runs a single check bounded by the per-call
//! timeout, so a service is never checked more than once per interval.
//! Only `Running` services are checked; checks change health, never state.

use async_channel::Receiver;
use async_runtime_compat::{sleep, CancellationToken, Spawner};
use chrono::{DateTime, Utc};
use futures::future::{select, Either};
use serde::Serialize;
use service_runtime::{Error, HealthStatus, Service, ServiceContext, ServiceState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Advisory telemetry for one monitored service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    /// Checks completed (including timed out ones)
    pub checks_run: u64,
    /// Failed or timed out checks since the last healthy one
    pub consecutive_failures: u32,
    /// Result of the most recent check
    pub last_result: Option<HealthStatus>,
    /// Error of the most recent failed check
    pub last_error: Option<String>,
    /// When the most recent check completed
    pub last_check: Option<DateTime<Utc>>,
    /// Polling interval in use
    pub interval: Duration,
}

impl HealthReport {
    fn record(&mut self, result: &Result<HealthStatus, Error>) {
        self.checks_run += 1;
        self.last_check = Some(Utc::now());
        match result {
            Ok(HealthStatus::Healthy) => {
                self.consecutive_failures = 0;
                self.last_result = Some(HealthStatus::Healthy);
                self.last_error = None;
            }
            Ok(status) => {
                self.consecutive_failures += 1;
                self.last_result = Some(*status);
            }
            Err(err) => {
                self.consecutive_failures += 1;
                self.last_result = Some(HealthStatus::Unhealthy);
                self.last_error = Some(err.to_string());
            }
        }
    }
}

struct MonitorHandle {
    token: CancellationToken,
    done: Receiver<()>,
}

type Reports = Arc<Mutex<HashMap<String, HealthReport>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Health polling scheduler that runs one monitor task per service
pub struct HealthScheduler {
    spawner: Arc<dyn Spawner>,
    default_interval: Duration,
    check_timeout: Duration,
    monitors: Mutex<HashMap<String, MonitorHandle>>,
    reports: Reports,
}

impl HealthScheduler {
    /// Create a scheduler
    pub fn new(spawner: Arc<dyn Spawner>, default_interval: Duration, check_timeout: Duration) -> Self {
        Self {
            spawner,
            default_interval,
            check_timeout,
            monitors: Mutex::new(HashMap::new()),
            reports: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start health monitoring for a service
    ///
    /// Services without a health checker are skipped. An existing monitor for
    /// the same label is cancelled and replaced.
    pub fn start_monitoring(&self, service: Arc<dyn Service>) {
        let label = service.label().to_string();
        let Some(checker) = service.health_checker() else {
            debug!("No health checker for service '{}'", label);
            return;
        };
        let interval = checker
            .health_check_interval()
            .unwrap_or(self.default_interval);

        let token = CancellationToken::new();
        let (done_tx, done) = async_channel::bounded::<()>(1);
        let previous = lock(&self.monitors).insert(
            label.clone(),
            MonitorHandle {
                token: token.clone(),
                done,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        lock(&self.reports).insert(
            label.clone(),
            HealthReport {
                interval,
                ..HealthReport::default()
            },
        );

        let reports = self.reports.clone();
        let check_timeout = self.check_timeout;
        self.spawner.spawn(Box::pin(async move {
            let _done = done_tx;
            monitor_service_health(service, reports, token, interval, check_timeout).await;
        }));

        info!(
            "Health monitoring started for service '{}' with interval {:?}",
            label, interval
        );
    }

    /// Stop health monitoring for a service and wait for its task to exit
    pub async fn stop_monitoring(&self, label: &str) {
        let handle = lock(&self.monitors).remove(label);
        if let Some(handle) = handle {
            debug!("Stopping health monitoring for service '{}'", label);
            handle.token.cancel();
            while handle.done.recv().await.is_ok() {}
        }
    }

    /// Stop every monitor
    pub async fn stop_all(&self) {
        let handles: Vec<_> = lock(&self.monitors).drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.token.cancel();
        }
        for handle in handles {
            while handle.done.recv().await.is_ok() {}
        }
    }

    /// Whether a monitor task is running for `label`
    pub fn is_monitoring(&self, label: &str) -> bool {
        lock(&self.monitors)
            .get(label)
            .map(|handle| !handle.done.is_closed())
            .unwrap_or(false)
    }

    /// Telemetry for one service
    pub fn report(&self, label: &str) -> Option<HealthReport> {
        lock(&self.reports).get(label).cloned()
    }

    /// Telemetry for every service ever monitored
    pub fn reports(&self) -> HashMap<String, HealthReport> {
        lock(&self.reports).clone()
    }

    /// Forget the telemetry of a removed service
    pub fn forget(&self, label: &str) {
        lock(&self.reports).remove(label);
    }
}

/// Monitor a service's health until `token` is cancelled
async fn monitor_service_health(
    service: Arc<dyn Service>,
    reports: Reports,
    token: CancellationToken,
    interval: Duration,
    check_timeout: Duration,
) {
    let label = service.label().to_string();
    debug!("Health monitoring task started for service '{}'", label);

    loop {
        {
            let tick = std::pin::pin!(sleep(interval));
            let cancelled = std::pin::pin!(token.cancelled());
            if let Either::Right(_) = select(tick, cancelled).await {
                break;
            }
        }

        if service.state() != ServiceState::Running {
            continue;
        }
        let Some(checker) = service.health_checker() else {
            break;
        };

        let ctx = ServiceContext::with_token(token.clone()).with_timeout(check_timeout);
        let result = match ctx.run(checker.check_health(&ctx)).await {
            Ok(result) => result,
            Err(Error::Cancelled) => break,
            Err(err) => {
                warn!(
                    "Health check for '{}' timed out after {:?}",
                    label, check_timeout
                );
                let err = Error::health_check(format!("check timed out: {}", err));
                if let Err(update) = service
                    .machine()
                    .update_health(HealthStatus::Unhealthy, Some(err.clone()))
                {
                    debug!("Could not record timeout for '{}': {}", label, update);
                }
                Err(err)
            }
        };

        match &result {
            Ok(status) => debug!("Health check for '{}': {}", label, status),
            Err(err) => warn!("Service '{}' is unhealthy: {}", label, err),
        }
        if let Some(report) = lock(&reports).get_mut(&label) {
            report.record(&result);
        }
    }

    debug!("Health monitoring stopped for service '{}'", label);
}
