//! Orchestrator settings

use service_runtime::DEFAULT_EVENT_BUFFER;
use std::time::Duration;

/// Tunables for the orchestrator and its health scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Polling interval for services that do not specify their own
    pub health_check_interval: Duration,
    /// Upper bound on a single health check call
    pub health_check_timeout: Duration,
    /// Upper bound on a single service start, including capability waits
    pub startup_timeout: Duration,
    /// Upper bound on a single service stop
    pub stop_timeout: Duration,
    /// Maximum number of services starting at the same time
    pub max_parallel_starts: usize,
    /// Per-subscriber event queue length
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(10),
            max_parallel_starts: 4,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.max_parallel_starts, 4);
        assert_eq!(config.event_buffer, 128);
    }
}
