//! # envctl Configuration
//!
//! YAML configuration parser for envctl environments.
//!
//! An environment file lists cluster connections, port-forwards and auxiliary
//! proxies. [`parser`] reads and validates it, substituting `${VAR}` and
//! `${VAR:-default}` from the process environment; [`convert`] turns it into
//! the [`connection_services::ServiceDefinition`]s and
//! [`service_orchestration::OrchestratorConfig`] the runtime works with.

#![warn(missing_docs)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod convert;
pub mod parser;

pub use convert::{to_definitions, to_orchestrator_config};
pub use parser::{parse_file, parse_str, substitute_env_vars};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// Service reference not found
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
}

impl From<service_runtime::Error> for ConfigError {
    fn from(err: service_runtime::Error) -> Self {
        match err {
            service_runtime::Error::Configuration(message) => Self::ValidationError(message),
            other => Self::ValidationError(other.to_string()),
        }
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Optional environment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Orchestrator settings
    #[serde(default)]
    pub settings: Settings,

    /// Auxiliary proxies, keyed by label
    #[serde(default)]
    pub proxies: IndexMap<String, ProxyEntry>,

    /// Cluster connections, keyed by label
    #[serde(default)]
    pub clusters: IndexMap<String, ClusterEntry>,

    /// Port-forwards, keyed by label
    #[serde(default)]
    pub port_forwards: IndexMap<String, ForwardEntry>,
}

impl Config {
    /// Every label in the file, proxies first, in file order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.proxies
            .keys()
            .chain(self.clusters.keys())
            .chain(self.port_forwards.keys())
            .map(String::as_str)
    }
}

/// Orchestrator settings, durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Default log filter for the CLI
    pub log_level: Option<String>,
    /// Default health polling interval
    pub health_check_interval: u64,
    /// Upper bound on one health check
    pub health_check_timeout: u64,
    /// Upper bound on one service start
    pub startup_timeout: u64,
    /// Upper bound on one service stop
    pub stop_timeout: u64,
    /// Services started concurrently
    pub max_parallel_starts: usize,
    /// Per-subscriber event queue length
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: None,
            health_check_interval: 30,
            health_check_timeout: 10,
            startup_timeout: 60,
            stop_timeout: 10,
            max_parallel_starts: 4,
            event_buffer: 128,
        }
    }
}

/// Capability a cluster connection needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementEntry {
    /// Capability type
    #[serde(rename = "type")]
    pub capability_type: String,
    /// Features the provider must offer
    #[serde(default)]
    pub features: Vec<String>,
    /// Requirer-side config
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Whether start may proceed without it
    #[serde(default)]
    pub optional: bool,
}

/// Capability a proxy advertises
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferEntry {
    /// Capability type
    #[serde(rename = "type")]
    pub capability_type: String,
    /// Offered features
    #[serde(default)]
    pub features: Vec<String>,
    /// Provider-side config
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Auxiliary proxy process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyEntry {
    /// Executable
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Argument templates for capability operations, e.g. `login: [kube, login, "{cluster}"]`
    #[serde(default)]
    pub operations: HashMap<String, Vec<String>>,
    /// Capabilities advertised while running
    #[serde(default)]
    pub provides: Vec<OfferEntry>,
    /// Labels that must be running first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health polling interval override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
}

/// Kubernetes cluster connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterEntry {
    /// Kubeconfig context
    pub context: String,
    /// Cluster name used for login, defaults to the label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Free-form role tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Whether the cluster is gated behind a login
    #[serde(default)]
    pub login: bool,
    /// Capabilities the connection needs
    #[serde(default)]
    pub requires: Vec<RequirementEntry>,
    /// Labels that must be running first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health polling interval override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
}

/// Local port-forward into a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwardEntry {
    /// Label of the cluster connection; becomes a hard dependency
    pub cluster: String,
    /// Kubeconfig context override, defaults to the cluster's context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Namespace of the target
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// `kind/name` or bare pod name
    pub target: String,
    /// `local:remote` or a single port
    pub ports: PortsEntry,
    /// Additional labels that must be running first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health polling interval override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
}

/// Port pair as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortsEntry {
    /// Same port locally and remotely
    Simple(u16),
    /// `"local:remote"`
    Full(String),
}

impl std::fmt::Display for PortsEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple(port) => write!(f, "{}", port),
            Self::Full(spec) => f.write_str(spec),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}
