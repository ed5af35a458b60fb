//! Collaborator traits injected into the concrete services
//!
//! The services own lifecycle and health interpretation; the mechanics of
//! logging in, probing a cluster, tunnelling a port and running a proxy
//! process live behind these traits.

use crate::target::{PortSpec, TunnelTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_runtime::{Result, ServiceContext};
use std::collections::HashMap;
use std::sync::Arc;

/// Output captured from a login attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

/// Node readiness of a cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    /// Nodes reporting Ready
    pub ready: u32,
    /// All nodes
    pub total: u32,
}

impl NodeHealth {
    /// Whether every node is ready
    pub fn all_ready(&self) -> bool {
        self.ready == self.total
    }
}

/// Authentication and probing against a cluster control plane
#[async_trait]
pub trait ClusterSessionProvider: Send + Sync {
    /// Log in to `cluster`
    ///
    /// A failed login returns an error whose message carries the collaborator
    /// output.
    async fn login(&self, cluster: &str) -> Result<LoginOutput>;

    /// Check that the API server behind `context` answers
    async fn check_api_health(&self, ctx: &ServiceContext, context: &str) -> Result<()>;

    /// Count ready nodes behind `context`
    async fn get_cluster_node_health(&self, ctx: &ServiceContext, context: &str)
        -> Result<NodeHealth>;
}

/// Status reported by a running tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum TunnelStatus {
    /// Tunnel is being set up
    Initializing,
    /// Traffic is being forwarded
    ForwardingActive,
    /// Tunnel reported an error
    Error(String),
    /// Tunnel closed
    Stopped,
}

/// Status callback handed to the tunnel provider
pub type TunnelUpdateFn = Arc<dyn Fn(TunnelStatus) + Send + Sync>;

/// Stop handle for an open tunnel
#[async_trait]
pub trait TunnelHandle: Send + Sync {
    /// Close the tunnel and release its resources
    async fn stop(&self) -> Result<()>;
}

/// Local to remote port forwarding
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Open a tunnel; progress is reported through `on_update`
    async fn start_tunnel(
        &self,
        ctx: &ServiceContext,
        target: &TunnelTarget,
        ports: PortSpec,
        on_update: TunnelUpdateFn,
    ) -> Result<Box<dyn TunnelHandle>>;
}

/// How to run an auxiliary proxy process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Executable
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Argument templates for capability operations, `{key}` filled from params
    #[serde(default)]
    pub operations: HashMap<String, Vec<String>>,
}

/// Drives one auxiliary proxy process
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    /// Launch the process
    async fn launch(&self, ctx: &ServiceContext, spec: &ProxySpec) -> Result<()>;

    /// Check that the process is alive and serving
    async fn probe(&self, ctx: &ServiceContext, spec: &ProxySpec) -> Result<()>;

    /// Run a capability operation through the proxy
    async fn invoke(&self, operation: &str, params: serde_json::Value)
        -> Result<serde_json::Value>;

    /// Terminate the process
    async fn shutdown(&self) -> Result<()>;
}

/// Creates one backend per proxy service
pub type ProxyBackendFactory = Arc<dyn Fn(&str, &ProxySpec) -> Arc<dyn ProxyBackend> + Send + Sync>;
