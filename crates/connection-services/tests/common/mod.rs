//! In-memory collaborators for the service tests

#![allow(dead_code)]

use async_trait::async_trait;
use connection_services::{
    ClusterSessionProvider, LoginOutput, NodeHealth, PortSpec, ProxyBackend, ProxySpec,
    TunnelHandle, TunnelProvider, TunnelStatus, TunnelTarget, TunnelUpdateFn,
};
use service_runtime::{Error, Result, ServiceContext};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable cluster session provider
pub struct FakeCluster {
    pub login_error: Mutex<Option<String>>,
    pub api_reachable: AtomicBool,
    pub nodes: Mutex<NodeHealth>,
    pub logins: AtomicUsize,
}

impl FakeCluster {
    pub fn healthy(ready: u32, total: u32) -> Arc<Self> {
        Arc::new(Self {
            login_error: Mutex::new(None),
            api_reachable: AtomicBool::new(true),
            nodes: Mutex::new(NodeHealth { ready, total }),
            logins: AtomicUsize::new(0),
        })
    }

    pub fn rejecting_login(message: &str) -> Arc<Self> {
        let cluster = Self::healthy(3, 3);
        *cluster.login_error.lock().unwrap() = Some(message.to_string());
        cluster
    }

    pub fn set_api_reachable(&self, reachable: bool) {
        self.api_reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterSessionProvider for FakeCluster {
    async fn login(&self, cluster: &str) -> Result<LoginOutput> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        match self.login_error.lock().unwrap().clone() {
            Some(message) => Err(Error::provider(message)),
            None => Ok(LoginOutput {
                stdout: format!("Logged into {cluster}"),
                stderr: String::new(),
            }),
        }
    }

    async fn check_api_health(&self, _ctx: &ServiceContext, context: &str) -> Result<()> {
        if self.api_reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::provider(format!("dial tcp {context}: connection refused")))
        }
    }

    async fn get_cluster_node_health(
        &self,
        _ctx: &ServiceContext,
        _context: &str,
    ) -> Result<NodeHealth> {
        Ok(*self.nodes.lock().unwrap())
    }
}

/// Tunnel provider replaying a fixed status script
pub struct FakeTunnels {
    script: Vec<TunnelStatus>,
    pub on_update: Mutex<Option<TunnelUpdateFn>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

impl FakeTunnels {
    pub fn scripted(script: Vec<TunnelStatus>) -> Arc<Self> {
        Arc::new(Self {
            script,
            on_update: Mutex::new(None),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn forwarding() -> Arc<Self> {
        Self::scripted(vec![TunnelStatus::Initializing, TunnelStatus::ForwardingActive])
    }

    /// Report a status after startup
    pub fn emit(&self, status: TunnelStatus) {
        if let Some(on_update) = self.on_update.lock().unwrap().as_ref() {
            on_update(status);
        }
    }
}

struct FakeTunnelHandle {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl TunnelHandle for FakeTunnelHandle {
    async fn stop(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnels {
    async fn start_tunnel(
        &self,
        _ctx: &ServiceContext,
        _target: &TunnelTarget,
        _ports: PortSpec,
        on_update: TunnelUpdateFn,
    ) -> Result<Box<dyn TunnelHandle>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.on_update.lock().unwrap() = Some(on_update.clone());

        let script = self.script.clone();
        smol::spawn(async move {
            for status in script {
                smol::Timer::after(Duration::from_millis(5)).await;
                on_update(status);
            }
        })
        .detach();

        Ok(Box::new(FakeTunnelHandle {
            closed: self.closed.clone(),
        }))
    }
}

/// Proxy backend recording every call
pub struct FakeProxy {
    pub launched: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub serving: AtomicBool,
    pub invocations: Mutex<Vec<String>>,
}

impl FakeProxy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            launched: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            serving: AtomicBool::new(true),
            invocations: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ProxyBackend for FakeProxy {
    async fn launch(&self, _ctx: &ServiceContext, _spec: &ProxySpec) -> Result<()> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self, _ctx: &ServiceContext, _spec: &ProxySpec) -> Result<()> {
        if self.serving.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::provider("proxy port closed"))
        }
    }

    async fn invoke(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.invocations.lock().unwrap().push(operation.to_string());
        Ok(serde_json::json!({ "ok": true, "params": params }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        smol::Timer::after(Duration::from_millis(5)).await;
    }
    condition()
}
