//! Port-forwards through `kubectl port-forward`

use async_process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use async_runtime_compat::Spawner;
use async_trait::async_trait;
use connection_services::{
    PortSpec, TunnelHandle, TunnelProvider, TunnelStatus, TunnelTarget, TunnelUpdateFn,
};
use futures_lite::io::{AsyncBufReadExt, BufReader};
use futures_lite::StreamExt;
use service_runtime::{Error, Result, ServiceContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Runs one `kubectl port-forward` child per tunnel
pub struct KubectlTunnels {
    kubectl: String,
    spawner: Arc<dyn Spawner>,
}

impl KubectlTunnels {
    /// Create a provider spawning its output readers on `spawner`
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            spawner,
        }
    }
}

/// Shared between the output readers and the stop handle
#[derive(Default)]
struct TunnelFlags {
    stopping: AtomicBool,
    degraded: AtomicBool,
}

/// What a line of `kubectl port-forward` stdout means
fn classify_stdout(line: &str) -> Option<StdoutLine> {
    if line.starts_with("Forwarding from") {
        Some(StdoutLine::Forwarding)
    } else if line.starts_with("Handling connection") {
        Some(StdoutLine::Connection)
    } else {
        None
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StdoutLine {
    Forwarding,
    Connection,
}

async fn read_stdout(
    stdout: ChildStdout,
    flags: Arc<TunnelFlags>,
    on_update: TunnelUpdateFn,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut active = false;
    while let Some(Ok(line)) = lines.next().await {
        debug!("port-forward: {}", line);
        match classify_stdout(&line) {
            Some(StdoutLine::Forwarding) if !active => {
                active = true;
                on_update(TunnelStatus::ForwardingActive);
            }
            Some(StdoutLine::Connection) if flags.degraded.swap(false, Ordering::SeqCst) => {
                on_update(TunnelStatus::ForwardingActive);
            }
            _ => {}
        }
    }

    if !flags.stopping.load(Ordering::SeqCst) {
        on_update(TunnelStatus::Stopped);
    }
}

async fn read_stderr(
    stderr: ChildStderr,
    flags: Arc<TunnelFlags>,
    on_update: TunnelUpdateFn,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(Ok(line)) = lines.next().await {
        let line = line.trim().to_string();
        if line.is_empty() || flags.stopping.load(Ordering::SeqCst) {
            continue;
        }
        flags.degraded.store(true, Ordering::SeqCst);
        on_update(TunnelStatus::Error(line));
    }
}

#[async_trait]
impl TunnelProvider for KubectlTunnels {
    async fn start_tunnel(
        &self,
        _ctx: &ServiceContext,
        target: &TunnelTarget,
        ports: PortSpec,
        on_update: TunnelUpdateFn,
    ) -> Result<Box<dyn TunnelHandle>> {
        on_update(TunnelStatus::Initializing);

        let mut child = Command::new(&self.kubectl)
            .arg("--context")
            .arg(&target.context)
            .arg("--namespace")
            .arg(&target.namespace)
            .arg("port-forward")
            .arg(target.resource.to_string())
            .arg(ports.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                Error::provider(format!("Failed to spawn '{}': {}", self.kubectl, err))
            })?;

        let flags = Arc::new(TunnelFlags::default());
        if let Some(stdout) = child.stdout.take() {
            self.spawner
                .spawn(Box::pin(read_stdout(stdout, flags.clone(), on_update.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawner
                .spawn(Box::pin(read_stderr(stderr, flags.clone(), on_update)));
        }

        Ok(Box::new(KubectlTunnelHandle {
            child: Mutex::new(Some(child)),
            flags,
        }))
    }
}

struct KubectlTunnelHandle {
    child: Mutex<Option<Child>>,
    flags: Arc<TunnelFlags>,
}

#[async_trait]
impl TunnelHandle for KubectlTunnelHandle {
    async fn stop(&self) -> Result<()> {
        self.flags.stopping.store(true, Ordering::SeqCst);
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return Ok(());
        };

        if let Err(err) = child.kill() {
            debug!("port-forward already exited: {}", err);
        }
        child
            .status()
            .await
            .map(|status| debug!("port-forward exited with {}", status))
            .map_err(|err| Error::provider(format!("Failed to reap port-forward: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stdout() {
        assert_eq!(
            classify_stdout("Forwarding from 127.0.0.1:8080 -> 80"),
            Some(StdoutLine::Forwarding)
        );
        assert_eq!(
            classify_stdout("Handling connection for 8080"),
            Some(StdoutLine::Connection)
        );
        assert_eq!(classify_stdout("Forwarding from [::1]:8080 -> 80"), Some(StdoutLine::Forwarding));
        assert_eq!(classify_stdout("something else"), None);
    }
}
