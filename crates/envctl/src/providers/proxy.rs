//! Proxies as plain child processes

use super::run_command;
use async_process::{Child, Command, Stdio};
use async_trait::async_trait;
use connection_services::{ProxyBackend, ProxySpec};
use serde_json::{json, Value};
use service_runtime::{Error, Result, ServiceContext};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Runs the proxy command and serves operations by running it again with
/// the operation's argument template
pub struct CommandProxyBackend {
    label: String,
    spec: ProxySpec,
    child: Mutex<Option<Child>>,
}

impl CommandProxyBackend {
    /// Create a backend for the proxy `label`
    pub fn new(label: &str, spec: &ProxySpec) -> Self {
        Self {
            label: label.to_string(),
            spec: spec.clone(),
            child: Mutex::new(None),
        }
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fill `{key}` placeholders from the params object
fn render_args(template: &[String], params: &Value) -> Vec<String> {
    template
        .iter()
        .map(|arg| match params.as_object() {
            Some(map) => map.iter().fold(arg.clone(), |arg, (key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                arg.replace(&format!("{{{}}}", key), &value)
            }),
            None => arg.clone(),
        })
        .collect()
}

#[async_trait]
impl ProxyBackend for CommandProxyBackend {
    async fn launch(&self, _ctx: &ServiceContext, spec: &ProxySpec) -> Result<()> {
        let mut slot = self.child();
        if let Some(child) = slot.as_mut() {
            if matches!(child.try_status(), Ok(None)) {
                debug!("Proxy '{}' already running", self.label);
                return Ok(());
            }
        }

        let child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                Error::provider(format!("Failed to spawn '{}': {}", spec.command, err))
            })?;
        info!("Proxy '{}' running as pid {}", self.label, child.id());
        *slot = Some(child);
        Ok(())
    }

    async fn probe(&self, _ctx: &ServiceContext, _spec: &ProxySpec) -> Result<()> {
        match self.child().as_mut() {
            None => Err(Error::provider("proxy process not started")),
            Some(child) => match child.try_status() {
                Ok(None) => Ok(()),
                Ok(Some(status)) => Err(Error::provider(format!("proxy exited with {}", status))),
                Err(err) => Err(Error::provider(format!("proxy status unknown: {}", err))),
            },
        }
    }

    async fn invoke(&self, operation: &str, params: Value) -> Result<Value> {
        let template = self.spec.operations.get(operation).ok_or_else(|| {
            Error::provider(format!(
                "Proxy '{}' does not support operation '{}'",
                self.label, operation
            ))
        })?;

        let args = render_args(template, &params);
        let output = run_command(&self.spec.command, &args, &self.spec.env).await?;
        Ok(json!({ "stdout": output.stdout, "stderr": output.stderr }))
    }

    async fn shutdown(&self) -> Result<()> {
        let child = self.child().take();
        let Some(mut child) = child else {
            return Ok(());
        };

        if let Err(err) = child.kill() {
            debug!("Proxy '{}' already exited: {}", self.label, err);
        }
        let status = child
            .status()
            .await
            .map_err(|err| Error::provider(format!("Failed to reap proxy: {}", err)))?;
        debug!("Proxy '{}' exited with {}", self.label, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(command: &str, args: &[&str]) -> ProxySpec {
        ProxySpec {
            command: command.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            ..ProxySpec::default()
        }
    }

    #[test]
    fn test_render_args() {
        let template = vec!["kube".to_string(), "login".to_string(), "{cluster}".to_string()];
        let args = render_args(&template, &json!({ "cluster": "mc", "context": "teleport.mc" }));
        assert_eq!(args, vec!["kube", "login", "mc"]);

        let args = render_args(&["--port={port}".to_string()], &json!({ "port": 8080 }));
        assert_eq!(args, vec!["--port=8080"]);
    }

    #[smol_potat::test]
    async fn test_unknown_operation() {
        let backend = CommandProxyBackend::new("auth", &spec("true", &[]));
        let err = backend.invoke("login", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("does not support operation 'login'"));
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_process_lifecycle() {
        let spec = spec("sleep", &["30"]);
        let backend = CommandProxyBackend::new("sleeper", &spec);
        let ctx = ServiceContext::background();

        assert!(backend.probe(&ctx, &spec).await.is_err());
        backend.launch(&ctx, &spec).await.unwrap();
        assert!(backend.probe(&ctx, &spec).await.is_ok());

        backend.shutdown().await.unwrap();
        assert!(backend.probe(&ctx, &spec).await.is_err());
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_invoke_runs_template() {
        let spec = ProxySpec {
            command: "echo".to_string(),
            operations: HashMap::from([(
                "login".to_string(),
                vec!["login".to_string(), "{cluster}".to_string()],
            )]),
            ..ProxySpec::default()
        };
        let backend = CommandProxyBackend::new("auth", &spec);
        let result = backend.invoke("login", json!({ "cluster": "mc" })).await.unwrap();
        assert_eq!(result["stdout"], "login mc\n");
    }
}
