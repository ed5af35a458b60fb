//! Cluster sessions through `tsh` and `kubectl`

use super::run_command;
use async_trait::async_trait;
use connection_services::{ClusterSessionProvider, LoginOutput, NodeHealth};
use serde::Deserialize;
use service_runtime::{Error, Result, ServiceContext};
use std::collections::HashMap;

/// Logs in with `tsh kube login` and probes clusters with `kubectl`
#[derive(Debug, Clone)]
pub struct KubectlSession {
    tsh: String,
    kubectl: String,
}

impl Default for KubectlSession {
    fn default() -> Self {
        Self {
            tsh: "tsh".to_string(),
            kubectl: "kubectl".to_string(),
        }
    }
}

impl KubectlSession {
    async fn kubectl(&self, ctx: &ServiceContext, context: &str, args: &[&str]) -> Result<String> {
        let mut argv = vec!["--context".to_string(), context.to_string()];
        argv.extend(args.iter().map(|arg| arg.to_string()));
        let output = ctx
            .run(run_command(&self.kubectl, &argv, &HashMap::new()))
            .await??;
        Ok(output.stdout)
    }
}

#[async_trait]
impl ClusterSessionProvider for KubectlSession {
    async fn login(&self, cluster: &str) -> Result<LoginOutput> {
        let args = vec!["kube".to_string(), "login".to_string(), cluster.to_string()];
        let output = run_command(&self.tsh, &args, &HashMap::new()).await?;
        Ok(LoginOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn check_api_health(&self, ctx: &ServiceContext, context: &str) -> Result<()> {
        let body = self
            .kubectl(ctx, context, &["get", "--raw", "/healthz"])
            .await?;
        match body.trim() {
            "ok" => Ok(()),
            other => Err(Error::provider(format!("/healthz answered '{}'", other))),
        }
    }

    async fn get_cluster_node_health(
        &self,
        ctx: &ServiceContext,
        context: &str,
    ) -> Result<NodeHealth> {
        let body = self
            .kubectl(ctx, context, &["get", "nodes", "-o", "json"])
            .await?;
        parse_node_health(&body)
    }
}

#[derive(Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Deserialize)]
struct Node {
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    conditions: Vec<NodeCondition>,
}

#[derive(Deserialize)]
struct NodeCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

/// Count nodes whose `Ready` condition is `True`
fn parse_node_health(body: &str) -> Result<NodeHealth> {
    let list: NodeList = serde_json::from_str(body)
        .map_err(|err| Error::provider(format!("Unreadable node list: {}", err)))?;

    let ready = list
        .items
        .iter()
        .filter(|node| {
            node.status
                .conditions
                .iter()
                .any(|c| c.kind == "Ready" && c.status == "True")
        })
        .count();

    Ok(NodeHealth {
        ready: ready as u32,
        total: list.items.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_health() {
        let body = r#"{
            "items": [
                {"status": {"conditions": [{"type": "Ready", "status": "True"}]}},
                {"status": {"conditions": [
                    {"type": "MemoryPressure", "status": "False"},
                    {"type": "Ready", "status": "False"}
                ]}},
                {"status": {}}
            ]
        }"#;
        let health = parse_node_health(body).unwrap();
        assert_eq!(health, NodeHealth { ready: 1, total: 3 });
        assert!(!health.all_ready());
    }

    #[test]
    fn test_parse_empty_list() {
        let health = parse_node_health(r#"{"items": []}"#).unwrap();
        assert_eq!(health.total, 0);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_node_health("error: no context"), Err(Error::Provider(_))));
    }
}
