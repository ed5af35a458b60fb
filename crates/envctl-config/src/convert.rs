//! Conversion into runtime types

use crate::{ClusterEntry, Config, ConfigError, ForwardEntry, ProxyEntry, Result, Settings};
use connection_services::{
    CapabilityOffer, K8sConnectionConfig, PortForwardConfig, ProxyConfig, ProxySpec,
    ServiceDefinition,
};
use service_orchestration::OrchestratorConfig;
use service_runtime::CapabilityRequirement;
use std::time::Duration;

/// Orchestrator tunables from the `settings` block
pub fn to_orchestrator_config(settings: &Settings) -> OrchestratorConfig {
    OrchestratorConfig {
        health_check_interval: Duration::from_secs(settings.health_check_interval),
        health_check_timeout: Duration::from_secs(settings.health_check_timeout),
        startup_timeout: Duration::from_secs(settings.startup_timeout),
        stop_timeout: Duration::from_secs(settings.stop_timeout),
        max_parallel_starts: settings.max_parallel_starts,
        event_buffer: settings.event_buffer,
    }
}

/// Service definitions in registration order: proxies, clusters, forwards
pub fn to_definitions(config: &Config) -> Result<Vec<ServiceDefinition>> {
    let mut definitions = Vec::new();

    for (label, proxy) in &config.proxies {
        definitions.push(ServiceDefinition::Proxy(convert_proxy(label, proxy)));
    }
    for (label, cluster) in &config.clusters {
        definitions.push(ServiceDefinition::K8sConnection(convert_cluster(
            label, cluster,
        )));
    }
    for (label, forward) in &config.port_forwards {
        definitions.push(ServiceDefinition::PortForward(convert_forward(
            config, label, forward,
        )?));
    }

    Ok(definitions)
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

fn convert_proxy(label: &str, proxy: &ProxyEntry) -> ProxyConfig {
    ProxyConfig {
        label: label.to_string(),
        spec: ProxySpec {
            command: proxy.command.clone(),
            args: proxy.args.clone(),
            env: proxy.env.clone(),
            operations: proxy.operations.clone(),
        },
        provides: proxy
            .provides
            .iter()
            .map(|offer| CapabilityOffer {
                capability_type: offer.capability_type.clone(),
                features: offer.features.clone(),
                config: offer.config.clone(),
            })
            .collect(),
        depends_on: proxy.depends_on.clone(),
        health_check_interval: seconds(proxy.health_check_interval),
    }
}

fn convert_cluster(label: &str, cluster: &ClusterEntry) -> K8sConnectionConfig {
    let mut config = K8sConnectionConfig::new(
        label,
        cluster.context.clone(),
        cluster.cluster.clone().unwrap_or_else(|| label.to_string()),
    );
    config.role = cluster.role.clone();
    config.login = cluster.login;
    config.requires = cluster
        .requires
        .iter()
        .map(|entry| {
            let requirement = CapabilityRequirement::new(&entry.capability_type)
                .with_features(entry.features.iter().cloned())
                .with_config(entry.config.clone());
            if entry.optional {
                requirement.optional()
            } else {
                requirement
            }
        })
        .collect();
    config.depends_on = cluster.depends_on.clone();
    config.health_check_interval = seconds(cluster.health_check_interval);
    config
}

fn convert_forward(config: &Config, label: &str, forward: &ForwardEntry) -> Result<PortForwardConfig> {
    let cluster = config
        .clusters
        .get(&forward.cluster)
        .ok_or_else(|| ConfigError::ServiceNotFound(forward.cluster.clone()))?;

    let mut depends_on = vec![forward.cluster.clone()];
    depends_on.extend(
        forward
            .depends_on
            .iter()
            .filter(|dep| **dep != forward.cluster)
            .cloned(),
    );

    Ok(PortForwardConfig {
        label: label.to_string(),
        context: forward
            .context
            .clone()
            .unwrap_or_else(|| cluster.context.clone()),
        namespace: forward.namespace.clone(),
        target: forward.target.parse()?,
        ports: forward.ports.to_string().parse()?,
        depends_on,
        health_check_interval: seconds(forward.health_check_interval),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;
    use connection_services::ResourceKind;

    #[test]
    fn test_forward_inherits_cluster_context() {
        let config = parse_str(
            r#"
version: "1"
clusters:
  wc:
    context: teleport.example-wc
port_forwards:
  grafana:
    cluster: wc
    namespace: monitoring
    target: deployment/grafana
    ports: 3000
"#,
        )
        .unwrap();

        let definitions = to_definitions(&config).unwrap();
        let ServiceDefinition::PortForward(forward) = &definitions[1] else {
            panic!("expected a port-forward, got {:?}", definitions[1]);
        };
        assert_eq!(forward.context, "teleport.example-wc");
        assert_eq!(forward.depends_on, vec!["wc".to_string()]);
        assert_eq!(forward.target.kind, ResourceKind::Deployment);
        assert_eq!((forward.ports.local, forward.ports.remote), (3000, 3000));
    }

    #[test]
    fn test_cluster_name_defaults_to_label() {
        let config = parse_str(
            r#"
version: "1"
clusters:
  mc:
    context: teleport.example-mc
"#,
        )
        .unwrap();

        let definitions = to_definitions(&config).unwrap();
        let ServiceDefinition::K8sConnection(cluster) = &definitions[0] else {
            panic!("expected a cluster, got {:?}", definitions[0]);
        };
        assert_eq!(cluster.cluster, "mc");
        assert!(!cluster.login);
        assert!(cluster.requires.is_empty());
    }

    #[test]
    fn test_settings_become_durations() {
        let settings = Settings {
            health_check_interval: 5,
            max_parallel_starts: 2,
            ..Settings::default()
        };
        let config = to_orchestrator_config(&settings);
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert_eq!(config.health_check_timeout, Duration::from_secs(10));
        assert_eq!(config.max_parallel_starts, 2);
    }
}
