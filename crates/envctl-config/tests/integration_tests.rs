//! Integration tests for envctl-config

use connection_services::ServiceDefinition;
use envctl_config::{parser, to_definitions, to_orchestrator_config, ConfigError};
use std::io::Write;
use std::time::Duration;

const ENVIRONMENT: &str = r#"
version: "1"
name: "example"

settings:
  log_level: debug
  health_check_interval: 15
  startup_timeout: 120

proxies:
  teleport-auth:
    command: tsh
    args: ["proxy", "kube"]
    provides:
      - type: auth
        features: [login]
        config: { provider: teleport }

clusters:
  mc:
    context: ${ENVCTL_TEST_MC_CONTEXT:-teleport.example-mc}
    cluster: mc
    role: management
    login: true
    requires:
      - { type: auth, features: [login], optional: true }
  wc:
    context: teleport.example-wc
    role: workload
    depends_on: [mc]

port_forwards:
  prometheus:
    cluster: mc
    namespace: monitoring
    target: service/prometheus
    ports: "8080:80"
    health_check_interval: 5
  alloy:
    cluster: wc
    namespace: kube-system
    target: alloy-metrics-0
    ports: 12345
"#;

#[test]
fn test_full_config_parsing() {
    let config = parser::parse_str(ENVIRONMENT).unwrap();

    assert_eq!(config.name.as_deref(), Some("example"));
    assert_eq!(config.settings.log_level.as_deref(), Some("debug"));
    assert_eq!(config.settings.health_check_interval, 15);
    assert_eq!(config.settings.max_parallel_starts, 4);
    assert_eq!(config.clusters["mc"].context, "teleport.example-mc");
    assert_eq!(
        config.labels().collect::<Vec<_>>(),
        vec!["teleport-auth", "mc", "wc", "prometheus", "alloy"]
    );

    let orchestrator = to_orchestrator_config(&config.settings);
    assert_eq!(orchestrator.health_check_interval, Duration::from_secs(15));
    assert_eq!(orchestrator.startup_timeout, Duration::from_secs(120));
}

#[test]
fn test_definitions_carry_every_setting() {
    let config = parser::parse_str(ENVIRONMENT).unwrap();
    let definitions = to_definitions(&config).unwrap();

    let labels: Vec<_> = definitions.iter().map(ServiceDefinition::label).collect();
    assert_eq!(labels, vec!["teleport-auth", "mc", "wc", "prometheus", "alloy"]);

    let ServiceDefinition::Proxy(proxy) = &definitions[0] else {
        panic!("expected proxy");
    };
    assert_eq!(proxy.spec.command, "tsh");
    assert_eq!(proxy.provides[0].capability_type, "auth");
    assert_eq!(proxy.provides[0].config["provider"], "teleport");

    let ServiceDefinition::K8sConnection(mc) = &definitions[1] else {
        panic!("expected cluster");
    };
    assert!(mc.login);
    assert_eq!(mc.role.as_deref(), Some("management"));
    assert!(mc.requires[0].optional);
    assert_eq!(mc.requires[0].required_features, vec!["login".to_string()]);

    let ServiceDefinition::PortForward(prometheus) = &definitions[3] else {
        panic!("expected port-forward");
    };
    assert_eq!(prometheus.context, "teleport.example-mc");
    assert_eq!(prometheus.ports.local, 8080);
    assert_eq!(prometheus.ports.remote, 80);
    assert_eq!(prometheus.target.to_string(), "service/prometheus");
    assert_eq!(prometheus.health_check_interval, Some(Duration::from_secs(5)));
    assert_eq!(definitions[4].dependencies(), ["wc".to_string()]);
}

#[test]
fn test_parse_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(ENVIRONMENT.as_bytes()).unwrap();

    let config = parser::parse_file(file.path()).unwrap();
    assert_eq!(config.port_forwards.len(), 2);
}

#[test]
fn test_missing_file() {
    let err = parser::parse_file("/nonexistent/envctl.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::ReadError(_)));
}

#[test]
fn test_unknown_dependency() {
    let yaml = r#"
version: "1"
clusters:
  wc:
    context: teleport.example-wc
    depends_on: [mc]
"#;
    let err = parser::parse_str(yaml).unwrap_err();
    assert!(
        matches!(&err, ConfigError::ValidationError(msg) if msg.contains("unknown service 'mc'")),
        "{err}"
    );
}

#[test]
fn test_duplicate_label_across_sections() {
    let yaml = r#"
version: "1"
proxies:
  mc:
    command: tsh
clusters:
  mc:
    context: teleport.example-mc
"#;
    let err = parser::parse_str(yaml).unwrap_err();
    assert!(matches!(&err, ConfigError::ValidationError(msg) if msg.contains("Duplicate")));
}

#[test]
fn test_malformed_ports() {
    for ports in ["\"80a:80\"", "\"0:80\"", "\"8080:\""] {
        let yaml = format!(
            r#"
version: "1"
clusters:
  mc:
    context: teleport.example-mc
port_forwards:
  prometheus:
    cluster: mc
    target: service/prometheus
    ports: {ports}
"#
        );
        let err = parser::parse_str(&yaml).unwrap_err();
        assert!(
            matches!(&err, ConfigError::ValidationError(msg) if msg.contains("ports")),
            "{ports}: {err}"
        );
    }
}

#[test]
fn test_malformed_target() {
    let yaml = r#"
version: "1"
clusters:
  mc:
    context: teleport.example-mc
port_forwards:
  prometheus:
    cluster: mc
    target: cronjob/prometheus
    ports: 9090
"#;
    let err = parser::parse_str(yaml).unwrap_err();
    assert!(matches!(&err, ConfigError::ValidationError(msg) if msg.contains("target")));
}

#[test]
fn test_forward_to_unknown_cluster() {
    let yaml = r#"
version: "1"
port_forwards:
  prometheus:
    cluster: mc
    target: service/prometheus
    ports: 9090
"#;
    let err = parser::parse_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::ServiceNotFound(name) if name == "mc"));
}

#[test]
fn test_empty_proxy_command() {
    let yaml = r#"
version: "1"
proxies:
  teleport-auth:
    command: ""
"#;
    let err = parser::parse_str(yaml).unwrap_err();
    assert!(matches!(&err, ConfigError::ValidationError(msg) if msg.contains("empty command")));
}

#[test]
fn test_missing_env_var() {
    let yaml = r#"
version: "1"
clusters:
  mc:
    context: ${ENVCTL_TEST_UNSET_CONTEXT}
"#;
    let err = parser::parse_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "ENVCTL_TEST_UNSET_CONTEXT"));
}
