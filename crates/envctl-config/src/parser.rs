//! Configuration parser with environment variable substitution

use crate::{Config, ConfigError, Result};
use connection_services::{ForwardTarget, PortSpec};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

const SUPPORTED_VERSION: &str = "1";

/// `${VAR}` or `${VAR:-default}`
const ENV_VAR_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

/// Parse a YAML configuration file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse YAML configuration from a string
///
/// Environment references are substituted before the YAML is read, so they
/// may appear in any scalar.
pub fn parse_str(content: &str) -> Result<Config> {
    let substituted = substitute_env_vars(content)?;
    let config: Config = serde_yaml::from_str(&substituted)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::ValidationError(format!(
            "Unsupported version: {}, expected {}",
            config.version, SUPPORTED_VERSION
        )));
    }

    if config.settings.max_parallel_starts == 0 {
        return Err(ConfigError::ValidationError(
            "max_parallel_starts must be at least 1".to_string(),
        ));
    }

    // Labels share one namespace across sections
    let mut labels = HashSet::new();
    for label in config.labels() {
        if !labels.insert(label) {
            return Err(ConfigError::ValidationError(format!(
                "Duplicate service label '{}'",
                label
            )));
        }
    }

    let check_deps = |name: &str, deps: &[String]| -> Result<()> {
        for dep in deps {
            if !labels.contains(dep.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}' depends on unknown service '{}'",
                    name, dep
                )));
            }
        }
        Ok(())
    };

    for (name, proxy) in &config.proxies {
        if proxy.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Proxy '{}' has an empty command",
                name
            )));
        }
        for offer in &proxy.provides {
            if offer.capability_type.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Proxy '{}' offers a capability without a type",
                    name
                )));
            }
        }
        check_deps(name, &proxy.depends_on)?;
    }

    for (name, cluster) in &config.clusters {
        if cluster.context.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Cluster '{}' has an empty context",
                name
            )));
        }
        check_deps(name, &cluster.depends_on)?;
    }

    for (name, forward) in &config.port_forwards {
        if !config.clusters.contains_key(&forward.cluster) {
            return Err(ConfigError::ServiceNotFound(forward.cluster.clone()));
        }
        forward
            .target
            .parse::<ForwardTarget>()
            .map_err(|err| invalid_field(name, "target", err))?;
        forward
            .ports
            .to_string()
            .parse::<PortSpec>()
            .map_err(|err| invalid_field(name, "ports", err))?;
        check_deps(name, &forward.depends_on)?;
    }

    Ok(())
}

fn invalid_field(name: &str, field: &str, err: service_runtime::Error) -> ConfigError {
    let message = match err {
        service_runtime::Error::Configuration(message) => message,
        other => other.to_string(),
    };
    ConfigError::ValidationError(format!("Port-forward '{}' {}: {}", name, field, message))
}

/// Substitute environment variables in a string
///
/// Supports `${VAR}` and `${VAR:-default}`. Every missing variable without a
/// default is reported at once.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(ENV_VAR_PATTERN)
        .map_err(|err| ConfigError::ValidationError(err.to_string()))?;
    let mut missing = Vec::new();

    let result = re.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match (std::env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }

    Ok(result.into_owned())
}
