//! Port and target specifications for port-forwards

use serde::{Deserialize, Serialize};
use service_runtime::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// `local:remote` port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port bound on this machine
    pub local: u16,
    /// Port on the remote workload
    pub remote: u16,
}

impl PortSpec {
    /// Create a port pair; zero ports are rejected
    pub fn new(local: u16, remote: u16) -> Result<Self> {
        if local == 0 || remote == 0 {
            return Err(Error::configuration(format!(
                "port 0 is not allowed in '{}:{}'",
                local, remote
            )));
        }
        Ok(Self { local, remote })
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    /// Parse `8080:80`, or `8080` for identical ports
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim().parse::<u16>().map_err(|_| {
                Error::configuration(format!("invalid port '{}' in port spec '{}'", part, s))
            })
        };

        match s.split_once(':') {
            Some((local, remote)) => Self::new(parse(local)?, parse(remote)?),
            None => {
                let port = parse(s)?;
                Self::new(port, port)
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// Kind of workload a port-forward targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A pod
    Pod,
    /// A service
    Service,
    /// A deployment
    Deployment,
    /// A statefulset
    StatefulSet,
}

impl ResourceKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "pod" | "pods" | "po" => Some(Self::Pod),
            "service" | "services" | "svc" => Some(Self::Service),
            "deployment" | "deployments" | "deploy" => Some(Self::Deployment),
            "statefulset" | "statefulsets" | "sts" => Some(Self::StatefulSet),
            _ => None,
        }
    }

    /// Name used in `kind/name` strings
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Service => "service",
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
        }
    }
}

/// `kind/name` workload reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardTarget {
    /// Workload kind
    pub kind: ResourceKind,
    /// Workload name
    pub name: String,
}

impl FromStr for ForwardTarget {
    type Err = Error;

    /// Parse `service/prometheus`; a bare name refers to a pod
    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = match s.split_once('/') {
            Some((kind, name)) => {
                let kind = ResourceKind::parse(kind).ok_or_else(|| {
                    Error::configuration(format!("unknown resource kind '{}' in target '{}'", kind, s))
                })?;
                (kind, name)
            }
            None => (ResourceKind::Pod, s),
        };

        let name = name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(Error::configuration(format!("invalid target '{}'", s)));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.name)
    }
}

/// Where a tunnel goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelTarget {
    /// Kubeconfig context
    pub context: String,
    /// Namespace of the workload
    pub namespace: String,
    /// Workload
    pub resource: ForwardTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_spec_parsing() {
        assert_eq!("8080:80".parse::<PortSpec>().unwrap(), PortSpec { local: 8080, remote: 80 });
        assert_eq!("9090".parse::<PortSpec>().unwrap(), PortSpec { local: 9090, remote: 9090 });

        for bad in ["", "abc", "8080:", ":80", "70000:80", "0:80", "1:2:3"] {
            let err = bad.parse::<PortSpec>().unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_target_parsing() {
        let target: ForwardTarget = "service/prometheus".parse().unwrap();
        assert_eq!(target.kind, ResourceKind::Service);
        assert_eq!(target.name, "prometheus");
        assert_eq!(target.to_string(), "service/prometheus");

        let target: ForwardTarget = "svc/grafana".parse().unwrap();
        assert_eq!(target.to_string(), "service/grafana");

        let target: ForwardTarget = "mimir-0".parse().unwrap();
        assert_eq!(target.kind, ResourceKind::Pod);

        for bad in ["", "service/", "widget/x", "service/a/b"] {
            assert!(bad.parse::<ForwardTarget>().is_err(), "{bad} should be rejected");
        }
    }
}
