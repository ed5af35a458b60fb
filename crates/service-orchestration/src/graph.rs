//! Dependency graph derived from the registered services
//!
//! Two kinds of edges order startup: hard dependencies (a label the service
//! names explicitly) and capability edges (a service that requires a
//! capability type is ordered after every managed service providing it).
//! Only hard edges propagate failure.

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use service_runtime::Service;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// One service in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyNode {
    /// Service label
    pub label: String,
    /// Hard dependency labels
    pub dependencies: Vec<String>,
    /// Capability types this service requires
    pub capability_types: Vec<String>,
    /// Labels of managed services providing those capabilities
    pub capability_providers: Vec<String>,
}

impl DependencyNode {
    /// Every label this node is ordered after
    pub fn ordering_dependencies(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .iter()
            .chain(self.capability_providers.iter())
    }
}

/// Read-only snapshot of the startup ordering
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    /// Nodes in registration order
    nodes: IndexMap<String, DependencyNode>,
    /// Reverse edges for finding dependents
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from services in registration order
    ///
    /// A hard dependency on a label that is not registered is a configuration
    /// error.
    pub fn build(services: &[Arc<dyn Service>]) -> Result<Self> {
        let mut providers: HashMap<String, Vec<String>> = HashMap::new();
        for service in services {
            for capability_type in service.provided_capabilities() {
                providers
                    .entry(capability_type)
                    .or_default()
                    .push(service.label().to_string());
            }
        }

        let known: HashSet<&str> = services.iter().map(|s| s.label()).collect();
        let mut nodes = IndexMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for service in services {
            let label = service.label().to_string();
            let dependencies = service.dependencies();
            if let Some(unknown) = dependencies.iter().find(|d| !known.contains(d.as_str())) {
                return Err(Error::Config(format!(
                    "Service '{}' depends on unknown service '{}'",
                    label, unknown
                )));
            }

            let capability_types: Vec<String> = service
                .capability_requirements()
                .into_iter()
                .map(|requirement| requirement.capability_type)
                .collect();

            let mut capability_providers = Vec::new();
            for capability_type in &capability_types {
                for provider in providers.get(capability_type).into_iter().flatten() {
                    if provider != &label
                        && !dependencies.contains(provider)
                        && !capability_providers.contains(provider)
                    {
                        capability_providers.push(provider.clone());
                    }
                }
            }

            let node = DependencyNode {
                label: label.clone(),
                dependencies,
                capability_types,
                capability_providers,
            };
            for dependency in node.ordering_dependencies() {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(label.clone());
            }
            nodes.insert(label, node);
        }

        Ok(Self { nodes, dependents })
    }

    /// Look up a node
    pub fn node(&self, label: &str) -> Option<&DependencyNode> {
        self.nodes.get(label)
    }

    /// All nodes in registration order
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Labels directly ordered after `label`
    pub fn dependents_of(&self, label: &str) -> &[String] {
        self.dependents
            .get(label)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Perform topological sort to find start order
    ///
    /// Ties are broken by registration order.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: IndexMap<&str, usize> = self
            .nodes
            .values()
            .map(|node| (node.label.as_str(), node.ordering_dependencies().count()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(label, _)| *label)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(label) = queue.pop_front() {
            result.push(label.to_string());

            for dependent in self.dependents_of(label) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(label, _)| *label)
                .collect();
            return Err(Error::Config(format!(
                "Circular dependency detected among: {}",
                stuck.join(", ")
            )));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use service_runtime::{
        CapabilityRequirement, Result as RuntimeResult, ServiceContext, ServiceType, StateMachine,
    };

    struct Node {
        machine: StateMachine,
        deps: Vec<String>,
        requires: Vec<CapabilityRequirement>,
        provides: Vec<String>,
    }

    fn node(label: &str, deps: &[&str]) -> Node {
        Node {
            machine: StateMachine::new(label, ServiceType::PortForward),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            requires: Vec::new(),
            provides: Vec::new(),
        }
    }

    #[async_trait]
    impl Service for Node {
        fn machine(&self) -> &StateMachine {
            &self.machine
        }
        async fn start(&self, _ctx: &ServiceContext) -> RuntimeResult<()> {
            Ok(())
        }
        async fn stop(&self, _ctx: &ServiceContext) -> RuntimeResult<()> {
            Ok(())
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        fn capability_requirements(&self) -> Vec<CapabilityRequirement> {
            self.requires.clone()
        }
        fn provided_capabilities(&self) -> Vec<String> {
            self.provides.clone()
        }
    }

    fn services(nodes: Vec<Node>) -> Vec<Arc<dyn Service>> {
        nodes
            .into_iter()
            .map(|n| Arc::new(n) as Arc<dyn Service>)
            .collect()
    }

    #[test]
    fn test_topological_order() {
        let graph = DependencyGraph::build(&services(vec![
            node("forward", &["cluster"]),
            node("cluster", &[]),
            node("other", &[]),
        ]))
        .unwrap();

        let order = graph.topological_sort().unwrap();
        let pos = |l: &str| order.iter().position(|x| x == l).unwrap();
        assert!(pos("cluster") < pos("forward"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let graph =
            DependencyGraph::build(&services(vec![node("a", &["b"]), node("b", &["a"])])).unwrap();
        let err = graph.topological_sort().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Circular dependency")));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = DependencyGraph::build(&services(vec![node("a", &["ghost"])])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_capability_edges_order_requirers_after_providers() {
        let mut cluster = node("mc", &[]);
        cluster.requires = vec![CapabilityRequirement::new("auth").optional()];
        let mut proxy = node("teleport", &[]);
        proxy.provides = vec!["auth".to_string()];
        let mut unrelated = node("dns-user", &[]);
        unrelated.requires = vec![CapabilityRequirement::new("dns")];

        let graph = DependencyGraph::build(&services(vec![cluster, proxy, unrelated])).unwrap();
        let mc = graph.node("mc").unwrap();
        assert_eq!(mc.capability_providers, vec!["teleport".to_string()]);
        assert!(mc.dependencies.is_empty());
        assert!(graph.node("dns-user").unwrap().capability_providers.is_empty());

        let order = graph.topological_sort().unwrap();
        assert_eq!(order[0], "teleport");
    }
}
