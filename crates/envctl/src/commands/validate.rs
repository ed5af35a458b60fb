use super::load_environment;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

pub async fn run(config_path: &Path, json: bool) -> Result<()> {
    let (config, orchestrator) = load_environment(config_path)?;

    let graph = orchestrator
        .get_dependency_graph()
        .context("Invalid dependency graph")?;
    let order = graph.topological_sort().context("Invalid dependency graph")?;

    if json {
        let report = json!({
            "valid": true,
            "version": config.version,
            "name": config.name,
            "start_order": order,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("✓ Configuration valid");
    println!("  Version: {}", config.version);
    if let Some(name) = &config.name {
        println!("  Name: {}", name);
    }
    println!("  Proxies: {}", config.proxies.len());
    println!("  Clusters: {}", config.clusters.len());
    println!("  Port-forwards: {}", config.port_forwards.len());
    println!("  Start order:");
    for (position, label) in order.iter().enumerate() {
        let after: Vec<&str> = graph
            .node(label)
            .map(|node| node.ordering_dependencies().map(String::as_str).collect())
            .unwrap_or_default();
        if after.is_empty() {
            println!("    {}. {}", position + 1, label);
        } else {
            println!("    {}. {} (after {})", position + 1, label, after.join(", "));
        }
    }

    Ok(())
}
