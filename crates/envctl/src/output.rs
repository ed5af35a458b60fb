//! Status rendering

use comfy_table::{Cell, Color, Table};
use service_runtime::{HealthStatus, ServiceState, ServiceStatus, ServiceType};

fn state_color(state: ServiceState) -> Color {
    match state {
        ServiceState::Running => Color::Green,
        ServiceState::Starting | ServiceState::Stopping => Color::Yellow,
        ServiceState::Failed => Color::Red,
        ServiceState::Stopped => Color::DarkGrey,
    }
}

fn health_color(health: HealthStatus) -> Color {
    match health {
        HealthStatus::Healthy => Color::Green,
        HealthStatus::Unhealthy => Color::Red,
        _ => Color::DarkGrey,
    }
}

/// One-line summary of the type-specific data
pub fn details(status: &ServiceStatus) -> String {
    let field = |key: &str| {
        status
            .data
            .get(key)
            .map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "-".to_string(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "-".to_string())
    };

    match status.service_type {
        ServiceType::K8sConnection => format!(
            "{} ({}/{} nodes ready)",
            field("context"),
            field("ready_nodes"),
            field("total_nodes")
        ),
        ServiceType::PortForward => format!(
            "localhost:{} -> {}/{}:{}",
            field("local_port"),
            field("namespace"),
            field("target"),
            field("remote_port")
        ),
        ServiceType::Proxy => format!("{} (provides {})", field("command"), field("provides")),
    }
}

/// Status table in registration order
pub fn status_table(statuses: &[ServiceStatus]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "TYPE", "STATE", "HEALTH", "DETAILS", "ERROR"]);

    for status in statuses {
        table.add_row(vec![
            Cell::new(&status.label),
            Cell::new(status.service_type),
            Cell::new(status.state).fg(state_color(status.state)),
            Cell::new(status.health).fg(health_color(status.health)),
            Cell::new(details(status)),
            Cell::new(
                status
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            ),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(service_type: ServiceType, data: serde_json::Value) -> ServiceStatus {
        ServiceStatus {
            label: "svc".to_string(),
            service_type,
            state: ServiceState::Running,
            health: HealthStatus::Healthy,
            last_error: None,
            last_health_check: None,
            dependencies: Vec::new(),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_port_forward_details() {
        let status = status(
            ServiceType::PortForward,
            json!({
                "namespace": "monitoring",
                "target": "service/prometheus",
                "local_port": 8080,
                "remote_port": 80
            }),
        );
        assert_eq!(
            details(&status),
            "localhost:8080 -> monitoring/service/prometheus:80"
        );
    }

    #[test]
    fn test_cluster_details_before_first_probe() {
        let status = status(
            ServiceType::K8sConnection,
            json!({ "context": "teleport.mc", "ready_nodes": null }),
        );
        assert_eq!(details(&status), "teleport.mc (-/- nodes ready)");
    }

    #[test]
    fn test_table_has_a_row_per_service() {
        let statuses = vec![
            status(ServiceType::Proxy, json!({ "command": "tsh" })),
            status(ServiceType::K8sConnection, json!({})),
        ];
        let rendered = status_table(&statuses).to_string();
        assert!(rendered.contains("SERVICE"));
        assert_eq!(rendered.matches("svc").count(), 2);
    }
}
