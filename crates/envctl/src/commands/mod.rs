pub mod up;
pub mod validate;

use crate::providers::{CommandProxyBackend, KubectlSession, KubectlTunnels};
use anyhow::{Context, Result};
use connection_services::{ProxyBackend, ProxyBackendFactory, ServiceFactory};
use envctl_config::{parser, to_definitions, to_orchestrator_config, Config};
use service_orchestration::{OrchestrationContext, Orchestrator};
use std::path::Path;
use std::sync::Arc;

/// Load the configuration and register every service it defines
///
/// Nothing is started; the services are backed by `tsh`, `kubectl` and the
/// configured proxy commands.
pub fn load_environment(config_path: &Path) -> Result<(Config, Orchestrator)> {
    let config = parser::parse_file(config_path)
        .with_context(|| format!("Failed to parse configuration '{}'", config_path.display()))?;
    let definitions = to_definitions(&config).context("Failed to convert configuration")?;

    let context = OrchestrationContext::new(to_orchestrator_config(&config.settings))
        .context("Failed to create orchestration context")?;
    let proxies: ProxyBackendFactory = Arc::new(|label, spec| {
        Arc::new(CommandProxyBackend::new(label, spec)) as Arc<dyn ProxyBackend>
    });
    let factory = ServiceFactory::new(
        context.spawner.clone(),
        context.capabilities.clone(),
        Arc::new(KubectlSession::default()),
        Arc::new(KubectlTunnels::new(context.spawner.clone())),
        proxies,
    );

    let orchestrator = Orchestrator::new(context);
    for service in factory.create_services(&definitions) {
        let label = service.label().to_string();
        orchestrator
            .register(service)
            .with_context(|| format!("Failed to register '{}'", label))?;
    }

    Ok((config, orchestrator))
}
