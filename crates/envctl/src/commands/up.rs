use super::load_environment;
use crate::output;
use anyhow::{Context, Result};
use service_orchestration::Orchestrator;
use service_runtime::{ServiceContext, ServiceStateEvent, Subscription};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const POLL_STEP: Duration = Duration::from_millis(250);

pub async fn run(config_path: &Path, json: bool, status_interval: u64) -> Result<()> {
    let (_config, orchestrator) = load_environment(config_path)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, interrupted.clone())
            .context("Failed to install signal handler")?;
    }

    let events = orchestrator.subscribe_to_state_changes();
    orchestrator
        .context()
        .spawner
        .spawn(Box::pin(log_events(events, json)));

    let ctx = ServiceContext::background();
    let errors = orchestrator.start(&ctx).await;
    if errors.is_empty() {
        info!("All services started");
    } else {
        for err in &errors {
            error!("{}", err);
        }
        warn!("{} service(s) did not start", errors.len());
    }

    print_status(&orchestrator, json)?;
    wait_for_interrupt(&orchestrator, &interrupted, json, status_interval).await?;

    info!("Interrupted, stopping all services");
    let stop_errors = orchestrator.stop_all(&ctx).await;
    for err in &stop_errors {
        error!("{}", err);
    }
    print_status(&orchestrator, json)?;

    if stop_errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} service(s) did not stop cleanly", stop_errors.len())
    }
}

async fn wait_for_interrupt(
    orchestrator: &Orchestrator,
    interrupted: &AtomicBool,
    json: bool,
    status_interval: u64,
) -> Result<()> {
    let interval = Duration::from_secs(status_interval.max(1));
    let mut next_status = Instant::now() + interval;

    while !interrupted.load(Ordering::SeqCst) {
        smol::Timer::after(POLL_STEP).await;
        if Instant::now() >= next_status {
            print_status(orchestrator, json)?;
            next_status = Instant::now() + interval;
        }
    }
    Ok(())
}

fn print_status(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let statuses = orchestrator.get_all_services();
    if json {
        println!("{}", serde_json::to_string(&statuses)?);
    } else {
        println!("{}", output::status_table(&statuses));
    }
    Ok(())
}

async fn log_events(events: Subscription, json: bool) {
    let mut latest: HashMap<String, u64> = HashMap::new();
    while let Some(event) = events.recv().await {
        if !is_fresh(&mut latest, &event) {
            debug!("Skipping stale event #{} for '{}'", event.sequence, event.label);
            continue;
        }
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!("Unserializable event for '{}': {}", event.label, err),
            }
        } else {
            log_event(&event);
        }
    }
}

/// Whether `event` is newer than anything already seen for its service
fn is_fresh(latest: &mut HashMap<String, u64>, event: &ServiceStateEvent) -> bool {
    let seen = latest.entry(event.label.clone()).or_insert(0);
    if event.sequence <= *seen {
        return false;
    }
    *seen = event.sequence;
    true
}

fn log_event(event: &ServiceStateEvent) {
    match (&event.error, event.is_transition()) {
        (Some(err), true) => warn!(
            "{}: {} -> {} ({}): {}",
            event.label, event.old_state, event.new_state, event.health, err
        ),
        (None, true) => info!(
            "{}: {} -> {} ({})",
            event.label, event.old_state, event.new_state, event.health
        ),
        (Some(err), false) => warn!("{}: {} ({})", event.label, event.health, err),
        (None, false) => info!("{}: {}", event.label, event.health),
    }
}
