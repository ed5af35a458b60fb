//! Lifecycle tests for a minimal service built on the runtime

use async_runtime_compat::smol::SmolSpawner;
use async_trait::async_trait;
use service_runtime::{
    EventBus, EventFilter, HealthStatus, Result, Service, ServiceContext, ServiceState,
    ServiceType, StateMachine, StopDecision,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct TickerService {
    machine: StateMachine,
    ticks: Arc<AtomicUsize>,
}

impl TickerService {
    fn new(label: &str) -> Self {
        Self {
            machine: StateMachine::new(label, ServiceType::Proxy),
            ticks: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Service for TickerService {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    async fn start(&self, _ctx: &ServiceContext) -> Result<()> {
        if !self.machine.begin_start()? {
            return Ok(());
        }

        let ticks = self.ticks.clone();
        self.machine.tasks().install("ticker", &SmolSpawner, move |token| {
            Box::pin(async move {
                while !token.is_cancelled() {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    async_runtime_compat::sleep(Duration::from_millis(5)).await;
                }
            })
        });

        self.machine.finish_start()?;
        Ok(())
    }

    async fn stop(&self, _ctx: &ServiceContext) -> Result<()> {
        match self.machine.begin_stop() {
            StopDecision::AlreadyStopped | StopDecision::AlreadyStopping => Ok(()),
            StopDecision::TeardownOnly => {
                self.machine.tasks().shutdown_all().await;
                Ok(())
            }
            StopDecision::Proceed => {
                self.machine.tasks().shutdown_all().await;
                self.machine.finish_stop(None)
            }
        }
    }
}

fn wire(service: &TickerService, bus: &EventBus) {
    let bus = bus.clone();
    service.set_state_change_callback(Arc::new(move |event| {
        bus.publish(event.clone());
    }));
}

#[smol_potat::test]
async fn test_start_stop_publishes_each_transition_once() {
    let bus = EventBus::new();
    let subscribers: Vec<_> = (0..3).map(|_| bus.subscribe(EventFilter::all())).collect();
    let service = TickerService::new("ticker");
    wire(&service, &bus);

    let ctx = ServiceContext::background();
    service.start(&ctx).await.unwrap();
    service.start(&ctx).await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(service.health(), HealthStatus::Healthy);

    service.stop(&ctx).await.unwrap();
    service.stop(&ctx).await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);

    for subscriber in &subscribers {
        let states: Vec<_> = subscriber.drain().into_iter().map(|e| e.new_state).collect();
        assert_eq!(
            states,
            vec![
                ServiceState::Starting,
                ServiceState::Running,
                ServiceState::Stopping,
                ServiceState::Stopped,
            ]
        );
    }
}

#[smol_potat::test]
async fn test_stop_waits_for_background_task() {
    let service = TickerService::new("ticker");
    let ctx = ServiceContext::background();
    service.start(&ctx).await.unwrap();
    async_runtime_compat::sleep(Duration::from_millis(20)).await;

    service.stop(&ctx).await.unwrap();
    assert!(!service.machine().tasks().is_active("ticker"));

    let after_stop = service.ticks.load(Ordering::SeqCst);
    async_runtime_compat::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.ticks.load(Ordering::SeqCst), after_stop);
}

#[smol_potat::test]
async fn test_restart_from_stopped() {
    let service = TickerService::new("ticker");
    let ctx = ServiceContext::background();

    service.restart(&ctx).await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);

    service.restart(&ctx).await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.machine().tasks().is_active("ticker"));

    service.stop(&ctx).await.unwrap();
}

#[test]
fn test_status_snapshot_serializes() {
    let service = TickerService::new("ticker");
    let status = service.status();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["label"], "ticker");
    assert_eq!(json["state"], "Stopped");
    assert_eq!(json["service_type"], "proxy");
}
