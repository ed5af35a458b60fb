//! Reusable, thread-safe state machine core
//!
//! Concrete services embed a [`StateMachine`] and route every state, health
//! and error change through it. The record lock is held only while the triple
//! is swapped; the change callback always runs after the lock is released so
//! that callbacks may call back into the service.

use crate::error::{Error, Result};
use crate::events::ServiceStateEvent;
use crate::state::{HealthStatus, ServiceState, ServiceType};
use async_channel::Receiver;
use async_runtime_compat::{BoxTask, CancellationToken, Spawner};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Callback invoked once per applied update
pub type StateChangeCallback = Arc<dyn Fn(&ServiceStateEvent) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
struct Record {
    state: ServiceState,
    health: HealthStatus,
    last_error: Option<Error>,
    last_health_check: Option<DateTime<Utc>>,
    sequence: u64,
}

/// Point-in-time copy of a service record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    /// Lifecycle state
    pub state: ServiceState,
    /// Health
    pub health: HealthStatus,
    /// Last recorded error
    pub last_error: Option<Error>,
    /// When health was last determined by a check
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Outcome of asking the machine to begin a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// Already stopped; nothing to do
    AlreadyStopped,
    /// Another caller is stopping the service
    AlreadyStopping,
    /// Service failed earlier; tear down leftovers but keep `Failed`
    TeardownOnly,
    /// Transitioned to `Stopping`; caller must tear down and finish
    Proceed,
}

/// State/health/error holder with a change-notification hook
pub struct StateMachine {
    label: String,
    service_type: ServiceType,
    record: Mutex<Record>,
    callback: Mutex<Option<StateChangeCallback>>,
    tasks: TaskSlots,
}

impl StateMachine {
    /// Create a machine in `Stopped`/`Unknown`
    pub fn new(label: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            label: label.into(),
            service_type,
            record: Mutex::new(Record::default()),
            callback: Mutex::new(None),
            tasks: TaskSlots::default(),
        }
    }

    /// Service label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Service kind
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        lock(&self.record).state
    }

    /// Current health
    pub fn health(&self) -> HealthStatus {
        lock(&self.record).health
    }

    /// Last recorded error
    pub fn last_error(&self) -> Option<Error> {
        lock(&self.record).last_error.clone()
    }

    /// When health was last determined by a check
    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        lock(&self.record).last_health_check
    }

    /// Consistent copy of the whole record
    pub fn snapshot(&self) -> RecordSnapshot {
        let record = lock(&self.record);
        RecordSnapshot {
            state: record.state,
            health: record.health,
            last_error: record.last_error.clone(),
            last_health_check: record.last_health_check,
        }
    }

    /// Background task slots owned by this service
    pub fn tasks(&self) -> &TaskSlots {
        &self.tasks
    }

    /// Install the change callback, replacing any previous one
    pub fn set_state_change_callback(&self, callback: StateChangeCallback) {
        *lock(&self.callback) = Some(callback);
    }

    /// Swap the state/health/error triple
    ///
    /// This is the single mutation point. Illegal transitions are rejected and
    /// leave the record untouched.
    pub fn update_state(
        &self,
        state: ServiceState,
        health: HealthStatus,
        error: Option<Error>,
    ) -> Result<()> {
        self.commit(|_| Ok(Some((state, health, error)))).map(|_| ())
    }

    /// Update health and error without moving the lifecycle state
    pub fn update_health(&self, health: HealthStatus, error: Option<Error>) -> Result<()> {
        self.commit(|record| Ok(Some((record.state, health, error))))
            .map(|_| ())
    }

    /// Enter `Starting` unless already running
    ///
    /// Returns `Ok(false)` when the service is `Running` (idempotent start).
    pub fn begin_start(&self) -> Result<bool> {
        self.commit(|record| match record.state {
            ServiceState::Running => Ok(None),
            ServiceState::Stopped | ServiceState::Failed => {
                Ok(Some((ServiceState::Starting, HealthStatus::Checking, None)))
            }
            from => Err(Error::InvalidStateTransition {
                label: self.label.clone(),
                from,
                to: ServiceState::Starting,
            }),
        })
    }

    /// Enter `Stopping` if there is anything to stop
    pub fn begin_stop(&self) -> StopDecision {
        let mut decision = StopDecision::AlreadyStopped;
        let result = self.commit(|record| match record.state {
            ServiceState::Stopped => Ok(None),
            ServiceState::Stopping => {
                decision = StopDecision::AlreadyStopping;
                Ok(None)
            }
            ServiceState::Failed => {
                decision = StopDecision::TeardownOnly;
                Ok(None)
            }
            ServiceState::Starting | ServiceState::Running => {
                decision = StopDecision::Proceed;
                Ok(Some((ServiceState::Stopping, record.health, record.last_error.clone())))
            }
        });
        if let Err(err) = result {
            warn!("Service '{}' could not begin stop: {}", self.label, err);
        }
        decision
    }

    /// Move to `Running`/`Healthy` if the service is still starting
    ///
    /// Returns `Ok(false)` when a concurrent stop won the race.
    pub fn finish_start(&self) -> Result<bool> {
        self.commit(|record| match record.state {
            ServiceState::Starting => Ok(Some((ServiceState::Running, HealthStatus::Healthy, None))),
            _ => Ok(None),
        })
    }

    /// Record a failure if the service is starting or running
    ///
    /// Failures observed after a stop began are recorded on the record without
    /// moving the state.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.commit(|record| match record.state {
            ServiceState::Starting | ServiceState::Running => Ok(Some((
                ServiceState::Failed,
                HealthStatus::Unhealthy,
                Some(error),
            ))),
            state => Ok(Some((state, record.health, Some(error)))),
        })
        .map(|_| ())
    }

    /// Complete a stop started with [`StateMachine::begin_stop`]
    pub fn finish_stop(&self, error: Option<Error>) -> Result<()> {
        self.commit(|record| match record.state {
            ServiceState::Stopping => Ok(Some((ServiceState::Stopped, HealthStatus::Unknown, error))),
            _ => Ok(None),
        })
        .map(|_| ())
    }

    /// The transition function every mutation goes through
    fn commit<F>(&self, decide: F) -> Result<bool>
    where
        F: FnOnce(&Record) -> Result<Option<(ServiceState, HealthStatus, Option<Error>)>>,
    {
        let event = {
            let mut record = lock(&self.record);
            let Some((state, health, error)) = decide(&record)? else {
                return Ok(false);
            };

            if !record.state.can_transition_to(state) {
                return Err(Error::InvalidStateTransition {
                    label: self.label.clone(),
                    from: record.state,
                    to: state,
                });
            }

            let old_state = record.state;
            let now = Utc::now();
            if old_state == state && matches!(health, HealthStatus::Healthy | HealthStatus::Unhealthy) {
                record.last_health_check = Some(now);
            }
            record.state = state;
            record.health = health;
            record.last_error = error.clone();
            record.sequence += 1;

            debug!(
                "Service '{}' state: {} -> {} ({})",
                self.label, old_state, state, health
            );

            ServiceStateEvent {
                label: self.label.clone(),
                service_type: self.service_type,
                old_state,
                new_state: state,
                health,
                error,
                timestamp: now,
                sequence: record.sequence,
            }
        };

        // Callback runs outside the record lock.
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(&event);
        }
        Ok(true)
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("label", &self.label)
            .field("service_type", &self.service_type)
            .field("record", &*lock(&self.record))
            .finish()
    }
}

struct TaskHandle {
    token: CancellationToken,
    done: Receiver<()>,
}

/// Named background tasks owned by a service
///
/// Installing a task under a name that is already taken cancels the previous
/// task: the most recent start owns the slot.
#[derive(Default)]
pub struct TaskSlots {
    slots: Mutex<HashMap<&'static str, TaskHandle>>,
}

impl TaskSlots {
    /// Spawn `task` under `name`, cancelling whatever held the slot before
    pub fn install<F>(&self, name: &'static str, spawner: &dyn Spawner, task: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> BoxTask,
    {
        let token = CancellationToken::new();
        let (done_tx, done) = async_channel::bounded::<()>(1);
        let future = task(token.clone());

        let previous = lock(&self.slots).insert(
            name,
            TaskHandle {
                token: token.clone(),
                done,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        spawner.spawn(Box::pin(async move {
            // Dropping the sender on exit closes `done`.
            let _done = done_tx;
            future.await;
        }));

        token
    }

    /// Cancel the task under `name` and wait for it to exit
    pub async fn shutdown(&self, name: &'static str) {
        let handle = lock(&self.slots).remove(name);
        if let Some(handle) = handle {
            handle.token.cancel();
            while handle.done.recv().await.is_ok() {}
        }
    }

    /// Cancel every task and wait for all of them to exit
    pub async fn shutdown_all(&self) {
        let handles: Vec<_> = lock(&self.slots).drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.token.cancel();
        }
        for handle in handles {
            while handle.done.recv().await.is_ok() {}
        }
    }

    /// Whether a task is installed and still running under `name`
    pub fn is_active(&self, name: &'static str) -> bool {
        lock(&self.slots)
            .get(name)
            .map(|h| !h.done.is_closed())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_runtime_compat::smol::SmolSpawner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(machine: &StateMachine) -> Arc<Mutex<Vec<ServiceStateEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        machine.set_state_change_callback(Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
        events
    }

    #[test]
    fn test_update_state_emits_one_event() {
        let machine = StateMachine::new("svc", ServiceType::Proxy);
        let events = recorder(&machine);

        machine
            .update_state(ServiceState::Starting, HealthStatus::Checking, None)
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_state, ServiceState::Stopped);
        assert_eq!(events[0].new_state, ServiceState::Starting);
    }

    #[test]
    fn test_concurrent_updates_carry_distinct_sequences() {
        let machine = Arc::new(StateMachine::new("svc", ServiceType::Proxy));
        let events = recorder(&machine);
        machine
            .update_state(ServiceState::Starting, HealthStatus::Checking, None)
            .unwrap();

        let writers: Vec<_> = (0..4)
            .map(|n| {
                let machine = machine.clone();
                std::thread::spawn(move || {
                    let health = if n % 2 == 0 {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Unhealthy
                    };
                    for _ in 0..50 {
                        machine.update_health(health, None).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let events = events.lock().unwrap();
        let mut sequences: Vec<u64> = events.iter().map(|event| event.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=201).collect::<Vec<u64>>());

        let latest = events.iter().max_by_key(|event| event.sequence).unwrap();
        assert_eq!(latest.health, machine.health());
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let machine = StateMachine::new("svc", ServiceType::Proxy);
        let events = recorder(&machine);

        let err = machine
            .update_state(ServiceState::Running, HealthStatus::Healthy, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(machine.state(), ServiceState::Stopped);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_callback_may_reenter_machine() {
        let machine = Arc::new(StateMachine::new("svc", ServiceType::Proxy));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&machine);
        let sink = observed.clone();
        machine.set_state_change_callback(Arc::new(move |_| {
            if let Some(machine) = weak.upgrade() {
                // Reading state inside the callback must not deadlock.
                sink.lock().unwrap().push(machine.state());
            }
        }));

        machine.begin_start().unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![ServiceState::Starting]);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let machine = StateMachine::new("svc", ServiceType::Proxy);
        assert_eq!(machine.begin_stop(), StopDecision::AlreadyStopped);

        assert!(machine.begin_start().unwrap());
        assert!(machine.finish_start().unwrap());
        assert!(!machine.begin_start().unwrap());
        assert_eq!(machine.state(), ServiceState::Running);

        assert_eq!(machine.begin_stop(), StopDecision::Proceed);
        machine.finish_stop(None).unwrap();
        assert_eq!(machine.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_failed_service_keeps_state_on_stop() {
        let machine = StateMachine::new("svc", ServiceType::Proxy);
        machine.begin_start().unwrap();
        machine.fail(Error::provider("boom")).unwrap();

        assert_eq!(machine.begin_stop(), StopDecision::TeardownOnly);
        assert_eq!(machine.state(), ServiceState::Failed);
        assert!(machine.begin_start().unwrap());
    }

    #[test]
    fn test_health_update_keeps_state() {
        let machine = StateMachine::new("svc", ServiceType::Proxy);
        machine.begin_start().unwrap();
        machine.finish_start().unwrap();

        machine
            .update_health(HealthStatus::Unhealthy, Some(Error::health_check("2 of 3 nodes ready")))
            .unwrap();

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, ServiceState::Running);
        assert_eq!(snapshot.health, HealthStatus::Unhealthy);
        assert!(snapshot.last_health_check.is_some());
    }

    #[smol_potat::test]
    async fn test_task_slot_shutdown_waits_for_exit() {
        let slots = TaskSlots::default();
        let exited = Arc::new(AtomicUsize::new(0));

        let flag = exited.clone();
        slots.install("monitor", &SmolSpawner, move |token| {
            Box::pin(async move {
                token.cancelled().await;
                flag.fetch_add(1, Ordering::SeqCst);
            })
        });
        assert!(slots.is_active("monitor"));

        slots.shutdown("monitor").await;
        assert_eq!(exited.load(Ordering::SeqCst), 1);
        assert!(!slots.is_active("monitor"));
    }

    #[smol_potat::test]
    async fn test_reinstall_cancels_previous_task() {
        let slots = TaskSlots::default();
        let first = slots.install("monitor", &SmolSpawner, |token| {
            Box::pin(async move { token.cancelled().await })
        });
        let second = slots.install("monitor", &SmolSpawner, |token| {
            Box::pin(async move { token.cancelled().await })
        });

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        slots.shutdown_all().await;
        assert!(second.is_cancelled());
    }
}
