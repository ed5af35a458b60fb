use super::{
    CapabilityConfig, CapabilityHandle, CapabilityLost, CapabilityRequirement, ProviderInfo,
    ProviderRegistration,
};
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::events::offer;
use async_channel::Sender;
use futures::future::{select, Either};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

// Retired handles remembered so late callers get a precise error
const RETIRED_LIMIT: usize = 256;

struct IssuedHandle {
    handle: CapabilityHandle,
    holder: String,
    notifier: Option<Sender<CapabilityLost>>,
}

enum Retirement {
    Released,
    Revoked { capability_type: String },
}

#[derive(Default)]
struct Inner {
    // Registration order decides which provider wins a match
    providers: IndexMap<String, ProviderRegistration>,
    // Live handles only
    handles: HashMap<String, IssuedHandle>,
    retired: IndexMap<String, Retirement>,
    waiters: Vec<Sender<()>>,
}

impl Inner {
    fn retire(&mut self, handle_id: String, retirement: Retirement) {
        self.handles.remove(&handle_id);
        self.retired.insert(handle_id, retirement);
        while self.retired.len() > RETIRED_LIMIT {
            self.retired.shift_remove_index(0);
        }
    }

    fn retired_error(&self, handle_id: &str) -> Error {
        match self.retired.get(handle_id) {
            Some(Retirement::Released) => Error::HandleReleased(handle_id.to_string()),
            Some(Retirement::Revoked { capability_type }) => Error::capability_unavailable(
                capability_type,
                "handle was invalidated by its provider",
            ),
            None => Error::NotFound(format!("capability handle {}", handle_id)),
        }
    }
}

/// Matches requirements to providers and tracks the handles it issues
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: Mutex<Inner>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advertise a provider; returns its id
    ///
    /// Requesters blocked on a capability wait are woken to re-check.
    pub fn register_provider(&self, registration: ProviderRegistration) -> String {
        let id = Uuid::new_v4().to_string();
        info!(
            "Registering capability provider '{}' for '{}' (features: {:?})",
            registration.name, registration.capability_type, registration.features
        );

        let mut inner = self.lock();
        inner.providers.insert(id.clone(), registration);
        // Dropping the senders closes every waiter's channel.
        inner.waiters.clear();
        id
    }

    /// Withdraw a provider and invalidate every handle it issued
    ///
    /// Each affected holder is notified through the channel it supplied when
    /// requesting. Returns the notices that were produced.
    pub fn unregister_provider(&self, provider_id: &str) -> Result<Vec<CapabilityLost>> {
        let mut inner = self.lock();
        let provider = inner
            .providers
            .shift_remove(provider_id)
            .ok_or_else(|| Error::NotFound(format!("capability provider {}", provider_id)))?;

        let revoked: Vec<String> = inner
            .handles
            .values()
            .filter(|issued| issued.handle.provider_id == provider_id)
            .map(|issued| issued.handle.id.clone())
            .collect();

        let mut lost = Vec::new();
        for handle_id in revoked {
            let Some(issued) = inner.handles.remove(&handle_id) else {
                continue;
            };
            let notice = CapabilityLost {
                handle_id: issued.handle.id.clone(),
                capability_type: issued.handle.capability_type.clone(),
                provider_name: provider.name.clone(),
            };
            if let Some(notifier) = &issued.notifier {
                if !offer(notifier, notice.clone()) {
                    debug!("Holder '{}' no longer listens for capability loss", issued.holder);
                }
            }
            inner.retire(
                handle_id,
                Retirement::Revoked {
                    capability_type: issued.handle.capability_type,
                },
            );
            lost.push(notice);
        }

        info!(
            "Unregistered capability provider '{}' ({} handle(s) invalidated)",
            provider.name,
            lost.len()
        );
        Ok(lost)
    }

    /// Match `requirement` against the current providers without waiting
    pub fn try_request(
        &self,
        holder: &str,
        requirement: &CapabilityRequirement,
        notifier: Option<Sender<CapabilityLost>>,
    ) -> Option<CapabilityHandle> {
        Self::issue(&mut self.lock(), holder, requirement, notifier)
    }

    /// Match `requirement`, waiting for a provider until `ctx` is done
    pub async fn request(
        &self,
        holder: &str,
        requirement: &CapabilityRequirement,
        notifier: Option<Sender<CapabilityLost>>,
        ctx: &ServiceContext,
    ) -> Result<CapabilityHandle> {
        loop {
            // The listener is registered under the same lock as the check so a
            // registration in between cannot be missed.
            let listener = {
                let mut inner = self.lock();
                if let Some(handle) = Self::issue(&mut inner, holder, requirement, notifier.clone()) {
                    return Ok(handle);
                }
                let (tx, rx) = async_channel::bounded::<()>(1);
                inner.waiters.push(tx);
                rx
            };

            debug!(
                "'{}' waiting for capability '{}'",
                holder, requirement.capability_type
            );

            let woken = std::pin::pin!(listener.recv());
            let done = std::pin::pin!(ctx.done());
            if let Either::Right((err, _)) = select(woken, done).await {
                return Err(Error::capability_unavailable(
                    &requirement.capability_type,
                    format!("no matching provider registered ({})", err),
                ));
            }
        }
    }

    fn issue(
        inner: &mut Inner,
        holder: &str,
        requirement: &CapabilityRequirement,
        notifier: Option<Sender<CapabilityLost>>,
    ) -> Option<CapabilityHandle> {
        let (provider_id, provider) = inner
            .providers
            .iter()
            .find(|(_, provider)| provider.satisfies(requirement))?;

        let mut resolved_config: CapabilityConfig = provider.config.clone();
        for (key, value) in &requirement.config {
            resolved_config.insert(key.clone(), value.clone());
        }

        let handle = CapabilityHandle {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.clone(),
            provider_name: provider.name.clone(),
            capability_type: requirement.capability_type.clone(),
            resolved_config,
        };
        debug!(
            "Issued '{}' handle {} from '{}' to '{}'",
            handle.capability_type, handle.id, handle.provider_name, holder
        );

        inner.handles.insert(
            handle.id.clone(),
            IssuedHandle {
                handle: handle.clone(),
                holder: holder.to_string(),
                notifier,
            },
        );
        Some(handle)
    }

    /// Whether a handle is still usable
    pub fn is_valid(&self, handle_id: &str) -> bool {
        self.lock().handles.contains_key(handle_id)
    }

    /// Return a handle voluntarily
    ///
    /// Releasing a handle its provider already revoked succeeds and forgets it.
    pub fn release_handle(&self, handle_id: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.handles.contains_key(handle_id) {
            inner.retire(handle_id.to_string(), Retirement::Released);
            return Ok(());
        }
        let revoked = matches!(inner.retired.get(handle_id), Some(Retirement::Revoked { .. }));
        if revoked {
            inner.retired.shift_remove(handle_id);
            return Ok(());
        }
        Err(inner.retired_error(handle_id))
    }

    /// Invoke a provider operation through a handle
    pub async fn execute(
        &self,
        handle_id: &str,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let executor = {
            let inner = self.lock();
            let issued = inner
                .handles
                .get(handle_id)
                .ok_or_else(|| inner.retired_error(handle_id))?;
            inner
                .providers
                .get(&issued.handle.provider_id)
                .and_then(|provider| provider.executor.clone())
                .ok_or_else(|| {
                    Error::provider(format!(
                        "provider '{}' does not execute operations",
                        issued.handle.provider_name
                    ))
                })?
        };

        executor.execute(operation, params).await.inspect_err(|err| {
            warn!("Capability operation '{}' failed: {}", operation, err);
        })
    }

    /// Whether the provider behind a handle can execute operations
    pub fn has_executor(&self, handle_id: &str) -> bool {
        let inner = self.lock();
        inner
            .handles
            .get(handle_id)
            .and_then(|issued| inner.providers.get(&issued.handle.provider_id))
            .map(|provider| provider.executor.is_some())
            .unwrap_or(false)
    }

    /// Snapshot of the registered providers, in registration order
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        let inner = self.lock();
        inner
            .providers
            .iter()
            .map(|(id, provider)| ProviderInfo {
                id: id.clone(),
                name: provider.name.clone(),
                capability_type: provider.capability_type.clone(),
                features: provider.features.clone(),
                active_handles: inner
                    .handles
                    .values()
                    .filter(|issued| &issued.handle.provider_id == id)
                    .count(),
            })
            .collect()
    }
}
