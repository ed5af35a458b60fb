use super::{CapabilityHandle, CapabilityLost, CapabilityRegistry, CapabilityRequirement, LossImpact};
use crate::context::ServiceContext;
use crate::error::Result;
use crate::service::ServiceData;
use async_channel::{Receiver, Sender};
use async_runtime_compat::CancellationToken;
use futures::future::{select, Either};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Requirer-side view of capability negotiation
///
/// Holds the requirements a service declared at construction, the handles it
/// currently owns, and the channel on which the registry reports losses.
pub struct CapabilityClient {
    holder: String,
    registry: Arc<CapabilityRegistry>,
    requirements: Vec<CapabilityRequirement>,
    handles: Mutex<IndexMap<String, CapabilityHandle>>,
    loss_tx: Sender<CapabilityLost>,
    loss_rx: Receiver<CapabilityLost>,
}

impl CapabilityClient {
    /// Create a client for `holder` with fixed requirements
    pub fn new(
        holder: impl Into<String>,
        registry: Arc<CapabilityRegistry>,
        requirements: Vec<CapabilityRequirement>,
    ) -> Self {
        let (loss_tx, loss_rx) = async_channel::unbounded();
        Self {
            holder: holder.into(),
            registry,
            requirements,
            handles: Mutex::new(IndexMap::new()),
            loss_tx,
            loss_rx,
        }
    }

    fn handles(&self) -> MutexGuard<'_, IndexMap<String, CapabilityHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declared requirements
    pub fn requirements(&self) -> &[CapabilityRequirement] {
        &self.requirements
    }

    /// The registry this client negotiates with
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Request one capability, waiting until `ctx` is done
    pub async fn request_capability(
        &self,
        requirement: &CapabilityRequirement,
        ctx: &ServiceContext,
    ) -> Result<CapabilityHandle> {
        let handle = self
            .registry
            .request(&self.holder, requirement, Some(self.loss_tx.clone()), ctx)
            .await?;
        self.store(handle.clone());
        Ok(handle)
    }

    fn store(&self, handle: CapabilityHandle) {
        let previous = self
            .handles()
            .insert(handle.capability_type.clone(), handle);
        if let Some(previous) = previous {
            if let Err(err) = self.registry.release_handle(&previous.id) {
                debug!("'{}': release of replaced {} skipped: {}", self.holder, previous.id, err);
            }
        }
    }

    /// Satisfy every declared requirement
    ///
    /// Required capabilities block until `ctx` is done and fail with a
    /// capability error on timeout. Optional ones are only tried once.
    pub async fn wait_for_capabilities(&self, ctx: &ServiceContext) -> Result<()> {
        for requirement in &self.requirements {
            if self.has_capability(&requirement.capability_type) {
                continue;
            }

            if requirement.optional {
                match self.registry.try_request(
                    &self.holder,
                    requirement,
                    Some(self.loss_tx.clone()),
                ) {
                    Some(handle) => self.store(handle),
                    None => info!(
                        "'{}': optional capability '{}' unavailable, using fallback",
                        self.holder, requirement.capability_type
                    ),
                }
                continue;
            }

            self.request_capability(requirement, ctx).await?;
        }
        Ok(())
    }

    /// Valid handle for `capability_type`, if any
    pub fn capability_handle(&self, capability_type: &str) -> Option<CapabilityHandle> {
        let handle = self.handles().get(capability_type).cloned()?;
        self.registry.is_valid(&handle.id).then_some(handle)
    }

    /// Whether a valid handle for `capability_type` is held
    pub fn has_capability(&self, capability_type: &str) -> bool {
        self.capability_handle(capability_type).is_some()
    }

    /// Whether every non-optional requirement is satisfied
    pub fn has_required_capabilities(&self) -> bool {
        self.requirements
            .iter()
            .filter(|requirement| !requirement.optional)
            .all(|requirement| self.has_capability(&requirement.capability_type))
    }

    /// Drop the local copy of an invalidated handle and classify the loss
    ///
    /// Returns `None` when the handle is not held (already released or replaced).
    pub fn on_capability_lost(&self, handle_id: &str) -> Option<LossImpact> {
        let capability_type = {
            let mut handles = self.handles();
            let capability_type = handles
                .iter()
                .find(|(_, handle)| handle.id == handle_id)
                .map(|(capability_type, _)| capability_type.clone())?;
            handles.shift_remove(&capability_type);
            capability_type
        };

        let optional = self
            .requirements
            .iter()
            .filter(|requirement| requirement.capability_type == capability_type)
            .all(|requirement| requirement.optional);

        if optional {
            warn!(
                "'{}': optional capability '{}' lost, falling back",
                self.holder, capability_type
            );
            Some(LossImpact::Optional(capability_type))
        } else {
            warn!(
                "'{}': required capability '{}' lost",
                self.holder, capability_type
            );
            Some(LossImpact::Required(capability_type))
        }
    }

    /// Wait for the next loss notice relevant to this client
    ///
    /// Returns `None` once `token` is cancelled.
    pub async fn next_loss(&self, token: &CancellationToken) -> Option<(CapabilityLost, LossImpact)> {
        loop {
            let notice = {
                let received = std::pin::pin!(self.loss_rx.recv());
                let cancelled = std::pin::pin!(token.cancelled());
                match select(received, cancelled).await {
                    Either::Left((Ok(notice), _)) => notice,
                    Either::Left((Err(_), _)) | Either::Right(_) => return None,
                }
            };
            match self.on_capability_lost(&notice.handle_id) {
                Some(impact) => return Some((notice, impact)),
                None => debug!(
                    "'{}': ignoring loss of handle {} no longer held",
                    self.holder, notice.handle_id
                ),
            }
        }
    }

    /// Release every held handle
    pub fn release_all(&self) {
        let handles: Vec<_> = self.handles().drain(..).map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(err) = self.registry.release_handle(&handle.id) {
                debug!("'{}': release of {} skipped: {}", self.holder, handle.id, err);
            }
        }
    }

    /// `has_capability_<type>` flags for status output
    pub fn capability_data(&self) -> ServiceData {
        self.requirements
            .iter()
            .map(|requirement| {
                (
                    format!("has_capability_{}", requirement.capability_type),
                    serde_json::Value::Bool(self.has_capability(&requirement.capability_type)),
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for CapabilityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityClient")
            .field("holder", &self.holder)
            .field("requirements", &self.requirements)
            .field("handles", &*self.handles())
            .finish()
    }
}
