//! Label-keyed registry of managed services

use crate::{Error, Result};
use indexmap::IndexMap;
use service_runtime::Service;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Registry of managed services in registration order
///
/// Mutations take the write lock; reads return `Arc` snapshots so callers
/// never hold the lock across a service call.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<IndexMap<String, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service; duplicate labels are rejected
    pub fn insert(&self, service: Arc<dyn Service>) -> Result<()> {
        let label = service.label().to_string();
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(&label) {
            return Err(Error::Config(format!("Duplicate service label '{}'", label)));
        }
        debug!("Registered service '{}' ({})", label, service.service_type());
        services.insert(label, service);
        Ok(())
    }

    /// Remove a service by label
    pub fn remove(&self, label: &str) -> Result<Arc<dyn Service>> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(label)
            .ok_or_else(|| Error::ServiceNotFound(label.to_string()))
    }

    /// Look up a service by label
    pub fn get(&self, label: &str) -> Result<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(label.to_string()))
    }

    /// Snapshot of every service in registration order
    pub fn all(&self) -> Vec<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Registered labels in registration order
    pub fn labels(&self) -> Vec<String> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no service is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
