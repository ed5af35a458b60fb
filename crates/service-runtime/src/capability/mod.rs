//! Capability negotiation
//!
//! Providers advertise a capability type, a feature set and a config.
//! Requirers declare typed requirements; the [`CapabilityRegistry`] matches
//! them and issues revocable [`CapabilityHandle`]s. A [`CapabilityClient`] is
//! the requirer's side of that exchange.

mod client;
mod registry;

pub use client::CapabilityClient;
pub use registry::CapabilityRegistry;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Free-form capability configuration
pub type CapabilityConfig = serde_json::Map<String, serde_json::Value>;

/// What a service needs from some provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequirement {
    /// Capability type, e.g. `auth`
    #[serde(rename = "type")]
    pub capability_type: String,
    /// Features the provider must offer
    #[serde(default)]
    pub required_features: Vec<String>,
    /// Requirer-side config, checked by the provider's validator
    #[serde(default)]
    pub config: CapabilityConfig,
    /// Optional requirements never block start
    #[serde(default)]
    pub optional: bool,
}

impl CapabilityRequirement {
    /// A required capability of `capability_type`
    pub fn new(capability_type: impl Into<String>) -> Self {
        Self {
            capability_type: capability_type.into(),
            required_features: Vec::new(),
            config: CapabilityConfig::new(),
            optional: false,
        }
    }

    /// Require these features
    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Attach requirer-side config
    pub fn with_config(mut self, config: CapabilityConfig) -> Self {
        self.config = config;
        self
    }

    /// Mark as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Revocable grant issued by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityHandle {
    /// Handle id
    pub id: String,
    /// Issuing provider id
    pub provider_id: String,
    /// Issuing provider name
    pub provider_name: String,
    /// Capability type
    pub capability_type: String,
    /// Provider config overlaid with the requirement config
    pub resolved_config: CapabilityConfig,
}

/// Operations a provider can perform on behalf of handle holders
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    /// Accept or reject a requirer's config
    fn validate_config(&self, _config: &CapabilityConfig) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Run a named operation
    async fn execute(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// A provider advertisement
#[derive(Clone)]
pub struct ProviderRegistration {
    /// Human readable provider name
    pub name: String,
    /// Capability type offered
    pub capability_type: String,
    /// Features offered
    pub features: Vec<String>,
    /// Provider-side config
    pub config: CapabilityConfig,
    /// Optional executor for handle operations
    pub executor: Option<Arc<dyn CapabilityExecutor>>,
}

impl ProviderRegistration {
    /// Advertise `capability_type` under `name`
    pub fn new(name: impl Into<String>, capability_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability_type: capability_type.into(),
            features: Vec::new(),
            config: CapabilityConfig::new(),
            executor: None,
        }
    }

    /// Offer these features
    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Provider-side config
    pub fn with_config(mut self, config: CapabilityConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an executor
    pub fn with_executor(mut self, executor: Arc<dyn CapabilityExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn satisfies(&self, requirement: &CapabilityRequirement) -> bool {
        if self.capability_type != requirement.capability_type {
            return false;
        }
        if !requirement
            .required_features
            .iter()
            .all(|feature| self.features.contains(feature))
        {
            return false;
        }
        match &self.executor {
            Some(executor) => executor.validate_config(&requirement.config).is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.name)
            .field("capability_type", &self.capability_type)
            .field("features", &self.features)
            .field("config", &self.config)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

/// Provider listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider id
    pub id: String,
    /// Provider name
    pub name: String,
    /// Capability type
    pub capability_type: String,
    /// Offered features
    pub features: Vec<String>,
    /// Number of valid, unreleased handles issued by this provider
    pub active_handles: usize,
}

/// Notice sent to a holder when one of its handles is invalidated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityLost {
    /// Invalidated handle id
    pub handle_id: String,
    /// Capability type
    pub capability_type: String,
    /// Provider that went away
    pub provider_name: String,
}

/// How a capability loss affects the holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossImpact {
    /// A required capability of this type was lost
    Required(String),
    /// An optional capability of this type was lost; fall back
    Optional(String),
}
