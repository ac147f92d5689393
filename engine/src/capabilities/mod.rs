//! Capability registry
//!
//! Holds every capability a plan step can invoke, keyed by name. The registry
//! is the executor's only route to external work, and its `catalog()` is the
//! only source of truth for whether a capability exists.

pub mod filesystem;

pub use filesystem::{ListDir, ReadFile, WorkspaceGuard, WriteFile};

use crate::config::Config;
use anyhow::Result;
use sdk::errors::CadenceErrorExt;
use sdk::types::{CapabilityOutput, CapabilitySpec, Inputs};
use sdk::Capability;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of capabilities that can be dispatched by the executor.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Create an empty registry with no capabilities.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in capabilities enabled in `config`.
    pub fn with_builtins(config: &Config) -> Result<Self> {
        let mut registry = Self::empty();
        if config.capabilities.filesystem {
            let guard = Arc::new(WorkspaceGuard::new(&config.core.workspace)?);
            registry.register(Arc::new(ReadFile::new(Arc::clone(&guard))));
            registry.register(Arc::new(WriteFile::new(Arc::clone(&guard))));
            registry.register(Arc::new(ListDir::new(guard)));
        }
        Ok(registry)
    }

    /// Add a capability, replacing any previous one with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.spec().name;
        if self.capabilities.insert(name.clone(), capability).is_some() {
            warn!("Capability '{}' registered twice; keeping the latest", name);
        }
    }

    /// Catalog entries sorted by name
    pub fn catalog(&self) -> Vec<CapabilitySpec> {
        self.capabilities.values().map(|c| c.spec()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Invoke a capability by name.
    ///
    /// Always returns a result map. Unknown names and capability errors come
    /// back error-flagged so the step evaluator can see them.
    pub async fn invoke(&self, name: &str, inputs: Inputs) -> Value {
        let Some(capability) = self.capabilities.get(name) else {
            warn!("Unknown capability requested: {}", name);
            let available = self.names();
            let mut result = CapabilityOutput::error(format!(
                "unknown capability '{}'. Available capabilities: {}",
                name,
                available.join(", ")
            ));
            result["available"] = json!(available);
            return result;
        };

        debug!("Invoking capability '{}' with {} inputs", name, inputs.len());
        match capability.invoke(inputs).await {
            Ok(result) => result,
            Err(e) => {
                debug!("Capability '{}' failed: {}", name, e);
                let mut result = CapabilityOutput::error(e.to_string());
                result["hint"] = json!(e.user_hint());
                result["recoverable"] = json!(e.is_recoverable());
                result
            }
        }
    }
}
