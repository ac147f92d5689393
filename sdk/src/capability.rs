//! Capability trait
//!
//! Every operation a plan step can invoke implements [`Capability`]. The
//! engine only sees the declared [`CapabilitySpec`] and the JSON result map;
//! what a capability actually does is opaque to the orchestrator.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::EngineError;
use crate::types::{CapabilitySpec, Inputs};

/// Trait that all capabilities must implement
#[async_trait]
pub trait Capability: Send + Sync {
    /// Catalog entry for this capability. `spec().name` is its dispatch key.
    fn spec(&self) -> CapabilitySpec;

    /// Invoke the capability with fully resolved inputs.
    ///
    /// Returning `Err` is equivalent to returning an error-flagged result map;
    /// the registry performs that conversion.
    async fn invoke(&self, inputs: Inputs) -> Result<Value, EngineError>;
}
