//! Cadence SDK
//!
//! Shared library providing the capability trait, catalog types and error
//! taxonomy. This crate is used by the engine and by capability providers.

/// Capability trait
pub mod capability;

/// Error types and handling
pub mod errors;

/// Catalog and input/output types
pub mod types;

// Re-export commonly used types
pub use capability::Capability;
pub use errors::{CadenceErrorExt, EngineError};
pub use types::{CapabilityInput, CapabilityOutput, CapabilitySpec, InputError, Inputs, ParamSpec};
