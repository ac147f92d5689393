//! Error types and handling
//!
//! This module provides the error types used throughout the Cadence engine.
//! All errors implement the `CadenceErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Capability failures are normally folded into result maps by the registry
//! (see [`crate::types::CapabilityOutput`]); these variants are what a
//! capability or a subsystem returns before that folding happens.

use thiserror::Error;

/// Trait for Cadence error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait CadenceErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by replanning.
    /// A step failing with a non-recoverable error is not retried.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Capability**: Unknown capability, bad input, execution failure
/// - **Planning**: Unparseable plans from the generative provider
/// - **Snapshot**: Persisting or restoring orchestrator state
///
/// # Examples
///
/// ```
/// use sdk::errors::{CadenceErrorExt, EngineError};
///
/// let error = EngineError::CapabilityNotFound("list_files".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::PlanUnparseable("not json".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Generative provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("LLM call timed out")]
    LLMTimeout,

    // Capability errors
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Invalid input for capability {capability}: {reason}")]
    InvalidInput { capability: String, reason: String },

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    // Planning errors
    #[error("Plan could not be parsed: {0}")]
    PlanUnparseable(String),

    // Snapshot errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::LLMProvider(_) => "LLM provider unavailable. Check the provider settings and network",
            Self::LLMTimeout => "LLM provider took too long to respond. Try again",

            Self::CapabilityNotFound(_) => "The requested capability is not in the catalog",
            Self::InvalidInput { .. } => "The step supplied incomplete or malformed inputs",
            Self::Capability(_) => "Capability execution failed",
            Self::PathOutsideWorkspace(_) => "Operation must be within workspace",

            Self::PlanUnparseable(_) => "The planner returned no usable plan. Rephrase the goal",

            Self::Snapshot(_) => "Could not read or write the run snapshot",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::PlanUnparseable(_) | Self::Snapshot(_) => false,
            _ => true,
        }
    }
}
