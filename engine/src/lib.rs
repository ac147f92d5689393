//! Cadence Engine Library
//!
//! Goal-driven plan orchestration: a generative planner proposes a plan, a
//! deterministic validator gates it, and the conductor executes it step by
//! step against a capability registry under a joint token/time/step budget.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// LLM provider abstraction layer
pub mod llm;

/// Capability registry and built-in capabilities
pub mod capabilities;

/// Conductor orchestration module
pub mod conductor;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
