//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Plan and execute a goal
//! - validate: Check a plan file against the built-in catalog
//! - resume: Continue a run from a snapshot
//! - catalog: List available capabilities

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::capabilities::CapabilityRegistry;
use crate::conductor::{
    parse_plan, snapshot, Budget, Orchestrator, OrchestratorSettings, PlanValidator, RunResult,
    StepDefaults,
};
use crate::config::Config;
use crate::llm::provider_from_config;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Budget ceilings given on the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetOverrides {
    pub max_tokens: Option<u64>,
    pub max_time_secs: Option<u64>,
    pub max_steps: Option<u32>,
}

impl BudgetOverrides {
    /// Apply the overrides on top of the configured defaults
    pub fn budget(&self, config: &Config) -> Budget {
        Budget::new(
            self.max_tokens.unwrap_or(config.budget.max_tokens),
            self.max_time_secs.unwrap_or(config.budget.max_time_secs),
            self.max_steps.unwrap_or(config.budget.max_steps),
        )
    }
}

async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let llm = provider_from_config(&config.llm).context("Failed to create LLM provider")?;
    if !llm.check_health().await {
        tracing::warn!(
            "Provider '{}' is not reachable; planning will likely fail",
            llm.name()
        );
    }
    let registry = CapabilityRegistry::with_builtins(config)
        .context("Failed to register built-in capabilities")?;

    tracing::debug!(
        "Using provider '{}' with {} capabilities",
        llm.name(),
        registry.len()
    );

    Ok(Orchestrator::new(
        llm,
        Arc::new(registry),
        OrchestratorSettings::from_config(config),
    ))
}

/// Plan and execute `goal`, then print the final result.
pub async fn handle_run(
    goal: String,
    context: String,
    overrides: BudgetOverrides,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let result = orchestrator
        .execute(&goal, &context, overrides.budget(config))
        .await;

    print_result(&result, config, format)
}

/// Validate a plan file. Returns whether the plan is valid.
pub async fn handle_validate(
    plan_path: &Path,
    config: &Config,
    format: OutputFormat,
) -> Result<bool> {
    let contents = std::fs::read_to_string(plan_path)
        .with_context(|| format!("Failed to read plan file {}", plan_path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("Plan file {} is not valid JSON", plan_path.display()))?;
    let plan = parse_plan(
        value,
        StepDefaults {
            max_retries: config.orchestrator.default_max_retries,
            timeout_secs: config.orchestrator.default_step_timeout_secs,
        },
    )
    .context("Plan file does not describe a list of steps")?;

    let registry = CapabilityRegistry::with_builtins(config)
        .context("Failed to register built-in capabilities")?;
    let catalog = registry.catalog();
    let report = PlanValidator::new(&catalog).validate(&plan);

    match format {
        OutputFormat::Text => {
            if report.is_valid {
                println!("✓ Plan is valid ({} steps)", plan.steps.len());
            } else {
                println!("✗ Plan is invalid ({} errors)", report.errors().count());
            }
            if !report.findings.is_empty() {
                println!();
                for finding in &report.findings {
                    println!("  {}", finding);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "plan": plan_path.display().to_string(),
                "steps": plan.steps.len(),
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(report.is_valid)
}

/// Continue a run from a snapshot file.
pub async fn handle_resume(
    snapshot_path: &Path,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let state = snapshot::load(snapshot_path)
        .with_context(|| format!("Failed to load snapshot {}", snapshot_path.display()))?;

    if state.status.is_terminal() {
        tracing::info!(
            "Run {} already finished ({}); reporting its result",
            state.run_id,
            state.status
        );
    } else {
        tracing::info!("Resuming run {} from status {}", state.run_id, state.status);
    }

    let orchestrator = build_orchestrator(config).await?;
    let result = orchestrator.resume(state).await;

    print_result(&result, config, format)
}

/// Print the capability catalog.
pub async fn handle_catalog(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = CapabilityRegistry::with_builtins(config)
        .context("Failed to register built-in capabilities")?;
    let catalog = registry.catalog();

    match format {
        OutputFormat::Text => {
            if catalog.is_empty() {
                println!("No capabilities enabled.");
                return Ok(());
            }

            println!("Capabilities:");
            for spec in &catalog {
                println!();
                println!("  {}: {}", spec.name, spec.description);
                for param in &spec.inputs {
                    println!(
                        "    {} ({}{})",
                        param.name,
                        param.param_type,
                        if param.required { ", required" } else { "" }
                    );
                }
                if !spec.outputs.is_empty() {
                    println!("    -> {}", spec.outputs.join(", "));
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({ "capabilities": catalog });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_result(result: &RunResult, config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let meta = &result.metadata;
            println!(
                "Run {} {}",
                meta.run_id,
                if result.success { "succeeded" } else { "did not succeed" }
            );
            println!();
            println!("{}", result.summary);

            if !result.key_outputs.is_null() {
                println!();
                println!("Key outputs:");
                println!("{}", serde_json::to_string_pretty(&result.key_outputs)?);
            }

            if !result.next_actions.is_empty() {
                println!();
                println!("Next actions:");
                for action in &result.next_actions {
                    println!("  - {}", action);
                }
            }

            println!();
            println!(
                "Steps: {} completed, {} failed, {} replans",
                meta.completed_steps, meta.failed_steps, meta.replans
            );
            println!(
                "Budget: {}/{} tokens, {:.1}/{:.0}s, {}/{} steps",
                meta.tokens.used,
                meta.tokens.allotted,
                meta.time_secs.used,
                meta.time_secs.allotted,
                meta.steps.used,
                meta.steps.allotted
            );

            if config.orchestrator.snapshot_every_tick {
                println!(
                    "Snapshot: {}",
                    config
                        .runs_dir()
                        .join(format!("{}.json", meta.run_id))
                        .display()
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }

    Ok(())
}
