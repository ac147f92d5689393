//! Conductor Planner
//!
//! Asks the generative service for a plan, parses it, and runs the
//! deterministic validator before anything is installed. A rejected plan
//! never replaces the current one.

use crate::conductor::types::{
    NoteSource, OrchestratorState, Plan, RunStatus, Step, StepKind, StepStatus,
};
use crate::conductor::validator::{PlanValidator, ValidationReport};
use crate::conductor::GenerativeClient;
use crate::llm::unwrap_list;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

const PLANNER_INSTRUCTIONS: &str = "You are the Conductor Planner. Break the goal down into \
discrete steps that together achieve it, using ONLY the capabilities listed in the payload.\n\
Output ONLY a JSON array of steps. Each step object has:\n\
- \"id\": short unique identifier, e.g. \"search\"\n\
- \"title\": what the step does\n\
- \"kind\": \"tool\" (invoke a capability) or \"reasoning\" (think over prior results)\n\
- \"capability\": exact capability name, required for tool steps\n\
- \"inputs\": object of input values; reference an earlier step's output with \
\"$stepId.field.path\"\n\
- \"depends_on\": ids of EARLIER steps this step needs\n\
- \"success_criteria\": list of checkable statements (may be empty)\n\
- \"max_retries\": optional integer\n\n\
Never invent capability names. Address every note in the payload; \
validation_errors lists why the previous proposal was rejected.\n\
When an existing plan is given, keep the ids of completed steps unchanged and \
reuse their outputs instead of repeating them.\n\
Output ONLY the JSON array, no markdown, no explanation.";

/// Most recent non-validator notes included in a planning payload
const MAX_PROMPT_NOTES: usize = 20;

/// Retry and timeout values applied to steps that do not set their own
#[derive(Debug, Clone, Copy)]
pub struct StepDefaults {
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

/// What one planning round did to the state
#[derive(Debug)]
pub enum PlanOutcome {
    /// Plan passed validation and is now current
    Installed(ValidationReport),
    /// Plan failed validation; the previous plan is untouched
    Rejected(ValidationReport),
    /// No usable plan came back; the run has failed
    Unparseable(String),
}

/// Intermediate deserialization type for planner output
#[derive(Debug, Deserialize)]
struct RawPlanStep {
    #[serde(default, alias = "step_id")]
    id: Option<String>,
    #[serde(default, alias = "description", alias = "name")]
    title: Option<String>,
    #[serde(default, alias = "type", alias = "step_type")]
    kind: Option<String>,
    #[serde(default, alias = "tool", alias = "capability_name")]
    capability: Option<String>,
    #[serde(default, alias = "params", alias = "parameters", alias = "args")]
    inputs: Option<Map<String, Value>>,
    #[serde(default, alias = "dependencies", alias = "deps")]
    depends_on: Vec<String>,
    #[serde(default, alias = "criteria", alias = "expected_outcome")]
    success_criteria: Option<Value>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default, alias = "timeout")]
    timeout_secs: Option<u64>,
}

pub struct Planner {
    client: GenerativeClient,
    defaults: StepDefaults,
}

impl Planner {
    pub fn new(client: GenerativeClient, defaults: StepDefaults) -> Self {
        Self { client, defaults }
    }

    /// Run one planning (or replanning) round against `state`.
    pub async fn plan(&self, state: &mut OrchestratorState) -> PlanOutcome {
        let replanning = !state.plan.is_empty();
        let payload = build_payload(state, replanning);

        let value = match self
            .client
            .ask(PLANNER_INSTRUCTIONS, &payload, &mut state.budget)
            .await
        {
            Ok(value) => value,
            Err(e) => return self.fail(state, format!("planner produced no usable output: {}", e)),
        };

        let mut plan = match parse_plan(value, self.defaults) {
            Ok(plan) => plan,
            Err(e) => return self.fail(state, format!("plan could not be parsed: {:#}", e)),
        };

        let report = PlanValidator::new(&state.capabilities).validate(&plan);
        if !report.is_valid {
            warn!(
                "Run {}: planner proposed an invalid plan ({} errors)",
                state.run_id,
                report.errors().count()
            );
            state.rejected_plan_errors = report.errors().map(|f| f.to_string()).collect();
            for finding in report.errors() {
                state.note(NoteSource::Validator, finding.to_string());
            }
            state.need_replan = true;
            state.status = RunStatus::Replanning;
            return PlanOutcome::Rejected(report);
        }

        for finding in report.warnings() {
            state.note(NoteSource::Validator, finding.to_string());
        }

        // Completed work carries over by id
        for step in plan.steps.iter_mut() {
            if state.is_completed(&step.id) && state.artifacts.contains(&step.id) {
                step.status = StepStatus::Completed;
            }
        }

        if replanning {
            state.replans += 1;
        }
        info!(
            "Run {}: installed plan with {} steps{}",
            state.run_id,
            plan.steps.len(),
            if replanning { " (replan)" } else { "" }
        );

        state.plan = plan;
        state.rejected_plan_errors.clear();
        state.cursor = 0;
        state.need_replan = false;
        state.validation_passed = false;
        state.status = RunStatus::Validating;
        PlanOutcome::Installed(report)
    }

    fn fail(&self, state: &mut OrchestratorState, reason: String) -> PlanOutcome {
        warn!("Run {}: {}", state.run_id, reason);
        state.note(NoteSource::Planner, reason.clone());
        state.status = RunStatus::Failed;
        PlanOutcome::Unparseable(reason)
    }
}

/// Parse a plan document (a bare step array or an object wrapping one under
/// `steps`/`plan`) into a [`Plan`] of pending steps.
pub fn parse_plan(value: Value, defaults: StepDefaults) -> Result<Plan> {
    let items = unwrap_list(value, &["steps", "plan"]).context("expected a list of steps")?;

    let steps = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let raw: RawPlanStep = serde_json::from_value(item)
                .with_context(|| format!("step {} is malformed", i + 1))?;
            Ok(build_step(raw, defaults))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Plan::new(steps))
}

fn build_step(raw: RawPlanStep, defaults: StepDefaults) -> Step {
    let capability = raw
        .capability
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let kind = match raw.kind.as_deref() {
        Some(tag) => StepKind::parse(tag),
        None if capability.is_some() => StepKind::Tool,
        None => StepKind::Reasoning,
    };

    let max_retries = raw.max_retries.unwrap_or(defaults.max_retries);

    Step {
        id: raw.id.map(|id| id.trim().to_string()).unwrap_or_default(),
        title: raw.title.unwrap_or_default(),
        kind,
        capability,
        inputs: raw.inputs.unwrap_or_default(),
        depends_on: raw.depends_on,
        success_criteria: criteria_list(raw.success_criteria),
        max_retries,
        retries_left: max_retries,
        timeout_secs: raw.timeout_secs.unwrap_or(defaults.timeout_secs),
        status: StepStatus::Pending,
        started_at: None,
        ended_at: None,
        last_error: None,
        patched: false,
    }
}

/// Criteria may come back as a list, a single string, or nothing
fn criteria_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

fn build_payload(state: &OrchestratorState, replanning: bool) -> Value {
    // Validator findings reach the planner only through the latest rejection
    let notes: Vec<&str> = state
        .notes
        .iter()
        .filter(|n| n.source != NoteSource::Validator)
        .map(|n| n.message.as_str())
        .collect();
    let recent = &notes[notes.len().saturating_sub(MAX_PROMPT_NOTES)..];

    let mut payload = json!({
        "goal": state.goal,
        "context": state.context,
        "capabilities": state.capabilities,
        "notes": recent,
    });

    if !state.rejected_plan_errors.is_empty() {
        payload["validation_errors"] = json!(state.rejected_plan_errors);
    }

    if replanning {
        let existing: Vec<Value> = state
            .plan
            .steps
            .iter()
            .map(|step| {
                json!({
                    "id": step.id,
                    "title": step.title,
                    "kind": step.kind,
                    "capability": step.capability,
                    "inputs": step.inputs,
                    "depends_on": step.depends_on,
                    "status": step.status,
                    "completed": state.is_completed(&step.id),
                    "last_error": step.last_error,
                })
            })
            .collect();
        payload["existing_plan"] = Value::Array(existing);
        payload["completed_steps"] = json!(state.completed_steps);
    }

    payload
}
