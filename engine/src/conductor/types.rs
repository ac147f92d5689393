//! Conductor data model
//!
//! Plan, step, budget and run-state shapes shared by every conductor
//! component. All of it is serde-serializable so a run can be snapshotted and
//! resumed with no other process state.

use chrono::{DateTime, Utc};
use sdk::types::{CapabilitySpec, Inputs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// What a step is bound to. Dispatch is an explicit match over this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a named capability from the registry
    #[serde(alias = "tool_invocation", alias = "tool_call")]
    Tool,
    /// Hand the step to the reasoning worker
    #[serde(alias = "atomic_reasoning")]
    Reasoning,
    /// A nested plan; not dispatched by this core
    #[serde(alias = "nested_subplan")]
    Subplan,
    /// Anything the planner invented
    #[serde(other)]
    Unknown,
}

impl StepKind {
    /// Lenient parse used for planner output. Unrecognised tags map to `Unknown`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "tool" | "tool_invocation" | "tool_call" | "capability" => StepKind::Tool,
            "reasoning" | "atomic_reasoning" | "think" => StepKind::Reasoning,
            "subplan" | "nested_subplan" | "sub_plan" => StepKind::Subplan,
            _ => StepKind::Unknown,
        }
    }

    /// Whether the step must name a capability from the catalog
    pub fn requires_capability(self) -> bool {
        matches!(self, StepKind::Tool)
    }
}

/// Lifecycle of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One unit of planned work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub kind: StepKind,
    #[serde(default)]
    pub capability: Option<String>,
    /// Literal values or `$stepId.field.path` back-references
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub max_retries: u32,
    pub retries_left: u32,
    pub timeout_secs: u64,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Set when the plan critic patched one of this step's inputs
    #[serde(default)]
    pub patched: bool,
}

impl Step {
    /// A pending tool-invocation step with no inputs or dependencies
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            kind: StepKind::Tool,
            capability: Some(capability.into()),
            inputs: Inputs::new(),
            depends_on: Vec::new(),
            success_criteria: Vec::new(),
            max_retries: 0,
            retries_left: 0,
            timeout_secs: 60,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            last_error: None,
            patched: false,
        }
    }

    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_criteria(mut self, criteria: &[&str]) -> Self {
        self.success_criteria = criteria.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retries_left = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// An ordered, DAG-constrained sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn get_step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}

/// Which budget ceiling was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ceiling {
    Tokens,
    Time,
    Steps,
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Tokens => f.write_str("token"),
            Ceiling::Time => f.write_str("time"),
            Ceiling::Steps => f.write_str("step"),
        }
    }
}

/// Joint ceiling over tokens, wall-clock seconds and executed steps.
///
/// Counters only ever grow. Reaching any one ceiling halts execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub max_tokens: u64,
    pub tokens_used: u64,
    pub max_time_secs: f64,
    pub time_used_secs: f64,
    pub max_steps: u32,
    pub steps_used: u32,
}

impl Budget {
    pub fn new(max_tokens: u64, max_time_secs: u64, max_steps: u32) -> Self {
        Self {
            max_tokens,
            tokens_used: 0,
            max_time_secs: max_time_secs as f64,
            time_used_secs: 0.0,
            max_steps,
            steps_used: 0,
        }
    }

    pub fn charge_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn charge_time(&mut self, elapsed: Duration) {
        self.time_used_secs += elapsed.as_secs_f64();
    }

    pub fn charge_step(&mut self) {
        self.steps_used = self.steps_used.saturating_add(1);
    }

    /// First ceiling that has been reached, checked tokens, time, steps
    pub fn exhausted(&self) -> Option<Ceiling> {
        if self.tokens_used >= self.max_tokens {
            Some(Ceiling::Tokens)
        } else if self.time_used_secs >= self.max_time_secs {
            Some(Ceiling::Time)
        } else if self.steps_used >= self.max_steps {
            Some(Ceiling::Steps)
        } else {
            None
        }
    }

    /// Smallest fractional remainder across the three ceilings, in `0.0..=1.0`
    pub fn remaining_percentage(&self) -> f64 {
        fn remaining(used: f64, max: f64) -> f64 {
            if max <= 0.0 {
                return 0.0;
            }
            ((max - used) / max).clamp(0.0, 1.0)
        }
        remaining(self.tokens_used as f64, self.max_tokens as f64)
            .min(remaining(self.time_used_secs, self.max_time_secs))
            .min(remaining(self.steps_used as f64, self.max_steps as f64))
    }
}

/// Results of completed (and attempted) steps keyed by step id.
///
/// Entries are never removed; a retry overwrites the previous attempt's
/// result. The store survives replanning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifacts(BTreeMap<String, Value>);

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step_id: impl Into<String>, result: Value) {
        self.0.insert(step_id.into(), result);
    }

    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.0.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.0.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The whole store as one JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

/// Who produced a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSource {
    Planner,
    Validator,
    Critic,
    Executor,
    Evaluator,
    Synthesizer,
    Budget,
}

/// A critique or warning accumulated during the run and fed back to the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub source: NoteSource,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Note {
    pub fn new(source: NoteSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Coarse run status driving the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Planning,
    Validating,
    Executing,
    Replanning,
    Synthesizing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Planning => "planning",
            RunStatus::Validating => "validating",
            RunStatus::Executing => "executing",
            RunStatus::Replanning => "replanning",
            RunStatus::Synthesizing => "synthesizing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Consumed vs allotted for one ceiling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage<T> {
    pub used: T,
    pub allotted: T,
}

/// Run metadata attached to every final result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub status: RunStatus,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub tokens: Usage<u64>,
    pub time_secs: Usage<f64>,
    pub steps: Usage<u32>,
    pub replans: u32,
}

/// Caller-facing outcome of `execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub summary: String,
    pub key_outputs: Value,
    pub next_actions: Vec<String>,
    pub metadata: RunMetadata,
}

/// Everything one run knows. Created once per invocation and mutated in
/// place, tick by tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub run_id: String,
    pub goal: String,
    pub context: String,
    pub capabilities: Vec<CapabilitySpec>,
    pub plan: Plan,
    /// Index of the step most recently dispatched
    pub cursor: usize,
    pub notes: Vec<Note>,
    /// Validator errors from the most recently rejected plan
    #[serde(default)]
    pub rejected_plan_errors: Vec<String>,
    pub artifacts: Artifacts,
    pub budget: Budget,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub need_replan: bool,
    pub validation_passed: bool,
    pub final_result: Option<RunResult>,
    pub status: RunStatus,
    #[serde(default)]
    pub replans: u32,
}

impl OrchestratorState {
    pub fn new(
        goal: impl Into<String>,
        context: impl Into<String>,
        capabilities: Vec<CapabilitySpec>,
        budget: Budget,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            context: context.into(),
            capabilities,
            plan: Plan::default(),
            cursor: 0,
            notes: Vec::new(),
            rejected_plan_errors: Vec::new(),
            artifacts: Artifacts::new(),
            budget,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            need_replan: false,
            validation_passed: false,
            final_result: None,
            status: RunStatus::Planning,
            replans: 0,
        }
    }

    pub fn note(&mut self, source: NoteSource, message: impl Into<String>) {
        self.notes.push(Note::new(source, message));
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|id| id == step_id)
    }

    pub fn metadata(&self) -> RunMetadata {
        RunMetadata {
            run_id: self.run_id.clone(),
            status: self.status,
            completed_steps: self.completed_steps.len(),
            failed_steps: self.failed_steps.len(),
            tokens: Usage {
                used: self.budget.tokens_used,
                allotted: self.budget.max_tokens,
            },
            time_secs: Usage {
                used: self.budget.time_used_secs,
                allotted: self.budget.max_time_secs,
            },
            steps: Usage {
                used: self.budget.steps_used,
                allotted: self.budget.max_steps,
            },
            replans: self.replans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_kind_parse() {
        assert_eq!(StepKind::parse("tool"), StepKind::Tool);
        assert_eq!(StepKind::parse("Tool-Invocation"), StepKind::Tool);
        assert_eq!(StepKind::parse("atomic reasoning"), StepKind::Reasoning);
        assert_eq!(StepKind::parse("nested_subplan"), StepKind::Subplan);
        assert_eq!(StepKind::parse("teleport"), StepKind::Unknown);
    }

    #[test]
    fn test_step_kind_serde_other() {
        let kind: StepKind = serde_json::from_value(json!("teleport")).unwrap();
        assert_eq!(kind, StepKind::Unknown);
        let kind: StepKind = serde_json::from_value(json!("atomic_reasoning")).unwrap();
        assert_eq!(kind, StepKind::Reasoning);
    }

    #[test]
    fn test_budget_exhaustion_order() {
        let mut budget = Budget::new(100, 60, 2);
        assert_eq!(budget.exhausted(), None);

        budget.charge_step();
        budget.charge_step();
        assert_eq!(budget.exhausted(), Some(Ceiling::Steps));

        budget.charge_tokens(100);
        assert_eq!(budget.exhausted(), Some(Ceiling::Tokens));
    }

    #[test]
    fn test_remaining_percentage_is_minimum() {
        let mut budget = Budget::new(100, 100, 10);
        budget.charge_tokens(10);
        budget.charge_time(Duration::from_secs(50));
        budget.charge_step();
        assert!((budget.remaining_percentage() - 0.5).abs() < 1e-9);

        budget.charge_tokens(1_000);
        assert_eq!(budget.remaining_percentage(), 0.0);
    }

    #[test]
    fn test_artifacts_overwrite_latest_attempt() {
        let mut artifacts = Artifacts::new();
        artifacts.record("s1", json!({"error": true}));
        artifacts.record("s1", json!({"ok": 1}));
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts.get("s1"), Some(&json!({"ok": 1})));
        assert_eq!(artifacts.to_value(), json!({"s1": {"ok": 1}}));
    }

    #[test]
    fn test_state_metadata() {
        let mut state = OrchestratorState::new("goal", "", vec![], Budget::new(10, 10, 3));
        state.completed_steps.push("a".to_string());
        state.budget.charge_step();
        let meta = state.metadata();
        assert_eq!(meta.completed_steps, 1);
        assert_eq!(meta.failed_steps, 0);
        assert_eq!(meta.steps.used, 1);
        assert_eq!(meta.steps.allotted, 3);
        assert_eq!(meta.run_id, state.run_id);
    }
}
