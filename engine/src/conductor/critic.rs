//! Pre-execution plan critic
//!
//! Soft, generative review of a freshly installed plan: goal coverage, budget
//! feasibility, safety. It may patch individual step inputs or force a
//! replan. The deterministic validator has already run, so when the critique
//! itself is unavailable the plan proceeds as-is.

use crate::conductor::params::apply_patch;
use crate::conductor::types::{NoteSource, OrchestratorState, RunStatus};
use crate::conductor::GenerativeClient;
use crate::llm::unwrap_record;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const CRITIC_INSTRUCTIONS: &str = "You review execution plans before they run.\n\
Judge whether the plan covers the goal, fits within the remaining budget, and is safe.\n\
Respond with ONLY a JSON object:\n\
{\"valid\": bool, \"issues\": [string], \"can_patch\": bool, \
\"patches\": [{\"step_id\": string, \"field_path\": string, \"value\": any}]}\n\
A patch replaces one input field of one step; nested fields use dots, e.g. \"options.limit\".\n\
Only set can_patch when the listed patches fully resolve the issues.";

/// One input correction proposed by the critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(alias = "step")]
    pub step_id: String,
    #[serde(alias = "field", alias = "path")]
    pub field_path: String,
    #[serde(default)]
    pub value: Value,
}

/// Parsed critic verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<Value>,
    #[serde(default)]
    pub can_patch: bool,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

impl Critique {
    fn approved() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
            can_patch: false,
            patches: Vec::new(),
        }
    }

    pub fn issue_texts(&self) -> Vec<String> {
        self.issues
            .iter()
            .map(|issue| match issue {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

pub struct PlanCritic {
    client: GenerativeClient,
}

impl PlanCritic {
    pub fn new(client: GenerativeClient) -> Self {
        Self { client }
    }

    /// Review the current plan and move the run to executing or replanning.
    pub async fn review(&self, state: &mut OrchestratorState) -> Critique {
        let budget = &state.budget;
        let payload = json!({
            "goal": state.goal,
            "context": state.context,
            "plan": state.plan,
            "capabilities": state.capabilities,
            "budget": {
                "tokens_remaining": budget.max_tokens.saturating_sub(budget.tokens_used),
                "seconds_remaining": (budget.max_time_secs - budget.time_used_secs).max(0.0),
                "steps_remaining": budget.max_steps.saturating_sub(budget.steps_used),
            },
        });

        let critique = match self
            .client
            .ask(CRITIC_INSTRUCTIONS, &payload, &mut state.budget)
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| unwrap_record(value, &["valid"]).map_err(|e| e.to_string()))
            .and_then(|map| {
                serde_json::from_value::<Critique>(Value::Object(map)).map_err(|e| e.to_string())
            }) {
            Ok(critique) => critique,
            Err(reason) => {
                warn!(
                    "Run {}: plan critique unavailable, proceeding: {}",
                    state.run_id, reason
                );
                state.note(
                    NoteSource::Critic,
                    format!("plan critique unavailable ({}); proceeding unreviewed", reason),
                );
                state.validation_passed = true;
                state.status = RunStatus::Executing;
                return Critique::approved();
            }
        };

        let patched = if critique.can_patch {
            self.apply_patches(state, &critique)
        } else {
            0
        };

        let issues = critique.issue_texts();
        if critique.valid || patched > 0 {
            for issue in &issues {
                state.note(NoteSource::Critic, issue.clone());
            }
            info!(
                "Run {}: plan approved by critic ({} patches applied)",
                state.run_id, patched
            );
            state.validation_passed = true;
            state.status = RunStatus::Executing;
        } else {
            warn!(
                "Run {}: critic rejected plan with {} issues",
                state.run_id,
                issues.len()
            );
            if issues.is_empty() {
                state.note(NoteSource::Critic, "plan rejected without specific issues");
            }
            for issue in issues {
                state.note(NoteSource::Critic, issue);
            }
            state.validation_passed = false;
            state.need_replan = true;
            state.status = RunStatus::Replanning;
        }

        critique
    }

    fn apply_patches(&self, state: &mut OrchestratorState, critique: &Critique) -> usize {
        let mut applied = 0;
        for patch in &critique.patches {
            let Some(step) = state.plan.get_step_mut(&patch.step_id) else {
                state.note(
                    NoteSource::Critic,
                    format!("patch ignored: no step '{}'", patch.step_id),
                );
                continue;
            };
            if apply_patch(step, &patch.field_path, patch.value.clone()) {
                debug!("Patched step {} field {}", patch.step_id, patch.field_path);
                applied += 1;
            } else {
                state.note(
                    NoteSource::Critic,
                    format!(
                        "patch ignored: invalid field path '{}' for step '{}'",
                        patch.field_path, patch.step_id
                    ),
                );
            }
        }
        applied
    }
}
