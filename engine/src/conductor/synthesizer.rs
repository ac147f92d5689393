//! Synthesizer
//!
//! Composes the caller-facing result once no step is ready. The run always
//! ends with a well-formed [`RunResult`]: when the generative service cannot
//! produce one, a deterministic fallback built from the artifacts is used.

use crate::conductor::types::{
    NoteSource, OrchestratorState, RunResult, RunStatus, StepStatus,
};
use crate::conductor::GenerativeClient;
use crate::llm::unwrap_record;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const SYNTHESIZER_INSTRUCTIONS: &str = "You write the final report of an executed plan.\n\
Using the goal, the plan with step statuses, and the recorded artifacts, respond with \
ONLY a JSON object:\n\
{\"success\": bool, \"summary\": string, \"key_outputs\": object, \"next_actions\": [string]}\n\
success is true only when the goal was actually achieved. key_outputs holds the values \
the caller needs, taken from the artifacts. Never invent results.";

#[derive(Debug, Deserialize)]
struct RawSynthesis {
    success: bool,
    summary: String,
    #[serde(default)]
    key_outputs: Value,
    #[serde(default)]
    next_actions: Vec<Value>,
}

pub struct Synthesizer {
    client: GenerativeClient,
}

impl Synthesizer {
    pub fn new(client: GenerativeClient) -> Self {
        Self { client }
    }

    /// Produce and store the final result, moving the run to `Completed`.
    pub async fn synthesize(&self, state: &mut OrchestratorState) -> RunResult {
        let skipped = skip_unreachable(state);
        if skipped > 0 {
            info!(
                "Run {}: {} steps never became ready and were skipped",
                state.run_id, skipped
            );
        }

        let payload = json!({
            "goal": state.goal,
            "context": state.context,
            "plan": state.plan.steps.iter().map(|step| json!({
                "id": step.id,
                "title": step.title,
                "capability": step.capability,
                "status": step.status,
                "last_error": step.last_error,
            })).collect::<Vec<_>>(),
            "artifacts": state.artifacts,
            "notes": state.notes.iter().map(|n| n.message.as_str()).collect::<Vec<_>>(),
        });

        let parsed = self
            .client
            .ask(SYNTHESIZER_INSTRUCTIONS, &payload, &mut state.budget)
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| {
                unwrap_record(value, &["success", "summary"]).map_err(|e| e.to_string())
            })
            .and_then(|map| {
                serde_json::from_value::<RawSynthesis>(Value::Object(map))
                    .map_err(|e| e.to_string())
            });

        state.status = RunStatus::Completed;

        let result = match parsed {
            Ok(raw) => RunResult {
                success: raw.success,
                summary: raw.summary,
                key_outputs: if raw.key_outputs.is_null() {
                    state.artifacts.to_value()
                } else {
                    raw.key_outputs
                },
                next_actions: raw
                    .next_actions
                    .into_iter()
                    .map(|action| match action {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
                metadata: state.metadata(),
            },
            Err(reason) => {
                warn!(
                    "Run {}: synthesis unavailable, using fallback: {}",
                    state.run_id, reason
                );
                state.note(
                    NoteSource::Synthesizer,
                    format!("synthesis unavailable ({}); returning raw artifacts", reason),
                );
                fallback_result(state)
            }
        };

        info!(
            "Run {}: finished (success={}, {} completed, {} failed)",
            state.run_id,
            result.success,
            state.completed_steps.len(),
            state.failed_steps.len()
        );
        state.final_result = Some(result.clone());
        result
    }
}

/// Mark every still-pending step as skipped. Returns how many were marked.
pub fn skip_unreachable(state: &mut OrchestratorState) -> usize {
    let mut skipped = 0;
    for step in state.plan.steps.iter_mut() {
        if matches!(step.status, StepStatus::Pending | StepStatus::Running) {
            step.status = StepStatus::Skipped;
            skipped += 1;
        }
    }
    skipped
}

/// Deterministic result used when the generative summary is unavailable
pub fn fallback_result(state: &OrchestratorState) -> RunResult {
    RunResult {
        success: false,
        summary: format!(
            "Run finished without a generated summary: {} of {} steps completed, {} failed.",
            state.completed_steps.len(),
            state.plan.steps.len(),
            state.failed_steps.len()
        ),
        key_outputs: state.artifacts.to_value(),
        next_actions: Vec::new(),
        metadata: state.metadata(),
    }
}

/// Result for a run that could never obtain a usable plan
pub fn failure_result(state: &mut OrchestratorState) -> RunResult {
    state.status = RunStatus::Failed;
    let reason = state
        .notes
        .iter()
        .rev()
        .find(|n| n.source == NoteSource::Planner)
        .map(|n| n.message.clone())
        .unwrap_or_else(|| "no plan was produced".to_string());

    let result = RunResult {
        success: false,
        summary: format!("No executable plan could be produced: {}", reason),
        key_outputs: state.artifacts.to_value(),
        next_actions: vec!["Rephrase the goal or check the generative provider".to_string()],
        metadata: state.metadata(),
    };
    state.final_result = Some(result.clone());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::{Budget, Plan, Step};
    use crate::llm::{Generation, LLMError, LLMProvider, Message};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedProvider(Option<&'static str>);

    #[async_trait]
    impl LLMProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _messages: &[Message]) -> Result<Generation, LLMError> {
            self.0
                .map(|text| Generation::new(text, 11))
                .ok_or_else(|| LLMError::NetworkError("unreachable".to_string()))
        }
    }

    fn synthesizer(reply: Option<&'static str>) -> Synthesizer {
        Synthesizer::new(GenerativeClient::new(
            Arc::new(FixedProvider(reply)),
            Duration::from_secs(5),
        ))
    }

    fn state() -> OrchestratorState {
        let mut state = OrchestratorState::new("goal", "", vec![], Budget::new(1_000, 60, 10));
        let mut done = Step::new("a", "search");
        done.status = StepStatus::Completed;
        state.plan = Plan::new(vec![done, Step::new("b", "search").depends_on(&["x"])]);
        state.completed_steps.push("a".to_string());
        state.artifacts.record("a", json!({"hits": 2}));
        state.status = RunStatus::Synthesizing;
        state
    }

    #[tokio::test]
    async fn test_parsed_synthesis_with_metadata() {
        let mut state = state();
        let result = synthesizer(Some(
            r#"{"success": true, "summary": "found two hits",
               "key_outputs": {"hits": 2}, "next_actions": ["read them"]}"#,
        ))
        .synthesize(&mut state)
        .await;

        assert!(result.success);
        assert_eq!(result.summary, "found two hits");
        assert_eq!(result.next_actions, vec!["read them"]);
        assert_eq!(result.metadata.completed_steps, 1);
        assert_eq!(result.metadata.status, RunStatus::Completed);
        assert_eq!(result.metadata.tokens.used, 11);
        assert_eq!(state.final_result.as_ref(), Some(&result));
    }

    #[tokio::test]
    async fn test_pending_steps_are_skipped() {
        let mut state = state();
        synthesizer(Some(r#"{"success": false, "summary": "partial"}"#))
            .synthesize(&mut state)
            .await;
        assert_eq!(
            state.plan.get_step("b").map(|s| s.status),
            Some(StepStatus::Skipped)
        );
    }

    #[tokio::test]
    async fn test_fallback_when_unavailable() {
        let mut state = state();
        let result = synthesizer(None).synthesize(&mut state).await;

        assert!(!result.success);
        assert!(result.next_actions.is_empty());
        assert_eq!(result.key_outputs, json!({"a": {"hits": 2}}));
        assert!(result.summary.contains("1 of 2 steps completed"));
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_wrapped_synthesis_is_unwrapped() {
        let mut state = state();
        let result = synthesizer(Some(r#"{"report": {"success": true, "summary": "done"}}"#))
            .synthesize(&mut state)
            .await;

        assert!(result.success);
        assert_eq!(result.summary, "done");
        assert_eq!(result.key_outputs, json!({"a": {"hits": 2}}));
        assert!(state.notes.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_when_reply_has_wrong_shape() {
        let mut state = state();
        let result = synthesizer(Some(r#"{"outcome": "great", "details": {}}"#))
            .synthesize(&mut state)
            .await;

        assert!(!result.success);
        assert!(result.summary.contains("1 of 2 steps completed"));
        assert_eq!(result.key_outputs, json!({"a": {"hits": 2}}));
        assert!(result.next_actions.is_empty());
        assert_eq!(state.notes.len(), 1);
        assert_eq!(state.notes[0].source, NoteSource::Synthesizer);
    }

    #[test]
    fn test_failure_result_uses_planner_note() {
        let mut state = state();
        state.note(NoteSource::Planner, "plan could not be parsed: nope");
        let result = failure_result(&mut state);
        assert!(!result.success);
        assert!(result.summary.contains("plan could not be parsed"));
        assert_eq!(result.metadata.status, RunStatus::Failed);
    }
}
