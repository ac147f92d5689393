//! Step Evaluator
//!
//! Judges one step's result against its success criteria and decides between
//! success, retry, replan and terminal failure.
//!
//! Fast paths run before any generative call:
//! 1. an error-flagged result fails (retryable while retries remain, unless
//!    the result marks the error as not recoverable)
//! 2. a step with no criteria and no error flag succeeds
//!
//! Everything else goes to the generative service. When that judgement is
//! unavailable the step is accepted.

use crate::conductor::types::{Budget, Step};
use crate::conductor::GenerativeClient;
use crate::llm::unwrap_record;
use sdk::types::CapabilityOutput;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

const EVALUATOR_INSTRUCTIONS: &str = "You check whether a plan step achieved its success \
criteria, judging ONLY from the result provided.\n\
Respond with ONLY a JSON object:\n\
{\"success\": bool, \"criteria_met\": [string], \"criteria_failed\": [string], \
\"should_retry\": bool, \"should_replan\": bool, \"notes\": string}\n\
Set should_replan only when the plan itself is wrong (e.g. the wrong capability \
was chosen); set should_retry when running the same step again could succeed.";

/// Decision for one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepVerdict {
    pub success: bool,
    #[serde(default)]
    pub criteria_met: Vec<String>,
    #[serde(default)]
    pub criteria_failed: Vec<String>,
    #[serde(default)]
    pub should_retry: bool,
    #[serde(default)]
    pub should_replan: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl StepVerdict {
    fn accepted(criteria_met: Vec<String>, notes: Vec<String>) -> Self {
        Self {
            success: true,
            criteria_met,
            criteria_failed: Vec::new(),
            should_retry: false,
            should_replan: false,
            notes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    success: bool,
    #[serde(default)]
    criteria_met: Vec<String>,
    #[serde(default)]
    criteria_failed: Vec<String>,
    #[serde(default)]
    should_retry: Option<bool>,
    #[serde(default)]
    should_replan: bool,
    #[serde(default)]
    notes: Option<Value>,
}

pub struct StepEvaluator {
    client: GenerativeClient,
}

impl StepEvaluator {
    pub fn new(client: GenerativeClient) -> Self {
        Self { client }
    }

    pub async fn check(
        &self,
        goal: &str,
        step: &Step,
        result: &Value,
        budget: &mut Budget,
    ) -> StepVerdict {
        if CapabilityOutput::is_error(result) {
            let message = CapabilityOutput::error_message(result)
                .unwrap_or_else(|| "step failed".to_string());
            return StepVerdict {
                success: false,
                criteria_met: Vec::new(),
                criteria_failed: step.success_criteria.clone(),
                should_retry: step.retries_left > 0 && is_recoverable(result),
                should_replan: false,
                notes: vec![message],
            };
        }

        if step.success_criteria.is_empty() {
            return StepVerdict::accepted(Vec::new(), Vec::new());
        }

        let payload = json!({
            "goal": goal,
            "step": {
                "id": step.id,
                "title": step.title,
                "kind": step.kind,
                "capability": step.capability,
                "inputs": step.inputs,
            },
            "success_criteria": step.success_criteria,
            "result": result,
        });

        let raw = self
            .client
            .ask(EVALUATOR_INSTRUCTIONS, &payload, budget)
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| unwrap_record(value, &["success"]).map_err(|e| e.to_string()))
            .and_then(|map| {
                serde_json::from_value::<RawVerdict>(Value::Object(map)).map_err(|e| e.to_string())
            });

        match raw {
            Ok(raw) => {
                debug!("Step {} judged success={}", step.id, raw.success);
                self.normalize(step, raw)
            }
            Err(reason) => {
                warn!(
                    "Step {}: evaluation unavailable, accepting result: {}",
                    step.id, reason
                );
                StepVerdict::accepted(
                    Vec::new(),
                    vec![format!(
                        "evaluation of step '{}' unavailable ({}); result accepted",
                        step.id, reason
                    )],
                )
            }
        }
    }

    fn normalize(&self, step: &Step, raw: RawVerdict) -> StepVerdict {
        let notes = match raw.notes {
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        if raw.success {
            return StepVerdict::accepted(raw.criteria_met, notes);
        }

        let retries_remain = step.retries_left > 0;
        let should_retry = raw.should_retry.unwrap_or(true) && retries_remain;
        StepVerdict {
            success: false,
            criteria_met: raw.criteria_met,
            criteria_failed: raw.criteria_failed,
            should_retry,
            should_replan: raw.should_replan && !should_retry,
            notes,
        }
    }
}

fn is_recoverable(result: &Value) -> bool {
    result.get("recoverable").and_then(Value::as_bool).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Generation, LLMError, LLMProvider, Message};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingProvider {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _messages: &[Message]) -> Result<Generation, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Ok(Generation::new(text, 7)),
                None => Err(LLMError::Timeout),
            }
        }
    }

    fn evaluator(reply: Option<&'static str>) -> (StepEvaluator, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            reply,
            calls: AtomicUsize::new(0),
        });
        let client = GenerativeClient::new(
            Arc::clone(&provider) as Arc<dyn LLMProvider>,
            Duration::from_secs(5),
        );
        (StepEvaluator::new(client), provider)
    }

    fn budget() -> Budget {
        Budget::new(1_000, 60, 10)
    }

    #[tokio::test]
    async fn test_error_flag_fails_without_generative_call() {
        let (evaluator, provider) = evaluator(Some(r#"{"success": true}"#));
        let step = Step::new("s1", "search").with_retries(1);

        let verdict = evaluator
            .check("goal", &step, &CapabilityOutput::error("boom"), &mut budget())
            .await;

        assert!(!verdict.success);
        assert!(verdict.should_retry);
        assert!(!verdict.should_replan);
        assert_eq!(verdict.notes, vec!["boom"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_flag_with_no_retries_left_is_terminal() {
        let (evaluator, _) = evaluator(None);
        let step = Step::new("s1", "search");

        let verdict = evaluator
            .check("goal", &step, &json!({"error": "disk full"}), &mut budget())
            .await;

        assert!(!verdict.success);
        assert!(!verdict.should_retry);
        assert!(!verdict.should_replan);
        assert_eq!(verdict.notes, vec!["disk full"]);
    }

    #[tokio::test]
    async fn test_unrecoverable_error_is_not_retried() {
        let (evaluator, _) = evaluator(None);
        let step = Step::new("s1", "search").with_retries(2);
        let mut result = CapabilityOutput::error("snapshot dir is read-only");
        result["recoverable"] = json!(false);

        let verdict = evaluator.check("goal", &step, &result, &mut budget()).await;

        assert!(!verdict.success);
        assert!(!verdict.should_retry);
        assert_eq!(verdict.notes, vec!["snapshot dir is read-only"]);
    }

    #[tokio::test]
    async fn test_no_criteria_is_automatic_success() {
        let (evaluator, provider) = evaluator(Some(r#"{"success": false}"#));
        let step = Step::new("s1", "search");

        let verdict = evaluator
            .check("goal", &step, &json!({"hits": []}), &mut budget())
            .await;

        assert!(verdict.success);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generative_verdict_requests_replan() {
        let (evaluator, _) = evaluator(Some(
            r#"{"success": false, "criteria_failed": ["has results"],
               "should_retry": false, "should_replan": true, "notes": "wrong tool"}"#,
        ));
        let step = Step::new("s1", "search")
            .with_criteria(&["has results"])
            .with_retries(2);
        let mut budget = budget();

        let verdict = evaluator
            .check("goal", &step, &json!({"hits": []}), &mut budget)
            .await;

        assert!(!verdict.success);
        assert!(verdict.should_replan);
        assert_eq!(verdict.criteria_failed, vec!["has results"]);
        assert_eq!(verdict.notes, vec!["wrong tool"]);
        assert_eq!(budget.tokens_used, 7);
    }

    #[tokio::test]
    async fn test_retry_not_offered_when_exhausted() {
        let (evaluator, _) = evaluator(Some(r#"{"success": false, "should_retry": true}"#));
        let step = Step::new("s1", "search").with_criteria(&["non-empty"]);

        let verdict = evaluator
            .check("goal", &step, &json!({}), &mut budget())
            .await;

        assert!(!verdict.success);
        assert!(!verdict.should_retry);
    }

    #[tokio::test]
    async fn test_wrapped_verdict_is_unwrapped() {
        let (evaluator, _) = evaluator(Some(
            r#"{"verdict": {"success": true, "criteria_met": ["non-empty"]}}"#,
        ));
        let step = Step::new("s1", "search")
            .with_criteria(&["non-empty"])
            .with_retries(2);

        let verdict = evaluator
            .check("goal", &step, &json!({"hits": [1]}), &mut budget())
            .await;

        assert!(verdict.success);
        assert_eq!(verdict.criteria_met, vec!["non-empty"]);
        assert!(!verdict.should_retry);
    }

    #[tokio::test]
    async fn test_verdict_without_success_field_fails_open() {
        let (evaluator, _) = evaluator(Some(r#"{"looks": "fine"}"#));
        let step = Step::new("s1", "search")
            .with_criteria(&["non-empty"])
            .with_retries(2);

        let verdict = evaluator
            .check("goal", &step, &json!({"hits": [1]}), &mut budget())
            .await;

        assert!(verdict.success);
        assert!(!verdict.should_retry);
        assert_eq!(verdict.notes.len(), 1);
        assert!(verdict.notes[0].contains("unavailable"));
    }

    #[tokio::test]
    async fn test_fails_open_when_judgement_unavailable() {
        let (evaluator, provider) = evaluator(None);
        let step = Step::new("s1", "search").with_criteria(&["non-empty"]);

        let verdict = evaluator
            .check("goal", &step, &json!({"hits": [1]}), &mut budget())
            .await;

        assert!(verdict.success);
        assert_eq!(verdict.notes.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
