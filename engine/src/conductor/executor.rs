//! Conductor Executor
//!
//! One tick executes at most one step:
//! 1. halt when any budget ceiling is reached
//! 2. pick the first pending step whose dependencies have all completed
//! 3. resolve `$stepId.field` back-references against the artifact store
//! 4. dispatch by step kind (capability registry or reasoning worker)
//! 5. charge the budget and record the raw result as the step's artifact
//! 6. let the step evaluator decide success, retry, replan or failure

use crate::capabilities::CapabilityRegistry;
use crate::conductor::evaluator::{StepEvaluator, StepVerdict};
use crate::conductor::params::{referenced_steps, resolve_inputs};
use crate::conductor::types::{
    Artifacts, Ceiling, NoteSource, OrchestratorState, RunStatus, Step, StepKind, StepStatus,
};
use crate::llm::{generate_with_timeout, LLMProvider, Message};
use async_trait::async_trait;
use chrono::Utc;
use sdk::types::{CapabilityOutput, Inputs};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything a reasoning worker gets to see for one step
pub struct ReasoningTask<'a> {
    pub goal: &'a str,
    pub context: &'a str,
    pub step: &'a Step,
    pub inputs: &'a Inputs,
    pub artifacts: &'a Artifacts,
}

/// Executes atomic-reasoning steps.
///
/// Returns a result map like any capability; `tokens_used` in the map is
/// charged to the budget.
#[async_trait]
pub trait ReasoningWorker: Send + Sync {
    async fn reason(&self, task: ReasoningTask<'_>) -> Value;
}

/// Reasoning worker backed by the generative service
pub struct LlmReasoner {
    llm: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl ReasoningWorker for LlmReasoner {
    async fn reason(&self, task: ReasoningTask<'_>) -> Value {
        let system = Message::system(
            "You are executing one reasoning step of a larger plan. Use the goal, \
            the context and the results of earlier steps to complete the step. \
            Answer with the step's output only.",
        );
        let payload = json!({
            "goal": task.goal,
            "context": task.context,
            "step": {
                "id": task.step.id,
                "title": task.step.title,
                "inputs": task.inputs,
                "success_criteria": task.step.success_criteria,
            },
            "artifacts": task.artifacts,
        });
        let messages = [system, Message::user(format!("{:#}", payload))];

        match generate_with_timeout(self.llm.as_ref(), &messages, self.timeout).await {
            Ok(generation) => json!({
                "output": generation.content,
                "tokens_used": generation.tokens_used,
            }),
            Err(e) => CapabilityOutput::error(format!("reasoning failed: {}", e)),
        }
    }
}

/// What one step execution ended as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Retrying,
    Replanning,
    Failed,
}

/// What one executor tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A budget ceiling was reached; nothing was dispatched
    Halted(Ceiling),
    /// No step is ready; the run moves to synthesis
    NothingReady,
    /// One step was dispatched and judged
    Dispatched {
        step_id: String,
        outcome: StepOutcome,
    },
}

pub struct Executor {
    registry: Arc<CapabilityRegistry>,
    reasoner: Arc<dyn ReasoningWorker>,
    evaluator: StepEvaluator,
}

impl Executor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        reasoner: Arc<dyn ReasoningWorker>,
        evaluator: StepEvaluator,
    ) -> Self {
        Self {
            registry,
            reasoner,
            evaluator,
        }
    }

    /// Execute one unit of work against `state`.
    pub async fn tick(&self, state: &mut OrchestratorState) -> TickOutcome {
        if let Some(ceiling) = state.budget.exhausted() {
            info!("Run {}: {} budget exhausted, halting", state.run_id, ceiling);
            state.note(
                NoteSource::Budget,
                format!(
                    "{} budget exhausted after {} steps; finishing with partial results",
                    ceiling, state.budget.steps_used
                ),
            );
            state.status = RunStatus::Completed;
            return TickOutcome::Halted(ceiling);
        }

        let Some(index) = next_ready_step(state) else {
            debug!("Run {}: no step ready, synthesizing", state.run_id);
            state.status = RunStatus::Synthesizing;
            return TickOutcome::NothingReady;
        };

        state.cursor = index;
        let step = {
            let step = &mut state.plan.steps[index];
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
            step.clone()
        };
        for source in referenced_steps(&step.inputs) {
            if !state.artifacts.contains(&source) {
                debug!(
                    "Run {}: step {} references '{}' which has no artifact; left unresolved",
                    state.run_id, step.id, source
                );
            }
        }
        let inputs = resolve_inputs(&step.inputs, &state.artifacts);

        info!(
            "Run {}: dispatching step {} ({:?}, attempt {})",
            state.run_id,
            step.id,
            step.kind,
            step.max_retries.saturating_sub(step.retries_left) + 1
        );

        let started = Instant::now();
        let limit = Duration::from_secs(step.timeout_secs.max(1));
        let result = tokio::time::timeout(limit, self.dispatch(state, &step, &inputs))
            .await
            .unwrap_or_else(|_| {
                CapabilityOutput::error(format!("timed out after {}s", limit.as_secs()))
            });

        state.budget.charge_step();
        state.budget.charge_time(started.elapsed());
        state.budget.charge_tokens(CapabilityOutput::tokens_used(&result));
        state.artifacts.record(step.id.clone(), result.clone());

        let verdict = self
            .evaluator
            .check(&state.goal, &step, &result, &mut state.budget)
            .await;
        let outcome = apply_verdict(state, index, &verdict);

        TickOutcome::Dispatched {
            step_id: step.id,
            outcome,
        }
    }

    /// Dispatch table over step kinds
    async fn dispatch(&self, state: &OrchestratorState, step: &Step, inputs: &Inputs) -> Value {
        match step.kind {
            StepKind::Tool => match step.capability.as_deref() {
                Some(name) => self.registry.invoke(name, inputs.clone()).await,
                None => CapabilityOutput::error("tool step names no capability"),
            },
            StepKind::Reasoning => {
                self.reasoner
                    .reason(ReasoningTask {
                        goal: &state.goal,
                        context: &state.context,
                        step,
                        inputs,
                        artifacts: &state.artifacts,
                    })
                    .await
            }
            StepKind::Subplan | StepKind::Unknown => {
                let mut result = CapabilityOutput::error(format!(
                    "step kind {:?} cannot be executed",
                    step.kind
                ));
                result["unsupported_kind"] = json!(step.kind);
                result
            }
        }
    }
}

/// First step in plan order that is pending with every dependency completed
pub fn next_ready_step(state: &OrchestratorState) -> Option<usize> {
    state.plan.steps.iter().position(|step| {
        step.status == StepStatus::Pending
            && step.depends_on.iter().all(|dep| state.is_completed(dep))
    })
}

fn apply_verdict(
    state: &mut OrchestratorState,
    index: usize,
    verdict: &StepVerdict,
) -> StepOutcome {
    let run_id = state.run_id.clone();
    let step = &mut state.plan.steps[index];
    step.ended_at = Some(Utc::now());
    let id = step.id.clone();

    if verdict.success {
        step.status = StepStatus::Completed;
        step.last_error = None;
        if !state.completed_steps.contains(&id) {
            state.completed_steps.push(id.clone());
        }
        info!("Run {}: step {} completed", run_id, id);
        for note in &verdict.notes {
            state.note(NoteSource::Evaluator, note.clone());
        }
        return StepOutcome::Completed;
    }

    let error = verdict
        .notes
        .first()
        .cloned()
        .or_else(|| {
            (!verdict.criteria_failed.is_empty())
                .then(|| format!("criteria not met: {}", verdict.criteria_failed.join("; ")))
        })
        .unwrap_or_else(|| "step did not succeed".to_string());
    step.last_error = Some(error.clone());

    if verdict.should_retry && step.retries_left > 0 {
        step.retries_left -= 1;
        step.status = StepStatus::Pending;
        warn!(
            "Run {}: step {} failed, retrying ({} retries left): {}",
            run_id, id, step.retries_left, error
        );
        return StepOutcome::Retrying;
    }

    step.status = StepStatus::Failed;
    if !state.failed_steps.contains(&id) {
        state.failed_steps.push(id.clone());
    }

    if verdict.should_replan {
        warn!("Run {}: step {} failed, replanning: {}", run_id, id, error);
        state.note(
            NoteSource::Evaluator,
            format!("step '{}' failed and needs a different plan: {}", id, error),
        );
        state.need_replan = true;
        state.status = RunStatus::Replanning;
        StepOutcome::Replanning
    } else {
        warn!("Run {}: step {} failed: {}", run_id, id, error);
        state.note(
            NoteSource::Executor,
            format!("step '{}' failed: {}", id, error),
        );
        StepOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::{Budget, Plan};
    use crate::conductor::GenerativeClient;
    use crate::llm::{Generation, LLMError};
    use sdk::errors::EngineError;
    use sdk::types::CapabilitySpec;
    use sdk::Capability;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unreachable;

    #[async_trait]
    impl LLMProvider for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn generate(&self, _messages: &[Message]) -> Result<Generation, LLMError> {
            Err(LLMError::ProviderUnavailable("offline".to_string()))
        }
    }

    struct Recorder {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
        seen: Arc<std::sync::Mutex<Vec<Inputs>>>,
    }

    #[async_trait]
    impl Capability for Recorder {
        fn spec(&self) -> CapabilitySpec {
            CapabilitySpec::new(self.name, "records calls")
        }

        async fn invoke(&self, inputs: Inputs) -> Result<Value, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(inputs);
            if self.fail {
                Err(EngineError::Capability("always fails".to_string()))
            } else {
                Ok(json!({"value": self.name, "tokens_used": 3}))
            }
        }
    }

    struct EchoReasoner;

    #[async_trait]
    impl ReasoningWorker for EchoReasoner {
        async fn reason(&self, task: ReasoningTask<'_>) -> Value {
            json!({
                "output": format!("thought about {}", task.step.id),
                "seen": task.artifacts.len(),
            })
        }
    }

    struct Harness {
        executor: Executor,
        calls: Arc<AtomicUsize>,
        seen: Arc<std::sync::Mutex<Vec<Inputs>>>,
    }

    fn harness() -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = CapabilityRegistry::empty();
        for (name, fail) in [("search", false), ("broken", true)] {
            registry.register(Arc::new(Recorder {
                name,
                fail,
                calls: Arc::clone(&calls),
                seen: Arc::clone(&seen),
            }));
        }
        let client = GenerativeClient::new(Arc::new(Unreachable), Duration::from_secs(1));
        Harness {
            executor: Executor::new(
                Arc::new(registry),
                Arc::new(EchoReasoner),
                StepEvaluator::new(client),
            ),
            calls,
            seen,
        }
    }

    fn state(steps: Vec<Step>, max_steps: u32) -> OrchestratorState {
        let budget = Budget::new(10_000, 600, max_steps);
        let mut state = OrchestratorState::new("goal", "", vec![], budget);
        state.plan = Plan::new(steps);
        state.status = RunStatus::Executing;
        state
    }

    #[tokio::test]
    async fn test_ready_selection_respects_dependencies() {
        let h = harness();
        let mut state = state(
            vec![
                Step::new("b", "search").depends_on(&["a"]),
                Step::new("a", "search"),
            ],
            10,
        );

        let first = h.executor.tick(&mut state).await;
        assert_eq!(
            first,
            TickOutcome::Dispatched {
                step_id: "a".to_string(),
                outcome: StepOutcome::Completed
            }
        );
        let second = h.executor.tick(&mut state).await;
        assert!(matches!(second, TickOutcome::Dispatched { step_id, .. } if step_id == "b"));
        assert_eq!(h.executor.tick(&mut state).await, TickOutcome::NothingReady);
        assert_eq!(state.status, RunStatus::Synthesizing);
        assert_eq!(state.completed_steps, vec!["a", "b"]);
        assert_eq!(state.budget.steps_used, 2);
        assert_eq!(state.budget.tokens_used, 6);
    }

    #[tokio::test]
    async fn test_back_references_resolved_before_dispatch() {
        let h = harness();
        let mut state = state(
            vec![
                Step::new("a", "search"),
                Step::new("b", "search")
                    .depends_on(&["a"])
                    .with_input("query", json!("$a.value"))
                    .with_input("missing", json!("$zzz.field")),
            ],
            10,
        );

        h.executor.tick(&mut state).await;
        h.executor.tick(&mut state).await;

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen[1]["query"], json!("search"));
        assert_eq!(seen[1]["missing"], json!("$zzz.field"));
    }

    #[tokio::test]
    async fn test_retries_then_terminal_failure_without_blocking_siblings() {
        let h = harness();
        let mut state = state(
            vec![
                Step::new("flaky", "broken").with_retries(2),
                Step::new("downstream", "search").depends_on(&["flaky"]),
                Step::new("sibling", "search"),
            ],
            20,
        );

        let mut outcomes = Vec::new();
        loop {
            match h.executor.tick(&mut state).await {
                TickOutcome::Dispatched { step_id, outcome } => outcomes.push((step_id, outcome)),
                _ => break,
            }
        }

        assert_eq!(
            outcomes,
            vec![
                ("flaky".to_string(), StepOutcome::Retrying),
                ("flaky".to_string(), StepOutcome::Retrying),
                ("flaky".to_string(), StepOutcome::Failed),
                ("sibling".to_string(), StepOutcome::Completed),
            ]
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 4);
        assert_eq!(state.failed_steps, vec!["flaky"]);
        assert_eq!(state.completed_steps, vec!["sibling"]);
        assert_eq!(
            state.plan.get_step("downstream").map(|s| s.status),
            Some(StepStatus::Pending)
        );
        assert!(CapabilityOutput::is_error(state.artifacts.get("flaky").unwrap()));
    }

    #[tokio::test]
    async fn test_budget_halts_before_dispatch() {
        let h = harness();
        let mut state = state(
            vec![Step::new("a", "search"), Step::new("b", "search")],
            1,
        );

        h.executor.tick(&mut state).await;
        assert_eq!(state.budget.steps_used, 1);

        let outcome = h.executor.tick(&mut state).await;
        assert_eq!(outcome, TickOutcome::Halted(Ceiling::Steps));
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.notes.last().map(|n| n.source), Some(NoteSource::Budget));
    }

    #[tokio::test]
    async fn test_reasoning_and_unknown_kinds() {
        let h = harness();
        let mut reasoning = Step::new("think", "").with_kind(StepKind::Reasoning);
        reasoning.capability = None;
        let mut odd = Step::new("odd", "").with_kind(StepKind::Subplan);
        odd.capability = None;
        let mut state = state(vec![reasoning, odd], 10);

        h.executor.tick(&mut state).await;
        assert_eq!(
            state.artifacts.get("think").map(|v| v["output"].clone()),
            Some(json!("thought about think"))
        );

        let outcome = h.executor.tick(&mut state).await;
        assert!(matches!(
            outcome,
            TickOutcome::Dispatched { outcome: StepOutcome::Failed, .. }
        ));
        assert_eq!(state.artifacts.get("odd").unwrap()["unsupported_kind"], "subplan");
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    struct Slow;

    #[async_trait]
    impl Capability for Slow {
        fn spec(&self) -> CapabilitySpec {
            CapabilitySpec::new("slow", "never answers in time")
        }

        async fn invoke(&self, _inputs: Inputs) -> Result<Value, EngineError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({"late": true}))
        }
    }

    #[tokio::test]
    async fn test_step_timeout_becomes_error_result() {
        let mut registry = CapabilityRegistry::empty();
        registry.register(Arc::new(Slow));
        let executor = Executor::new(
            Arc::new(registry),
            Arc::new(EchoReasoner),
            StepEvaluator::new(GenerativeClient::new(
                Arc::new(Unreachable),
                Duration::from_secs(1),
            )),
        );
        let mut state = state(
            vec![Step::new("wait", "slow")
                .with_title("wait for the slow service")
                .with_timeout(1)],
            10,
        );

        let outcome = executor.tick(&mut state).await;

        assert!(matches!(
            outcome,
            TickOutcome::Dispatched { outcome: StepOutcome::Failed, .. }
        ));
        let result = state.artifacts.get("wait").unwrap();
        assert_eq!(
            CapabilityOutput::error_message(result).as_deref(),
            Some("timed out after 1s")
        );
        assert_eq!(state.failed_steps, vec!["wait"]);
        assert!(state.budget.time_used_secs >= 1.0);
    }
}
