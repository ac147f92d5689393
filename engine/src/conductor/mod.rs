//! Conductor System
//!
//! Turns a goal into a validated plan, executes it step by step against the
//! capability registry, judges every outcome and repairs the plan when needed,
//! all under a joint token/time/step budget.
//!
//! `Plan -> Validate -> {Execute -> Evaluate}* -> Synthesize`, with a
//! replanning edge back to the planner.

pub mod critic;
pub mod evaluator;
pub mod executor;
pub mod orchestrator;
pub mod params;
pub mod planner;
pub mod snapshot;
pub mod synthesizer;
pub mod types;
pub mod validator;

pub use critic::{Critique, Patch, PlanCritic};
pub use evaluator::{StepEvaluator, StepVerdict};
pub use executor::{
    Executor, LlmReasoner, ReasoningTask, ReasoningWorker, StepOutcome, TickOutcome,
};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use planner::{parse_plan, PlanOutcome, Planner, StepDefaults};
pub use synthesizer::Synthesizer;
pub use types::{
    Artifacts, Budget, Note, NoteSource, OrchestratorState, Plan, RunResult, RunStatus, Step,
    StepKind, StepStatus,
};
pub use validator::{validate, Finding, FindingKind, PlanValidator, ValidationReport};

use crate::llm::{self, generate_with_timeout, parse_structured_response, LLMProvider, Message};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared handle on the generative service used by every conductor call site.
///
/// Each call is bounded by the generation timeout and charged to the run's
/// budget (elapsed time always, tokens when the call succeeds). Interpreting
/// the parsed JSON is left to the caller.
#[derive(Clone)]
pub struct GenerativeClient {
    llm: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl GenerativeClient {
    pub fn new(llm: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Raw text generation
    pub async fn generate(
        &self,
        instructions: &str,
        payload: &Value,
        budget: &mut Budget,
    ) -> llm::Result<String> {
        let messages = [
            Message::system(instructions),
            Message::user(format!("{:#}", payload)),
        ];

        let started = Instant::now();
        let result = generate_with_timeout(self.llm.as_ref(), &messages, self.timeout).await;
        budget.charge_time(started.elapsed());

        let generation = result?;
        budget.charge_tokens(generation.tokens_used);
        Ok(generation.content)
    }

    /// Generation parsed with [`parse_structured_response`]
    pub async fn ask(
        &self,
        instructions: &str,
        payload: &Value,
        budget: &mut Budget,
    ) -> llm::Result<Value> {
        let content = self.generate(instructions, payload, budget).await?;
        parse_structured_response(&content)
    }
}
