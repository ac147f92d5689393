//! Control loop
//!
//! Drives one run from goal to final result:
//! `Plan -> Validate -> {Execute -> Evaluate}* -> Synthesize`, with replanning
//! back to the planner. The whole run state is passed explicitly through every
//! tick, so a snapshot taken between ticks can be resumed with [`Orchestrator::resume`].

use crate::capabilities::CapabilityRegistry;
use crate::conductor::critic::PlanCritic;
use crate::conductor::evaluator::StepEvaluator;
use crate::conductor::executor::{Executor, LlmReasoner, ReasoningWorker};
use crate::conductor::planner::{Planner, StepDefaults};
use crate::conductor::synthesizer::{fallback_result, failure_result, Synthesizer};
use crate::conductor::types::{Budget, NoteSource, OrchestratorState, RunResult, RunStatus};
use crate::conductor::{snapshot, GenerativeClient};
use crate::config::Config;
use crate::llm::LLMProvider;
use sdk::types::CapabilitySpec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Knobs for one orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub generation_timeout: Duration,
    pub step_defaults: StepDefaults,
    /// When set, the state is saved to `<dir>/<run_id>.json` after every tick
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(120),
            step_defaults: StepDefaults::default(),
            snapshot_dir: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            generation_timeout: Duration::from_secs(config.llm.generation_timeout_secs),
            step_defaults: StepDefaults {
                max_retries: config.orchestrator.default_max_retries,
                timeout_secs: config.orchestrator.default_step_timeout_secs,
            },
            snapshot_dir: config
                .orchestrator
                .snapshot_every_tick
                .then(|| config.runs_dir()),
        }
    }
}

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    planner: Planner,
    critic: PlanCritic,
    executor: Executor,
    synthesizer: Synthesizer,
    snapshot_dir: Option<PathBuf>,
}

impl Orchestrator {
    /// Orchestrator whose reasoning steps go to the same generative provider
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        registry: Arc<CapabilityRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        let reasoner = Arc::new(LlmReasoner::new(
            Arc::clone(&llm),
            settings.generation_timeout,
        ));
        Self::with_reasoner(llm, registry, reasoner, settings)
    }

    pub fn with_reasoner(
        llm: Arc<dyn LLMProvider>,
        registry: Arc<CapabilityRegistry>,
        reasoner: Arc<dyn ReasoningWorker>,
        settings: OrchestratorSettings,
    ) -> Self {
        let client = GenerativeClient::new(llm, settings.generation_timeout);
        Self {
            planner: Planner::new(client.clone(), settings.step_defaults),
            critic: PlanCritic::new(client.clone()),
            executor: Executor::new(
                Arc::clone(&registry),
                reasoner,
                StepEvaluator::new(client.clone()),
            ),
            synthesizer: Synthesizer::new(client),
            registry,
            snapshot_dir: settings.snapshot_dir,
        }
    }

    pub fn catalog(&self) -> Vec<CapabilitySpec> {
        self.registry.catalog()
    }

    /// Run `goal` to completion and return the caller-facing result.
    pub async fn execute(&self, goal: &str, context: &str, budget: Budget) -> RunResult {
        let state = self.start(goal, context, budget);
        self.resume(state).await
    }

    /// Fresh state for `goal` against this orchestrator's catalog
    pub fn start(&self, goal: &str, context: &str, budget: Budget) -> OrchestratorState {
        let state = OrchestratorState::new(goal, context, self.catalog(), budget);
        info!("Run {}: starting goal '{}'", state.run_id, goal);
        state
    }

    /// Continue a run from whatever status it is in.
    pub async fn resume(&self, state: OrchestratorState) -> RunResult {
        let state = self.drive(state).await;
        match state.final_result {
            Some(result) => result,
            None => fallback_result(&state),
        }
    }

    /// Tick the state machine until the run has a final result.
    pub async fn drive(&self, mut state: OrchestratorState) -> OrchestratorState {
        loop {
            match state.status {
                RunStatus::Planning | RunStatus::Replanning => {
                    if let Some(ceiling) = state.budget.exhausted() {
                        info!(
                            "Run {}: {} budget exhausted before planning",
                            state.run_id, ceiling
                        );
                        state.note(
                            NoteSource::Budget,
                            format!("{} budget exhausted; no further planning", ceiling),
                        );
                        state.status = RunStatus::Synthesizing;
                    } else {
                        self.planner.plan(&mut state).await;
                    }
                }
                RunStatus::Validating => {
                    self.critic.review(&mut state).await;
                }
                RunStatus::Executing => {
                    self.executor.tick(&mut state).await;
                }
                RunStatus::Synthesizing | RunStatus::Completed => {
                    if state.final_result.is_none() {
                        self.synthesizer.synthesize(&mut state).await;
                    }
                    self.checkpoint(&state);
                    break;
                }
                RunStatus::Failed => {
                    if state.final_result.is_none() {
                        failure_result(&mut state);
                    }
                    self.checkpoint(&state);
                    break;
                }
            }
            self.checkpoint(&state);
        }
        state
    }

    fn checkpoint(&self, state: &OrchestratorState) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        let path = dir.join(format!("{}.json", state.run_id));
        if let Err(e) = snapshot::save(state, &path) {
            warn!("Run {}: snapshot failed: {}", state.run_id, e);
        }
    }
}
