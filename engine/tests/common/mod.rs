//! Shared fixtures for the conductor integration tests
//!
//! `ScriptedProvider` replays canned generations in order and fails once the
//! script runs out. `MockCapability` records every invocation.

#![allow(dead_code)]

use async_trait::async_trait;
use cadence_engine::capabilities::CapabilityRegistry;
use cadence_engine::conductor::{Orchestrator, OrchestratorSettings};
use cadence_engine::llm::{Generation, LLMError, LLMProvider, Message};
use sdk::errors::EngineError;
use sdk::types::{CapabilitySpec, Inputs, ParamSpec};
use sdk::Capability;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tokens charged for every scripted generation
pub const TOKENS_PER_REPLY: u64 = 10;

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// User payloads seen so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[Message]) -> Result<Generation, LLMError> {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .map(|reply| Generation::new(reply, TOKENS_PER_REPLY))
            .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".to_string()))
    }
}

/// Capability returning a fixed reply (or always failing) and recording calls
pub struct MockCapability {
    name: String,
    required: Vec<String>,
    reply: Value,
    fail: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Inputs>>,
}

impl MockCapability {
    pub fn ok(name: &str, reply: Value) -> Arc<Self> {
        Arc::new(Self::build(name, reply, false))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Value::Null, true))
    }

    pub fn requiring(name: &str, params: &[&str], reply: Value) -> Arc<Self> {
        let mut capability = Self::build(name, reply, false);
        capability.required = params.iter().map(|p| p.to_string()).collect();
        Arc::new(capability)
    }

    fn build(name: &str, reply: Value, fail: bool) -> Self {
        Self {
            name: name.to_string(),
            required: Vec::new(),
            reply,
            fail,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Inputs> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn spec(&self) -> CapabilitySpec {
        self.required.iter().fold(
            CapabilitySpec::new(self.name.clone(), format!("mock {}", self.name)),
            |spec, param| spec.with_input(ParamSpec::required(param.clone(), "string")),
        )
    }

    async fn invoke(&self, inputs: Inputs) -> Result<Value, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(inputs);
        if self.fail {
            return Err(EngineError::Capability(format!("{} is down", self.name)));
        }
        Ok(self.reply.clone())
    }
}

pub fn registry(capabilities: &[Arc<MockCapability>]) -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::empty();
    for capability in capabilities {
        registry.register(Arc::clone(capability) as Arc<dyn Capability>);
    }
    Arc::new(registry)
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        generation_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn orchestrator(
    provider: &Arc<ScriptedProvider>,
    capabilities: &[Arc<MockCapability>],
) -> Orchestrator {
    cadence_engine::telemetry::init_telemetry();
    Orchestrator::new(
        Arc::clone(provider) as Arc<dyn LLMProvider>,
        registry(capabilities),
        settings(),
    )
}
