#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::sleep;

use choreo::catalog::{InputEvent, OutputEvent, StepDescriptor};
use choreo::context::RecordContext;
use choreo::envelope::{EnvelopeHeaders, OutboundEnvelope};
use choreo::handler::{HandlerError, StepHandler, StepOutcome};
use choreo::runtime::RuntimeConfig;
use choreo::types::{EventType, GatewayMode, StepKind};

/// Handler that records every call and answers with a fixed outcome.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<(Value, RecordContext)>>>,
    outcome: Arc<Mutex<StepOutcome>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(outcome: StepOutcome) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            outcome: Arc::new(Mutex::new(outcome)),
        }
    }

    /// Echo the consumed payload back as the outcome.
    pub fn echo() -> Self {
        Self::new()
    }

    pub fn calls(&self) -> Vec<(Value, RecordContext)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn handle(
        &self,
        payload: Value,
        ctx: &RecordContext,
    ) -> Result<StepOutcome, HandlerError> {
        self.calls.lock().push((payload.clone(), ctx.clone()));
        let configured = self.outcome.lock().clone();
        if configured == StepOutcome::default() {
            Ok(StepOutcome::new(payload))
        } else {
            Ok(configured)
        }
    }
}

/// Handler that always fails, for exercising suppressed routing.
pub struct FailingHandler;

#[async_trait]
impl StepHandler for FailingHandler {
    async fn handle(&self, _: Value, _: &RecordContext) -> Result<StepOutcome, HandlerError> {
        Err(HandlerError::Failed("boom".to_string()))
    }
}

/// Config with no prefix, a deterministic group id, and a short subscribe
/// timeout so broken wiring fails tests quickly.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        topic_prefix: String::new(),
        group_id: "test-group".to_string(),
        api_key: None,
        subscribe_timeout: Duration::from_secs(1),
    }
}

pub fn task_step(process: &str, key: &str, input: &str, output: &str) -> StepDescriptor {
    StepDescriptor::new(process, key, StepKind::Task)
        .with_topic(process)
        .with_input(InputEvent::new(input))
        .with_output(OutputEvent::new(output))
}

pub fn parallel_step(process: &str, key: &str, input: &str, outputs: &[&str]) -> StepDescriptor {
    let mut descriptor = StepDescriptor::new(process, key, StepKind::Task)
        .with_topic(process)
        .with_gateway(GatewayMode::Parallel)
        .with_input(InputEvent::new(input));
    for output in outputs {
        descriptor = descriptor.with_output(OutputEvent::new(*output));
    }
    descriptor
}

pub fn join_step(process: &str, key: &str, inputs: &[&str], output: &str) -> StepDescriptor {
    let mut descriptor = StepDescriptor::new(process, key, StepKind::Task)
        .with_topic(process)
        .with_output(OutputEvent::new(output));
    for input in inputs {
        descriptor = descriptor.with_input(InputEvent::new(*input));
    }
    descriptor
}

pub fn sample_context(correlation_id: &str, process: &str, triggering: &str) -> RecordContext {
    RecordContext {
        correlation_id: correlation_id.to_string(),
        process: process.to_string(),
        triggering_event: triggering.to_string(),
        started_at: 1_700_000_000_000,
        instance_started_at: 1_699_999_000_000,
    }
}

/// Hand-built envelope for publishing straight onto a broker in tests.
pub fn envelope_for(topic: &str, correlation_id: &str, target_event: &str) -> OutboundEnvelope {
    OutboundEnvelope {
        topic: topic.to_string(),
        key: correlation_id.to_string(),
        headers: EnvelopeHeaders {
            correlation_id: correlation_id.to_string(),
            process: "test-process".to_string(),
            event_type: EventType::Task,
            step_name: "upstream".to_string(),
            source: vec!["earlier".to_string()],
            target_event: target_event.to_string(),
            start_time: 1_700_000_000_000,
            instance_start_time: 1_699_999_000_000,
            api_key: None,
        },
        payload: json!({"from": "test"}),
    }
}

/// Poll until the predicate holds or the deadline passes. Message flow is
/// asynchronous, so assertions on delivered work need a grace window.
pub async fn wait_until<F: Fn() -> bool>(predicate: F, deadline: Duration) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if started.elapsed() > deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
