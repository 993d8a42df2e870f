//! Outbound routing: from a completed invocation to 0..N published
//! envelopes.
//!
//! The router decides, from the step descriptor's gateway mode, which
//! declared outputs become messages and with what correlation metadata:
//!
//! - sequential steps publish every declared output;
//! - exclusive gateways publish only the output named by the outcome's
//!   selector, and nothing when no output matches;
//! - parallel gateways publish every output unconditionally, all sharing the
//!   correlation id and step name so a downstream join can reconcile them.
//!
//! Header construction is pure except for the wall-clock start time.
//! Publishing is fire-and-forget from the router's view: broker failures
//! surface as [`RoutingError`] for the caller and telemetry, are never
//! retried here, and never roll back the step's business effect.

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::broker::{BrokerClient, BrokerError};
use crate::catalog::{OutputEvent, StepDescriptor};
use crate::context::{RecordContext, START_SOURCE};
use crate::envelope::{EnvelopeHeaders, OutboundEnvelope};
use crate::handler::StepOutcome;
use crate::types::{EventType, GatewayMode};

/// Errors surfaced while routing a completed invocation.
#[derive(Debug, Error, Diagnostic)]
pub enum RoutingError {
    #[error("publish to '{topic}' failed")]
    #[diagnostic(
        code(choreo::router::publish),
        help("The broker rejected the envelope. The step's effect is not rolled back.")
    )]
    Publish {
        topic: String,
        #[source]
        source: BrokerError,
    },

    /// An output's topic fallback chain resolved to nothing at routing time.
    /// Catalog validation makes this unreachable for declared flows; it
    /// guards suffix replies to events the step never declared.
    #[error("no topic resolves for target '{target}' of step '{step}'")]
    #[diagnostic(code(choreo::router::unroutable_output))]
    UnroutableOutput { step: String, target: String },
}

/// Builds and publishes outbound envelopes for completed steps.
pub struct MessageRouter {
    broker: Arc<dyn BrokerClient>,
    topic_prefix: String,
    api_key: Option<String>,
}

impl MessageRouter {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        topic_prefix: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            broker,
            topic_prefix: topic_prefix.into(),
            api_key,
        }
    }

    /// Route one completed invocation, publishing per the step's gateway
    /// mode. Returns the emitted target event names, in emission order.
    #[instrument(skip_all, fields(step = %descriptor.key, gateway = %descriptor.gateway), err)]
    pub async fn route(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        outcome: &StepOutcome,
    ) -> Result<Vec<String>, RoutingError> {
        let envelopes = match descriptor.gateway {
            GatewayMode::None => self.sequential(descriptor, ctx, outcome)?,
            GatewayMode::Exclusive => self.exclusive(descriptor, ctx, outcome)?,
            GatewayMode::Parallel => self.parallel(descriptor, ctx, outcome)?,
        };

        let mut emitted = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let target = envelope.headers.target_event.clone();
            let topic = envelope.topic.clone();
            self.broker
                .publish(envelope)
                .await
                .map_err(|source| RoutingError::Publish { topic, source })?;
            debug!(target = %target, "sent");
            emitted.push(target);
        }
        Ok(emitted)
    }

    /// One envelope per declared output. Suffix outputs reply onto the
    /// consumed event's topic under the name consumed-event + suffix.
    fn sequential(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        outcome: &StepOutcome,
    ) -> Result<Vec<OutboundEnvelope>, RoutingError> {
        let event_type = EventType::for_step(descriptor.kind, descriptor.gateway);
        descriptor
            .outputs
            .iter()
            .map(|output| {
                if output.is_suffix() {
                    self.build_suffix_envelope(descriptor, ctx, event_type, output, &outcome.payload)
                } else {
                    self.build_envelope(descriptor, ctx, event_type, output, &outcome.payload)
                }
            })
            .collect()
    }

    /// Only the output whose name equals the outcome's selector. No match
    /// emits nothing, which is a valid terminal state for a branch.
    fn exclusive(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        outcome: &StepOutcome,
    ) -> Result<Vec<OutboundEnvelope>, RoutingError> {
        let Some(selector) = outcome.selector.as_deref() else {
            debug!(step = %descriptor.key, "exclusive outcome carries no selector; nothing emitted");
            return Ok(Vec::new());
        };
        descriptor
            .outputs
            .iter()
            .filter(|output| output.name == selector)
            .map(|output| {
                self.build_envelope(
                    descriptor,
                    ctx,
                    EventType::GatewayExclusive,
                    output,
                    &outcome.payload,
                )
            })
            .collect()
    }

    /// Every declared output unconditionally; siblings share correlation id
    /// and step name.
    fn parallel(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        outcome: &StepOutcome,
    ) -> Result<Vec<OutboundEnvelope>, RoutingError> {
        descriptor
            .outputs
            .iter()
            .map(|output| {
                self.build_envelope(
                    descriptor,
                    ctx,
                    EventType::GatewayParallel,
                    output,
                    &outcome.payload,
                )
            })
            .collect()
    }

    fn build_envelope(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        event_type: EventType,
        output: &OutputEvent,
        payload: &Value,
    ) -> Result<OutboundEnvelope, RoutingError> {
        let topic = descriptor.resolved_output_topic(output).ok_or_else(|| {
            RoutingError::UnroutableOutput {
                step: descriptor.key.clone(),
                target: output.name.clone(),
            }
        })?;
        let source = if descriptor.inputs.is_empty() {
            vec![START_SOURCE.to_string()]
        } else {
            descriptor.input_names()
        };
        Ok(self.assemble(
            descriptor,
            ctx,
            event_type,
            &output.name,
            topic,
            source,
            payload,
        ))
    }

    /// Reply envelope: target = consumed event + suffix, topic = the
    /// consumed input's resolved topic. The producer never needs to know
    /// its caller's name in advance.
    fn build_suffix_envelope(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        event_type: EventType,
        output: &OutputEvent,
        payload: &Value,
    ) -> Result<OutboundEnvelope, RoutingError> {
        let consumed = ctx.triggering_event.as_str();
        let target = format!("{consumed}{}", output.suffix);
        let topic = descriptor
            .input_by_name(consumed)
            .and_then(|input| descriptor.resolved_input_topic(input))
            .ok_or_else(|| RoutingError::UnroutableOutput {
                step: descriptor.key.clone(),
                target: target.clone(),
            })?;
        Ok(self.assemble(
            descriptor,
            ctx,
            event_type,
            &target,
            topic,
            vec![consumed.to_string()],
            payload,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        descriptor: &StepDescriptor,
        ctx: &RecordContext,
        event_type: EventType,
        target: &str,
        topic: &str,
        source: Vec<String>,
        payload: &Value,
    ) -> OutboundEnvelope {
        OutboundEnvelope {
            topic: format!("{}{topic}", self.topic_prefix),
            key: ctx.correlation_id.clone(),
            headers: EnvelopeHeaders {
                correlation_id: ctx.correlation_id.clone(),
                process: ctx.process.clone(),
                event_type,
                step_name: descriptor.key.clone(),
                source,
                target_event: target.to_string(),
                start_time: Utc::now().timestamp_millis(),
                instance_start_time: ctx.instance_started_at,
                api_key: self.api_key.clone(),
            },
            payload: payload.clone(),
        }
    }
}
