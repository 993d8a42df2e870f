//! The composition root: wiring catalog, listeners, routing, joins, and
//! telemetry into one running choreography.
//!
//! A [`FlowRuntime`] is assembled through its builder: hand it a broker, a
//! config, telemetry sinks, and one (descriptor, handler) registration per
//! step, then call [`start`](FlowRuntimeBuilder::start). Startup freezes the
//! catalog (configuration mistakes are fatal here), subscribes every
//! distinct consumed topic, and returns a handle whose only runtime
//! operation is opening new process instances via
//! [`start_process`](FlowRuntime::start_process). Everything after that is
//! message-driven.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, instrument};

use crate::broker::BrokerClient;
use crate::catalog::{CatalogBuilder, CatalogError, StepCatalog, StepDescriptor};
use crate::context::RecordContext;
use crate::envelope::EnvelopeHeaders;
use crate::handler::{HandlerError, StepHandler};
use crate::join::JoinCoordinator;
use crate::listener::{ListenerError, ListenerRegistry, RegisteredStep};
use crate::router::{MessageRouter, RoutingError};
use crate::runtime::RuntimeConfig;
use crate::telemetry::{TelemetryFanout, TransitionRecord, TransitionSink};
use crate::types::{EventType, StepKind};

/// Errors surfaced while assembling or driving a runtime.
#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error("no broker client configured")]
    #[diagnostic(
        code(choreo::runtime::missing_broker),
        help("Call FlowRuntimeBuilder::with_broker before start().")
    )]
    MissingBroker,

    #[error("unknown step '{key}' in process '{process}'")]
    #[diagnostic(code(choreo::runtime::unknown_step))]
    UnknownStep { process: String, key: String },

    #[error("step '{key}' in process '{process}' is not a start step")]
    #[diagnostic(
        code(choreo::runtime::not_a_start_step),
        help("Only steps declared with StepKind::Start open process instances.")
    )]
    NotAStartStep { process: String, key: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Handler(#[from] HandlerError),
}

/// Shared invocation path: context, join reconciliation, handler execution,
/// routing, telemetry. One instance serves every consumption task.
pub(crate) struct StepInvoker {
    router: MessageRouter,
    joins: JoinCoordinator,
    telemetry: TelemetryFanout,
}

impl StepInvoker {
    fn new(router: MessageRouter, telemetry: TelemetryFanout) -> Self {
        Self {
            router,
            joins: JoinCoordinator::new(),
            telemetry,
        }
    }

    /// Entry point for dispatched messages. Join steps are withheld until
    /// their required branch set completes; everything else runs directly.
    pub(crate) async fn invoke(
        &self,
        step: &RegisteredStep,
        headers: EnvelopeHeaders,
        payload: Value,
    ) {
        let ctx = RecordContext::from_headers(&headers);
        if step.descriptor.is_join() {
            let Some(release) =
                self.joins
                    .record_arrival(&step.descriptor, &headers.target_event, payload, ctx)
            else {
                return;
            };
            self.run_and_route(step, release.payload, release.context)
                .await;
        } else {
            self.run_and_route(step, payload, ctx).await;
        }
    }

    /// Run the business handler; on success route its outcome and record a
    /// transition. A handler failure suppresses routing entirely.
    #[instrument(skip(self, step, payload, ctx), fields(step = %step.descriptor.key, correlation_id = %ctx.correlation_id))]
    async fn run_and_route(&self, step: &RegisteredStep, payload: Value, ctx: RecordContext) {
        let outcome = match step.handler.handle(payload, &ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "step handler failed; routing suppressed");
                return;
            }
        };

        let targets = match self.router.route(&step.descriptor, &ctx, &outcome).await {
            Ok(targets) => targets,
            Err(err) => {
                // Reported, not retried. The step's business effect stands.
                error!(error = %err, "routing failed");
                Vec::new()
            }
        };

        self.telemetry.record(&TransitionRecord::from_invocation(
            &ctx,
            &step.descriptor.key,
            EventType::for_step(step.descriptor.kind, step.descriptor.gateway),
            targets,
            outcome.payload,
        ));
    }
}

/// A running choreography: frozen catalog, live subscriptions, and the
/// start-step entry point.
pub struct FlowRuntime {
    catalog: Arc<StepCatalog>,
    registry: ListenerRegistry,
    invoker: Arc<StepInvoker>,
    start_handlers: FxHashMap<(String, String), Arc<dyn StepHandler>>,
}

impl FlowRuntime {
    #[must_use]
    pub fn builder() -> FlowRuntimeBuilder {
        FlowRuntimeBuilder::default()
    }

    /// The frozen step catalog.
    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    /// The live subscription registry.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Open a new process instance by invoking a start step.
    ///
    /// Runs the registered handler with a fresh correlation id, routes its
    /// outputs with event type `START`, and returns the correlation id. The
    /// handler's failure surfaces to the caller here, unlike message-driven
    /// steps where it is logged and swallowed.
    #[instrument(skip(self, payload), err)]
    pub async fn start_process(
        &self,
        process: &str,
        step_key: &str,
        payload: Value,
    ) -> Result<String, RuntimeError> {
        let descriptor =
            self.catalog
                .get(process, step_key)
                .ok_or_else(|| RuntimeError::UnknownStep {
                    process: process.to_string(),
                    key: step_key.to_string(),
                })?;
        if descriptor.kind != StepKind::Start {
            return Err(RuntimeError::NotAStartStep {
                process: process.to_string(),
                key: step_key.to_string(),
            });
        }
        let handler = self
            .start_handlers
            .get(&(process.to_string(), step_key.to_string()))
            .ok_or_else(|| RuntimeError::UnknownStep {
                process: process.to_string(),
                key: step_key.to_string(),
            })?;

        let ctx = RecordContext::new_instance(process);
        let outcome = handler.handle(payload, &ctx).await?;
        let targets = self.invoker.router.route(descriptor, &ctx, &outcome).await?;

        self.invoker
            .telemetry
            .record(&TransitionRecord::from_invocation(
                &ctx,
                &descriptor.key,
                EventType::for_step(descriptor.kind, descriptor.gateway),
                targets,
                outcome.payload,
            ));
        Ok(ctx.correlation_id)
    }
}

impl std::fmt::Debug for FlowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuntime").finish_non_exhaustive()
    }
}

type Registration = (StepDescriptor, Arc<dyn StepHandler>);

/// Accumulates everything a runtime needs, then wires it in `start`.
#[derive(Default)]
pub struct FlowRuntimeBuilder {
    broker: Option<Arc<dyn BrokerClient>>,
    config: Option<RuntimeConfig>,
    sinks: Vec<Arc<dyn TransitionSink>>,
    registrations: Vec<Registration>,
}

impl FlowRuntimeBuilder {
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn BrokerClient>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Attach a telemetry sink. May be called repeatedly; records fan out to
    /// every sink.
    #[must_use]
    pub fn add_sink<S: TransitionSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Register one step: its resolved descriptor plus the handler that
    /// implements it.
    #[must_use]
    pub fn register_step<H: StepHandler + 'static>(
        mut self,
        descriptor: StepDescriptor,
        handler: H,
    ) -> Self {
        self.registrations.push((descriptor, Arc::new(handler)));
        self
    }

    /// Freeze the catalog, wire subscriptions, and hand back the runtime.
    ///
    /// Configuration errors (duplicate step keys, unresolved topics) and
    /// subscription failures are fatal here, before any message flows.
    pub async fn start(self) -> Result<FlowRuntime, RuntimeError> {
        let broker = self.broker.ok_or(RuntimeError::MissingBroker)?;
        let config = self.config.unwrap_or_default();

        let mut catalog_builder = CatalogBuilder::new();
        let mut handlers: Vec<((String, String), Arc<dyn StepHandler>)> = Vec::new();
        for (descriptor, handler) in self.registrations {
            let slot = (descriptor.process.clone(), descriptor.key.clone());
            catalog_builder = catalog_builder.register(descriptor);
            handlers.push((slot, handler));
        }
        let catalog = Arc::new(catalog_builder.build()?);

        let router = MessageRouter::new(
            Arc::clone(&broker),
            config.topic_prefix.clone(),
            config.api_key.clone(),
        );
        let invoker = Arc::new(StepInvoker::new(router, TelemetryFanout::new(self.sinks)));
        let registry = ListenerRegistry::new(broker, Arc::clone(&invoker), config);

        let mut start_handlers: FxHashMap<(String, String), Arc<dyn StepHandler>> =
            FxHashMap::default();
        for (slot, handler) in handlers {
            let descriptor = catalog
                .get(&slot.0, &slot.1)
                .expect("registered step is in the catalog it was built from");
            if descriptor.kind == StepKind::Start {
                start_handlers.insert(slot, handler);
                continue;
            }
            for input in &descriptor.inputs {
                let Some(topic) = descriptor.resolved_input_topic(input) else {
                    // Catalog validation already rejected this shape.
                    continue;
                };
                registry
                    .register(topic, Arc::clone(descriptor), Arc::clone(&handler))
                    .await?;
            }
        }

        Ok(FlowRuntime {
            catalog,
            registry,
            invoker,
            start_handlers,
        })
    }
}
