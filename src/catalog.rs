//! Resolved step definitions and the per-process catalog.
//!
//! The declarative surface that produces step definitions (annotations, a
//! DSL, generated tables) is external to this crate; what arrives here is the
//! *resolved* form, a [`StepDescriptor`] per business method. Descriptors are
//! registered on a [`CatalogBuilder`] at startup and frozen into a
//! [`StepCatalog`] by [`build`](CatalogBuilder::build), which is also where
//! configuration mistakes become fatal errors. After that point the catalog
//! is immutable and shared behind `Arc` references.
//!
//! # Topic resolution
//!
//! Both inputs and outputs resolve their topic through a fallback chain: the
//! event's own topic if non-blank, else the step-level topic. The first
//! non-blank entry wins.
//!
//! # Examples
//!
//! ```rust
//! use choreo::catalog::{InputEvent, OutputEvent, StepCatalog, StepDescriptor};
//! use choreo::types::StepKind;
//!
//! let catalog = StepCatalog::builder()
//!     .register(
//!         StepDescriptor::new("orders", "reserve-stock", StepKind::Task)
//!             .with_topic("stock")
//!             .with_input(InputEvent::new("order-placed"))
//!             .with_output(OutputEvent::new("stock-reserved")),
//!     )
//!     .build()
//!     .expect("valid catalog");
//!
//! let step = catalog.get("orders", "reserve-stock").expect("registered");
//! assert_eq!(step.resolved_input_topic(&step.inputs[0]), Some("stock"));
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{GatewayMode, StepKind};

/// A consumed event: the name announced in the `TARGET_EVENT` header of the
/// message that triggers the step, plus an optional topic override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputEvent {
    pub name: String,
    /// Topic override; blank falls back to the step-level topic.
    pub topic: String,
}

impl InputEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: String::new(),
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// A produced event.
///
/// An output declares either a `name` (the target event announced to
/// downstream consumers) or a `suffix`. Suffix outputs model "reply to
/// whoever called me": the routed target becomes the consumed event name
/// plus the suffix, published on the consumed event's topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputEvent {
    pub name: String,
    /// Topic override; blank falls back to the step-level topic.
    pub topic: String,
    /// Reply suffix; mutually exclusive with `name` in practice.
    pub suffix: String,
}

impl OutputEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: String::new(),
            suffix: String::new(),
        }
    }

    /// Construct a suffix ("reply") output with no fixed target name.
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            topic: String::new(),
            suffix: suffix.into(),
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Returns `true` if this output replies via suffix instead of naming a
    /// target event.
    #[must_use]
    pub fn is_suffix(&self) -> bool {
        !self.suffix.is_empty()
    }
}

/// The resolved, static definition of one unit of work in a process graph.
///
/// Immutable after catalog build; owned by the [`StepCatalog`] and referenced
/// through `Arc` everywhere else, never copied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Step key, unique within its process.
    pub key: String,
    /// Owning process name.
    pub process: String,
    /// Step-level default topic; blank when every event carries its own.
    pub topic: String,
    pub kind: StepKind,
    pub gateway: GatewayMode,
    pub inputs: Vec<InputEvent>,
    pub outputs: Vec<OutputEvent>,
}

impl StepDescriptor {
    pub fn new(process: impl Into<String>, key: impl Into<String>, kind: StepKind) -> Self {
        Self {
            key: key.into(),
            process: process.into(),
            topic: String::new(),
            kind,
            gateway: GatewayMode::None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: GatewayMode) -> Self {
        self.gateway = gateway;
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: InputEvent) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputEvent) -> Self {
        self.outputs.push(output);
        self
    }

    /// A step consuming more than one input event is a join: it withholds
    /// execution until every declared branch has arrived.
    #[must_use]
    pub fn is_join(&self) -> bool {
        self.inputs.len() > 1
    }

    /// Declared input event names, in declaration order.
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.name.clone()).collect()
    }

    /// Look up a declared input by event name.
    pub fn input_by_name(&self, name: &str) -> Option<&InputEvent> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Effective topic for a consumed event: the input's topic if non-blank,
    /// else the step topic. `None` when both are blank.
    pub fn resolved_input_topic<'a>(&'a self, input: &'a InputEvent) -> Option<&'a str> {
        first_non_blank(&input.topic, &self.topic)
    }

    /// Effective topic for a produced event: the output's topic if
    /// non-blank, else the step topic. `None` when both are blank.
    pub fn resolved_output_topic<'a>(&'a self, output: &'a OutputEvent) -> Option<&'a str> {
        first_non_blank(&output.topic, &self.topic)
    }
}

fn first_non_blank<'a>(preferred: &'a str, fallback: &'a str) -> Option<&'a str> {
    if !preferred.is_empty() {
        Some(preferred)
    } else if !fallback.is_empty() {
        Some(fallback)
    } else {
        None
    }
}

/// Startup-time configuration errors. All of these are fatal: a process
/// graph that trips one cannot be wired to the broker.
#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("duplicate step key '{key}' in process '{process}'")]
    #[diagnostic(
        code(choreo::catalog::duplicate_step_key),
        help("Step keys must be unique within a process. Rename one of the steps.")
    )]
    DuplicateStepKey { process: String, key: String },

    #[error("no topic resolves for event '{event}' of step '{key}' in process '{process}'")]
    #[diagnostic(
        code(choreo::catalog::unresolved_topic),
        help("Declare a topic on the event or a default topic on the step.")
    )]
    UnresolvedTopic {
        process: String,
        key: String,
        event: String,
    },
}

/// Collects descriptors at startup and validates them into a frozen catalog.
#[derive(Default)]
pub struct CatalogBuilder {
    registered: Vec<StepDescriptor>,
}

impl CatalogBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one resolved descriptor. Validation is deferred to
    /// [`build`](Self::build) so registration order never matters.
    #[must_use]
    pub fn register(mut self, descriptor: StepDescriptor) -> Self {
        self.registered.push(descriptor);
        self
    }

    /// Validate every registered descriptor and freeze the catalog.
    ///
    /// Fails on duplicate step keys within a process and on inputs or
    /// non-suffix outputs whose topic fallback chain resolves to nothing.
    /// Suffix outputs are exempt: their topic is taken from the consumed
    /// input at routing time, and that input is validated here.
    pub fn build(self) -> Result<StepCatalog, CatalogError> {
        let mut steps: FxHashMap<(String, String), Arc<StepDescriptor>> = FxHashMap::default();
        let mut by_topic: FxHashMap<String, Vec<Arc<StepDescriptor>>> = FxHashMap::default();

        for descriptor in self.registered {
            let slot = (descriptor.process.clone(), descriptor.key.clone());
            if steps.contains_key(&slot) {
                return Err(CatalogError::DuplicateStepKey {
                    process: descriptor.process,
                    key: descriptor.key,
                });
            }

            if descriptor.kind != StepKind::Start {
                for input in &descriptor.inputs {
                    if descriptor.resolved_input_topic(input).is_none() {
                        return Err(CatalogError::UnresolvedTopic {
                            process: descriptor.process.clone(),
                            key: descriptor.key.clone(),
                            event: input.name.clone(),
                        });
                    }
                }
            }
            for output in &descriptor.outputs {
                if !output.is_suffix() && descriptor.resolved_output_topic(output).is_none() {
                    return Err(CatalogError::UnresolvedTopic {
                        process: descriptor.process.clone(),
                        key: descriptor.key.clone(),
                        event: output.name.clone(),
                    });
                }
            }

            let descriptor = Arc::new(descriptor);
            if descriptor.kind != StepKind::Start {
                for input in &descriptor.inputs {
                    if let Some(topic) = descriptor.resolved_input_topic(input) {
                        let consumers = by_topic.entry(topic.to_string()).or_default();
                        // A join consuming two events from one topic is
                        // still a single consumer of that topic.
                        if !consumers.iter().any(|c| Arc::ptr_eq(c, &descriptor)) {
                            consumers.push(Arc::clone(&descriptor));
                        }
                    }
                }
            }
            steps.insert(slot, descriptor);
        }

        Ok(StepCatalog { steps, by_topic })
    }
}

/// The frozen per-process step graph.
///
/// Built once at startup, then shared read-only across the listener
/// registry, router, and join coordinator.
#[derive(Debug, Default)]
pub struct StepCatalog {
    steps: FxHashMap<(String, String), Arc<StepDescriptor>>,
    by_topic: FxHashMap<String, Vec<Arc<StepDescriptor>>>,
}

impl StepCatalog {
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Look up a step by (process, key).
    pub fn get(&self, process: &str, key: &str) -> Option<&Arc<StepDescriptor>> {
        self.steps.get(&(process.to_string(), key.to_string()))
    }

    /// Every step consuming the given (unprefixed) topic.
    pub fn steps_for_topic(&self, topic: &str) -> &[Arc<StepDescriptor>] {
        self.by_topic.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declared outputs of a step, if registered.
    pub fn outputs(&self, process: &str, key: &str) -> Option<&[OutputEvent]> {
        self.get(process, key).map(|d| d.outputs.as_slice())
    }

    /// Resolved input topics of a step, if registered.
    pub fn input_topics(&self, process: &str, key: &str) -> Vec<String> {
        self.get(process, key)
            .map(|d| {
                d.inputs
                    .iter()
                    .filter_map(|i| d.resolved_input_topic(i))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every distinct topic any non-start step consumes. This is the set of
    /// subscriptions the listener registry must hold.
    pub fn consumed_topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.by_topic.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
