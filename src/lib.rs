//! # Choreo: Choreography-Style Process Runtime
//!
//! Choreo turns declarative process steps into correlated message exchanges
//! over a topic-based broker. Services register the resolved definition of
//! each business step; the runtime wires producers and consumers
//! automatically, stamps every hop with correlation metadata, and reconciles
//! parallel branches before downstream logic fires. There is no central
//! orchestrator: the process state travels in message headers.
//!
//! ## Core Concepts
//!
//! - **Steps**: Units of business work declared as start, task, or end
//! - **Gateways**: Parallel splits and exclusive choices on a step's outputs
//! - **Envelopes**: Published messages carrying payload plus routing and
//!   correlation headers
//! - **Joins**: Steps that wait for every upstream branch of a correlation
//!   id before executing
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use choreo::broker::MemoryBroker;
//! use choreo::catalog::{InputEvent, OutputEvent, StepDescriptor};
//! use choreo::context::RecordContext;
//! use choreo::handler::{HandlerError, StepHandler, StepOutcome};
//! use choreo::runtime::FlowRuntime;
//! use choreo::types::StepKind;
//! use serde_json::{Value, json};
//!
//! struct PlaceOrder;
//!
//! #[async_trait]
//! impl StepHandler for PlaceOrder {
//!     async fn handle(
//!         &self,
//!         payload: Value,
//!         _ctx: &RecordContext,
//!     ) -> Result<StepOutcome, HandlerError> {
//!         Ok(StepOutcome::new(payload))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Arc::new(MemoryBroker::new());
//!
//! let runtime = FlowRuntime::builder()
//!     .with_broker(broker)
//!     .register_step(
//!         StepDescriptor::new("orders", "place-order", StepKind::Start)
//!             .with_topic("orders")
//!             .with_output(OutputEvent::new("order-placed")),
//!         PlaceOrder,
//!     )
//!     .register_step(
//!         StepDescriptor::new("orders", "confirm", StepKind::End)
//!             .with_topic("orders")
//!             .with_input(InputEvent::new("order-placed")),
//!         PlaceOrder,
//!     )
//!     .start()
//!     .await?;
//!
//! let correlation_id = runtime
//!     .start_process("orders", "place-order", json!({"order_id": "o-1"}))
//!     .await?;
//! println!("instance opened: {correlation_id}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Model
//!
//! The runtime assumes at-least-once, unbounded-buffer delivery from the
//! broker and tolerates duplicates: join arrivals record idempotently and
//! header construction is deterministic apart from the per-step wall-clock
//! start time. No local state is persisted; a restart loses in-flight join
//! buffers.
//!
//! ## Module Guide
//!
//! - [`catalog`] - Resolved step descriptors and the per-process catalog
//! - [`listener`] - Topic subscriptions and inbound dispatch
//! - [`router`] - Sequential, parallel-split, and exclusive-choice routing
//! - [`join`] - Parallel-gateway join reconciliation
//! - [`context`] - Per-invocation correlation state
//! - [`envelope`] - The per-hop wire contract
//! - [`broker`] - The publish/subscribe seam and the in-memory broker
//! - [`handler`] - The business-step trait
//! - [`telemetry`] - Transition records and sinks
//! - [`runtime`] - Configuration and the composition root

pub mod broker;
pub mod catalog;
pub mod context;
pub mod envelope;
pub mod handler;
pub mod join;
pub mod listener;
pub mod router;
pub mod runtime;
pub mod telemetry;
pub mod types;
