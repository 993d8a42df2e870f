//! The business-step seam.
//!
//! This module provides the trait user code implements per step, the outcome
//! a step returns, and the error type that suppresses routing. The runtime
//! never inspects payloads; it passes them through as opaque JSON.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::context::RecordContext;

/// One registered unit of business work.
///
/// Handlers receive the consumed payload and the invocation's
/// [`RecordContext`]; they must not stash the context anywhere implicit.
/// Returning `Err` suppresses all routing for this invocation: no output is
/// published and no join arrival is recorded downstream.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use choreo::context::RecordContext;
/// use choreo::handler::{HandlerError, StepHandler, StepOutcome};
/// use serde_json::{Value, json};
///
/// struct ReserveStock;
///
/// #[async_trait]
/// impl StepHandler for ReserveStock {
///     async fn handle(
///         &self,
///         payload: Value,
///         _ctx: &RecordContext,
///     ) -> Result<StepOutcome, HandlerError> {
///         let order_id = payload
///             .get("order_id")
///             .and_then(Value::as_str)
///             .ok_or(HandlerError::MissingInput { what: "order_id" })?;
///         Ok(StepOutcome::new(json!({ "order_id": order_id, "reserved": true })))
///     }
/// }
/// ```
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute this step against the consumed payload.
    async fn handle(
        &self,
        payload: Value,
        ctx: &RecordContext,
    ) -> Result<StepOutcome, HandlerError>;
}

/// What a completed step hands back to the router.
///
/// The payload becomes the next hop's payload. The selector is only
/// meaningful for exclusive-gateway steps, where it names the single output
/// to emit; elsewhere it is ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutcome {
    pub payload: Value,
    pub selector: Option<String>,
}

impl StepOutcome {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            selector: None,
        }
    }

    /// Outcome with no payload, for end steps that only terminate a branch.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach the exclusive-gateway selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// Fatal business failures. Any of these suppresses routing entirely; the
/// consumed message is not redelivered by this crate (at-least-once delivery
/// is the broker's concern).
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// Expected input data is missing from the consumed payload.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(choreo::handler::missing_input),
        help("Check that the upstream step produced the required field.")
    )]
    MissingInput { what: &'static str },

    /// The step's own business logic failed.
    #[error("step failed: {0}")]
    #[diagnostic(code(choreo::handler::failed))]
    Failed(String),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(choreo::handler::serde_json))]
    Serde(#[from] serde_json::Error),
}
