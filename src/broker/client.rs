use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::envelope::{InboundMessage, OutboundEnvelope};

/// Stream of messages delivered for one topic subscription.
///
/// Receivers are independent; each subscription gets its own. The runtime
/// assumes at-least-once, unbounded-buffer delivery and tolerates
/// duplicates.
pub type MessageStream = flume::Receiver<InboundMessage>;

/// Abstraction over the external broker client.
///
/// Implementations wrap whatever transport the deployment uses; the runtime
/// only needs these two primitives. Backpressure, retries, and offset
/// management all live behind this seam.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publish one envelope. An `Ok` means the broker accepted it; delivery
    /// guarantees beyond that are the implementation's contract.
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), BrokerError>;

    /// Open a subscription on the given (already prefixed) topic and return
    /// its message stream.
    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<MessageStream, BrokerError>;
}

/// Errors surfaced by broker implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum BrokerError {
    #[error("broker connection closed")]
    #[diagnostic(code(choreo::broker::closed))]
    Closed,

    #[error("publish to '{topic}' failed: {reason}")]
    #[diagnostic(code(choreo::broker::publish))]
    Publish { topic: String, reason: String },

    #[error("subscribe to '{topic}' failed: {reason}")]
    #[diagnostic(code(choreo::broker::subscribe))]
    Subscribe { topic: String, reason: String },
}
