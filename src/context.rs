//! Per-invocation correlation state.
//!
//! A [`RecordContext`] is established before a handler runs, either from the
//! headers of the consumed message or freshly for a start-step invocation,
//! and is passed explicitly through dispatch, handler, and routing. It lives
//! for exactly one step's execution; between hops the same facts travel only
//! in envelope headers. Handlers that spawn further concurrent work must
//! clone the context and hand it down themselves.

use chrono::Utc;
use uuid::Uuid;

use crate::envelope::EnvelopeHeaders;

/// Correlation state for one in-flight step invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordContext {
    /// Opaque token identifying one logical process instance across hops.
    pub correlation_id: String,
    /// Owning process name.
    pub process: String,
    /// Name of the event that triggered this invocation. `"Start"` for
    /// start-step invocations.
    pub triggering_event: String,
    /// Epoch millis at which this invocation began.
    pub started_at: i64,
    /// Epoch millis at which the whole process instance began.
    pub instance_started_at: i64,
}

/// Source name announced by start steps, which consume nothing.
pub const START_SOURCE: &str = "Start";

impl RecordContext {
    /// Open a fresh process instance: new correlation id, both clocks set to
    /// now. Used by start-step invocations.
    pub fn new_instance(process: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            process: process.into(),
            triggering_event: START_SOURCE.to_string(),
            started_at: now,
            instance_started_at: now,
        }
    }

    /// Continue an existing instance from the headers of a consumed message.
    /// The invocation clock restarts; the instance clock propagates.
    pub fn from_headers(headers: &EnvelopeHeaders) -> Self {
        Self {
            correlation_id: headers.correlation_id.clone(),
            process: headers.process.clone(),
            triggering_event: headers.target_event.clone(),
            started_at: Utc::now().timestamp_millis(),
            instance_started_at: headers.instance_start_time,
        }
    }

    /// Millis elapsed since this invocation began.
    pub fn elapsed_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_instances_never_share_correlation_ids() {
        let a = RecordContext::new_instance("orders");
        let b = RecordContext::new_instance("orders");
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_eq!(a.triggering_event, START_SOURCE);
        assert_eq!(a.started_at, a.instance_started_at);
    }
}
