//! Transition telemetry: one structured record per completed step.
//!
//! After every successful invocation the runtime pushes a
//! [`TransitionRecord`] to each configured [`TransitionSink`]. Sinks are a
//! narrow, infallible push interface: they must never block and never fail
//! routing. Implementations swallow their own failures and at most
//! debug-log them.
//!
//! Built-in sinks:
//!
//! - [`LogSink`]: serializes the record and emits it through `tracing`
//! - [`MemorySink`]: captures records for test snapshots
//! - [`ChannelSink`]: forwards records over a flume channel to live
//!   consumers (dashboards, audit pipelines)

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::RecordContext;
use crate::types::EventType;

/// Structured description of one completed step transition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransitionRecord {
    pub correlation_id: String,
    pub process: String,
    pub step_name: String,
    /// Event that triggered the invocation.
    pub source: String,
    /// Target event names emitted by routing, in emission order.
    pub targets: Vec<String>,
    pub event_type: EventType,
    pub payload: Value,
    /// Epoch millis at which the invocation began.
    pub started_at: i64,
    /// Epoch millis at which routing finished.
    pub ended_at: i64,
    pub duration_ms: i64,
}

impl TransitionRecord {
    /// Assemble a record for a just-completed invocation. The end timestamp
    /// and duration are sampled here.
    pub fn from_invocation(
        ctx: &RecordContext,
        step_name: &str,
        event_type: EventType,
        targets: Vec<String>,
        payload: Value,
    ) -> Self {
        let ended_at = Utc::now().timestamp_millis();
        Self {
            correlation_id: ctx.correlation_id.clone(),
            process: ctx.process.clone(),
            step_name: step_name.to_string(),
            source: ctx.triggering_event.clone(),
            targets,
            event_type,
            payload,
            started_at: ctx.started_at,
            ended_at,
            duration_ms: ended_at - ctx.started_at,
        }
    }
}

/// Abstraction over a telemetry consumer.
///
/// `record` takes `&self` because sinks are shared across concurrent
/// consumption tasks; implementations use interior mutability where they
/// need it.
pub trait TransitionSink: Send + Sync {
    fn record(&self, record: &TransitionRecord);
}

/// Emits each record as structured `tracing` output.
#[derive(Default)]
pub struct LogSink;

impl LogSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TransitionSink for LogSink {
    fn record(&self, record: &TransitionRecord) {
        match serde_json::to_string(record) {
            Ok(rendered) => info!(target: "choreo::transition", "{rendered}"),
            Err(err) => debug!(error = %err, "transition record failed to serialize"),
        }
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<TransitionRecord>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured records.
    pub fn snapshot(&self) -> Vec<TransitionRecord> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl TransitionSink for MemorySink {
    fn record(&self, record: &TransitionRecord) {
        self.entries.lock().push(record.clone());
    }
}

/// Forwards records over a flume channel. A dropped receiver is tolerated
/// silently apart from a debug log; telemetry never disturbs routing.
pub struct ChannelSink {
    tx: flume::Sender<TransitionRecord>,
}

impl ChannelSink {
    pub fn new(tx: flume::Sender<TransitionRecord>) -> Self {
        Self { tx }
    }
}

impl TransitionSink for ChannelSink {
    fn record(&self, record: &TransitionRecord) {
        if self.tx.send(record.clone()).is_err() {
            debug!("transition channel receiver dropped; record discarded");
        }
    }
}

/// Fan-out over every configured sink.
#[derive(Clone, Default)]
pub(crate) struct TelemetryFanout {
    sinks: Vec<Arc<dyn TransitionSink>>,
}

impl TelemetryFanout {
    pub(crate) fn new(sinks: Vec<Arc<dyn TransitionSink>>) -> Self {
        Self { sinks }
    }

    pub(crate) fn record(&self, record: &TransitionRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

/// Install the default tracing subscriber: env-filtered fmt output with an
/// error layer for span traces. Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
