//! Core types for the choreo process runtime.
//!
//! This module defines the fundamental enums used throughout the system to
//! classify steps and the messages they exchange. These are the core domain
//! concepts that define what a process *is*; the resolved step graph lives in
//! [`crate::catalog`].
//!
//! # Key Types
//!
//! - [`StepKind`]: Position of a step within a process (start, task, end)
//! - [`GatewayMode`]: Output fan-out behavior of a step
//! - [`EventType`]: Wire-level classification carried in every envelope
//!
//! # Examples
//!
//! ```rust
//! use choreo::types::{EventType, GatewayMode, StepKind};
//!
//! let kind = StepKind::Task;
//! let mode = GatewayMode::Parallel;
//!
//! // The event type published for a step follows its kind and gateway mode.
//! assert_eq!(EventType::for_step(kind, mode), EventType::GatewayParallel);
//!
//! // Wire round-trip
//! let encoded = EventType::GatewayParallel.encode();
//! assert_eq!(encoded, "GATEWAY_PARALLEL");
//! assert_eq!(EventType::decode(encoded), Some(EventType::GatewayParallel));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a step within its process.
///
/// Start steps are invoked directly by the owning service and open a new
/// process instance; task steps are driven by consumed messages; end steps
/// terminate a branch and publish nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Opens a process instance; has no consumed inputs.
    Start,
    /// Ordinary unit of work between two message hops.
    Task,
    /// Terminates a branch; declares no outputs.
    End,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Task => write!(f, "task"),
            Self::End => write!(f, "end"),
        }
    }
}

/// Output fan-out behavior of a step.
///
/// `None` routes every declared output sequentially. `Parallel` splits into
/// all declared outputs unconditionally so a downstream join can reconcile
/// the branches. `Exclusive` selects exactly one output by comparing the
/// step outcome's selector against output names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayMode {
    #[default]
    None,
    Parallel,
    Exclusive,
}

impl GatewayMode {
    /// Returns `true` if this step fans out to multiple branches at once.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel)
    }

    /// Returns `true` if this step selects exactly one branch.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive)
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Parallel => write!(f, "parallel"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Wire-level classification of a published envelope.
///
/// Carried in the `EVENT_TYPE` header of every hop so consumers and
/// telemetry can tell where in the process topology a message originated.
///
/// # Wire Encoding
///
/// [`encode`](Self::encode) / [`decode`](Self::decode) map to the
/// SCREAMING_SNAKE_CASE forms used on the wire:
///
/// ```rust
/// # use choreo::types::EventType;
/// assert_eq!(EventType::Start.encode(), "START");
/// assert_eq!(EventType::decode("GATEWAY_EXCLUSIVE"), Some(EventType::GatewayExclusive));
/// assert_eq!(EventType::decode("bogus"), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Start,
    Task,
    End,
    GatewayParallel,
    GatewayExclusive,
}

impl EventType {
    /// Encode into the persisted wire form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            EventType::Start => "START",
            EventType::Task => "TASK",
            EventType::End => "END",
            EventType::GatewayParallel => "GATEWAY_PARALLEL",
            EventType::GatewayExclusive => "GATEWAY_EXCLUSIVE",
        }
    }

    /// Decode a wire string back into an `EventType`.
    ///
    /// Returns `None` for unrecognized input; inbound dispatch treats that
    /// as a malformed message, not a fault.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "START" => Some(EventType::Start),
            "TASK" => Some(EventType::Task),
            "END" => Some(EventType::End),
            "GATEWAY_PARALLEL" => Some(EventType::GatewayParallel),
            "GATEWAY_EXCLUSIVE" => Some(EventType::GatewayExclusive),
            _ => None,
        }
    }

    /// Event type published for a step, given its kind and gateway mode.
    ///
    /// Gateway modes dominate: a task with a parallel gateway publishes
    /// `GATEWAY_PARALLEL`, not `TASK`.
    #[must_use]
    pub fn for_step(kind: StepKind, gateway: GatewayMode) -> Self {
        match gateway {
            GatewayMode::Parallel => EventType::GatewayParallel,
            GatewayMode::Exclusive => EventType::GatewayExclusive,
            GatewayMode::None => match kind {
                StepKind::Start => EventType::Start,
                StepKind::Task => EventType::Task,
                StepKind::End => EventType::End,
            },
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
