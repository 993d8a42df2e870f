//! Wire envelopes: the per-hop message contract.
//!
//! Every hop carries an opaque payload plus a fixed header set that encodes
//! all process state. Outbound, headers are built as a typed
//! [`EnvelopeHeaders`] and flattened to a string-keyed map for the broker;
//! inbound, the raw map is parsed back defensively. Malformed messages are a
//! dispatch concern (warn and drop), never a panic.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::types::EventType;

/// Wire names of the envelope headers.
pub mod header_names {
    pub const CORRELATION_ID: &str = "CORRELATION_ID";
    pub const PROCESS_NAME: &str = "PROCESS_NAME";
    pub const EVENT_TYPE: &str = "EVENT_TYPE";
    pub const STEP_NAME: &str = "STEP_NAME";
    pub const SOURCE: &str = "SOURCE";
    pub const TARGET_EVENT: &str = "TARGET_EVENT";
    pub const START_TIME: &str = "START_TIME";
    pub const START_INSTANCE_TIME: &str = "START_INSTANCE_TIME";
    pub const API_KEY: &str = "API_KEY";
}

/// Typed form of the per-hop headers.
///
/// Fully determined by (descriptor, context, routing mode) except
/// `start_time`, which is sampled from the wall clock when the envelope is
/// built.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeHeaders {
    pub correlation_id: String,
    pub process: String,
    pub event_type: EventType,
    pub step_name: String,
    /// Input event name(s) of the producing step.
    pub source: Vec<String>,
    /// Output event name this message announces; downstream dispatch matches
    /// declared inputs against it.
    pub target_event: String,
    /// Epoch millis, per step.
    pub start_time: i64,
    /// Epoch millis, per process instance.
    pub instance_start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Errors produced while parsing an inbound header map.
#[derive(Debug, Error, Diagnostic)]
pub enum HeaderError {
    #[error("missing header: {name}")]
    #[diagnostic(code(choreo::envelope::missing_header))]
    Missing { name: &'static str },

    #[error("malformed header {name}: {found}")]
    #[diagnostic(code(choreo::envelope::malformed_header))]
    Malformed { name: &'static str, found: String },
}

impl EnvelopeHeaders {
    /// Flatten into the string-keyed map carried on the wire.
    pub fn to_wire(&self) -> FxHashMap<String, Value> {
        let mut map = FxHashMap::default();
        map.insert(
            header_names::CORRELATION_ID.to_string(),
            json!(self.correlation_id),
        );
        map.insert(header_names::PROCESS_NAME.to_string(), json!(self.process));
        map.insert(
            header_names::EVENT_TYPE.to_string(),
            json!(self.event_type.encode()),
        );
        map.insert(header_names::STEP_NAME.to_string(), json!(self.step_name));
        map.insert(header_names::SOURCE.to_string(), json!(self.source));
        map.insert(
            header_names::TARGET_EVENT.to_string(),
            json!(self.target_event),
        );
        map.insert(header_names::START_TIME.to_string(), json!(self.start_time));
        map.insert(
            header_names::START_INSTANCE_TIME.to_string(),
            json!(self.instance_start_time),
        );
        if let Some(key) = &self.api_key {
            map.insert(header_names::API_KEY.to_string(), json!(key));
        }
        map
    }

    /// Parse the wire map back into typed headers.
    ///
    /// `SOURCE` tolerates both a JSON array and a bare string, since
    /// single-input producers are the common case on other stacks.
    pub fn from_wire(map: &FxHashMap<String, Value>) -> Result<Self, HeaderError> {
        let event_type_raw = require_str(map, header_names::EVENT_TYPE)?;
        let event_type =
            EventType::decode(event_type_raw).ok_or_else(|| HeaderError::Malformed {
                name: header_names::EVENT_TYPE,
                found: event_type_raw.to_string(),
            })?;

        let source = match map.get(header_names::SOURCE) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(other) => {
                return Err(HeaderError::Malformed {
                    name: header_names::SOURCE,
                    found: other.to_string(),
                });
            }
            None => Vec::new(),
        };

        Ok(Self {
            correlation_id: require_str(map, header_names::CORRELATION_ID)?.to_string(),
            process: require_str(map, header_names::PROCESS_NAME)?.to_string(),
            event_type,
            step_name: require_str(map, header_names::STEP_NAME)?.to_string(),
            source,
            target_event: require_str(map, header_names::TARGET_EVENT)?.to_string(),
            start_time: require_i64(map, header_names::START_TIME)?,
            instance_start_time: require_i64(map, header_names::START_INSTANCE_TIME)?,
            api_key: map
                .get(header_names::API_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn require_str<'a>(
    map: &'a FxHashMap<String, Value>,
    name: &'static str,
) -> Result<&'a str, HeaderError> {
    match map.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(HeaderError::Malformed {
            name,
            found: other.to_string(),
        }),
        None => Err(HeaderError::Missing { name }),
    }
}

fn require_i64(map: &FxHashMap<String, Value>, name: &'static str) -> Result<i64, HeaderError> {
    match map.get(name) {
        Some(value) => value.as_i64().ok_or_else(|| HeaderError::Malformed {
            name,
            found: value.to_string(),
        }),
        None => Err(HeaderError::Missing { name }),
    }
}

/// A message built for publication: prefixed topic, partition key, typed
/// headers, opaque payload. Built fresh per publish; nothing mutable leaks
/// across envelopes.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundEnvelope {
    /// Namespace-prefixed topic.
    pub topic: String,
    /// Partition/routing key; always the correlation id.
    pub key: String,
    pub headers: EnvelopeHeaders,
    pub payload: Value,
}

/// A message as delivered by the broker: raw headers, unparsed.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub key: String,
    pub headers: FxHashMap<String, Value>,
    pub payload: Value,
}

impl InboundMessage {
    /// Parse the raw header map into typed headers.
    pub fn parsed_headers(&self) -> Result<EnvelopeHeaders, HeaderError> {
        EnvelopeHeaders::from_wire(&self.headers)
    }
}

impl From<OutboundEnvelope> for InboundMessage {
    fn from(envelope: OutboundEnvelope) -> Self {
        Self {
            topic: envelope.topic,
            key: envelope.key,
            headers: envelope.headers.to_wire(),
            payload: envelope.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_headers() -> EnvelopeHeaders {
        EnvelopeHeaders {
            correlation_id: "c-1".into(),
            process: "orders".into(),
            event_type: EventType::Task,
            step_name: "reserve-stock".into(),
            source: vec!["order-placed".into()],
            target_event: "stock-reserved".into(),
            start_time: 1_700_000_000_000,
            instance_start_time: 1_699_999_000_000,
            api_key: None,
        }
    }

    #[test]
    fn wire_round_trip() {
        let headers = sample_headers();
        let parsed = EnvelopeHeaders::from_wire(&headers.to_wire()).expect("parse");
        assert_eq!(parsed, headers);
    }

    #[test]
    fn source_accepts_bare_string() {
        let mut wire = sample_headers().to_wire();
        wire.insert(header_names::SOURCE.to_string(), json!("order-placed"));
        let parsed = EnvelopeHeaders::from_wire(&wire).expect("parse");
        assert_eq!(parsed.source, vec!["order-placed".to_string()]);
    }

    #[test]
    fn missing_correlation_id_is_an_error() {
        let mut wire = sample_headers().to_wire();
        wire.remove(header_names::CORRELATION_ID);
        let err = EnvelopeHeaders::from_wire(&wire).expect_err("must fail");
        assert!(matches!(
            err,
            HeaderError::Missing {
                name: header_names::CORRELATION_ID
            }
        ));
    }

    #[test]
    fn unknown_event_type_is_malformed() {
        let mut wire = sample_headers().to_wire();
        wire.insert(header_names::EVENT_TYPE.to_string(), json!("TIMER"));
        let err = EnvelopeHeaders::from_wire(&wire).expect_err("must fail");
        assert!(matches!(err, HeaderError::Malformed { .. }));
    }
}
