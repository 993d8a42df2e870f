use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::client::{BrokerClient, BrokerError, MessageStream};
use crate::envelope::{InboundMessage, OutboundEnvelope};

/// In-process broker: per-topic fan-out over flume channels, plus a publish
/// log for assertions. Group ids are accepted but ignored; every subscriber
/// of a topic receives every message, which is what the runtime's
/// one-subscription-per-topic registry expects.
#[derive(Default)]
pub struct MemoryBroker {
    topics: Mutex<FxHashMap<String, Vec<flume::Sender<InboundMessage>>>>,
    published: Mutex<Vec<OutboundEnvelope>>,
    fail_publishes: AtomicBool,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every envelope published so far, in publish order.
    pub fn published(&self) -> Vec<OutboundEnvelope> {
        self.published.lock().clone()
    }

    /// Envelopes published to one topic, in publish order.
    pub fn published_to(&self, topic: &str) -> Vec<OutboundEnvelope> {
        self.published
            .lock()
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    /// Make every subsequent publish fail. For exercising routing-error
    /// paths in tests.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), BrokerError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                topic: envelope.topic.clone(),
                reason: "injected failure".to_string(),
            });
        }

        self.published.lock().push(envelope.clone());

        let mut topics = self.topics.lock();
        if let Some(senders) = topics.get_mut(&envelope.topic) {
            let message = InboundMessage::from(envelope);
            // Prune subscribers whose receivers were dropped.
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _group_id: &str) -> Result<MessageStream, BrokerError> {
        let (tx, rx) = flume::unbounded();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeHeaders;
    use crate::types::EventType;
    use serde_json::json;

    fn envelope(topic: &str) -> OutboundEnvelope {
        OutboundEnvelope {
            topic: topic.to_string(),
            key: "c-1".to_string(),
            headers: EnvelopeHeaders {
                correlation_id: "c-1".into(),
                process: "orders".into(),
                event_type: EventType::Task,
                step_name: "reserve".into(),
                source: vec!["order-placed".into()],
                target_event: "stock-reserved".into(),
                start_time: 1,
                instance_start_time: 1,
                api_key: None,
            },
            payload: json!({"ok": true}),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let broker = MemoryBroker::new();
        let rx = broker.subscribe("stock", "g1").await.unwrap();

        broker.publish(envelope("stock")).await.unwrap();

        let msg = rx.recv_async().await.unwrap();
        assert_eq!(msg.topic, "stock");
        assert_eq!(msg.key, "c-1");
        assert_eq!(broker.published_to("stock").len(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_recorded() {
        let broker = MemoryBroker::new();
        broker.publish(envelope("nowhere")).await.unwrap();
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_publish_error() {
        let broker = MemoryBroker::new();
        broker.set_fail_publishes(true);
        let err = broker.publish(envelope("stock")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Publish { .. }));
        assert!(broker.published().is_empty());
    }
}
