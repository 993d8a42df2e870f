//! Inbound subscription registry and dispatch.
//!
//! The registry holds exactly one physical subscription per distinct topic,
//! no matter how many steps consume it. Each subscription runs its own
//! consumption task that processes messages strictly sequentially; distinct
//! topics proceed concurrently and no global lock serializes handlers across
//! them. Subscriptions are created lazily on first registration of a topic
//! and live for the process lifetime.
//!
//! Registering a brand-new topic blocks the caller until the consumption
//! task confirms over a oneshot that it started, bounded by the configured
//! subscribe timeout. It does not guarantee that consumption of any message
//! has begun. Re-registering a handler for an already-subscribed topic
//! attaches it to the existing subscription and returns immediately.
//!
//! Dispatch selects the handler whose declared input event name matches the
//! message's target-event header. A message matching no handler is dropped
//! with a warning; that is an operational signal, never a fault.

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::broker::{BrokerClient, BrokerError, MessageStream};
use crate::catalog::StepDescriptor;
use crate::envelope::InboundMessage;
use crate::handler::StepHandler;
use crate::runtime::RuntimeConfig;
use crate::runtime::flow::StepInvoker;

/// A (descriptor, handler) pair attached to a topic subscription.
#[derive(Clone)]
pub(crate) struct RegisteredStep {
    pub(crate) descriptor: Arc<StepDescriptor>,
    pub(crate) handler: Arc<dyn StepHandler>,
}

struct TopicSubscription {
    handlers: Arc<Mutex<Vec<RegisteredStep>>>,
    // Held so the consumption task is owned somewhere; never awaited, the
    // task runs for process lifetime.
    _task: JoinHandle<()>,
}

/// Errors surfaced while wiring subscriptions.
#[derive(Debug, Error, Diagnostic)]
pub enum ListenerError {
    #[error("subscribing to '{topic}' failed")]
    #[diagnostic(code(choreo::listener::subscribe))]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("consumption task for '{topic}' did not confirm startup in time")]
    #[diagnostic(
        code(choreo::listener::ready_timeout),
        help("The runtime could not confirm the consumer started. Check broker connectivity.")
    )]
    ReadyTimeout { topic: String },
}

/// Maps topics to handlers and owns the per-topic consumption tasks.
///
/// All gating state lives on the instance; there are no process-wide
/// statics. The subscription map is guarded by an async mutex so concurrent
/// discovery of the same topic resolves to a single check-then-act winner.
pub struct ListenerRegistry {
    broker: Arc<dyn BrokerClient>,
    invoker: Arc<StepInvoker>,
    config: RuntimeConfig,
    subscriptions: AsyncMutex<FxHashMap<String, TopicSubscription>>,
}

impl ListenerRegistry {
    pub(crate) fn new(
        broker: Arc<dyn BrokerClient>,
        invoker: Arc<StepInvoker>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            broker,
            invoker,
            config,
            subscriptions: AsyncMutex::new(FxHashMap::default()),
        }
    }

    /// Attach a handler to the (logical, unprefixed) topic, creating the
    /// subscription and its consumption task on first sight of the topic.
    ///
    /// Idempotent per (process, step key): attaching the same step to a
    /// topic twice leaves a single entry.
    #[instrument(skip(self, descriptor, handler), fields(step = %descriptor.key), err)]
    pub(crate) async fn register(
        &self,
        topic: &str,
        descriptor: Arc<StepDescriptor>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), ListenerError> {
        let registered = RegisteredStep {
            descriptor,
            handler,
        };

        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(subscription) = subscriptions.get(topic) {
            attach(&subscription.handlers, registered, topic);
            return Ok(());
        }

        let wire_topic = self.config.prefixed_topic(topic);
        let stream = self
            .broker
            .subscribe(&wire_topic, &self.config.group_id)
            .await
            .map_err(|source| ListenerError::Subscribe {
                topic: wire_topic.clone(),
                source,
            })?;

        let handlers = Arc::new(Mutex::new(vec![registered]));
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(consume_loop(
            topic.to_string(),
            stream,
            Arc::clone(&handlers),
            Arc::clone(&self.invoker),
            ready_tx,
        ));

        // A dropped sender means the task died before confirming; treat it
        // the same as a timeout.
        match timeout(self.config.subscribe_timeout, ready_rx).await {
            Ok(Ok(())) => {}
            _ => {
                task.abort();
                return Err(ListenerError::ReadyTimeout {
                    topic: topic.to_string(),
                });
            }
        }

        subscriptions.insert(
            topic.to_string(),
            TopicSubscription {
                handlers,
                _task: task,
            },
        );
        debug!(topic, "subscription started");
        Ok(())
    }

    /// Number of live topic subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Number of handlers attached to one topic.
    pub async fn handler_count(&self, topic: &str) -> usize {
        self.subscriptions
            .lock()
            .await
            .get(topic)
            .map(|s| s.handlers.lock().len())
            .unwrap_or(0)
    }
}

fn attach(handlers: &Arc<Mutex<Vec<RegisteredStep>>>, registered: RegisteredStep, topic: &str) {
    let mut guard = handlers.lock();
    let exists = guard.iter().any(|h| {
        h.descriptor.process == registered.descriptor.process
            && h.descriptor.key == registered.descriptor.key
    });
    if exists {
        debug!(topic, step = %registered.descriptor.key, "handler already attached");
    } else {
        guard.push(registered);
    }
}

/// One subscription's consumption unit: confirms startup, then processes
/// messages one at a time until the stream closes.
async fn consume_loop(
    topic: String,
    stream: MessageStream,
    handlers: Arc<Mutex<Vec<RegisteredStep>>>,
    invoker: Arc<StepInvoker>,
    ready: oneshot::Sender<()>,
) {
    let _ = ready.send(());
    loop {
        match stream.recv_async().await {
            Ok(message) => dispatch(&topic, message, &handlers, &invoker).await,
            Err(_) => {
                debug!(topic, "message stream closed; consumption task exiting");
                break;
            }
        }
    }
}

/// Match the message against registered steps and hand it to the invoker.
async fn dispatch(
    topic: &str,
    message: InboundMessage,
    handlers: &Arc<Mutex<Vec<RegisteredStep>>>,
    invoker: &Arc<StepInvoker>,
) {
    let headers = match message.parsed_headers() {
        Ok(headers) => headers,
        Err(err) => {
            warn!(topic, error = %err, "dropping message with malformed headers");
            return;
        }
    };

    let matched = {
        let guard = handlers.lock();
        guard
            .iter()
            .find(|h| {
                h.descriptor
                    .inputs
                    .iter()
                    .any(|input| input.name == headers.target_event)
            })
            .cloned()
    };

    match matched {
        Some(step) => invoker.invoke(&step, headers, message.payload).await,
        None => {
            warn!(
                topic,
                event = %headers.target_event,
                correlation_id = %headers.correlation_id,
                "no registered step consumes this event; message dropped"
            );
        }
    }
}
