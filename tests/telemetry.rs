mod common;

use std::sync::Arc;
use std::time::Duration;

use choreo::broker::{BrokerClient, MemoryBroker};
use choreo::catalog::{OutputEvent, StepDescriptor};
use choreo::runtime::FlowRuntime;
use choreo::telemetry::{
    ChannelSink, LogSink, MemorySink, TransitionRecord, TransitionSink,
};
use choreo::types::{EventType, StepKind};
use serde_json::json;

use common::{RecordingHandler, sample_context, test_config, wait_until};

#[test]
fn records_capture_the_invocation_shape() {
    let ctx = sample_context("c1", "orders", "order-placed");
    let record = TransitionRecord::from_invocation(
        &ctx,
        "reserve",
        EventType::Task,
        vec!["stock-reserved".to_string()],
        json!({"ok": true}),
    );

    assert_eq!(record.correlation_id, "c1");
    assert_eq!(record.process, "orders");
    assert_eq!(record.step_name, "reserve");
    assert_eq!(record.source, "order-placed");
    assert_eq!(record.targets, vec!["stock-reserved".to_string()]);
    assert_eq!(record.started_at, ctx.started_at);
    assert_eq!(record.duration_ms, record.ended_at - record.started_at);
}

#[test]
fn memory_sink_snapshots_in_order() {
    let sink = MemorySink::new();
    let ctx = sample_context("c1", "orders", "order-placed");

    for step in ["first", "second"] {
        sink.record(&TransitionRecord::from_invocation(
            &ctx,
            step,
            EventType::Task,
            vec![],
            json!({}),
        ));
    }

    let records = sink.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].step_name, "first");
    assert_eq!(records[1].step_name, "second");

    sink.clear();
    assert!(sink.is_empty());
}

#[test]
fn channel_sink_forwards_records() {
    let (tx, rx) = flume::unbounded();
    let sink = ChannelSink::new(tx);
    let ctx = sample_context("c1", "orders", "order-placed");

    sink.record(&TransitionRecord::from_invocation(
        &ctx,
        "reserve",
        EventType::Task,
        vec![],
        json!({}),
    ));

    let received = rx.recv().expect("forwarded record");
    assert_eq!(received.step_name, "reserve");
}

#[test]
fn channel_sink_tolerates_a_dropped_receiver() {
    let (tx, rx) = flume::unbounded();
    drop(rx);
    let sink = ChannelSink::new(tx);
    let ctx = sample_context("c1", "orders", "order-placed");

    // Must not panic; telemetry never disturbs the flow.
    sink.record(&TransitionRecord::from_invocation(
        &ctx,
        "reserve",
        EventType::Task,
        vec![],
        json!({}),
    ));
}

#[test]
fn log_sink_accepts_records() {
    let sink = LogSink::new();
    let ctx = sample_context("c1", "orders", "order-placed");
    sink.record(&TransitionRecord::from_invocation(
        &ctx,
        "reserve",
        EventType::Task,
        vec![],
        json!({}),
    ));
}

/// A sink failing mid-flow must not stop routing: the downstream step still
/// runs and healthy sinks still record.
#[tokio::test]
async fn failing_sink_does_not_disturb_the_flow() {
    let broker = Arc::new(MemoryBroker::new());
    let healthy = MemorySink::new();
    let healthy_snapshot = healthy.clone();
    let (dead_tx, dead_rx) = flume::unbounded();
    drop(dead_rx);
    let downstream = RecordingHandler::echo();

    let runtime = FlowRuntime::builder()
        .with_broker(Arc::clone(&broker) as Arc<dyn BrokerClient>)
        .with_config(test_config())
        .add_sink(ChannelSink::new(dead_tx))
        .add_sink(healthy)
        .register_step(
            StepDescriptor::new("orders", "open", StepKind::Start)
                .with_topic("orders")
                .with_output(OutputEvent::new("opened")),
            RecordingHandler::echo(),
        )
        .register_step(
            StepDescriptor::new("orders", "close", StepKind::End)
                .with_topic("orders")
                .with_input(choreo::catalog::InputEvent::new("opened")),
            downstream.clone(),
        )
        .start()
        .await
        .expect("runtime");

    runtime
        .start_process("orders", "open", json!({}))
        .await
        .expect("start");

    assert!(
        wait_until(|| downstream.call_count() == 1, Duration::from_secs(2)).await,
        "flow must complete despite the dead sink"
    );
    assert!(wait_until(|| healthy_snapshot.len() == 2, Duration::from_secs(2)).await);
}
