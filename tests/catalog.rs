mod common;

use choreo::catalog::{CatalogError, InputEvent, OutputEvent, StepCatalog, StepDescriptor};
use choreo::types::StepKind;
use proptest::prelude::*;

#[test]
fn duplicate_step_key_in_one_process_is_fatal() {
    let result = StepCatalog::builder()
        .register(common::task_step("orders", "reserve", "a", "b"))
        .register(common::task_step("orders", "reserve", "c", "d"))
        .build();

    match result {
        Err(CatalogError::DuplicateStepKey { process, key }) => {
            assert_eq!(process, "orders");
            assert_eq!(key, "reserve");
        }
        other => panic!("expected DuplicateStepKey, got {other:?}"),
    }
}

#[test]
fn same_key_in_different_processes_is_fine() {
    let catalog = StepCatalog::builder()
        .register(common::task_step("orders", "reserve", "a", "b"))
        .register(common::task_step("billing", "reserve", "a", "b"))
        .build()
        .expect("distinct processes");
    assert_eq!(catalog.len(), 2);
}

#[test]
fn event_topic_wins_over_step_topic() {
    let descriptor = StepDescriptor::new("orders", "reserve", StepKind::Task)
        .with_topic("fallback")
        .with_input(InputEvent::new("in").with_topic("in-topic"))
        .with_output(OutputEvent::new("out").with_topic("out-topic"));

    assert_eq!(
        descriptor.resolved_input_topic(&descriptor.inputs[0]),
        Some("in-topic")
    );
    assert_eq!(
        descriptor.resolved_output_topic(&descriptor.outputs[0]),
        Some("out-topic")
    );
}

#[test]
fn blank_event_topic_falls_back_to_step_topic() {
    let descriptor = common::task_step("orders", "reserve", "in", "out");
    assert_eq!(
        descriptor.resolved_input_topic(&descriptor.inputs[0]),
        Some("orders")
    );
    assert_eq!(
        descriptor.resolved_output_topic(&descriptor.outputs[0]),
        Some("orders")
    );
}

#[test]
fn unresolved_input_topic_is_fatal() {
    let result = StepCatalog::builder()
        .register(
            StepDescriptor::new("orders", "reserve", StepKind::Task)
                .with_input(InputEvent::new("in"))
                .with_output(OutputEvent::new("out").with_topic("out-topic")),
        )
        .build();
    assert!(matches!(
        result,
        Err(CatalogError::UnresolvedTopic { .. })
    ));
}

#[test]
fn suffix_outputs_do_not_need_their_own_topic() {
    let catalog = StepCatalog::builder()
        .register(
            StepDescriptor::new("orders", "reserve", StepKind::Task)
                .with_topic("orders")
                .with_input(InputEvent::new("in"))
                .with_output(OutputEvent::with_suffix("-done")),
        )
        .build()
        .expect("suffix output resolves at routing time");
    assert_eq!(catalog.len(), 1);
}

#[test]
fn start_steps_skip_input_validation() {
    let catalog = StepCatalog::builder()
        .register(
            StepDescriptor::new("orders", "open", StepKind::Start)
                .with_topic("orders")
                .with_output(OutputEvent::new("order-placed")),
        )
        .build()
        .expect("start step with no inputs");
    assert!(catalog.get("orders", "open").is_some());
}

#[test]
fn steps_are_indexed_by_consumed_topic() {
    let catalog = StepCatalog::builder()
        .register(common::task_step("orders", "reserve", "order-placed", "reserved"))
        .register(common::task_step("orders", "audit", "order-placed", "audited"))
        .build()
        .expect("catalog");

    let consumers = catalog.steps_for_topic("orders");
    assert_eq!(consumers.len(), 2);
    assert!(catalog.steps_for_topic("elsewhere").is_empty());
    assert_eq!(catalog.consumed_topics(), vec!["orders"]);
}

#[test]
fn input_topics_resolve_through_the_chain() {
    let catalog = StepCatalog::builder()
        .register(
            StepDescriptor::new("orders", "merge", StepKind::Task)
                .with_topic("fallback")
                .with_input(InputEvent::new("left").with_topic("left-topic"))
                .with_input(InputEvent::new("right"))
                .with_output(OutputEvent::new("merged").with_topic("out")),
        )
        .build()
        .expect("catalog");

    let topics = catalog.input_topics("orders", "merge");
    assert_eq!(topics, vec!["left-topic".to_string(), "fallback".to_string()]);
}

proptest! {
    /// The fallback chain is first-non-blank-wins for every combination of
    /// event and step topics.
    #[test]
    fn effective_topic_is_first_non_blank(
        event_topic in "[a-z]{0,12}",
        step_topic in "[a-z]{0,12}",
    ) {
        let descriptor = StepDescriptor::new("p", "s", StepKind::Task)
            .with_topic(step_topic.clone())
            .with_output(OutputEvent::new("out").with_topic(event_topic.clone()));

        let resolved = descriptor.resolved_output_topic(&descriptor.outputs[0]);
        let expected = if !event_topic.is_empty() {
            Some(event_topic.as_str())
        } else if !step_topic.is_empty() {
            Some(step_topic.as_str())
        } else {
            None
        };
        prop_assert_eq!(resolved, expected);
    }
}
