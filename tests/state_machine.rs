// tests/state_machine.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use syncpipe::errors::PipelineError;
use syncpipe::graph::{Operation, OperationId};
use syncpipe::types::{Algorithm, OperationStatus};
use syncpipe_test_utils::builders::{ops, t0, CoreBuilder};
use syncpipe_test_utils::flaky_store::FlakyStore;
use syncpipe_test_utils::init_tracing;

#[test]
fn completing_a_pending_operation_is_rejected() {
    init_tracing();
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    core.suspend_by(1, t0());
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    match core.complete_operation(id, t0()) {
        Err(PipelineError::InvalidTransition { id: got, status, action }) => {
            assert_eq!(got, id);
            assert_eq!(status, OperationStatus::Pending);
            assert_eq!(action, "complete");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(core.status_of(id).unwrap(), OperationStatus::Pending);
    assert_eq!(core.graph_count(), 1);
}

#[test]
fn unknown_identifiers_are_rejected_everywhere() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    core.append_graph(1, ops(1), t0()).unwrap();
    let ghost = OperationId::new();

    let is_unknown = |err: PipelineError| matches!(err, PipelineError::UnknownOperation(id) if id == ghost);
    assert!(is_unknown(core.complete_operation(ghost, t0()).unwrap_err()));
    assert!(is_unknown(core.skip_operation(ghost, t0()).unwrap_err()));
    assert!(is_unknown(core.reset_to_pending(ghost, None, t0()).unwrap_err()));
    assert!(is_unknown(core.force_active(ghost, t0()).unwrap_err()));
    assert!(is_unknown(core.set_hold(ghost, Some(t0()), t0()).unwrap_err()));
    assert!(is_unknown(core.status_of(ghost).unwrap_err()));
    assert!(is_unknown(core.hold_until(ghost).unwrap_err()));
    assert!(core.find_operation(ghost).is_none());
}

#[test]
fn skipping_a_pending_operation_unblocks_dependents() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    core.suspend_by(1, t0());
    let a = Operation::new();
    let b = Operation::new().depends_on(a.id());
    let (a_id, b_id) = (a.id(), b.id());
    core.append_graph(1, vec![a, b], t0()).unwrap();

    core.skip_operation(a_id, t0()).unwrap();
    assert_eq!(core.status_of(a_id).unwrap(), OperationStatus::Skipped);

    let (_, step) = core.resume(t0());
    assert_eq!(step.dispatched_ids(), vec![b_id]);
}

#[test]
fn terminal_operations_cannot_transition_again() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(2);
    let (a, b) = (graph[0].id(), graph[1].id());
    core.append_graph(1, graph, t0()).unwrap();
    core.complete_operation(a, t0()).unwrap();

    for result in [
        core.complete_operation(a, t0()),
        core.skip_operation(a, t0()),
        core.reset_to_pending(a, None, t0()),
        core.force_active(a, t0()),
    ] {
        assert!(matches!(
            result,
            Err(PipelineError::InvalidTransition { status: OperationStatus::Completed, .. })
        ));
    }
    assert_eq!(core.status_of(b).unwrap(), OperationStatus::Active);
}

#[test]
fn reset_with_delay_holds_then_redispatches() {
    init_tracing();
    let (mut core, store) = CoreBuilder::new(Algorithm::CommitGraph)
        .max_concurrent(1)
        .build();
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    let step = core
        .reset_to_pending(id, Some(Duration::from_secs(30)), t0())
        .unwrap();
    let deadline = t0() + TimeDelta::seconds(30);

    assert!(step.dispatched.is_empty());
    assert!(step.events.queue_changed);
    assert_eq!(core.status_of(id).unwrap(), OperationStatus::Pending);
    assert_eq!(core.hold_until(id).unwrap(), Some(deadline));
    assert_eq!(core.dispatched_count(), 0);

    let stored = store.get(id).unwrap();
    assert_eq!(stored.status(), OperationStatus::Pending);
    assert_eq!(stored.hold_until(), Some(deadline));

    assert!(core.dispatch(t0() + TimeDelta::seconds(29)).dispatched.is_empty());
    assert_eq!(core.dispatch(deadline).dispatched_ids(), vec![id]);
}

#[test]
fn reset_without_delay_redispatches_in_the_same_call() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    let step = core.reset_to_pending(id, None, t0()).unwrap();
    assert_eq!(step.dispatched_ids(), vec![id]);
    assert_eq!(core.hold_until(id).unwrap(), None);
}

#[test]
fn reset_requires_an_active_operation() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    core.suspend_by(1, t0());
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    assert!(matches!(
        core.reset_to_pending(id, None, t0()),
        Err(PipelineError::InvalidTransition { status: OperationStatus::Pending, .. })
    ));
}

#[test]
fn overflowing_retry_delay_saturates() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    core.reset_to_pending(id, Some(Duration::MAX), t0()).unwrap();
    assert_eq!(core.hold_until(id).unwrap(), Some(DateTime::<Utc>::MAX_UTC));
}

#[test]
fn force_active_works_once_and_bypasses_the_limit() {
    init_tracing();
    let (mut core, store) = CoreBuilder::new(Algorithm::CommitGraph)
        .max_concurrent(1)
        .build();
    core.suspend_by(1, t0());
    let graph = ops(3);
    let (a, b, c) = (graph[0].id(), graph[1].id(), graph[2].id());
    core.append_graph(1, graph, t0()).unwrap();

    let step = core.force_active(a, t0()).unwrap();
    assert!(step.dispatched.is_empty(), "recovered work is not handed to the worker");
    assert_eq!(core.status_of(a).unwrap(), OperationStatus::Active);
    assert_eq!(store.get(a).unwrap().status(), OperationStatus::Active);
    assert_eq!(core.dispatched_count(), 0);

    let (_, step) = core.resume(t0());
    assert_eq!(step.dispatched_ids(), vec![b]);
    assert_eq!(core.active_operations().len(), 2);
    assert_eq!(core.status_of(c).unwrap(), OperationStatus::Pending);

    // A recovered operation that is reset cannot be forced again.
    core.suspend_by(1, t0());
    core.reset_to_pending(a, None, t0()).unwrap();
    assert!(matches!(
        core.force_active(a, t0()),
        Err(PipelineError::InvalidTransition { status: OperationStatus::Pending, .. })
    ));
}

#[test]
fn force_active_requires_pending() {
    let (mut core, _store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    assert!(matches!(
        core.force_active(id, t0()),
        Err(PipelineError::InvalidTransition { status: OperationStatus::Active, .. })
    ));
}

#[test]
fn set_hold_applies_to_any_status_and_ignores_no_ops() {
    let (mut core, store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();
    let later = t0() + TimeDelta::minutes(5);

    let step = core.set_hold(id, Some(later), t0()).unwrap();
    assert!(step.events.queue_changed);
    assert_eq!(core.status_of(id).unwrap(), OperationStatus::Active);
    assert_eq!(store.get(id).unwrap().hold_until(), Some(later));

    let step = core.set_hold(id, Some(later), t0()).unwrap();
    assert!(step.events.is_empty());
}

#[test]
fn store_mirrors_dispatch_and_deletes_finalized_records() {
    let (mut core, store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(2);
    let (a, b) = (graph[0].id(), graph[1].id());
    core.append_graph(1, graph, t0()).unwrap();

    assert_eq!(store.len(), 2);
    assert_eq!(store.get(a).unwrap().status(), OperationStatus::Active);

    core.complete_operation(a, t0()).unwrap();
    assert!(store.get(a).is_none());
    core.skip_operation(b, t0()).unwrap();
    assert!(store.is_empty());
}

#[test]
fn storage_failure_rejects_transitions_without_changes() {
    init_tracing();
    let (mut core, store) = CoreBuilder::new(Algorithm::CommitGraph).build();
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();

    store.set_read_only(true);

    assert!(matches!(core.complete_operation(id, t0()), Err(PipelineError::Storage(_))));
    assert!(matches!(
        core.reset_to_pending(id, Some(Duration::from_secs(1)), t0()),
        Err(PipelineError::Storage(_))
    ));
    assert!(matches!(core.append_graph(2, ops(1), t0()), Err(PipelineError::Storage(_))));

    assert_eq!(core.status_of(id).unwrap(), OperationStatus::Active);
    assert_eq!(core.hold_until(id).unwrap(), None);
    assert_eq!(core.graph_count(), 1);
    assert_eq!(core.latest_snapshot(), Some(1));
    assert!(store.get(id).is_some());

    store.set_read_only(false);
    core.complete_operation(id, t0()).unwrap();
    assert_eq!(core.graph_count(), 0);
}

#[test]
fn storage_failure_during_dispatch_leaves_work_pending() {
    let (mut core, store) = CoreBuilder::new(Algorithm::CommitGraph)
        .max_concurrent(0)
        .build();
    let graph = ops(2);
    let ids: Vec<_> = graph.iter().map(|op| op.id()).collect();
    core.append_graph(1, graph, t0()).unwrap();

    store.set_read_only(true);
    let step = core.set_max_concurrent_operation_count(2, t0());
    assert!(step.dispatched.is_empty());
    for id in &ids {
        assert_eq!(core.status_of(*id).unwrap(), OperationStatus::Pending);
    }

    store.set_read_only(false);
    assert_eq!(core.dispatch(t0()).dispatched_ids(), ids);
}

#[test]
fn failed_reset_leaves_no_hold_behind() {
    init_tracing();
    let store = Arc::new(FlakyStore::new());
    let mut core = CoreBuilder::new(Algorithm::CommitGraph).build_with_store(store.clone());
    let graph = ops(1);
    let id = graph[0].id();
    core.append_graph(1, graph, t0()).unwrap();
    assert_eq!(core.status_of(id).unwrap(), OperationStatus::Active);

    store.fail_status_writes_for(id);
    let err = core
        .reset_to_pending(id, Some(Duration::from_secs(30)), t0())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Storage(_)));

    assert_eq!(core.status_of(id).unwrap(), OperationStatus::Active);
    assert_eq!(core.hold_until(id).unwrap(), None);
    let stored = store.inner().get(id).unwrap();
    assert_eq!(stored.status(), OperationStatus::Active);
    assert_eq!(stored.hold_until(), None);

    store.heal();
    core.reset_to_pending(id, Some(Duration::from_secs(30)), t0()).unwrap();
    let stored = store.inner().get(id).unwrap();
    assert_eq!(stored.status(), OperationStatus::Pending);
    assert_eq!(stored.hold_until(), Some(t0() + TimeDelta::seconds(30)));
}

#[test]
fn failed_dispatch_write_does_not_cost_a_slot() {
    let store = Arc::new(FlakyStore::new());
    let mut core = CoreBuilder::new(Algorithm::CommitGraph)
        .max_concurrent(2)
        .build_with_store(store.clone());
    core.suspend_by(1, t0());
    let graph = ops(3);
    let ids: Vec<_> = graph.iter().map(|op| op.id()).collect();
    core.append_graph(1, graph, t0()).unwrap();

    store.fail_status_writes_for(ids[0]);
    let (_, step) = core.resume(t0());
    assert_eq!(step.dispatched_ids(), vec![ids[1], ids[2]]);
    assert_eq!(core.status_of(ids[0]).unwrap(), OperationStatus::Pending);
    assert_eq!(core.dispatched_count(), 2);

    store.heal();
    let step = core.complete_operation(ids[1], t0()).unwrap();
    assert_eq!(step.dispatched_ids(), vec![ids[0]]);
}
