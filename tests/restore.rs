// tests/restore.rs

use std::sync::Arc;

use syncpipe::commit::{CommitSource, PlanSource, RestoredGraph};
use syncpipe::engine::{PipelineCore, PipelineNames};
use syncpipe::errors::PipelineError;
use syncpipe::graph::Operation;
use syncpipe::store::{MemoryStore, OperationStore};
use syncpipe::types::{Algorithm, OperationStatus};
use syncpipe_test_utils::builders::{ops, t0, OpBuilder, PlanBuilder};
use syncpipe_test_utils::init_tracing;

fn core_on(store: &Arc<MemoryStore>, name: &str, previous: &[&str]) -> PipelineCore {
    PipelineCore::new(
        PipelineNames::new(name, previous.iter().map(|p| p.to_string())),
        Algorithm::CommitGraph,
        store.clone(),
    )
}

fn restore_all(core: &mut PipelineCore, source: &dyn CommitSource) {
    let graphs = source.restore_graphs(core.names()).unwrap();
    core.retire_unrestored_dependencies(&graphs);
    for graph in graphs {
        core.restore_graph(graph, t0()).unwrap();
    }
}

#[test]
fn relaunch_under_a_new_name_migrates_persisted_work() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());

    let first = ops(2);
    let second = ops(1);
    let (a, b, c) = (first[0].id(), first[1].id(), second[0].id());
    {
        let mut old = core_on(&store, "camera-roll", &[]);
        old.append_graph(1, first, t0()).unwrap();
        old.append_graph(2, second, t0()).unwrap();
        assert_eq!(store.get(a).unwrap().status(), OperationStatus::Active);
    }

    // Another pipeline's record in the same table must be left alone.
    let foreign = Operation::new().with_pipeline("documents");
    let foreign_id = foreign.id();
    store.save_graph(7, &[foreign], &[]).unwrap();

    let mut renamed = core_on(&store, "photos", &["camera-roll"]);
    renamed.suspend_by(1, t0());
    restore_all(&mut renamed, store.as_ref());

    assert_eq!(renamed.graph_count(), 2);
    assert_eq!(renamed.snapshot_for_graph_index(0), Some(1));
    assert_eq!(renamed.latest_snapshot(), Some(2));
    for id in [a, b, c] {
        let op = renamed.find_operation(id).unwrap();
        assert_eq!(op.pipeline(), "photos");
        assert_eq!(op.status(), OperationStatus::Pending);

        let stored = store.get(id).unwrap();
        assert_eq!(stored.pipeline(), "photos");
        assert_eq!(stored.status(), OperationStatus::Pending);
    }
    assert!(renamed.find_operation(foreign_id).is_none());
    assert_eq!(store.get(foreign_id).unwrap().pipeline(), "documents");
    assert_eq!(store.len(), 4);

    let (_, step) = renamed.resume(t0());
    assert_eq!(step.dispatched_ids(), vec![a, b]);
}

#[test]
fn restored_graph_ignores_operations_of_other_pipelines() {
    let store = Arc::new(MemoryStore::new());
    let mut core = core_on(&store, "photos", &[]);
    core.suspend_by(1, t0());

    let mine = Operation::new().with_pipeline("photos");
    let theirs = Operation::new().with_pipeline("documents");
    let (mine_id, theirs_id) = (mine.id(), theirs.id());

    core.restore_graph(
        RestoredGraph {
            snapshot: 3,
            operations: vec![mine, theirs],
        },
        t0(),
    )
    .unwrap();

    assert!(core.find_operation(mine_id).is_some());
    assert!(core.find_operation(theirs_id).is_none());
    assert!(store.get(theirs_id).is_none());
}

#[test]
fn restore_respects_snapshot_order() {
    let store = Arc::new(MemoryStore::new());
    let mut core = core_on(&store, "photos", &[]);
    core.append_graph(5, ops(1), t0()).unwrap();

    let err = core
        .restore_graph(
            RestoredGraph {
                snapshot: 4,
                operations: vec![Operation::new().with_pipeline("photos")],
            },
            t0(),
        )
        .unwrap_err();
    assert!(matches!(err, PipelineError::OrderingViolation { snapshot: 4, latest: 5 }));
}

#[test]
fn plan_source_resolves_names_and_edges() {
    let cfg = PlanBuilder::new("uploads")
        .algorithm(Algorithm::FlatGraph)
        .graph(
            10,
            vec![
                OpBuilder::new("thumbs").priority(2).build(),
                OpBuilder::new("index")
                    .after("thumbs")
                    .payload(serde_json::json!({"bucket": "b1"}))
                    .build(),
            ],
        )
        .graph(20, vec![OpBuilder::new("publish").after("index").build()])
        .build();

    let plan = PlanSource::from_config(&cfg);
    let thumbs = plan.id_of("thumbs").unwrap();
    let index = plan.id_of("index").unwrap();
    let publish = plan.id_of("publish").unwrap();
    assert_eq!(plan.name_of(index), Some("index"));
    assert!(plan.id_of("missing").is_none());

    let graphs = plan
        .restore_graphs(&PipelineNames::new("uploads", Vec::new()))
        .unwrap();
    assert_eq!(graphs.len(), 2);
    assert_eq!(graphs[0].snapshot, 10);

    let index_op = &graphs[0].operations[1];
    assert_eq!(index_op.id(), index);
    assert!(index_op.dependencies().contains(&thumbs));
    assert_eq!(index_op.payload()["name"], "index");
    assert_eq!(index_op.payload()["data"]["bucket"], "b1");
    assert_eq!(graphs[0].operations[0].priority(), 2);
    assert!(graphs[1].operations[0].dependencies().contains(&index));
    assert_eq!(graphs[1].operations[0].id(), publish);

    // A pipeline with an unrelated name gets nothing.
    let none = plan
        .restore_graphs(&PipelineNames::new("documents", Vec::new()))
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn plan_source_feeds_a_fresh_store() {
    let cfg = PlanBuilder::new("uploads")
        .graph(1, vec![OpBuilder::new("a").build(), OpBuilder::new("b").after("a").build()])
        .build();
    let plan = PlanSource::from_config(&cfg);
    let (a, b) = (plan.id_of("a").unwrap(), plan.id_of("b").unwrap());

    let store = Arc::new(MemoryStore::new());
    let mut core = core_on(&store, "uploads", &[]);
    restore_all(&mut core, &plan);

    assert_eq!(core.status_of(a).unwrap(), OperationStatus::Active);
    assert_eq!(store.get(a).unwrap().status(), OperationStatus::Active);
    let step = core.complete_operation(a, t0()).unwrap();
    assert_eq!(step.dispatched_ids(), vec![b]);
}

#[test]
fn dependency_finalized_before_relaunch_stays_satisfied() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let flat = |store: &Arc<MemoryStore>| {
        PipelineCore::new(PipelineNames::new("uploads", Vec::<String>::new()), Algorithm::FlatGraph, store.clone())
    };

    let done = Operation::new();
    let blocker = Operation::new();
    let waiting = Operation::new().depends_on(done.id()).depends_on(blocker.id());
    let (done_id, blocker_id, waiting_id) = (done.id(), blocker.id(), waiting.id());
    {
        let mut old = flat(&store);
        old.suspend_by(1, t0());
        old.append_graph(1, vec![done], t0()).unwrap();
        old.append_graph(2, vec![blocker, waiting], t0()).unwrap();
        old.skip_operation(done_id, t0()).unwrap();
        assert!(store.get(done_id).is_none());
    }

    let mut relaunched = flat(&store);
    relaunched.suspend_by(1, t0());
    restore_all(&mut relaunched, store.as_ref());

    assert!(relaunched.is_finalized(done_id));
    assert!(!relaunched.is_finalized(blocker_id));
    assert_eq!(relaunched.ready_operations(t0()), vec![blocker_id]);

    relaunched.resume(t0());
    let step = relaunched.complete_operation(blocker_id, t0()).unwrap();
    assert_eq!(step.dispatched_ids(), vec![waiting_id]);
}
