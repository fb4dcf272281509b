mod common;

use common::*;

use ciclo_core::{QueueConfig, RunaheadLimit, WorkflowConfigBuilder};
use ciclo_cycling::{CyclePoint, CyclingMode};
use ciclo_domain::{TaskDefBuilder, TaskStatus, OUT_SUCCEEDED};

#[test]
fn reload_removes_inactive_orphans_and_keeps_active_ones() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();
    pool.release_queued_tasks();

    // a.1 corre; a.2/a.3 esperan
    let p1 = CyclePoint::Integer(1);
    pool.report_output(&p1, "a", "submitted");
    pool.report_output(&p1, "a", "started");

    // nueva config sin "a": b arranca solo
    let b = TaskDefBuilder::new("b").on_sequence(int_seq(1, Some(3)))
                                    .spawns(OUT_SUCCEEDED, "c", None)
                                    .build();
    let c = TaskDefBuilder::new("c").on_sequence(int_seq(1, Some(3)))
                                    .depends_on("b", OUT_SUCCEEDED, None)
                                    .build();
    let new_config = WorkflowConfigBuilder::new("chain", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(3))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(b)
        .with_taskdef(c)
        .build();

    pool.set_do_reload(new_config);
    assert!(pool.has_reload_pending());
    pool.reload_taskdefs();
    assert!(!pool.has_reload_pending());

    // la activa sigue corriendo con su definición previa, sin hijos
    let a1 = pool.get_task("1/a").expect("active orphan kept");
    assert_eq!(a1.status, TaskStatus::Running);
    assert!(a1.tdef.graph_children.is_empty(), "orphan spawns no children");
    // las no activas se van
    assert!(pool.get_task("2/a").is_none(), "inactive orphan removed");
    assert!(pool.get_task("3/a").is_none());

    // y la huérfana activa ya no engendra al completarse
    pool.report_output(&p1, "a", "succeeded");
    assert!(pool.get_task("1/b").is_none(), "no children from orphaned completions");
}

#[test]
fn reload_rebuilds_queues_with_the_new_limits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let foo = TaskDefBuilder::new("foo").on_sequence(int_seq(1, Some(4))).build();
    let config = WorkflowConfigBuilder::new("solo", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(4))
        .with_runahead_limit(RunaheadLimit::Cycles(4))
        .with_taskdef(foo.clone())
        .build();
    let mut pool = make_pool_at(dir.path(), config);
    pool.load_from_point();

    // nueva config: misma tarea pero con una cola estrecha
    let new_config = WorkflowConfigBuilder::new("solo", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(4))
        .with_runahead_limit(RunaheadLimit::Cycles(4))
        .with_queue(QueueConfig { name: "narrow".to_string(),
                                  limit: 1,
                                  members: vec!["foo".to_string()] })
        .with_taskdef(TaskDefBuilder::new("foo").on_sequence(int_seq(1, Some(4)))
                                                .in_queue("narrow")
                                                .build())
        .build();
    pool.set_do_reload(new_config);
    pool.reload_taskdefs();

    // una tarea liberada-pero-no-preparando puede quedar retenida por el
    // límite nuevo: sólo una sale por ciclo
    let released = pool.release_queued_tasks();
    assert_eq!(released.len(), 1, "new queue limit applies after reload");
}

#[test]
fn reload_preserves_runtime_state_on_replaced_tasks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();
    pool.release_queued_tasks();
    succeed(&mut pool, 1, "a");
    let b_flows = pool.get_task("1/b").expect("spawned").flow_nums.clone();

    pool.set_do_reload(chain_config(3, 2));
    pool.reload_taskdefs();

    let b1 = pool.get_task("1/b").expect("rebuilt from the new def");
    assert_eq!(b1.flow_nums, b_flows, "flows survive the reload");
    assert!(b1.prereqs_all_satisfied(), "prerequisite satisfaction copied over");
    assert!(pool.is_in_main_pool("1/b"));
}
