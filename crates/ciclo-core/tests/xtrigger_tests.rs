mod common;

use common::*;

use ciclo_core::{RunaheadLimit, WorkflowConfigBuilder};
use ciclo_cycling::{CyclePoint, CyclingMode};
use ciclo_domain::TaskDefBuilder;

fn ext_config() -> ciclo_core::WorkflowConfig {
    let watcher = TaskDefBuilder::new("watcher").on_sequence(int_seq(1, Some(2)))
                                                .with_external_trigger("new-obs-data")
                                                .build();
    WorkflowConfigBuilder::new("ext", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(2))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(watcher)
        .build()
}

#[test]
fn external_triggers_gate_readiness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), ext_config());
    pool.load_from_point();

    let w1 = pool.get_task("1/watcher").expect("spawned");
    assert!(!w1.external_triggers_satisfied());
    assert!(!w1.is_queued, "not ready until the external trigger fires");

    pool.ext_trigger("new-obs-data", "obs cycle 1 arrived", "obs-001");

    let w1 = pool.get_task("1/watcher").expect("still pooled");
    assert!(w1.external_triggers_satisfied());
    assert!(w1.is_queued, "trigger satisfaction queues the ready task");
    // and the satisfied signature is memoised for restart
    assert!(pool.xtriggers_satisfied().keys().any(|sig| sig.contains("new-obs-data")));
}

#[test]
fn satisfied_xtriggers_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut pool = make_pool_at(dir.path(), ext_config());
        pool.load_from_point();
        pool.ext_trigger("new-obs-data", "obs cycle 1 arrived", "obs-001");
        pool.db_checkpoint().expect("commit");
        pool.db_mgr().on_workflow_shutdown();
    }
    let mut pool = restarted_pool_at(dir.path(), ext_config());
    pool.load_db_task_pool_for_restart().expect("restart");
    assert!(pool.xtriggers_satisfied().keys().any(|sig| sig.contains("new-obs-data")),
            "memoised signatures reload from the xtriggers table");
}

#[test]
fn mean_elapsed_times_reload_from_successful_jobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut pool = make_pool_at(dir.path(), chain_config(2, 3));
        pool.load_from_point();
        pool.release_queued_tasks();
        succeed(&mut pool, 1, "a");
        succeed(&mut pool, 1, "b");
        succeed(&mut pool, 1, "c");
        pool.db_checkpoint().expect("commit");
        pool.db_mgr().on_workflow_shutdown();
    }
    let mut pool = restarted_pool_at(dir.path(), chain_config(2, 3));
    pool.load_db_task_pool_for_restart().expect("restart");
    assert!(pool.mean_elapsed_time("a").is_some(),
            "run times of succeeded jobs feed the elapsed-time estimate");
}
