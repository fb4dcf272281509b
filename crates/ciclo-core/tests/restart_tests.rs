mod common;

use common::*;

use std::collections::BTreeMap;

use ciclo_core::{RunaheadLimit, TaskPool, WorkflowConfigBuilder};
use ciclo_cycling::{CyclePoint, CyclingMode};
use ciclo_domain::{TaskDefBuilder, TaskStatus, OUT_SUCCEEDED};

// a => b => c, más x => c (c tiene dos padres), en 1..3.
fn join_config() -> ciclo_core::WorkflowConfig {
    let a = TaskDefBuilder::new("a").on_sequence(int_seq(1, Some(3)))
                                    .spawns(OUT_SUCCEEDED, "b", None)
                                    .build();
    let b = TaskDefBuilder::new("b").on_sequence(int_seq(1, Some(3)))
                                    .depends_on("a", OUT_SUCCEEDED, None)
                                    .spawns(OUT_SUCCEEDED, "c", None)
                                    .build();
    let x = TaskDefBuilder::new("x").on_sequence(int_seq(1, Some(3)))
                                    .spawns(OUT_SUCCEEDED, "c", None)
                                    .build();
    let c = TaskDefBuilder::new("c").on_sequence(int_seq(1, Some(3)))
                                    .depends_on("b", OUT_SUCCEEDED, None)
                                    .depends_on("x", OUT_SUCCEEDED, None)
                                    .build();
    WorkflowConfigBuilder::new("join", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(3))
        .with_runahead_limit(RunaheadLimit::Cycles(4))
        .with_taskdef(a)
        .with_taskdef(b)
        .with_taskdef(x)
        .with_taskdef(c)
        .build()
}

fn snapshot(pool: &TaskPool) -> BTreeMap<String, (String, bool, String, bool)> {
    pool.all_identities()
        .into_iter()
        .map(|id| {
            let t = pool.get_task(&id).expect("listed");
            (id.clone(),
             (t.status.as_str().to_string(), t.is_held, t.flow_nums_str(), pool.is_in_hidden_pool(&id)))
        })
        .collect()
}

#[test]
fn restart_restores_an_equivalent_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let before = {
        let mut pool = make_pool_at(dir.path(), join_config());
        pool.load_from_point();
        pool.release_queued_tasks();

        // ciclo 1 completo
        succeed(&mut pool, 1, "a");
        succeed(&mut pool, 1, "x");
        succeed(&mut pool, 1, "b");
        succeed(&mut pool, 1, "c");
        // ciclo 2: b falla y queda incompleta; c queda parcialmente
        // satisfecha (solo x) en el pool oculto
        succeed(&mut pool, 2, "a");
        succeed(&mut pool, 2, "x");
        fail(&mut pool, 2, "b");
        // ciclo 3: a completa
        succeed(&mut pool, 3, "a");

        assert_eq!(pool.get_task("2/b").expect("retained").status, TaskStatus::Failed);
        assert!(pool.is_in_hidden_pool("2/c"), "partially satisfied");

        pool.db_checkpoint().expect("cycle-end commit");
        let map = snapshot(&pool);
        pool.db_mgr().on_workflow_shutdown();
        map
    };

    let mut pool = restarted_pool_at(dir.path(), join_config());
    pool.load_db_task_pool_for_restart().expect("restart load");
    let after = snapshot(&pool);

    assert_eq!(after, before, "restart(write(pool)) == pool");

    // runahead recomputado desde el punto inacabado más temprano (2/b)
    let b2 = pool.get_task("2/b").expect("reloaded");
    assert_eq!(b2.status, TaskStatus::Failed);
    assert!(!b2.outputs.is_complete());
    let c2 = pool.get_task("2/c").expect("reloaded in hidden pool");
    assert!(pool.is_in_hidden_pool("2/c"));
    assert!(!c2.prereqs_all_satisfied());

    // la satisfacción por clave sobrevivió: x sí, b no
    let satisfied: Vec<bool> = c2.prerequisites.iter().map(|(_, s)| s.is_satisfied()).collect();
    assert!(satisfied.contains(&true) && satisfied.contains(&false));
}

#[test]
fn preparing_tasks_rewind_to_waiting_on_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut pool = make_pool_at(dir.path(), chain_config(2, 3));
        pool.load_from_point();
        pool.release_queued_tasks();
        // a.1 quedó en preparing con su submit number ya asignado
        let p1 = CyclePoint::Integer(1);
        pool.report_output(&p1, "a", "submitted");
        pool.reset_task_state("1/a", TaskStatus::Preparing);
        pool.db_checkpoint().expect("commit");
        pool.db_mgr().on_workflow_shutdown();
    }
    let mut pool = restarted_pool_at(dir.path(), chain_config(2, 3));
    pool.load_db_task_pool_for_restart().expect("restart load");
    let a1 = pool.get_task("1/a").expect("reloaded");
    assert_eq!(a1.status, TaskStatus::Waiting, "preparing rewinds to waiting");
    assert_eq!(a1.submit_num, 0, "same submission will be re-prepared");
}

#[test]
fn restart_with_unknown_platform_is_fatal_and_lists_all() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut pool = make_pool_at(dir.path(), chain_config(2, 3));
        pool.load_from_point();
        pool.release_queued_tasks();
        let p1 = CyclePoint::Integer(1);
        pool.set_task_platform("1/a", "hpc-cluster-01");
        pool.report_output(&p1, "a", "submitted");
        pool.report_output(&p1, "a", "started");
        pool.db_checkpoint().expect("commit");
        pool.db_mgr().on_workflow_shutdown();
    }
    let mut pool = restarted_pool_at(dir.path(), chain_config(2, 3));
    let err = pool.load_db_task_pool_for_restart().unwrap_err();
    let text = err.to_string();
    assert!(text.contains("hpc-cluster-01"), "missing platform listed: {text}");
}

#[test]
fn restart_feeds_the_flow_manager_and_holds() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
        pool.load_from_point();
        pool.hold_tasks(&["2/a".to_string()]);
        pool.db_checkpoint().expect("commit");
        pool.db_mgr().on_workflow_shutdown();
    }
    let mut pool = restarted_pool_at(dir.path(), chain_config(3, 2));
    pool.load_db_task_pool_for_restart().expect("restart load");

    assert!(pool.get_task("2/a").expect("reloaded").is_held);
    assert!(pool.tasks_to_hold().contains(&("a".to_string(), CyclePoint::Integer(2))));

    // el contador de flows arranca del máximo registrado: nada de reusar
    let next = pool.get_flow(None, None);
    assert!(next > 1, "flow counter seeded from the DB, got {next}");
}
