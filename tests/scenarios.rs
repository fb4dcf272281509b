//! Escenarios de punta a punta del kernel de scheduling, corridos sobre
//! persistencia real en directorios temporales.

use std::collections::BTreeMap;

use ciclo_core::{RunaheadLimit, TaskPool, WorkflowConfig, WorkflowConfigBuilder};
use ciclo_cycling::{CycleInterval, CyclePoint, CycleSequence, CyclingMode};
use ciclo_domain::{FlowNums, TaskDefBuilder, TaskStatus, OUT_FAILED, OUT_STARTED, OUT_SUBMITTED, OUT_SUCCEEDED};
use ciclo_persistence::{RunDirLayout, WorkflowDao, WorkflowDatabaseManager, CICLO_VERSION, KEY_VERSION};

fn int_seq(start: i64, stop: Option<i64>) -> CycleSequence {
    CycleSequence::new(CyclePoint::Integer(start),
                       CycleInterval::Integer(1),
                       stop.map(CyclePoint::Integer)).expect("sequence")
}

fn chain_config(stop: i64, runahead: i64) -> WorkflowConfig {
    let a = TaskDefBuilder::new("a").on_sequence(int_seq(1, Some(stop)))
                                    .spawns(OUT_SUCCEEDED, "b", None)
                                    .build();
    let b = TaskDefBuilder::new("b").on_sequence(int_seq(1, Some(stop)))
                                    .depends_on("a", OUT_SUCCEEDED, None)
                                    .spawns(OUT_SUCCEEDED, "c", None)
                                    .build();
    let c = TaskDefBuilder::new("c").on_sequence(int_seq(1, Some(stop)))
                                    .depends_on("b", OUT_SUCCEEDED, None)
                                    .build();
    WorkflowConfigBuilder::new("chain", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(stop))
        .with_runahead_limit(RunaheadLimit::Cycles(runahead))
        .with_taskdef(a)
        .with_taskdef(b)
        .with_taskdef(c)
        .build()
}

fn started_pool(dir: &std::path::Path, config: WorkflowConfig, is_restart: bool) -> TaskPool {
    let layout = RunDirLayout::new(dir);
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(is_restart).expect("db start");
    if !is_restart {
        mgr.put_workflow_params(&[(KEY_VERSION, Some(CICLO_VERSION.to_string()))]);
    }
    TaskPool::new(config, mgr)
}

fn succeed(pool: &mut TaskPool, point: i64, name: &str) {
    let point = CyclePoint::Integer(point);
    pool.report_output(&point, name, OUT_SUBMITTED);
    pool.report_output(&point, name, OUT_STARTED);
    pool.report_output(&point, name, OUT_SUCCEEDED);
}

fn fail(pool: &mut TaskPool, point: i64, name: &str) {
    let point = CyclePoint::Integer(point);
    pool.report_output(&point, name, OUT_SUBMITTED);
    pool.report_output(&point, name, OUT_STARTED);
    pool.report_output(&point, name, OUT_FAILED);
}

// Escenario 1: cadena lineal en el flow default, tres ciclos.
#[test]
fn linear_chain_in_the_default_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = started_pool(dir.path(), chain_config(3, 5), false);
    pool.load_from_point();

    for point in 1..=3 {
        pool.release_queued_tasks();
        assert!(pool.get_task(&format!("{point}/a")).is_some());
        succeed(&mut pool, point, "a");
        assert!(pool.get_task(&format!("{point}/b")).is_some(), "a:succeeded spawned b");
        succeed(&mut pool, point, "b");
        assert!(pool.get_task(&format!("{point}/c")).is_some(), "b:succeeded spawned c");
        succeed(&mut pool, point, "c");
        pool.db_checkpoint().expect("cycle-end commit");
    }

    assert!(pool.is_empty(), "final pool empty");

    // registros finales: outputs con succeeded y un único flow
    let dao = pool.db_mgr().pri_dao().expect("dao");
    for name in ["a", "b", "c"] {
        for point in 1..=3 {
            let rows = dao.select_task_outputs(name, &point.to_string()).expect("outputs");
            assert_eq!(rows.len(), 1);
            let (outputs_json, flows) = &rows[0];
            assert!(outputs_json.contains("succeeded"), "{point}/{name}: {outputs_json}");
            assert_eq!(*flows, FlowNums::from([1]));
        }
    }
    let flows = dao.select_workflow_flows(&FlowNums::from([1])).expect("flows");
    assert_eq!(flows.len(), 1, "a single flow recorded");
    assert_eq!(dao.select_workflow_flows_max_flow_num().expect("max"), 1);
}

// Escenario 2: el límite de runahead acota el pool; el sucesor limitado no
// se libera hasta que el punto base avanza.
#[test]
fn runahead_bound_holds_back_future_cycles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let foo = TaskDefBuilder::new("foo").on_sequence(int_seq(1, None)).build();
    let config = WorkflowConfigBuilder::new("solo", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(foo)
        .build();
    let mut pool = started_pool(dir.path(), config, false);
    pool.load_from_point();
    pool.hold_tasks(&["3/foo".to_string()]);

    assert!(pool.get_task("1/foo").is_some());
    assert!(pool.get_task("2/foo").is_some());
    assert!(pool.get_task("3/foo").expect("in pool").is_held);
    let beyond = pool.get_task("4/foo").expect("runahead-limited successor");
    assert!(beyond.is_runahead, "4/foo is not released while 1/foo is unfinished");

    pool.release_queued_tasks();
    succeed(&mut pool, 1, "foo");
    let beyond = pool.get_task("4/foo").expect("still in pool");
    assert!(!beyond.is_runahead, "released once the base point moved to 2");
}

// Escenario 3: trigger manual en un flow nuevo con metadatos.
#[test]
fn manual_trigger_with_a_new_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = started_pool(dir.path(), chain_config(5, 2), false);
    pool.load_from_point();
    pool.db_checkpoint().expect("commit");

    let unmatched = pool.force_trigger_tasks(&["//5/a".to_string()], &["new".to_string()], Some("rerun"), false)
                        .expect("trigger");
    assert_eq!(unmatched, 0);
    pool.db_checkpoint().expect("commit");

    let a5 = pool.get_task("5/a").expect("triggered");
    assert_eq!(a5.flow_nums, FlowNums::from([2]));

    let dao = pool.db_mgr().pri_dao().expect("dao");
    let flows = dao.select_workflow_flows(&FlowNums::from([2])).expect("flows");
    let meta = flows.get(&2).expect("flow 2 recorded");
    assert_eq!(meta.description, "rerun");
    assert!(!meta.start_time.is_empty());

    succeed(&mut pool, 5, "a");
    assert_eq!(pool.get_task("5/b").expect("child").flow_nums,
               FlowNums::from([2]),
               "children spawn in flow 2 only");
}

// Escenario 4: flow-wait difiere el spawning hasta el merge.
#[test]
fn flow_wait_then_merge_spawns_retroactively() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = started_pool(dir.path(), chain_config(3, 2), false);
    let f1 = pool.get_flow(None, None);
    let f2 = pool.get_flow(None, Some("manual wait flow"));

    let itask = pool.spawn_task("a", &CyclePoint::Integer(1), FlowNums::from([f2]), true, true, true)
                    .expect("spawn with flow-wait");
    pool.add_to_pool(itask, true);
    succeed(&mut pool, 1, "a");

    assert!(pool.get_task("1/b").is_none(), "completion does not spawn while flow-waiting");

    pool.merge_flows("1/a", &FlowNums::from([f1]));
    let b1 = pool.get_task("1/b").expect("retro-spawned");
    assert_eq!(b1.flow_nums, FlowNums::from([f1, f2]));
}

// Escenario 5: restart tras un fallo; la tarea parcial vuelve al pool
// oculto y el runahead se recomputa desde la más temprana inacabada.
#[test]
fn restart_after_failure_restores_the_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = || {
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
    };

    let before: BTreeMap<String, String> = {
        let mut pool = started_pool(dir.path(), config(), false);
        pool.load_from_point();
        pool.release_queued_tasks();
        succeed(&mut pool, 1, "a");
        succeed(&mut pool, 1, "x");
        succeed(&mut pool, 1, "b");
        succeed(&mut pool, 1, "c");
        succeed(&mut pool, 2, "a");
        succeed(&mut pool, 2, "x");
        fail(&mut pool, 2, "b");
        succeed(&mut pool, 3, "a");
        pool.db_checkpoint().expect("commit");
        let map = pool.all_identities()
                      .into_iter()
                      .map(|id| {
                          let status = pool.get_task(&id).expect("listed").status.as_str().to_string();
                          (id, status)
                      })
                      .collect();
        pool.db_mgr().on_workflow_shutdown();
        map
    };

    let mut pool = started_pool(dir.path(), config(), true);
    pool.load_db_task_pool_for_restart().expect("restart");

    let after: BTreeMap<String, String> = pool.all_identities()
                                              .into_iter()
                                              .map(|id| {
                                                  let status =
                                                      pool.get_task(&id).expect("listed").status.as_str().to_string();
                                                  (id, status)
                                              })
                                              .collect();
    assert_eq!(after, before, "same identities and statuses after restart");

    assert_eq!(pool.get_task("2/b").expect("failed task reloaded").status, TaskStatus::Failed);
    assert!(pool.is_in_hidden_pool("2/c"), "partially satisfied task reloads hidden");
    // runahead desde la más temprana inacabada (2/b): 2 + 4 ciclos, acotado
    // por el punto final
    assert_eq!(pool.runahead_limit_point(), Some(&CyclePoint::Integer(3)));
}

// Escenario 6: base incompatible rechazada sin escribir nada.
#[test]
fn incompatible_database_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db");
    let mut dao = WorkflowDao::new(&path, false, true).expect("dao");
    dao.execute_sql("INSERT INTO workflow_params(key, value) VALUES ('ciclo_version', '0.2.0')")
       .expect("seed version");
    dao.close();

    let err = WorkflowDatabaseManager::check_workflow_db_compatibility(&path).unwrap_err();
    assert!(err.to_string().contains("0.2.0"), "names the offending version: {err}");
}
