use ciclo_persistence::{PrereqInsert, RunDirLayout, StateQuery, TaskPoolSnapshotEntry, TaskStateUpdate,
                        TaskStatesInsert, WorkflowDatabaseManager, WorkflowDbChecker, CICLO_VERSION, KEY_UTC_MODE,
                        KEY_VERSION};

fn states_insert(name: &str, cycle: &str, status: &str) -> TaskStatesInsert {
    TaskStatesInsert { cycle: cycle.to_string(),
                       name: name.to_string(),
                       flow_nums: "[1]".to_string(),
                       time_created: "2024-01-01T00:00:00Z".to_string(),
                       time_updated: "2024-01-01T00:00:00Z".to_string(),
                       submit_num: 1,
                       status: status.to_string(),
                       flow_wait: false,
                       is_manual_submit: false,
                       is_complete: false }
}

#[test]
fn start_creates_primary_and_public_with_modes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(false).expect("start");

    assert!(layout.primary_db().is_file());
    assert!(layout.public_db().is_file());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let pri_mode = std::fs::metadata(layout.primary_db()).unwrap().permissions().mode() & 0o777;
        let pub_mode = std::fs::metadata(layout.public_db()).unwrap().permissions().mode() & 0o777;
        assert_eq!(pri_mode, 0o600, "primary is private");
        assert_eq!(pub_mode, 0o644, "public replica is world readable");
    }
}

#[test]
fn cold_start_removes_stale_primary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    {
        let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
        mgr.on_workflow_start(false).expect("first start");
        mgr.put_workflow_params_1(KEY_UTC_MODE, Some("1".into()));
        mgr.process_queued_ops().expect("write");
        mgr.on_workflow_shutdown();
    }
    // Not a restart: the old primary must be wiped.
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(false).expect("cold start");
    let value = mgr.pri_dao().unwrap().select_workflow_param(KEY_UTC_MODE).expect("select");
    assert_eq!(value, None, "stale primary removed on cold start");
}

#[test]
fn pool_snapshot_round_trips_through_restart_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(false).expect("start");

    mgr.put_workflow_params(&[(KEY_VERSION, Some(CICLO_VERSION.to_string())), (KEY_UTC_MODE, Some("1".into()))]);
    mgr.put_insert_workflow_flows(1, "2024-01-01T00:00:00Z", "original flow from first start");
    mgr.put_insert_task_states(states_insert("foo", "1", "waiting"));
    mgr.put_insert_task_outputs("1", "foo", "[1]");

    let entry = TaskPoolSnapshotEntry {
        cycle: "1".to_string(),
        name: "foo".to_string(),
        flow_nums: "[1]".to_string(),
        status: "waiting".to_string(),
        is_held: true,
        timeout: Some(12.5),
        prereqs: vec![PrereqInsert { prereq_name: "bar".to_string(),
                                     prereq_cycle: "1".to_string(),
                                     prereq_output: "succeeded".to_string(),
                                     satisfied: "0".to_string() }],
        state_update: Some(TaskStateUpdate { cycle: "1".to_string(),
                                             name: "foo".to_string(),
                                             flow_nums: "[1]".to_string(),
                                             time_updated: "2024-01-01T00:10:00Z".to_string(),
                                             submit_num: 1,
                                             status: "waiting".to_string(),
                                             is_manual_submit: false,
                                             is_complete: false }),
    };
    mgr.put_task_pool(std::slice::from_ref(&entry));
    mgr.process_queued_ops().expect("commit");

    let dao = mgr.pri_dao().unwrap();
    let rows = dao.select_task_pool_for_restart().expect("restart rows");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.name, "foo");
    assert_eq!(row.cycle, "1");
    assert_eq!(row.flow_nums, "[1]");
    assert!(row.is_held);
    assert_eq!(row.status, "waiting");
    assert_eq!(row.submit_num, 1);
    assert_eq!(row.timeout, Some(12.5));
    assert_eq!(row.outputs.as_deref(), Some("{}"));

    let prereqs = dao.select_task_prerequisites("1", "foo", "[1]").expect("prereqs");
    assert_eq!(prereqs,
               vec![("bar".to_string(), "1".to_string(), "succeeded".to_string(), "0".to_string())]);

    // A later snapshot fully replaces the pool tables.
    mgr.put_task_pool(&[]);
    mgr.process_queued_ops().expect("commit empty snapshot");
    let rows = mgr.pri_dao().unwrap().select_task_pool_for_restart().expect("restart rows");
    assert!(rows.is_empty(), "snapshot write deletes before inserting");
}

#[test]
fn public_replica_sees_committed_ops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(false).expect("start");

    mgr.put_insert_task_states(states_insert("foo", "1", "succeeded"));
    mgr.process_queued_ops().expect("commit");

    let checker = WorkflowDbChecker::new(&layout.public_db()).expect("checker on public db");
    let rows = checker.workflow_state_query(&StateQuery { task: Some("foo".into()),
                                                          selector: Some("succeeded".into()),
                                                          ..StateQuery::default() })
                      .expect("query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cycle, "1");
}

#[test]
fn tasks_to_hold_table_is_replaced_whole() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(false).expect("start");

    mgr.put_tasks_to_hold(&[("foo".to_string(), "3".to_string()), ("bar".to_string(), "4".to_string())]);
    mgr.process_queued_ops().expect("commit");
    mgr.put_tasks_to_hold(&[("foo".to_string(), "3".to_string())]);
    mgr.process_queued_ops().expect("commit replacement");

    let held = mgr.pri_dao().unwrap().select_tasks_to_hold().expect("select");
    assert_eq!(held, vec![("foo".to_string(), "3".to_string())]);
}

#[test]
fn restart_check_increments_restart_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    {
        let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
        mgr.on_workflow_start(false).expect("start");
        mgr.put_workflow_params_1(KEY_VERSION, Some(CICLO_VERSION.to_string()));
        mgr.process_queued_ops().expect("commit");
        mgr.on_workflow_shutdown();
    }
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(true).expect("restart");
    mgr.restart_check().expect("restart check");
    assert_eq!(mgr.n_restart, 1);

    let count = mgr.pri_dao().unwrap().select_workflow_params_restart_count().expect("count");
    assert_eq!(count, 1);
}
