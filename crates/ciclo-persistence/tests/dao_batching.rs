use rusqlite::types::Value as SqlValue;

use ciclo_persistence::schema::{TABLE_TASK_EVENTS, TABLE_WORKFLOW_PARAMS};
use ciclo_persistence::WorkflowDao;

fn t(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn i(n: i64) -> SqlValue {
    SqlValue::Integer(n)
}

#[test]
fn queued_items_commit_in_delete_insert_update_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db");
    let mut dao = WorkflowDao::new(&path, false, true).expect("create dao");

    // A full-table delete queued AFTER the insert must still run first:
    // the surviving row is the inserted one.
    dao.add_insert_item(TABLE_WORKFLOW_PARAMS, &[("key", t("uuid_str")), ("value", t("abc"))]);
    dao.add_delete_item(TABLE_WORKFLOW_PARAMS, &[]);
    // And an update queued before execute applies on top of the insert.
    dao.add_update_item(TABLE_WORKFLOW_PARAMS, &[("value", t("xyz"))], &[("key", t("uuid_str"))]);
    assert!(dao.has_queued_items());

    dao.execute_queued_items().expect("execute");
    assert!(!dao.has_queued_items(), "queues cleared on success");

    let value = dao.select_workflow_param("uuid_str").expect("select");
    assert_eq!(value.as_deref(), Some("xyz"));
}

#[test]
fn insert_args_are_padded_with_null() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db");
    let mut dao = WorkflowDao::new(&path, false, true).expect("create dao");

    // task_events has six columns; only three provided.
    dao.add_insert_item(TABLE_TASK_EVENTS, &[("name", t("foo")), ("cycle", t("1")), ("event", t("held"))]);
    dao.execute_queued_items().expect("execute");
    // Row exists and the unset message column is NULL.
    let conn = WorkflowDao::connect_read_only(&path, std::time::Duration::from_secs(1)).expect("ro conn");
    let (event, message): (String, Option<String>) =
        conn.query_row("SELECT event, message FROM task_events WHERE name=='foo'", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .expect("row");
    assert_eq!(event, "held");
    assert_eq!(message, None);
}

#[test]
fn public_dao_counts_retries_instead_of_failing() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Parent directory does not exist: open must fail.
    let path = dir.path().join("missing").join("db");
    let mut dao = WorkflowDao::new(&path, true, false).expect("public dao without tables");
    dao.add_insert_item(TABLE_WORKFLOW_PARAMS, &[("key", t("k")), ("value", t("v"))]);

    dao.execute_queued_items().expect("public write failure is not fatal");
    assert_eq!(dao.n_tries, 1);
    dao.execute_queued_items().expect("still not fatal");
    assert_eq!(dao.n_tries, 2, "consecutive failures accumulate");
}

#[test]
fn primary_dao_failure_is_fatal_and_rolls_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db");
    let mut dao = WorkflowDao::new(&path, false, true).expect("create dao");

    dao.add_insert_item(TABLE_WORKFLOW_PARAMS, &[("key", t("k")), ("value", t("v"))]);
    // A statement against a column that does not exist poisons the batch.
    dao.add_update_item(TABLE_WORKFLOW_PARAMS, &[("no_such_column", i(1))], &[]);

    assert!(dao.execute_queued_items().is_err(), "primary failure propagates");

    // The whole transaction rolled back: the valid insert is not visible.
    let value = dao.select_workflow_param("k").expect("select");
    assert_eq!(value, None, "crash between staging and commit leaves the DB unchanged");
}
