mod common;

use common::*;

use ciclo_core::{validate_flow_opts, FLOW_NEW};
use ciclo_domain::{FlowNums, TaskStatus, OUT_SUCCEEDED};

#[test]
fn flow_numbers_are_monotonic_and_never_reused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    let f1 = pool.get_flow(None, None);
    let f2 = pool.get_flow(None, Some("second"));
    assert!(f2 > f1, "strictly increasing");

    // a manually created out-of-sequence flow is skipped by the counter
    let f9 = pool.get_flow(Some(9), Some("manual"));
    assert_eq!(f9, 9);
    let f3 = pool.get_flow(None, None);
    assert!(f3 > f2 && f3 != 9);
}

#[test]
fn known_flow_ignores_new_metadata() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    let f1 = pool.get_flow(None, Some("the original description"));
    let again = pool.get_flow(Some(f1), Some("a different description"));
    assert_eq!(again, f1);
    let meta = pool.flow_mgr().flows().get(&f1).cloned().expect("recorded");
    assert_eq!(meta.description, "the original description");
}

#[test]
fn flow_option_grammar() {
    // single keywords are fine
    validate_flow_opts(&["new".into()], None, false).expect("new");
    validate_flow_opts(&["none".into()], None, false).expect("none");
    validate_flow_opts(&["all".into()], None, false).expect("all");
    validate_flow_opts(&["2".into()], None, false).expect("integer");
    // multiple values must all be integers
    validate_flow_opts(&["1".into(), "2".into()], None, false).expect("two integers");
    assert!(validate_flow_opts(&["1".into(), "new".into()], None, false).is_err());
    // --meta only with new
    validate_flow_opts(&[FLOW_NEW.to_string()], Some("why"), false).expect("meta with new");
    assert!(validate_flow_opts(&["2".into()], Some("why"), false).is_err());
    // --wait not with new/none
    assert!(validate_flow_opts(&["new".into()], None, true).is_err());
    assert!(validate_flow_opts(&["none".into()], None, true).is_err());
    validate_flow_opts(&["2".into()], None, true).expect("wait with a concrete flow");
    // junk
    assert!(validate_flow_opts(&["-3".into()], None, false).is_err());
    assert!(validate_flow_opts(&["soon".into()], None, false).is_err());
}

#[test]
fn manual_trigger_in_a_new_flow_spawns_children_in_that_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(5, 2));
    pool.load_from_point();
    pool.db_checkpoint().expect("commit");

    // trigger //5/a --flow=new --meta="rerun"
    let unmatched = pool.force_trigger_tasks(&["5/a".to_string()], &["new".to_string()], Some("rerun"), false)
                        .expect("trigger");
    assert_eq!(unmatched, 0);

    let a5 = pool.get_task("5/a").expect("manually triggered future task");
    assert_eq!(a5.flow_nums, FlowNums::from([2]), "new flow is 2");
    assert!(a5.is_manual_submit);
    assert!(!a5.is_runahead, "manual trigger releases regardless of runahead");

    let meta = pool.flow_mgr().flows().get(&2).cloned().expect("flow recorded");
    assert_eq!(meta.description, "rerun");

    // children spawn in the new flow only
    succeed(&mut pool, 5, "a");
    let b5 = pool.get_task("5/b").expect("spawned by the new flow");
    assert_eq!(b5.flow_nums, FlowNums::from([2]));
}

#[test]
fn flow_wait_defers_spawning_until_merge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));

    // make flow 1 exist (as the original flow), then run a.1 in a new
    // flow with --wait
    let f1 = pool.get_flow(None, None);
    let f2 = pool.get_flow(None, Some("manual rerun"));
    let itask = pool.spawn_task("a", &ciclo_cycling::CyclePoint::Integer(1), FlowNums::from([f2]), true, true, true)
                    .expect("spawn with flow-wait");
    pool.add_to_pool(itask, true);

    succeed(&mut pool, 1, "a");
    assert!(pool.get_task("1/b").is_none(), "flow-wait suppresses spawning");
    let a1 = pool.get_task("1/a").expect("retained until merged");
    assert_eq!(a1.status, TaskStatus::Succeeded);
    assert!(a1.flow_wait);

    // the original flow catches up and merges
    pool.merge_flows("1/a", &FlowNums::from([f1]));
    let a1 = pool.get_task("1/a").expect("still present");
    assert!(!a1.flow_wait, "wait cleared by the merge");
    assert_eq!(a1.flow_nums, FlowNums::from([f1, f2]));

    let b1 = pool.get_task("1/b").expect("retro-spawned on the completed output");
    assert_eq!(b1.flow_nums, FlowNums::from([f1, f2]), "children carry the merged flows");
}

#[test]
fn merged_incomplete_task_is_requeued_to_waiting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(1, 2));
    pool.load_from_point();
    pool.release_queued_tasks();
    fail(&mut pool, 1, "a");
    assert_eq!(pool.get_task("1/a").expect("retained").status, TaskStatus::Failed);

    let f2 = pool.get_flow(None, Some("retry flow"));
    pool.merge_flows("1/a", &FlowNums::from([f2]));
    let a1 = pool.get_task("1/a").expect("absorbed");
    assert_eq!(a1.status, TaskStatus::Waiting, "incomplete task re-queued by the new flow");
    assert_eq!(a1.flow_nums, FlowNums::from([1, f2]));
    assert!(a1.is_queued);
}

#[test]
fn set_outputs_force_completes_and_spawns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();

    let unmatched = pool.set_outputs(&["1/a".to_string()], &[OUT_SUCCEEDED.to_string()], None);
    assert_eq!(unmatched, 0);
    assert!(pool.get_task("1/a").expect("still pooled; forced completion does not remove")
                .outputs
                .is_completed(OUT_SUCCEEDED));
    assert!(pool.get_task("1/b").is_some(), "children spawned by the forced output");
}
