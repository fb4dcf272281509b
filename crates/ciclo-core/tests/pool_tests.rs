mod common;

use common::*;

use ciclo_core::{RunaheadLimit, WorkflowConfigBuilder};
use ciclo_cycling::{CycleInterval, CyclePoint, CyclingMode};
use ciclo_domain::{FlowNums, TaskDefBuilder, TaskStatus, OUT_SUCCEEDED};

#[test]
fn cold_start_spawns_parentless_to_runahead_limit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let foo = TaskDefBuilder::new("foo").on_sequence(int_seq(1, None)).build();
    let config = WorkflowConfigBuilder::new("solo", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(foo)
        .build();
    let mut pool = make_pool_at(dir.path(), config);
    pool.load_from_point();

    // limit = 3; one extra runahead-limited instance beyond it, unreleased
    assert_eq!(pool.runahead_limit_point(), Some(&CyclePoint::Integer(3)));
    for p in 1..=3 {
        let id = format!("{p}/foo");
        let task = pool.get_task(&id).unwrap_or_else(|| panic!("{id} in pool"));
        assert!(!task.is_runahead, "{id} released");
        assert!(task.is_queued, "{id} ready and queued");
    }
    let beyond = pool.get_task("4/foo").expect("one step beyond the limit");
    assert!(beyond.is_runahead, "beyond-limit successor is not released");
    assert!(!beyond.is_queued);
    assert!(pool.get_task("5/foo").is_none());
}

#[test]
fn chain_spawns_children_and_removes_complete_parents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 5));
    pool.load_from_point();
    assert!(pool.get_task("1/a").is_some());
    assert!(pool.get_task("1/b").is_none(), "children spawn on output, not eagerly");

    pool.release_queued_tasks();
    succeed(&mut pool, 1, "a");

    assert!(pool.get_task("1/a").is_none(), "complete task removed within the cycle");
    let b1 = pool.get_task("1/b").expect("spawned by a's succeeded output");
    assert!(pool.is_in_main_pool("1/b"), "prerequisite satisfied at spawn time");
    assert!(!b1.is_runahead, "within runahead limit, released");

    succeed(&mut pool, 1, "b");
    succeed(&mut pool, 1, "c");
    assert!(pool.get_task("1/b").is_none());
    assert!(pool.get_task("1/c").is_none());
}

#[test]
fn whole_chain_drains_the_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 5));
    pool.load_from_point();
    for point in 1..=3 {
        pool.release_queued_tasks();
        succeed(&mut pool, point, "a");
        succeed(&mut pool, point, "b");
        succeed(&mut pool, point, "c");
    }
    assert!(pool.is_empty(), "final pool is empty: {:?}", pool.all_identities());
}

#[test]
fn partially_satisfied_tasks_live_in_the_hidden_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    // c depends on both b and x
    let b = TaskDefBuilder::new("b").on_sequence(int_seq(1, Some(2)))
                                    .spawns(OUT_SUCCEEDED, "c", None)
                                    .build();
    let x = TaskDefBuilder::new("x").on_sequence(int_seq(1, Some(2)))
                                    .spawns(OUT_SUCCEEDED, "c", None)
                                    .build();
    let c = TaskDefBuilder::new("c").on_sequence(int_seq(1, Some(2)))
                                    .depends_on("b", OUT_SUCCEEDED, None)
                                    .depends_on("x", OUT_SUCCEEDED, None)
                                    .build();
    let config = WorkflowConfigBuilder::new("join", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(2))
        .with_runahead_limit(RunaheadLimit::Cycles(3))
        .with_taskdef(b)
        .with_taskdef(x)
        .with_taskdef(c)
        .build();
    let mut pool = make_pool_at(dir.path(), config);
    pool.load_from_point();
    pool.release_queued_tasks();

    succeed(&mut pool, 1, "x");
    assert!(pool.is_in_hidden_pool("1/c"), "one of two prerequisites satisfied");
    let c1 = pool.get_task("1/c").expect("in hidden pool");
    assert!(!c1.prereqs_all_satisfied());

    succeed(&mut pool, 1, "b");
    assert!(pool.is_in_main_pool("1/c"), "last prerequisite satisfied promotes to main");
    assert!(pool.get_task("1/c").expect("promoted").prereqs_all_satisfied());
}

#[test]
fn duplicate_spawn_is_suppressed_after_commit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();
    pool.db_checkpoint().expect("commit");

    let again = pool.spawn_task("a", &CyclePoint::Integer(1), FlowNums::from([1]), false, false, false);
    assert!(again.is_none(), "same (name, point, flow) spawns exactly once");
}

#[test]
fn spawn_rejects_off_sequence_and_out_of_bounds_points() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();

    // beyond the final point
    assert!(pool.spawn_task("a", &CyclePoint::Integer(9), FlowNums::from([1]), false, false, false)
                .is_none());
    // unknown task
    assert!(pool.spawn_task("nope", &CyclePoint::Integer(1), FlowNums::from([1]), false, false, false)
                .is_none());
}

#[test]
fn held_future_task_spawns_held() {
    let dir = tempfile::tempdir().expect("tempdir");
    let foo = TaskDefBuilder::new("foo").on_sequence(int_seq(1, None)).build();
    let config = WorkflowConfigBuilder::new("solo", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(foo)
        .build();
    let mut pool = make_pool_at(dir.path(), config);

    // hold a future task before it exists
    assert_eq!(pool.hold_tasks(&["3/foo".to_string()]), 0);
    pool.load_from_point();

    let foo3 = pool.get_task("3/foo").expect("spawned");
    assert!(foo3.is_held, "held as requested earlier");
    assert!(!foo3.is_queued);
    let foo1 = pool.get_task("1/foo").expect("spawned");
    assert!(!foo1.is_held);

    // release re-queues it
    assert_eq!(pool.release_held_tasks(&["3/foo".to_string()]), 0);
    let foo3 = pool.get_task("3/foo").expect("still in pool");
    assert!(!foo3.is_held);
    assert!(foo3.is_queued, "ready after release");
}

#[test]
fn hold_point_holds_everything_beyond_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(5, 4));
    pool.load_from_point();
    pool.set_hold_point(CyclePoint::Integer(2));

    for id in pool.all_identities() {
        let task = pool.get_task(&id).unwrap();
        if task.point > CyclePoint::Integer(2) {
            assert!(task.is_held, "{id} beyond hold point must be held");
        }
    }
    // new spawns beyond the point are held too
    pool.release_queued_tasks();
    succeed(&mut pool, 1, "a");
    succeed(&mut pool, 1, "b");
    succeed(&mut pool, 1, "c");
    succeed(&mut pool, 2, "a");
    let b2 = pool.get_task("2/b").expect("spawned");
    assert!(!b2.is_held, "at the hold point, not beyond");
}

#[test]
fn lowering_the_stop_point_remarks_runahead() {
    let dir = tempfile::tempdir().expect("tempdir");
    let foo = TaskDefBuilder::new("foo").on_sequence(int_seq(1, None)).build();
    let config = WorkflowConfigBuilder::new("solo", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_runahead_limit(RunaheadLimit::Cycles(4))
        .with_taskdef(foo)
        .build();
    let mut pool = make_pool_at(dir.path(), config);
    pool.load_from_point();
    assert!(pool.get_task("4/foo").is_some());

    assert!(pool.set_stop_point(CyclePoint::Integer(2)));
    assert!(pool.runahead_limit_point() <= Some(&CyclePoint::Integer(2)), "limit clamped to stop point");
    for id in pool.main_identities() {
        let task = pool.get_task(&id).unwrap();
        if task.point > CyclePoint::Integer(2) && task.status == TaskStatus::Waiting {
            assert!(task.is_runahead, "{id} past the new stop point is runahead again");
            assert!(!task.is_queued);
        }
    }
    // same point again is a no-op
    assert!(!pool.set_stop_point(CyclePoint::Integer(2)));
}

#[test]
fn failed_task_with_incomplete_outputs_is_retained_and_stalls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(1, 2));
    pool.load_from_point();
    pool.release_queued_tasks();

    fail(&mut pool, 1, "a");
    let a1 = pool.get_task("1/a").expect("retained: required output succeeded incomplete");
    assert_eq!(a1.status, TaskStatus::Failed);
    assert!(!a1.is_complete());
    assert!(pool.is_stalled(), "finished-incomplete with nothing moving is a stall");
}

#[test]
fn stall_is_false_while_anything_can_move() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(1, 2));
    pool.load_from_point();
    assert!(!pool.is_stalled(), "a ready waiting task is movement");
}

#[test]
fn suicide_prerequisite_removes_the_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    // b suicides when a succeeds
    let a = TaskDefBuilder::new("a").on_sequence(int_seq(1, Some(1)))
                                    .spawns(OUT_SUCCEEDED, "b", None)
                                    .build();
    let b = TaskDefBuilder::new("b").on_sequence(int_seq(1, Some(1)))
                                    .depends_on("a", OUT_SUCCEEDED, None)
                                    .suicides_on("a", OUT_SUCCEEDED, None)
                                    .build();
    let config = WorkflowConfigBuilder::new("sui", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(1))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(a)
        .with_taskdef(b)
        .build();
    let mut pool = make_pool_at(dir.path(), config);
    pool.load_from_point();
    pool.release_queued_tasks();
    succeed(&mut pool, 1, "a");
    assert!(pool.get_task("1/b").is_none(), "suicide prerequisite satisfied removes the child");
}

#[test]
fn merge_with_same_flow_set_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();
    let before = pool.get_task("1/a").expect("present").flow_nums.clone();
    pool.merge_flows("1/a", &before.clone());
    assert_eq!(pool.get_task("1/a").expect("present").flow_nums, before);
}

#[test]
fn flow_specific_removal_strips_then_removes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    pool.load_from_point();
    let f2 = pool.get_flow(None, Some("second flow"));
    pool.merge_flows("1/a", &FlowNums::from([f2]));
    assert_eq!(pool.get_task("1/a").expect("present").flow_nums, FlowNums::from([1, f2]));

    pool.remove_tasks(&["1/a".to_string()], Some(&FlowNums::from([f2])));
    assert_eq!(pool.get_task("1/a").expect("still present").flow_nums, FlowNums::from([1]));

    pool.remove_tasks(&["1/a".to_string()], Some(&FlowNums::from([1])));
    assert!(pool.get_task("1/a").is_none(), "removing the last flow removes the task");
}

#[test]
fn no_flow_task_completions_do_not_spawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut pool = make_pool_at(dir.path(), chain_config(3, 2));
    // spawn a.1 outside all flows
    let itask = pool.spawn_task("a", &CyclePoint::Integer(1), FlowNums::new(), true, true, false)
                    .expect("forced no-flow spawn");
    pool.add_to_pool(itask, true);
    pool.release_queued_tasks();
    succeed(&mut pool, 1, "a");
    assert!(pool.get_task("1/b").is_none(), "no-flow completions never spawn children");
}

#[test]
fn expired_tasks_are_removed_with_an_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let start = ciclo_cycling::parse_point("20000101T0000Z", CyclingMode::DateTime).expect("point");
    let seq = ciclo_cycling::CycleSequence::new(start.clone(),
                                                ciclo_cycling::parse_interval("P1D", CyclingMode::DateTime).unwrap(),
                                                None).expect("sequence");
    let foo = TaskDefBuilder::new("foo").on_sequence(seq)
                                        .expires_after(CycleInterval::Duration(
                                            ciclo_cycling::interval::parse_duration("PT1H").unwrap()))
                                        .build();
    let config = WorkflowConfigBuilder::new("exp", CyclingMode::DateTime, start)
        .with_runahead_limit(RunaheadLimit::Cycles(1))
        .with_taskdef(foo)
        .build();
    let mut pool = make_pool_at(dir.path(), config);
    pool.load_from_point();
    assert!(!pool.is_empty());

    // the cycle point is far in the past: everything waiting expires
    pool.set_expired_tasks(ciclo_core::util::wallclock_seconds());
    for id in pool.all_identities() {
        let task = pool.get_task(&id).unwrap();
        assert_ne!(task.status, TaskStatus::Waiting, "{id} should have expired");
    }
}
