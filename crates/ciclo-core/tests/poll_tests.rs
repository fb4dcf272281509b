mod common;

use common::*;

use ciclo_core::{PollChecker, Poller, WorkflowStatePoller};
use ciclo_domain::WorkflowError;
use ciclo_persistence::{RunDirLayout, StateQuery};

struct CountingChecker {
    calls: u32,
    succeed_on: Option<u32>,
}

impl PollChecker for CountingChecker {
    fn condition(&self) -> String {
        "counting".to_string()
    }

    fn check(&mut self) -> Result<bool, WorkflowError> {
        self.calls += 1;
        Ok(self.succeed_on == Some(self.calls))
    }
}

#[test]
fn zero_polls_is_an_input_error() {
    let mut poller = Poller::new(0, 0);
    let mut checker = CountingChecker { calls: 0, succeed_on: None };
    let err = poller.poll(&mut checker).unwrap_err();
    assert!(matches!(err, WorkflowError::Input(_)));
    assert_eq!(checker.calls, 0, "nothing to do");
}

#[test]
fn single_poll_is_a_one_shot_check() {
    let mut poller = Poller::new(60, 1);
    let mut checker = CountingChecker { calls: 0, succeed_on: None };
    assert!(!poller.poll(&mut checker).expect("no error"));
    assert_eq!(checker.calls, 1, "exactly one check, no sleeping");
}

#[test]
fn poll_stops_at_first_success() {
    let mut poller = Poller::new(0, 10);
    let mut checker = CountingChecker { calls: 0, succeed_on: Some(3) };
    assert!(poller.poll(&mut checker).expect("no error"));
    assert_eq!(checker.calls, 3);
}

#[test]
fn exhausted_poll_returns_false() {
    let mut poller = Poller::new(0, 4);
    let mut checker = CountingChecker { calls: 0, succeed_on: None };
    assert!(!poller.poll(&mut checker).expect("no error"));
    assert_eq!(checker.calls, 4);
}

#[test]
fn workflow_state_poller_sees_the_public_db() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = RunDirLayout::new(dir.path());
    let mut pool = make_pool_at(dir.path(), chain_config(2, 3));
    pool.load_from_point();
    pool.release_queued_tasks();
    succeed(&mut pool, 1, "a");
    pool.db_checkpoint().expect("commit");

    let query = StateQuery { task: Some("a".to_string()),
                             cycle: Some("1".to_string()),
                             selector: Some("succeeded".to_string()),
                             ..StateQuery::default() };
    let mut checker = WorkflowStatePoller::new(layout.public_db(), query, None);
    let mut poller = Poller::new(0, 2);
    assert!(poller.poll(&mut checker).expect("no error"), "condition already met");

    // a condition that is not met exhausts instead
    let query = StateQuery { task: Some("zz".to_string()),
                             ..StateQuery::default() };
    let mut checker = WorkflowStatePoller::new(layout.public_db(), query, None);
    let mut poller = Poller::new(0, 2);
    assert!(!poller.poll(&mut checker).expect("no error"));
}

#[test]
fn missing_db_counts_as_condition_not_met() {
    let dir = tempfile::tempdir().expect("tempdir");
    let query = StateQuery { task: Some("a".to_string()),
                             ..StateQuery::default() };
    let mut checker = WorkflowStatePoller::new(dir.path().join("log").join("db"), query, None);
    let mut poller = Poller::new(0, 1);
    assert!(!poller.poll(&mut checker).expect("workflow may not have started yet"));
}
