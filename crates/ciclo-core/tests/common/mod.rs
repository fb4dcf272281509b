#![allow(dead_code)]

use std::path::Path;

use ciclo_core::{RunaheadLimit, TaskPool, WorkflowConfig, WorkflowConfigBuilder};
use ciclo_cycling::{CycleInterval, CyclePoint, CycleSequence, CyclingMode};
use ciclo_domain::{TaskDefBuilder, OUT_FAILED, OUT_STARTED, OUT_SUBMITTED, OUT_SUCCEEDED};
use ciclo_persistence::{RunDirLayout, WorkflowDatabaseManager};

pub fn int_seq(start: i64, stop: Option<i64>) -> CycleSequence {
    CycleSequence::new(CyclePoint::Integer(start),
                       CycleInterval::Integer(1),
                       stop.map(CyclePoint::Integer)).expect("sequence")
}

pub fn make_pool_at(dir: &Path, config: WorkflowConfig) -> TaskPool {
    let layout = RunDirLayout::new(dir);
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(false).expect("db start");
    TaskPool::new(config, mgr)
}

pub fn restarted_pool_at(dir: &Path, config: WorkflowConfig) -> TaskPool {
    let layout = RunDirLayout::new(dir);
    let mut mgr = WorkflowDatabaseManager::from_layout(&layout);
    mgr.on_workflow_start(true).expect("db restart");
    TaskPool::new(config, mgr)
}

/// Grafo lineal `a => b => c` en ciclado entero, de 1 a `stop`.
pub fn chain_config(stop: i64, runahead: i64) -> WorkflowConfig {
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

/// Conduce una instancia por submitted → started → el output final dado.
pub fn drive(pool: &mut TaskPool, point: i64, name: &str, last_output: &str) {
    let point = CyclePoint::Integer(point);
    pool.report_output(&point, name, OUT_SUBMITTED);
    pool.report_output(&point, name, OUT_STARTED);
    pool.report_output(&point, name, last_output);
}

pub fn succeed(pool: &mut TaskPool, point: i64, name: &str) {
    drive(pool, point, name, OUT_SUCCEEDED);
}

pub fn fail(pool: &mut TaskPool, point: i64, name: &str) {
    drive(pool, point, name, OUT_FAILED);
}
