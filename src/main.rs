//! Demo del kernel: una cadena lineal `prep => sim => post` en ciclado
//! entero, corrida a completitud con persistencia real y consultada al
//! final por el checker de la réplica pública.

use ciclo_core::{RunaheadLimit, TaskPool, WorkflowConfigBuilder};
use ciclo_cycling::{CycleInterval, CyclePoint, CycleSequence, CyclingMode};
use ciclo_domain::{TaskDefBuilder, OUT_FAILED, OUT_STARTED, OUT_SUBMITTED, OUT_SUCCEEDED};
use ciclo_persistence::{RunDirLayout, StateQuery, WorkflowDatabaseManager, WorkflowDbChecker, CICLO_VERSION,
                        KEY_PAUSED, KEY_UTC_MODE, KEY_UUID_STR, KEY_VERSION};
use uuid::Uuid;

fn int_seq(start: i64, stop: i64) -> CycleSequence {
    CycleSequence::new(CyclePoint::Integer(start),
                       CycleInterval::Integer(1),
                       Some(CyclePoint::Integer(stop))).expect("sequence")
}

fn main() {
    println!("🚀 cicloflow demo");
    println!("=================");

    let stop = 3;
    let prep = TaskDefBuilder::new("prep").on_sequence(int_seq(1, stop))
                                          .spawns(OUT_SUCCEEDED, "sim", None)
                                          .build();
    let sim = TaskDefBuilder::new("sim").on_sequence(int_seq(1, stop))
                                        .depends_on("prep", OUT_SUCCEEDED, None)
                                        .spawns(OUT_SUCCEEDED, "post", None)
                                        .build();
    let post = TaskDefBuilder::new("post").on_sequence(int_seq(1, stop))
                                          .depends_on("sim", OUT_SUCCEEDED, None)
                                          .build();
    let config = WorkflowConfigBuilder::new("demo-chain", CyclingMode::Integer, CyclePoint::Integer(1))
        .with_final_point(CyclePoint::Integer(stop))
        .with_runahead_limit(RunaheadLimit::Cycles(2))
        .with_taskdef(prep)
        .with_taskdef(sim)
        .with_taskdef(post)
        .build();

    let layout = RunDirLayout::from_env("demo-chain");
    println!("run dir: {}", layout.run_dir.display());

    let mut db_mgr = WorkflowDatabaseManager::from_layout(&layout);
    if let Err(err) = db_mgr.on_workflow_start(false) {
        eprintln!("❌ could not initialise the workflow database: {err}");
        std::process::exit(1);
    }
    db_mgr.put_workflow_params(&[(KEY_UUID_STR, Some(Uuid::new_v4().to_string())),
                                 (KEY_VERSION, Some(CICLO_VERSION.to_string())),
                                 (KEY_UTC_MODE, Some("1".to_string())),
                                 (KEY_PAUSED, Some("0".to_string()))]);

    let mut pool = TaskPool::new(config, db_mgr);
    pool.load_from_point();

    // Lazo del scheduler, con el "submitter" simulado en línea: cada tarea
    // liberada corre y tiene éxito de inmediato.
    let mut iterations = 0;
    while !pool.is_empty() && iterations < 100 {
        iterations += 1;
        let released = pool.release_queued_tasks();
        for identity in released {
            let Some((cycle, name)) = split_identity(&identity) else { continue };
            let point = CyclePoint::Integer(cycle);
            pool.report_output(&point, &name, OUT_SUBMITTED);
            pool.report_output(&point, &name, OUT_STARTED);
            pool.report_output(&point, &name, OUT_SUCCEEDED);
            println!("  ✔ {identity} succeeded");
        }
        if let Err(err) = pool.db_checkpoint() {
            eprintln!("❌ database write failed: {err}");
            std::process::exit(1);
        }
        if pool.is_stalled() {
            eprintln!("❌ workflow stalled");
            std::process::exit(1);
        }
    }

    println!("pool drained after {iterations} scheduler cycles");

    // Consulta final sobre la réplica pública.
    match WorkflowDbChecker::new(&layout.public_db()) {
        Ok(checker) => {
            let query = StateQuery { selector: Some(OUT_SUCCEEDED.to_string()),
                                     ..StateQuery::default() };
            match checker.workflow_state_query(&query) {
                Ok(rows) => {
                    println!("✅ {} succeeded task instances on record:", rows.len());
                    for row in rows {
                        println!("   {}/{}: {}", row.cycle, row.name, row.result);
                    }
                }
                Err(err) => eprintln!("❌ state query failed: {err}"),
            }
            let _ = checker.workflow_state_query(&StateQuery { selector: Some(OUT_FAILED.to_string()),
                                                               ..StateQuery::default() })
                           .map(|rows| {
                               if !rows.is_empty() {
                                   eprintln!("⚠ {} failed instances on record", rows.len());
                               }
                           });
        }
        Err(err) => eprintln!("❌ could not open the public database: {err}"),
    }
}

fn split_identity(identity: &str) -> Option<(i64, String)> {
    let (cycle, name) = identity.split_once('/')?;
    Some((cycle.parse().ok()?, name.to_string()))
}
