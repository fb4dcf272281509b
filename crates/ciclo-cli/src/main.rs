//! ciclo-cli: consultas de estado y timings de un workflow
//!
//! Forma mínima del comando workflow-state contra la réplica pública:
//!
//! ```text
//! ciclo-cli workflow-state <run-dir> [ID] [opciones]
//!   ID                  cycle/task, task.cycle o //cycle/task (globs ok)
//!   --status=S          estado a esperar (finished expande a
//!                       succeeded|failed)
//!   --message=M         mensaje de output a esperar
//!   --output=O          label de output a esperar
//!   --offset=P          offset sobre el punto (p.ej. -PT6H, +2)
//!   --flow=N            limitar a un flow
//!   --max-polls=N       default 10
//!   --interval=SECS     default 60
//! ```
//!
//! Sale con 0 si la condición se cumplió, 1 si se agotaron los polls o los
//! argumentos eran inválidos.
//!
//! `ciclo-cli report-timings <run-dir>` vuelca los tiempos de
//! submit/arranque/fin de los jobs exitosos registrados en la réplica.

use std::process::ExitCode;

use ciclo_core::{PollChecker, Poller, WorkflowStatePoller};
use ciclo_domain::Tokens;
use ciclo_persistence::{RunDirLayout, StateQuery, WorkflowDbChecker};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("workflow-state") => workflow_state(&args[1..]),
        Some("report-timings") => report_timings(&args[1..]),
        _ => {
            eprintln!("usage: ciclo-cli workflow-state <run-dir> [ID] [options]\n       \
                       ciclo-cli report-timings <run-dir>");
            ExitCode::FAILURE
        }
    }
}

fn report_timings(args: &[String]) -> ExitCode {
    let Some(run_dir) = args.first() else {
        eprintln!("a workflow run directory is required");
        return ExitCode::FAILURE;
    };
    let layout = RunDirLayout::new(run_dir);
    let checker = match WorkflowDbChecker::new(&layout.public_db()) {
        Ok(checker) => checker,
        Err(err) => {
            eprintln!("could not open the public database: {err}");
            return ExitCode::FAILURE;
        }
    };
    match checker.select_task_times() {
        Ok(rows) => {
            println!("name\tcycle\tplatform\tsubmit\tstart\tfinish");
            for row in rows {
                println!("{}\t{}\t{}\t{}\t{}\t{}",
                         row.name,
                         row.cycle,
                         row.platform_name.unwrap_or_default(),
                         row.time_submit.unwrap_or_default(),
                         row.time_run.unwrap_or_default(),
                         row.time_run_exit.unwrap_or_default());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("timings query failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn workflow_state(args: &[String]) -> ExitCode {
    let mut run_dir: Option<String> = None;
    let mut id: Option<String> = None;
    let mut query = StateQuery::default();
    let mut offset: Option<String> = None;
    let mut max_polls: u32 = 10;
    let mut interval: u64 = 60;

    for arg in args {
        if let Some(value) = arg.strip_prefix("--status=") {
            query.selector = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--message=") {
            query.selector = Some(value.to_string());
            query.is_message = true;
        } else if let Some(value) = arg.strip_prefix("--output=") {
            query.selector = Some(value.to_string());
            query.is_output = true;
        } else if let Some(value) = arg.strip_prefix("--offset=") {
            offset = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--flow=") {
            match value.parse() {
                Ok(n) => query.flow_num = Some(n),
                Err(_) => {
                    eprintln!("invalid --flow: {value}");
                    return ExitCode::FAILURE;
                }
            }
        } else if let Some(value) = arg.strip_prefix("--max-polls=") {
            match value.parse() {
                Ok(n) => max_polls = n,
                Err(_) => {
                    eprintln!("max-polls must be an integer");
                    return ExitCode::FAILURE;
                }
            }
        } else if let Some(value) = arg.strip_prefix("--interval=") {
            match value.parse() {
                Ok(n) => interval = n,
                Err(_) => {
                    eprintln!("interval must be an integer");
                    return ExitCode::FAILURE;
                }
            }
        } else if arg.starts_with("--") {
            eprintln!("unknown option: {arg}");
            return ExitCode::FAILURE;
        } else if run_dir.is_none() {
            run_dir = Some(arg.clone());
        } else if id.is_none() {
            id = Some(arg.clone());
        } else {
            eprintln!("unexpected argument: {arg}");
            return ExitCode::FAILURE;
        }
    }

    let Some(run_dir) = run_dir else {
        eprintln!("a workflow run directory is required");
        return ExitCode::FAILURE;
    };
    if query.is_output && query.is_message {
        eprintln!("cannot poll both an output and a message");
        return ExitCode::FAILURE;
    }

    if let Some(id) = id {
        match Tokens::parse(&id) {
            Ok(tokens) => {
                query.cycle = tokens.cycle;
                query.task = tokens.task;
                if query.selector.is_none() {
                    query.selector = tokens.task_selector;
                }
            }
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }

    let layout = RunDirLayout::new(&run_dir);
    let mut checker = WorkflowStatePoller::new(layout.public_db(), query, offset);
    let condition = checker.condition();
    let mut poller = Poller::new(interval, max_polls);
    match poller.poll(&mut checker) {
        Ok(true) => {
            println!("condition met: {condition}");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("condition not satisfied: {condition}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
