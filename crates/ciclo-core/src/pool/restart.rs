//! Restauración del pool vivo desde la base primaria (restart).
//!
//! Cada fila del join de restart reconstituye un proxy: estado, banderas,
//! plataforma y tiempos del último job, replay de outputs completados y
//! sobrescritura de la satisfacción de prerequisitos por clave. Todas las
//! instancias cargan como runahead-limitadas; las terminales y las de
//! submit manual se liberan de inmediato.

use log::{info, warn};
use std::collections::BTreeMap;

use ciclo_cycling::parse_point;
use ciclo_domain::{deserialise_flow_nums, FlowNums, PlatformLookupError, PrereqKey, PrereqState, TaskStatus,
                   WorkflowError};
use ciclo_persistence::{PersistenceError, TaskPoolRestartRow};

use super::TaskPool;
use crate::proxy::TaskProxy;

impl TaskPool {
    /// Restaura el pool completo y el estado auxiliar desde la base.
    pub fn load_db_task_pool_for_restart(&mut self) -> Result<(), WorkflowError> {
        let rows = self.db_mgr
                       .pri_dao()
                       .and_then(|dao| dao.select_task_pool_for_restart())
                       .map_err(db_err)?;

        // Si alguna fila referencia una plataforma desconocida, juntarlas
        // todas y abortar el arranque con la lista completa.
        let mut missing: Vec<String> = Vec::new();
        for row in &rows {
            if let Some(platform) = &row.platform_name {
                if !platform.is_empty()
                   && !self.config.platforms.iter().any(|p| p == platform)
                   && !missing.contains(platform)
                {
                    missing.push(platform.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Err(PlatformLookupError { platforms: missing }.into());
        }

        info!("LOADING task proxies");
        for row in &rows {
            self.load_restart_row(row)?;
        }

        self.compute_runahead(true);
        self.release_runahead_tasks();
        self.update_flow_mgr()?;
        self.load_abs_outputs_for_restart().map_err(db_err)?;
        self.load_db_tasks_to_hold().map_err(db_err)?;
        self.load_db_task_action_timers().map_err(db_err)?;
        self.load_xtriggers_for_restart().map_err(db_err)?;
        self.load_task_run_times().map_err(db_err)?;
        Ok(())
    }

    fn load_restart_row(&mut self, row: &TaskPoolRestartRow) -> Result<(), WorkflowError> {
        let tdef = match self.config.get_taskdef(&row.name) {
            Ok(tdef) => tdef,
            Err(_) => {
                warn!("ignoring task {} from the workflow run database \
                       (its task definition has probably been deleted)",
                      row.name);
                return Ok(());
            }
        };
        let point = match parse_point(&row.cycle, self.config.cycling_mode) {
            Ok(point) => point,
            Err(err) => {
                warn!("could not load task {}/{}: {err}", row.cycle, row.name);
                return Ok(());
            }
        };
        let mut status = match TaskStatus::parse(&row.status) {
            Ok(status) => status,
            Err(err) => {
                warn!("could not load task {}/{}: {err}", row.cycle, row.name);
                return Ok(());
            }
        };

        let flow_nums = deserialise_flow_nums(&row.flow_nums);
        let initial = self.config.initial_point.clone();
        let mut itask = TaskProxy::new(tdef,
                                       point,
                                       flow_nums,
                                       row.submit_num,
                                       row.is_manual_submit,
                                       row.flow_wait,
                                       &initial);
        itask.is_held = row.is_held;
        itask.is_late = row.is_late;
        itask.try_num = row.try_num.unwrap_or(1).max(1);

        match status {
            TaskStatus::Submitted | TaskStatus::Running | TaskStatus::Failed | TaskStatus::Succeeded => {
                itask.platform = row.platform_name.clone();
                itask.time_submit = row.time_submit.clone();
                itask.time_run = row.time_run.clone();
                itask.timeout = row.timeout;
            }
            TaskStatus::Preparing => {
                // Se vuelve a preparar la misma submission.
                status = TaskStatus::Waiting;
                itask.submit_num -= 1;
            }
            _ => {}
        }

        if matches!(status, TaskStatus::Running | TaskStatus::Failed | TaskStatus::Succeeded) {
            if let Some(outputs_json) = &row.outputs {
                let map: BTreeMap<String, String> = serde_json::from_str(outputs_json).unwrap_or_default();
                for label in map.keys() {
                    itask.outputs.set_completed(label);
                }
            }
        }

        itask.status = status;
        itask.is_runahead = true;

        // Satisfacción de prerequisitos: sobrescribe por clave exacta; las
        // claves desconocidas quedan en su valor por defecto.
        let prereq_rows = self.db_mgr
                              .pri_dao()
                              .and_then(|dao| dao.select_task_prerequisites(&row.cycle, &row.name, &row.flow_nums))
                              .map_err(db_err)?;
        for (p_name, p_cycle, p_output, satisfied) in prereq_rows {
            let Ok(p_point) = parse_point(&p_cycle, self.config.cycling_mode) else {
                continue;
            };
            let key = PrereqKey::new(p_point, &p_name, &p_output);
            itask.prerequisites.set_state(&key, PrereqState::from_db_str(&satisfied));
        }

        info!("+ {}/{} {}{}",
              row.cycle,
              row.name,
              status,
              if row.is_held { " (held)" } else { "" });

        let release_now = status.is_final() || itask.is_manual_submit;
        let identity = self.add_to_pool(itask, false);
        if release_now {
            self.rh_release_and_queue(&identity);
        }
        Ok(())
    }

    /// Alimenta el flow manager con los flows observados en el pool.
    pub fn update_flow_mgr(&mut self) -> Result<(), WorkflowError> {
        let mut seen = FlowNums::new();
        for task in self.hidden_pool.values().chain(self.main_pool.values()).flat_map(|m| m.values()) {
            seen.extend(task.flow_nums.iter().copied());
        }
        let Self { flow_mgr, db_mgr, .. } = self;
        flow_mgr.load_from_db(db_mgr, &seen).map_err(db_err)
    }

    fn load_abs_outputs_for_restart(&mut self) -> Result<(), PersistenceError> {
        let rows = self.db_mgr.pri_dao()?.select_abs_outputs_for_restart()?;
        for (cycle, name, output) in rows {
            self.abs_outputs_done.insert((cycle, name, output));
        }
        Ok(())
    }

    fn load_db_tasks_to_hold(&mut self) -> Result<(), PersistenceError> {
        let rows = self.db_mgr.pri_dao()?.select_tasks_to_hold()?;
        for (name, cycle) in rows {
            if let Ok(point) = parse_point(&cycle, self.config.cycling_mode) {
                self.tasks_to_hold.insert((name, point));
            }
        }
        Ok(())
    }

    fn load_db_task_action_timers(&mut self) -> Result<(), PersistenceError> {
        self.action_timers = self.db_mgr.pri_dao()?.select_task_action_timers()?;
        Ok(())
    }

    fn load_xtriggers_for_restart(&mut self) -> Result<(), PersistenceError> {
        let rows = self.db_mgr.pri_dao()?.select_xtriggers_for_restart()?;
        for (signature, results) in rows {
            self.xtriggers_satisfied.insert(signature, results);
        }
        Ok(())
    }

    // Promedio de tiempos de corrida exitosos por tarea, para estimaciones
    // de tiempo transcurrido.
    fn load_task_run_times(&mut self) -> Result<(), PersistenceError> {
        let rows = self.db_mgr.pri_dao()?.select_task_job_run_times()?;
        for (name, csv) in rows {
            let times: Vec<f64> = csv.split(',').filter_map(|t| t.trim().parse().ok()).collect();
            if !times.is_empty() {
                let mean = times.iter().sum::<f64>() / times.len() as f64;
                self.mean_elapsed_times.insert(name, mean);
            }
        }
        Ok(())
    }

    pub fn mean_elapsed_time(&self, name: &str) -> Option<f64> {
        self.mean_elapsed_times.get(name).copied()
    }

    pub fn action_timers(&self) -> &[ciclo_persistence::TaskActionTimerRow] {
        &self.action_timers
    }

    pub fn xtriggers_satisfied(&self) -> &indexmap::IndexMap<String, String> {
        &self.xtriggers_satisfied
    }

    pub fn abs_outputs_done(&self) -> &std::collections::BTreeSet<(String, String, String)> {
        &self.abs_outputs_done
    }
}

fn db_err(err: PersistenceError) -> WorkflowError {
    WorkflowError::Other(err.to_string())
}
