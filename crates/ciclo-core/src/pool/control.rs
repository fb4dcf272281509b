//! Operaciones de control del pool: hold/release, stop, stall, expiración,
//! triggers manuales y el snapshot de fin de ciclo.

use log::{info, warn};

use ciclo_cycling::{parse_point, CyclePoint};
use ciclo_domain::{FlowNums, InputError, TaskStatus, Tokens, OUT_EXPIRED, OUT_SUCCEEDED};
use ciclo_persistence::manager::PrereqInsert;
use ciclo_persistence::{PersistenceError, TaskPoolSnapshotEntry, TaskStateUpdate};

use super::{StopMode, TaskPool};
use crate::flow::{validate_flow_opts, FLOW_ALL};
use crate::util::now_time_string;

impl TaskPool {
    // ----- hold / release -----------------------------------------------

    /// Hold de una instancia activa del pool.
    pub fn hold_active_task(&mut self, identity: &str) {
        let (event, pair) = {
            let Some(task) = self.proxy_mut(identity) else { return };
            let changed = !task.is_held;
            task.is_held = true;
            let pair = (task.name().to_string(), task.point.clone());
            (changed.then(|| task.clone()), pair)
        };
        self.tasks_to_hold.insert(pair);
        if let Some(task) = event {
            self.push_task_event(&task, "held", "");
        }
        self.persist_tasks_to_hold();
    }

    /// Inversa simétrica de `hold_active_task`; re-encola si quedó lista.
    pub fn release_held_active_task(&mut self, identity: &str) {
        let (released, ready, pair) = {
            let Some(task) = self.proxy_mut(identity) else { return };
            let changed = task.is_held;
            task.is_held = false;
            let pair = (task.name().to_string(), task.point.clone());
            let ready = !task.is_runahead && task.is_ready_to_run();
            (changed.then(|| task.clone()), ready, pair)
        };
        self.tasks_to_hold.remove(&pair);
        if ready {
            self.queue_task(identity);
        }
        if let Some(task) = released {
            self.push_task_event(&task, "released", "");
        }
        self.persist_tasks_to_hold();
    }

    /// Hold por lista de ids o globs. Devuelve la cantidad de ítems sin
    /// match (activos y futuros se procesan igual).
    pub fn hold_tasks(&mut self, items: &[String]) -> usize {
        let (matched, future, unmatched) = self.filter_task_proxies(items, true);
        for identity in matched {
            self.hold_active_task(&identity);
        }
        for pair in future {
            self.tasks_to_hold.insert(pair);
        }
        self.persist_tasks_to_hold();
        unmatched.len()
    }

    pub fn release_held_tasks(&mut self, items: &[String]) -> usize {
        let (matched, future, unmatched) = self.filter_task_proxies(items, true);
        for identity in matched {
            self.release_held_active_task(&identity);
        }
        for pair in future {
            self.tasks_to_hold.remove(&pair);
        }
        self.persist_tasks_to_hold();
        unmatched.len()
    }

    /// Todo punto posterior al hold point queda retenido.
    pub fn set_hold_point(&mut self, point: CyclePoint) {
        self.hold_point = Some(point.clone());
        let beyond: Vec<String> = self.all_identities()
                                      .into_iter()
                                      .filter(|id| self.get_task(id).map(|t| t.point > point).unwrap_or(false))
                                      .collect();
        for identity in beyond {
            self.hold_active_task(&identity);
        }
        self.db_mgr.put_workflow_hold_point(Some(point.to_string()));
    }

    pub fn release_hold_point(&mut self) {
        self.hold_point = None;
        for identity in self.all_identities() {
            self.release_held_active_task(&identity);
        }
        self.tasks_to_hold.clear();
        self.persist_tasks_to_hold();
        self.db_mgr.put_workflow_hold_point(None);
    }

    // ----- stop ---------------------------------------------------------

    /// Fija (o baja) el stop point. Bajarlo re-marca como runahead las
    /// tareas waiting más allá del punto; los jobs en vuelo no se tocan.
    pub fn set_stop_point(&mut self, point: CyclePoint) -> bool {
        if self.stop_point.as_ref() == Some(&point) {
            return false;
        }
        info!("Setting stop cycle point: {point}");
        self.stop_point = Some(point.clone());
        self.db_mgr.put_workflow_stop_point(Some(point.to_string()));
        self.compute_runahead(true);
        let beyond: Vec<String> = self.main_identities()
                                      .into_iter()
                                      .filter(|id| {
                                          self.get_task(id)
                                              .map(|t| t.status == TaskStatus::Waiting && t.point > point)
                                              .unwrap_or(false)
                                      })
                                      .collect();
        for identity in beyond {
            if let Some(task) = self.proxy_mut(&identity) {
                task.is_runahead = true;
                task.is_queued = false;
            }
            self.queue_mgr.remove_task(&identity);
        }
        true
    }

    /// Registra una tarea centinela: al removerse por completitud, el
    /// scheduler puede parar.
    pub fn set_stop_task(&mut self, relative_id: &str) {
        info!("Setting stop task: {relative_id}");
        self.stop_task_id = Some(relative_id.to_string());
        self.db_mgr.put_workflow_stop_task(Some(relative_id.to_string()));
    }

    /// Consulta-y-limpia la bandera de stop task terminada.
    pub fn stop_task_done(&mut self) -> bool {
        if self.stop_task_finished {
            info!("Stop task {} finished", self.stop_task_id.as_deref().unwrap_or("?"));
            self.stop_task_id = None;
            self.stop_task_finished = false;
            self.db_mgr.put_workflow_stop_task(None);
            return true;
        }
        false
    }

    /// ¿Puede el scheduler parar ya en el modo pedido?
    pub fn can_stop(&self, mode: StopMode) -> bool {
        if mode == StopMode::RequestNowNow {
            return true;
        }
        !self.main_pool
             .values()
             .flat_map(|m| m.values())
             .any(|t| t.status.is_active() && !t.kill_failed)
    }

    // ----- expiración ---------------------------------------------------

    /// Expira tareas waiting no retenidas cuyo instante de expiración pasó.
    /// Sólo aplica a ciclado datetime (los puntos enteros no tienen reloj).
    pub fn set_expired_tasks(&mut self, now_epoch: i64) {
        let candidates: Vec<(String, CyclePoint, String)> =
            self.main_pool
                .values()
                .flat_map(|m| m.values())
                .filter(|t| t.status == TaskStatus::Waiting && !t.is_held)
                .filter_map(|t| {
                    let offset = t.tdef.expiration_offset.as_ref()?;
                    let point_sec = t.point.epoch_seconds()?;
                    let expire_time = point_sec + offset.nominal_seconds();
                    (now_epoch >= expire_time).then(|| (t.identity(), t.point.clone(), t.name().to_string()))
                })
                .collect();
        let mut any = false;
        for (identity, point, name) in candidates {
            warn!("[{identity}] task expired (skipping job submission)");
            let snapshot = {
                let Some(task) = self.proxy_mut(&identity) else { continue };
                task.outputs.set_completed(OUT_EXPIRED);
                task.state_reset(TaskStatus::Expired);
                task.clone()
            };
            self.push_task_event(&snapshot, "expired", "skipping job submission");
            // Hijos del output expired, si el grafo los define; sin el
            // remove automático (lo hacemos explícito debajo).
            self.spawn_on_output(&point, &name, OUT_EXPIRED, true);
            self.remove(&identity, "expired");
            any = true;
        }
        if any && self.compute_runahead(false) {
            self.release_runahead_tasks();
        }
    }

    // ----- stall --------------------------------------------------------

    /// Estancado: nada preparando/activo ni waiting liberada, y quedan
    /// tareas incompletas o prerequisitos parcialmente satisfechos.
    pub fn is_stalled(&self) -> bool {
        let any_movement = self.main_pool.values().flat_map(|m| m.values()).any(|t| {
                                                                                t.status.is_active()
                                                                                || (t.status == TaskStatus::Waiting
                                                                                    && !t.is_runahead)
                                                                            });
        if any_movement {
            return false;
        }
        let incomplete = self.log_incomplete_tasks();
        let unsatisfied = self.log_unsatisfied_prereqs();
        if incomplete > 0 || unsatisfied > 0 {
            log::error!("Workflow stalled");
            true
        } else {
            false
        }
    }

    /// Tareas terminales retenidas por outputs incompletos, al log.
    pub fn log_incomplete_tasks(&self) -> usize {
        let mut count = 0;
        for task in self.main_pool.values().flat_map(|m| m.values()) {
            if task.status.is_final() && !task.outputs.is_complete() {
                warn!("[{}] incomplete: did not complete {:?}",
                      task.identity(),
                      task.outputs.incomplete_labels());
                count += 1;
            }
        }
        count
    }

    /// Prerequisitos no satisfechos del pool oculto (bajo el stop point).
    pub fn log_unsatisfied_prereqs(&self) -> usize {
        let mut count = 0;
        for task in self.hidden_pool.values().flat_map(|m| m.values()) {
            if let Some(stop) = &self.stop_point {
                if task.point > *stop {
                    continue;
                }
            }
            let pending = task.prerequisites.unsatisfied_keys();
            if !pending.is_empty() {
                warn!("[{}] waiting on: {}",
                      task.identity(),
                      pending.iter()
                             .map(|k| format!("{}/{}:{}", k.point, k.name, k.output))
                             .collect::<Vec<_>>()
                             .join(", "));
                count += 1;
            }
        }
        count
    }

    // ----- comandos manuales --------------------------------------------

    /// Asignación de flow vía el manager, con la base de por medio.
    pub fn get_flow(&mut self, flow_num: Option<i64>, meta: Option<&str>) -> i64 {
        let Self { flow_mgr, db_mgr, .. } = self;
        flow_mgr.get_flow(db_mgr, flow_num, meta)
    }

    /// Reset explícito de estado (comando de usuario). Volver a waiting
    /// des-completa los outputs; es la única vía para hacerlo.
    pub fn reset_task_state(&mut self, identity: &str, status: TaskStatus) -> bool {
        let snapshot = {
            let Some(task) = self.proxy_mut(identity) else { return false };
            if !task.state_reset(status) {
                return false;
            }
            if status == TaskStatus::Waiting {
                for label in task.outputs.completed_labels() {
                    task.outputs.reset(&label);
                }
            }
            task.clone()
        };
        self.push_task_event(&snapshot, "reset", status.as_str());
        true
    }

    /// Plataforma asignada por la capa de submission de jobs.
    pub fn set_task_platform(&mut self, identity: &str, platform: &str) {
        if let Some(task) = self.proxy_mut(identity) {
            task.platform = Some(platform.to_string());
        }
    }


    /// Trigger manual: tareas futuras se engendran (submit manual), las del
    /// pool se liberan ya mismo. Devuelve la cantidad de ids sin match.
    pub fn force_trigger_tasks(&mut self,
                               items: &[String],
                               flow: &[String],
                               meta: Option<&str>,
                               flow_wait: bool)
                               -> Result<usize, InputError> {
        validate_flow_opts(flow, meta, flow_wait)?;
        let flow_nums: FlowNums = if flow.is_empty() || (flow.len() == 1 && flow[0] == FLOW_ALL) {
            self.active_flow_nums()
        } else {
            let Self { flow_mgr, db_mgr, .. } = self;
            flow_mgr.cli_to_flow_nums(db_mgr, flow, meta)?
        };

        let (matched, future, unmatched) = self.filter_task_proxies(items, true);

        for (name, point) in future {
            let Some(itask) = self.spawn_task(&name, &point, flow_nums.clone(), true, true, flow_wait) else {
                continue;
            };
            let identity = self.add_to_pool(itask, true);
            // Trigger manual libera aunque esté más allá del runahead.
            if let Some(task) = self.proxy_mut(&identity) {
                task.is_runahead = false;
            }
            self.queue_task(&identity);
        }

        for identity in matched {
            let skip = self.get_task(&identity)
                           .map(|t| t.status.is_active())
                           .unwrap_or(true);
            if skip {
                warn!("[{identity}] ignoring trigger: already active");
                continue;
            }
            self.merge_flows(&identity, &flow_nums);
            let snapshot = {
                let Some(task) = self.proxy_mut(&identity) else { continue };
                task.is_manual_submit = true;
                task.prerequisites.force_satisfy_all();
                task.is_runahead = false;
                task.clone()
            };
            self.repool(&identity);
            self.queue_task(&identity);
            self.push_task_event(&snapshot, "triggered", "");
        }
        Ok(unmatched.len())
    }

    /// Fuerza outputs completados (comando set-outputs): marca el output en
    /// la instancia y engendra sus hijos.
    pub fn set_outputs(&mut self, items: &[String], outputs: &[String], flow_num: Option<i64>) -> usize {
        let outputs: Vec<String> = if outputs.is_empty() {
            vec![OUT_SUCCEEDED.to_string()]
        } else {
            outputs.to_vec()
        };
        let flow_override: Option<FlowNums> = flow_num.map(|n| FlowNums::from([n]));
        let (matched, _future, unmatched) = self.filter_task_proxies(items, false);
        for identity in matched {
            if let Some(flows) = &flow_override {
                self.merge_flows(&identity, flows);
            }
            let Some((point, name)) = self.get_task(&identity).map(|t| (t.point.clone(), t.name().to_string()))
            else {
                continue;
            };
            for output in &outputs {
                let snapshot = {
                    let Some(task) = self.proxy_mut(&identity) else { continue };
                    if !task.outputs.has_output(output) {
                        warn!("[{identity}] no such output: {output}");
                        continue;
                    }
                    task.outputs.set_completed(output);
                    task.clone()
                };
                self.push_task_event(&snapshot, output, "force completed");
                self.spawn_on_output(&point, &name, output, true);
            }
        }
        unmatched.len()
    }

    /// Remueve del pool, opcionalmente sólo de ciertos flows: quitar el
    /// último flow remueve la instancia.
    pub fn remove_tasks(&mut self, items: &[String], flow_nums: Option<&FlowNums>) -> usize {
        let (matched, _future, unmatched) = self.filter_task_proxies(items, false);
        for identity in matched {
            match flow_nums {
                None => self.remove(&identity, "request"),
                Some(to_strip) => {
                    let now_empty = {
                        let Some(task) = self.proxy_mut(&identity) else { continue };
                        for n in to_strip {
                            task.flow_nums.remove(n);
                        }
                        task.flow_nums.is_empty()
                    };
                    if now_empty {
                        self.remove(&identity, "request");
                    } else if let Some(task) = self.get_task(&identity) {
                        let row = TaskStateUpdate { cycle: task.point.to_string(),
                                                    name: task.name().to_string(),
                                                    flow_nums: task.flow_nums_str(),
                                                    time_updated: now_time_string(),
                                                    submit_num: task.submit_num,
                                                    status: task.status.as_str().to_string(),
                                                    is_manual_submit: task.is_manual_submit,
                                                    is_complete: task.is_complete() };
                        self.db_mgr.put_update_task_state(row);
                    }
                }
            }
        }
        unmatched.len()
    }

    /// Satisface un trigger externo en toda instancia waiting que lo
    /// declare, y memoiza la firma en `xtriggers`.
    pub fn ext_trigger(&mut self, label: &str, message: &str, trigger_id: &str) {
        let signature = format!("{label}({trigger_id})");
        let results = serde_json::json!({"message": message, "id": trigger_id}).to_string();
        let mut satisfied_any = false;
        let ids = self.all_identities();
        for identity in ids {
            let became_ready = {
                let Some(task) = self.proxy_mut(&identity) else { continue };
                let mut hit = false;
                if let Some(slot) = task.external_triggers.get_mut(label) {
                    if !*slot {
                        *slot = true;
                        hit = true;
                    }
                }
                if hit {
                    satisfied_any = true;
                }
                hit && !task.is_runahead && task.is_ready_to_run()
            };
            if became_ready {
                self.queue_task(&identity);
            }
        }
        if satisfied_any {
            self.xtriggers_satisfied.insert(signature.clone(), results.clone());
            self.db_mgr.put_xtriggers(&[(signature, results)]);
        }
    }

    // ----- snapshot de fin de ciclo -------------------------------------

    /// Commit de fin de iteración: snapshot de ambos pools + timers, y
    /// ejecución de todo lo encolado (primaria fatal, pública con retry).
    /// La membresía oculto/principal no se persiste: en el restart se
    /// re-deriva de la satisfacción de prerequisitos.
    pub fn db_checkpoint(&mut self) -> Result<(), PersistenceError> {
        let mut entries = Vec::new();
        let mut touched: Vec<String> = Vec::new();
        for task in self.hidden_pool.values().chain(self.main_pool.values()).flat_map(|m| m.values()) {
            let prereqs = task.prerequisites
                              .iter()
                              .map(|(key, state)| PrereqInsert { prereq_name: key.name.clone(),
                                                                 prereq_cycle: key.point.to_string(),
                                                                 prereq_output: key.output.clone(),
                                                                 satisfied: state.as_db_str().to_string() })
                              .collect();
            let state_update = task.time_updated.as_ref().map(|time_updated| {
                                                              TaskStateUpdate { cycle: task.point.to_string(),
                                                                                name: task.name().to_string(),
                                                                                flow_nums: task.flow_nums_str(),
                                                                                time_updated: time_updated.clone(),
                                                                                submit_num: task.submit_num,
                                                                                status: task.status
                                                                                            .as_str()
                                                                                            .to_string(),
                                                                                is_manual_submit:
                                                                                    task.is_manual_submit,
                                                                                is_complete: task.is_complete() }
                                                          });
            if state_update.is_some() {
                touched.push(task.identity());
            }
            entries.push(TaskPoolSnapshotEntry { cycle: task.point.to_string(),
                                                 name: task.name().to_string(),
                                                 flow_nums: task.flow_nums_str(),
                                                 status: task.status.as_str().to_string(),
                                                 is_held: task.is_held,
                                                 timeout: task.timeout,
                                                 prereqs,
                                                 state_update });
        }
        self.db_mgr.put_task_pool(&entries);
        for identity in touched {
            if let Some(task) = self.proxy_mut(&identity) {
                task.time_updated = None;
            }
        }
        self.db_mgr.process_queued_ops()
    }

    // ----- matching de ids ----------------------------------------------

    /// Clasifica ids/globs contra el pool: identidades matcheadas, tareas
    /// futuras `(nombre, punto)` (si `future`), e ítems sin match.
    pub fn filter_task_proxies(&self,
                               items: &[String],
                               future: bool)
                               -> (Vec<String>, Vec<(String, CyclePoint)>, Vec<String>) {
        let mut matched = Vec::new();
        let mut future_tasks = Vec::new();
        let mut unmatched = Vec::new();
        for item in items {
            let Ok(tokens) = Tokens::parse(item) else {
                warn!("invalid task id: {item}");
                unmatched.push(item.clone());
                continue;
            };
            let (cycle_pat, name_pat, selector) = match (&tokens.cycle, &tokens.task) {
                (Some(cycle), Some(task)) => {
                    (cycle.clone(), task.clone(), tokens.task_selector.clone())
                }
                // Un nombre a secas matchea en todo ciclo.
                _ => {
                    let (name, selector) = match item.split_once(':') {
                        Some((n, s)) => (n.to_string(), Some(s.to_string())),
                        None => (item.clone(), None),
                    };
                    ("*".to_string(), name, selector)
                }
            };

            let mut any = false;
            for task in self.hidden_pool.values().chain(self.main_pool.values()).flat_map(|m| m.values()) {
                if !glob_match(&cycle_pat, &task.point.to_string()) {
                    continue;
                }
                if !glob_match(&name_pat, task.name()) {
                    continue;
                }
                if let Some(sel) = &selector {
                    if task.status.as_str() != sel {
                        continue;
                    }
                }
                matched.push(task.identity());
                any = true;
            }
            if any {
                continue;
            }

            // Sin match en el pool: ¿tarea futura concreta?
            let globby = cycle_pat.contains('*') || name_pat.contains('*');
            if future && !globby && self.config.taskdefs.contains_key(&name_pat) {
                if let Ok(point) = parse_point(&cycle_pat, self.config.cycling_mode) {
                    future_tasks.push((name_pat.clone(), point));
                    continue;
                }
            }
            warn!("no active tasks matching: {item}");
            unmatched.push(item.clone());
        }
        (matched, future_tasks, unmatched)
    }
}

// Matching de globs estilo id: sólo `*` como comodín.
fn glob_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => {
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + part.len()..];
            }
            None => return false,
        }
    }
    if let Some(last) = parts.last() {
        if !last.is_empty() && !value.ends_with(last) {
            return false;
        }
    }
    true
}
