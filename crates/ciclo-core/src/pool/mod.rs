//! Pool de tareas: el corazón del scheduler.
//!
//! Dos mapas por punto de ciclo: el pool principal (instancias corribles o
//! corriendo) y el oculto (prerequisitos aún no satisfechos). El pool
//! implementa spawn/release/remove/merge entre flows concurrentes, el
//! governor de runahead, holds, detección de stall, expiración y la
//! reconstrucción desde base de datos en el restart.
//!
//! Invariantes que este módulo sostiene:
//! - `(nombre, punto, flows)` es único entre ambos pools.
//! - Una instancia está en el oculto sii tiene algún prerequisito sin
//!   satisfacer y no fue submit manual; la transición oculto→principal no
//!   tiene vuelta atrás.
//! - `punto ≤ runahead_limit_point` para toda instancia con
//!   `is_runahead == false`.
//! - Flows vacíos ⇒ la instancia corre pero sus completions no engendran.

mod control;
mod reload;
mod restart;

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ciclo_cycling::{CycleInterval, CyclePoint};
use ciclo_domain::{serialise_flow_nums, FlowNums, TaskStatus, OUT_EXPIRED, OUT_FAILED, OUT_STARTED, OUT_SUBMITTED,
                   OUT_SUCCEEDED};
use ciclo_persistence::{TaskEventInsert, TaskJobsInsert, TaskStateUpdate, TaskStatesInsert, WorkflowDatabaseManager};

use crate::config::{RunaheadLimit, WorkflowConfig};
use crate::flow::FlowManager;
use crate::proxy::TaskProxy;
use crate::queues::TaskQueueManager;
use crate::util::now_time_string;

const ERR_PREFIX_TASK_NOT_ON_SEQUENCE: &str = "Invalid cycle point for task";
const SUICIDE_MSG: &str = "suicide";

type PoolMap = BTreeMap<CyclePoint, IndexMap<String, TaskProxy>>;

/// Modos de parada del scheduler, para `can_stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Drenar: esperar a que terminen las tareas activas.
    RequestClean,
    /// Matar jobs y luego drenar.
    RequestKill,
    /// Salida inmediata.
    RequestNowNow,
}

pub struct TaskPool {
    pub config: WorkflowConfig,
    db_mgr: WorkflowDatabaseManager,
    flow_mgr: FlowManager,
    queue_mgr: TaskQueueManager,
    main_pool: PoolMap,
    hidden_pool: PoolMap,
    runahead_limit_point: Option<CyclePoint>,
    prev_runahead_base_point: Option<CyclePoint>,
    prev_runahead_sequence_points: Option<BTreeSet<CyclePoint>>,
    max_future_offset: Option<CycleInterval>,
    stop_point: Option<CyclePoint>,
    hold_point: Option<CyclePoint>,
    tasks_to_hold: BTreeSet<(String, CyclePoint)>,
    abs_outputs_done: BTreeSet<(String, String, String)>,
    stop_task_id: Option<String>,
    stop_task_finished: bool,
    abort_task_failed: bool,
    do_reload_config: Option<WorkflowConfig>,
    mean_elapsed_times: IndexMap<String, f64>,
    xtriggers_satisfied: IndexMap<String, String>,
    action_timers: Vec<ciclo_persistence::TaskActionTimerRow>,
}

impl TaskPool {
    pub fn new(config: WorkflowConfig, db_mgr: WorkflowDatabaseManager) -> Self {
        let queue_mgr = TaskQueueManager::new(&config.queues);
        let stop_point = config.final_point.clone();
        Self { queue_mgr,
               stop_point,
               config,
               db_mgr,
               flow_mgr: FlowManager::new(),
               main_pool: PoolMap::new(),
               hidden_pool: PoolMap::new(),
               runahead_limit_point: None,
               prev_runahead_base_point: None,
               prev_runahead_sequence_points: None,
               max_future_offset: None,
               hold_point: None,
               tasks_to_hold: BTreeSet::new(),
               abs_outputs_done: BTreeSet::new(),
               stop_task_id: None,
               stop_task_finished: false,
               abort_task_failed: false,
               do_reload_config: None,
               mean_elapsed_times: IndexMap::new(),
               xtriggers_satisfied: IndexMap::new(),
               action_timers: Vec::new() }
    }

    // ----- accesos ------------------------------------------------------

    pub fn db_mgr(&mut self) -> &mut WorkflowDatabaseManager {
        &mut self.db_mgr
    }

    pub fn flow_mgr(&mut self) -> &mut FlowManager {
        &mut self.flow_mgr
    }

    pub fn runahead_limit_point(&self) -> Option<&CyclePoint> {
        self.runahead_limit_point.as_ref()
    }

    pub fn stop_point(&self) -> Option<&CyclePoint> {
        self.stop_point.as_ref()
    }

    pub fn hold_point(&self) -> Option<&CyclePoint> {
        self.hold_point.as_ref()
    }

    pub fn tasks_to_hold(&self) -> &BTreeSet<(String, CyclePoint)> {
        &self.tasks_to_hold
    }

    pub fn abort_task_failed(&self) -> bool {
        self.abort_task_failed
    }

    pub fn stop_task_finished(&self) -> bool {
        self.stop_task_finished
    }

    pub fn get_task(&self, identity: &str) -> Option<&TaskProxy> {
        self.hidden_pool
            .values()
            .chain(self.main_pool.values())
            .find_map(|map| map.get(identity))
    }

    fn proxy_mut(&mut self, identity: &str) -> Option<&mut TaskProxy> {
        for map in self.hidden_pool.values_mut() {
            if map.contains_key(identity) {
                return map.get_mut(identity);
            }
        }
        for map in self.main_pool.values_mut() {
            if map.contains_key(identity) {
                return map.get_mut(identity);
            }
        }
        None
    }

    pub fn is_in_main_pool(&self, identity: &str) -> bool {
        self.main_pool.values().any(|map| map.contains_key(identity))
    }

    pub fn is_in_hidden_pool(&self, identity: &str) -> bool {
        self.hidden_pool.values().any(|map| map.contains_key(identity))
    }

    /// Identidades del pool principal, por punto ascendente.
    pub fn main_identities(&self) -> Vec<String> {
        self.main_pool.values().flat_map(|map| map.keys().cloned()).collect()
    }

    pub fn hidden_identities(&self) -> Vec<String> {
        self.hidden_pool.values().flat_map(|map| map.keys().cloned()).collect()
    }

    pub fn all_identities(&self) -> Vec<String> {
        let mut ids = self.hidden_identities();
        ids.extend(self.main_identities());
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.main_pool.is_empty() && self.hidden_pool.is_empty()
    }

    fn active_counts(&self) -> IndexMap<String, usize> {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for task in self.main_pool.values().flat_map(|m| m.values()) {
            if task.status.is_active() || task.waiting_on_job_prep {
                *counts.entry(task.name().to_string()).or_default() += 1;
            }
        }
        counts
    }

    /// Flows activos: unión sobre el pool; con el pool vacío, el último
    /// flow registrado en la base.
    pub fn active_flow_nums(&mut self) -> FlowNums {
        let mut nums = FlowNums::new();
        for task in self.hidden_pool.values().chain(self.main_pool.values()).flat_map(|m| m.values()) {
            nums.extend(task.flow_nums.iter().copied());
        }
        if nums.is_empty() {
            if let Ok(dao) = self.db_mgr.pri_dao() {
                if let Ok(Some(latest)) = dao.select_latest_flow_nums() {
                    nums = latest;
                }
            }
        }
        nums
    }

    // ----- arranque en frío ---------------------------------------------

    /// Carga inicial: engendra las tareas sin padres desde el punto de
    /// arranque, luego fija el límite de runahead y libera.
    pub fn load_from_point(&mut self) {
        let flow_num = self.flow_mgr.get_flow(&mut self.db_mgr, None, Some("original flow from first start"));
        let flow_nums = FlowNums::from([flow_num]);
        let start = self.config.start_point.clone();
        let tdefs: Vec<Arc<_>> = self.config.taskdefs.values().cloned().collect();
        for tdef in tdefs {
            if let Some(point) = tdef.first_point(&start) {
                // Las tareas con padres llegan por spawn-on-output.
                if tdef.is_parentless(&point) {
                    if let Some(itask) = self.spawn_task(&tdef.name, &point, flow_nums.clone(), false, false, false) {
                        self.add_to_pool(itask, true);
                    }
                }
            }
        }
        self.compute_runahead(true);
        self.release_runahead_tasks();
    }

    // ----- altas y bajas ------------------------------------------------

    /// Agrega al pool oculto (prerequisitos pendientes, sin submit manual)
    /// o al principal. Devuelve la identidad.
    pub fn add_to_pool(&mut self, itask: TaskProxy, is_new: bool) -> String {
        let identity = itask.identity();
        let point = itask.point.clone();
        let name = itask.name().to_string();
        let flow_str = itask.flow_nums_str();
        let status = itask.status;
        let has_future_offset = itask.tdef.max_future_prereq_offset.is_some();
        let flow_wait = itask.flow_wait;
        let is_manual = itask.is_manual_submit;
        let is_complete = itask.is_complete();
        let submit_num = itask.submit_num;

        if !itask.prereqs_all_satisfied() && !itask.is_manual_submit {
            self.hidden_pool.entry(point.clone()).or_default().insert(identity.clone(), itask);
            debug!("[{identity}] added to hidden task pool");
        } else {
            if let Some(map) = self.hidden_pool.get_mut(&point) {
                map.shift_remove(&identity);
                if map.is_empty() {
                    self.hidden_pool.remove(&point);
                }
            }
            self.main_pool.entry(point.clone()).or_default().insert(identity.clone(), itask);
            debug!("[{identity}] added to main task pool");
        }

        if is_new {
            let now = now_time_string();
            self.db_mgr.put_insert_task_states(TaskStatesInsert { cycle: point.to_string(),
                                                                  name: name.clone(),
                                                                  flow_nums: flow_str.clone(),
                                                                  time_created: now.clone(),
                                                                  time_updated: now,
                                                                  submit_num,
                                                                  status: status.as_str().to_string(),
                                                                  flow_wait,
                                                                  is_manual_submit: is_manual,
                                                                  is_complete });
            self.db_mgr.put_insert_task_outputs(&point.to_string(), &name, &flow_str);
        }

        if has_future_offset {
            self.set_max_future_offset();
        }
        identity
    }

    /// Saca una instancia del pool. En el principal, encola el update final
    /// de `task_states` y una fila de eventos con el motivo.
    pub fn remove(&mut self, identity: &str, reason: &str) {
        let msg = if reason.is_empty() {
            "task proxy removed".to_string()
        } else {
            format!("task proxy removed ({reason})")
        };

        if let Some(point) = pool_point_of(&self.hidden_pool, identity) {
            if let Some(map) = self.hidden_pool.get_mut(&point) {
                map.shift_remove(identity);
                if map.is_empty() {
                    self.hidden_pool.remove(&point);
                }
            }
            debug!("[{identity}] {msg}");
            return;
        }

        let Some(point) = pool_point_of(&self.main_pool, identity) else {
            return;
        };
        let mut removed: Option<TaskProxy> = None;
        if let Some(map) = self.main_pool.get_mut(&point) {
            removed = map.shift_remove(identity);
            if map.is_empty() {
                self.main_pool.remove(&point);
            }
        }
        let Some(task) = removed else { return };

        self.queue_mgr.remove_task(identity);
        self.db_mgr.put_update_task_state(TaskStateUpdate { cycle: task.point.to_string(),
                                                            name: task.name().to_string(),
                                                            flow_nums: task.flow_nums_str(),
                                                            time_updated: now_time_string(),
                                                            submit_num: task.submit_num,
                                                            status: task.status.as_str().to_string(),
                                                            is_manual_submit: task.is_manual_submit,
                                                            is_complete: task.is_complete() });
        self.push_task_event(&task, "removed", reason);
        if task.tdef.max_future_prereq_offset.is_some() {
            self.set_max_future_offset();
        }
        debug!("[{identity}] {msg}");
    }

    fn push_task_event(&mut self, task: &TaskProxy, event: &str, message: &str) {
        self.db_mgr.put_insert_task_events(TaskEventInsert { name: task.name().to_string(),
                                                             cycle: task.point.to_string(),
                                                             time: now_time_string(),
                                                             submit_num: task.submit_num,
                                                             event: event.to_string(),
                                                             message: message.to_string() });
    }

    // ----- governor de runahead -----------------------------------------

    /// Recalcula el límite de runahead. Devuelve true si se fijó un límite
    /// (posiblemente igual al anterior); false si no hay base o no hacía
    /// falta recomputar.
    pub fn compute_runahead(&mut self, force: bool) -> bool {
        let back_compat = self.config.back_compat;
        let mut points: Vec<CyclePoint> = Vec::new();
        if self.main_pool.is_empty() && self.hidden_pool.is_empty() {
            let start = self.config.start_point.clone();
            let mut seen = BTreeSet::new();
            for seq in self.config.sequences() {
                if let Some(p) = seq.first_point(&start) {
                    seen.insert(p);
                }
            }
            points.extend(seen);
        } else {
            let mut by_point: BTreeMap<&CyclePoint, Vec<&TaskProxy>> = BTreeMap::new();
            for (point, map) in self.main_pool.iter().chain(self.hidden_pool.iter()) {
                by_point.entry(point).or_default().extend(map.values());
            }
            let mut got_base = false;
            for (point, tasks) in by_point {
                if got_base || tasks.iter().any(|t| t.is_unfinished(back_compat)) {
                    points.push(point.clone());
                    got_base = true;
                }
            }
        }
        if points.is_empty() {
            return false;
        }
        let base_point = points.iter().min().cloned().expect("non-empty points");

        if self.prev_runahead_base_point.is_none() {
            self.prev_runahead_base_point = Some(base_point.clone());
        }
        if !force
           && self.runahead_limit_point.is_some()
           && (Some(&base_point) == self.prev_runahead_base_point.as_ref()
               || self.runahead_limit_point == self.stop_point)
        {
            return false;
        }

        let (count_cycles, cycle_limit, interval_limit) = match &self.config.runahead_limit {
            RunaheadLimit::Cycles(n) => (true, *n, None),
            RunaheadLimit::Interval(i) => (false, 0, Some(*i)),
        };

        let sequence_points: BTreeSet<CyclePoint> = if !force
                                                       && self.prev_runahead_sequence_points.is_some()
                                                       && Some(&base_point) == self.prev_runahead_base_point.as_ref()
        {
            self.prev_runahead_sequence_points.clone().expect("checked above")
        } else {
            let mut seq_points = BTreeSet::new();
            let upper = interval_limit.and_then(|i| base_point.add(&i).ok());
            for sequence in self.config.sequences() {
                let mut seq_point = sequence.next_point(&base_point);
                let mut count = 1i64;
                while let Some(p) = seq_point {
                    if count_cycles {
                        if count > 1 + cycle_limit {
                            break;
                        }
                    } else if upper.as_ref().is_some_and(|u| p > *u) {
                        break;
                    }
                    count += 1;
                    seq_point = sequence.next_point(&p);
                    seq_points.insert(p);
                }
            }
            self.prev_runahead_sequence_points = Some(seq_points.clone());
            self.prev_runahead_base_point = Some(base_point.clone());
            seq_points
        };

        let mut all_points: BTreeSet<CyclePoint> = points.into_iter().collect();
        all_points.extend(sequence_points);

        let sorted: Vec<&CyclePoint> = all_points.iter().collect();
        let mut limit_point = if count_cycles {
            let idx = ((cycle_limit + 1) as usize).min(sorted.len());
            sorted[..idx].last().copied().cloned().expect("non-empty points")
        } else {
            sorted.last().copied().cloned().expect("non-empty points")
        };

        let pre_adjust = limit_point.clone();
        if let Some(offset) = &self.max_future_offset {
            if let Ok(raised) = limit_point.add(offset) {
                limit_point = raised;
                debug!("{pre_adjust} -> {limit_point} (future offset)");
            }
        }
        if let Some(stop) = &self.stop_point {
            if limit_point > *stop {
                limit_point = stop.clone();
                debug!("{pre_adjust} -> {limit_point} (stop point)");
            }
        }
        info!("Runahead limit: {limit_point}");
        self.runahead_limit_point = Some(limit_point);
        true
    }

    /// Libera del runahead toda instancia del pool principal con
    /// `punto ≤ límite` y engendra sus sucesoras sin padres.
    pub fn release_runahead_tasks(&mut self) -> bool {
        let Some(limit) = self.runahead_limit_point.clone() else {
            return false;
        };
        if self.main_pool.is_empty() {
            return false;
        }
        // Lista intermedia: el auto-spawn de tareas sin padres muta el pool
        // durante la iteración.
        let release_me: Vec<(String, Arc<ciclo_domain::TaskDef>, CyclePoint, FlowNums)> =
            self.main_pool
                .iter()
                .filter(|(point, _)| **point <= limit)
                .flat_map(|(_, map)| map.values())
                .filter(|t| t.is_runahead)
                .map(|t| (t.identity(), t.tdef.clone(), t.point.clone(), t.flow_nums.clone()))
                .collect();

        let mut released = false;
        for (identity, tdef, point, flow_nums) in release_me {
            self.rh_release_and_queue(&identity);
            let next = tdef.next_point(&point);
            self.spawn_to_rh_limit(&tdef, next, &flow_nums);
            released = true;
        }
        released
    }

    /// Saca una instancia del runahead y la encola si está lista.
    pub fn rh_release_and_queue(&mut self, identity: &str) {
        let ready = {
            let Some(task) = self.proxy_mut(identity) else { return };
            task.is_runahead = false;
            task.is_ready_to_run()
        };
        if ready {
            self.queue_task(identity);
        }
    }

    pub fn queue_task(&mut self, identity: &str) {
        let Some(task) = self.proxy_mut(identity) else { return };
        if task.is_queued {
            return;
        }
        task.is_queued = true;
        let name = task.name().to_string();
        let queue = task.tdef.queue.clone();
        self.queue_mgr.push_task(&name, identity, queue.as_deref());
    }

    /// Ciclo de colas: libera lo que los límites permitan y marca las
    /// instancias como en preparación de job. Una tarea retenida después de
    /// encolarse se descarta de la cola sin pasar a preparación.
    pub fn release_queued_tasks(&mut self) -> Vec<String> {
        let counts = self.active_counts();
        let candidates = self.queue_mgr.release_tasks(&counts);
        let back_compat = self.config.back_compat;
        let mut released = Vec::new();
        for identity in candidates {
            let Some(task) = self.proxy_mut(&identity) else { continue };
            task.is_queued = false;
            if task.is_held {
                continue;
            }
            task.waiting_on_job_prep = true;
            if back_compat {
                // Pre-engendrado de hijas waiting, al estilo de la
                // generación anterior.
                self.spawn_on_all_outputs(&identity, false);
            }
            released.push(identity);
        }
        released
    }

    fn set_max_future_offset(&mut self) {
        let mut max_offset: Option<CycleInterval> = None;
        for task in self.main_pool.values().chain(self.hidden_pool.values()).flat_map(|m| m.values()) {
            if let Some(offset) = &task.tdef.max_future_prereq_offset {
                let better = match &max_offset {
                    None => true,
                    Some(current) => interval_key(offset) > interval_key(current),
                };
                if better {
                    max_offset = Some(*offset);
                }
            }
        }
        if max_offset != self.max_future_offset {
            self.max_future_offset = max_offset;
            if self.compute_runahead(true) {
                self.release_runahead_tasks();
            }
        }
    }

    // ----- spawning -----------------------------------------------------

    fn can_spawn(&self, name: &str, point: &CyclePoint) -> bool {
        let Ok(_tdef) = self.config.get_taskdef(name) else {
            warn!("no task definition found for {name}");
            return false;
        };
        if *point < self.config.initial_point {
            warn!("{name}: not spawning {point}: before initial point {}", self.config.initial_point);
            return false;
        }
        if let Some(final_point) = &self.config.final_point {
            if *point > *final_point {
                warn!("{name}: not spawning {point}: beyond final point {final_point}");
                return false;
            }
        }
        true
    }

    /// Engendra `punto/nombre` en los flows dados, o None.
    ///
    /// None cubre: punto inválido, duplicado ya engendrado en el flow, y la
    /// resolución diferida de flow-wait (los hijos se engendran en lugar de
    /// la tarea).
    pub fn spawn_task(&mut self,
                      name: &str,
                      point: &CyclePoint,
                      flow_nums: FlowNums,
                      force: bool,
                      is_manual_submit: bool,
                      flow_wait: bool)
                      -> Option<TaskProxy> {
        if !self.can_spawn(name, point) {
            return None;
        }
        let point_str = point.to_string();
        let prev = match self.db_mgr.pri_dao().and_then(|dao| dao.select_prev_instances(name, &point_str)) {
            Ok(rows) => rows,
            Err(err) => {
                error!("could not read previous instances of {point}/{name}: {err}");
                return None;
            }
        };
        let submit_num = prev.iter().map(|r| r.submit_num).max().unwrap_or(0);

        let mut flow_wait_done = false;
        for row in &prev {
            if !force && row.flow_nums.intersection(&flow_nums).next().is_some() {
                if row.flow_wait {
                    flow_wait_done = true;
                    break;
                }
                // Evita el "reflow condicional" con (p.ej.) "foo | bar => baz".
                warn!("Task {point}/{name} already spawned in {}", serialise_flow_nums(&flow_nums));
                return None;
            }
        }

        let tdef = self.config.get_taskdef(name).expect("checked by can_spawn");
        if !tdef.is_valid_point(point) {
            warn!("{ERR_PREFIX_TASK_NOT_ON_SEQUENCE} {name}: {point}");
            return None;
        }

        let initial = self.config.initial_point.clone();
        let mut itask = TaskProxy::new(tdef,
                                       point.clone(),
                                       flow_nums.clone(),
                                       submit_num,
                                       is_manual_submit,
                                       flow_wait,
                                       &initial);

        if self.tasks_to_hold.contains(&(name.to_string(), point.clone())) {
            info!("[{}] holding (as requested earlier)", itask.identity());
            itask.is_held = true;
            self.persist_tasks_to_hold();
        } else if self.hold_point.as_ref().is_some_and(|hp| *point > *hp) {
            info!("[{}] holding (beyond workflow hold point: {})",
                  itask.identity(),
                  self.hold_point.as_ref().expect("checked above"));
            itask.is_held = true;
            self.tasks_to_hold.insert((name.to_string(), point.clone()));
            self.persist_tasks_to_hold();
        }

        if let Some(stop) = &self.stop_point {
            if *point <= *stop && itask.prereq_target_points().iter().any(|p| *p > *stop) {
                warn!("[{}] won't run: depends on a task beyond the stop point ({stop})",
                      itask.identity());
            }
        }

        // Triggers absolutos ya completados.
        if itask.tdef.has_abs_triggers() && !itask.prereqs_all_satisfied() {
            let done: Vec<(String, String)> = self.abs_outputs_done
                                                  .iter()
                                                  .map(|(_, n, o)| (n.clone(), o.clone()))
                                                  .collect();
            for (n, o) in done {
                itask.prerequisites.satisfy_any_point(&n, &o);
            }
        }

        if flow_wait_done {
            if let Ok(dao) = self.db_mgr.pri_dao() {
                if let Ok(rows) = dao.select_task_outputs(name, &point_str) {
                    for (outputs_json, fnums) in rows {
                        if flow_nums.intersection(&fnums).next().is_some() {
                            let map: BTreeMap<String, String> =
                                serde_json::from_str(&outputs_json).unwrap_or_default();
                            for label in map.keys() {
                                itask.outputs.set_completed(label);
                            }
                            break;
                        }
                    }
                }
            }
            info!("[{}] spawning on outputs after flow wait", itask.identity());
            self.db_mgr.put_update_task_flow_wait(&point_str, name, &itask.flow_nums_str(), false, &now_time_string());
            self.spawn_children_of_proxy(&itask, true);
            return None;
        }

        info!("[{}] spawned", itask.identity());
        Some(itask)
    }

    /// Engendra instancias sin padres desde `point` hasta el límite de
    /// runahead inclusive, y una más (runahead-limitada, sin liberar).
    pub fn spawn_to_rh_limit(&mut self,
                             tdef: &Arc<ciclo_domain::TaskDef>,
                             mut point: Option<CyclePoint>,
                             flow_nums: &FlowNums) {
        if flow_nums.is_empty() {
            // Tarea sin flow: no corre hacia adelante.
            return;
        }
        if self.runahead_limit_point.is_none() {
            self.compute_runahead(false);
        }
        let Some(limit) = self.runahead_limit_point.clone() else { return };
        while let Some(p) = point.clone() {
            if p > limit {
                break;
            }
            if tdef.is_parentless(&p) {
                if let Some(identity) = self.get_spawned_or_merged_task(&p, &tdef.name, flow_nums) {
                    self.rh_release_and_queue(&identity);
                }
            }
            point = tdef.next_point(&p);
        }
        // Una vez más, para la sucesora limitada por runahead: no liberar.
        if let Some(p) = point {
            if tdef.is_parentless(&p) {
                self.get_spawned_or_merged_task(&p, &tdef.name, flow_nums);
            }
        }
    }

    /// Devuelve la identidad de `punto/nombre`, nueva o con flows
    /// mergeados si ya existía en el pool.
    fn get_spawned_or_merged_task(&mut self, point: &CyclePoint, name: &str, flow_nums: &FlowNums) -> Option<String> {
        let identity = format!("{point}/{name}");
        if self.get_task(&identity).is_some() {
            self.merge_flows(&identity, flow_nums);
            return Some(identity);
        }
        let itask = self.spawn_task(name, point, flow_nums.clone(), false, false, false)?;
        Some(self.add_to_pool(itask, true))
    }

    // ----- transiciones por eventos -------------------------------------

    /// Punto de entrada de eventos de tarea: marca el output completado,
    /// aplica la transición de estado estándar y engendra los hijos.
    pub fn report_output(&mut self, point: &CyclePoint, name: &str, output: &str) {
        let identity = format!("{point}/{name}");
        if self.get_task(&identity).is_none() {
            warn!("[{identity}] output \"{output}\" reported for a task not in the pool");
            return;
        }
        let new_status = match output {
            OUT_SUBMITTED => Some(TaskStatus::Submitted),
            OUT_STARTED => Some(TaskStatus::Running),
            OUT_SUCCEEDED => Some(TaskStatus::Succeeded),
            OUT_FAILED => Some(TaskStatus::Failed),
            OUT_EXPIRED => Some(TaskStatus::Expired),
            _ => None,
        };
        let job_row = {
            let task = self.proxy_mut(&identity).expect("checked above");
            match output {
                OUT_SUBMITTED => {
                    task.submit_num += 1;
                    task.waiting_on_job_prep = false;
                    task.time_submit = Some(now_time_string());
                    if task.platform.is_none() {
                        task.platform = Some("localhost".to_string());
                    }
                    Some(TaskJobsInsert { cycle: point.to_string(),
                                          name: name.to_string(),
                                          submit_num: task.submit_num,
                                          flow_nums: task.flow_nums_str(),
                                          is_manual_submit: task.is_manual_submit,
                                          try_num: task.try_num,
                                          time_submit: now_time_string(),
                                          platform_name: task.platform.clone().unwrap_or_default(),
                                          job_runner_name: "background".to_string(),
                                          job_id: None })
                }
                OUT_STARTED => {
                    task.time_run = Some(now_time_string());
                    None
                }
                _ => None,
            }
        };
        if let Some(job) = job_row {
            self.db_mgr.put_insert_task_jobs(job);
        }
        // Cierre del registro del job en los outputs terminales.
        if matches!(output, OUT_SUCCEEDED | OUT_FAILED) {
            let submit_num = self.get_task(&identity).map(|t| t.submit_num).unwrap_or(0);
            let run_status: i64 = if output == OUT_SUCCEEDED { 0 } else { 1 };
            self.db_mgr.put_update_task_jobs(&point.to_string(),
                                             name,
                                             submit_num,
                                             vec![("run_status", run_status.into()),
                                                  ("time_run_exit", now_time_string().into())]);
        }
        let event_task = {
            let task = self.proxy_mut(&identity).expect("checked above");
            task.outputs.set_completed(output);
            if let Some(status) = new_status {
                task.state_reset(status);
            }
            task.clone()
        };
        self.push_task_event(&event_task, output, "");
        self.spawn_on_output(point, name, output, false);
    }

    /// Engendra y actualiza los hijos del output; remueve la tarea si
    /// terminó completa. `forced` marca comandos manuales (set-outputs).
    pub fn spawn_on_output(&mut self, point: &CyclePoint, name: &str, output: &str, forced: bool) {
        let identity = format!("{point}/{name}");
        let Some(parent) = self.get_task(&identity) else { return };
        let parent_flows = parent.flow_nums.clone();
        let parent_flow_wait = parent.flow_wait;
        let parent_flow_str = parent.flow_nums_str();
        let outputs_json = parent.outputs.completed_json().to_string();
        let children: Vec<ciclo_domain::GraphChild> = parent.tdef.children_of(output).to_vec();

        self.db_mgr.put_update_task_outputs(&point.to_string(), name, &parent_flow_str, &outputs_json);

        if output == OUT_FAILED {
            if let Some(expected) = &self.config.expected_failed_tasks {
                if !expected.contains(&identity) {
                    self.abort_task_failed = true;
                }
            }
        }

        let mut suicides: Vec<String> = Vec::new();
        for child in children {
            let c_point = match &child.offset {
                Some(offset) => match point.add(offset) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("[{identity}] bad child offset for {}: {err}", child.name);
                        continue;
                    }
                },
                None => point.clone(),
            };
            if child.is_absolute {
                self.abs_outputs_done
                    .insert((point.to_string(), name.to_string(), output.to_string()));
                self.db_mgr.put_insert_abs_output(&point.to_string(), name, output);
                if let Err(err) = self.db_mgr.process_queued_ops() {
                    error!("could not record absolute output: {err}");
                }
            }

            let c_id = format!("{c_point}/{}", child.name);
            let mut child_ids: Vec<String> = Vec::new();
            if self.get_task(&c_id).is_some() && c_id != identity {
                // (c_id == identity evita el auto-suicidio "A => !A")
                self.merge_flows(&c_id, &parent_flows);
                if let Some(c_task) = self.get_task(&c_id) {
                    let row = TaskStatesInsert { cycle: c_point.to_string(),
                                                 name: child.name.clone(),
                                                 flow_nums: c_task.flow_nums_str(),
                                                 time_created: c_task.time_created.clone(),
                                                 time_updated: now_time_string(),
                                                 submit_num: c_task.submit_num,
                                                 status: c_task.status.as_str().to_string(),
                                                 flow_wait: c_task.flow_wait,
                                                 is_manual_submit: c_task.is_manual_submit,
                                                 is_complete: c_task.is_complete() };
                    self.db_mgr.put_insert_task_states(row);
                }
                child_ids.push(c_id.clone());
            } else if self.get_task(&c_id).is_none()
                      && (!parent_flows.is_empty() || forced)
                      && !parent_flow_wait
            {
                if let Some(c_task) = self.spawn_task(&child.name, &c_point, parent_flows.clone(), false, false, false)
                {
                    child_ids.push(self.add_to_pool(c_task, true));
                }
            } else if self.get_task(&c_id).is_some() {
                child_ids.push(c_id.clone());
            }

            if child_ids.is_empty() {
                continue;
            }

            // Outputs absolutos satisfacen a toda instancia del hijo.
            let targets: Vec<String> = if child.is_absolute {
                let mut all: Vec<String> = self.all_identities()
                                               .into_iter()
                                               .filter(|id| id.ends_with(&format!("/{}", child.name)))
                                               .collect();
                for id in &child_ids {
                    if !all.contains(id) {
                        all.push(id.clone());
                    }
                }
                all
            } else {
                child_ids
            };

            for target in targets {
                if let Some(t) = self.proxy_mut(&target) {
                    if child.is_absolute {
                        t.prerequisites.satisfy_any_point(name, output);
                    } else {
                        t.prerequisites.satisfy(point, name, output, forced);
                    }
                    t.suicide_prerequisites.satisfy(point, name, output, forced);
                }
                self.repool(&target);
                let within_limit = {
                    let limit = self.runahead_limit_point.clone();
                    self.get_task(&target)
                        .map(|t| limit.as_ref().map(|l| t.point <= *l).unwrap_or(false))
                        .unwrap_or(false)
                };
                if within_limit {
                    self.rh_release_and_queue(&target);
                }
                if self.get_task(&target).map(|t| t.suicide_ready()).unwrap_or(false) && !suicides.contains(&target) {
                    suicides.push(target);
                }
            }
        }

        for target in suicides {
            let mut msg = SUICIDE_MSG.to_string();
            if self.get_task(&target)
                   .map(|t| t.status.is_active() && !t.is_held)
                   .unwrap_or(false)
            {
                msg.push_str(" suiciding while active");
            }
            self.remove(&target, &msg);
        }

        if !forced && matches!(output, OUT_SUCCEEDED | OUT_EXPIRED | OUT_FAILED) {
            self.remove_if_complete(&identity);
        }
    }

    /// Remueve una tarea terminal si sus outputs requeridos están
    /// completos; si no, la retiene con warning (salvo back-compat).
    pub fn remove_if_complete(&mut self, identity: &str) {
        let Some(task) = self.get_task(identity) else { return };
        if self.config.back_compat {
            if task.status != TaskStatus::Failed {
                self.remove(identity, "finished");
            }
            if self.compute_runahead(false) {
                self.release_runahead_tasks();
            }
            return;
        }
        let incomplete = task.outputs.incomplete_labels();
        if !incomplete.is_empty() {
            warn!("[{identity}] did not complete required outputs: {incomplete:?}");
            return;
        }
        if task.flow_wait {
            // Retenida hasta que otro flow la absorba y engendre en
            // diferido sobre sus outputs ya completados.
            info!("[{identity}] completed, waiting for flow merge");
            return;
        }
        self.remove(identity, "finished");
        if self.stop_task_id.as_deref() == Some(identity) {
            self.stop_task_finished = true;
        }
        if self.compute_runahead(false) {
            self.release_runahead_tasks();
        }
    }

    /// Engendra sobre todos los outputs (o sólo los completados) de una
    /// instancia del pool.
    pub fn spawn_on_all_outputs(&mut self, identity: &str, completed_only: bool) {
        let Some(task) = self.get_task(identity) else { return };
        let snapshot = task.clone();
        self.spawn_children_of_proxy(&snapshot, completed_only);
    }

    // Igual que spawn_on_all_outputs pero sobre un proxy que puede no estar
    // en el pool (resolución diferida de flow-wait).
    fn spawn_children_of_proxy(&mut self, parent: &TaskProxy, completed_only: bool) {
        let labels: Vec<String> = if completed_only {
            parent.outputs.completed_labels()
        } else {
            parent.outputs.iter().map(|(l, _)| l.clone()).collect()
        };
        let parent_point = parent.point.clone();
        let parent_name = parent.name().to_string();
        let flow_nums = parent.flow_nums.clone();
        for label in labels {
            let children: Vec<ciclo_domain::GraphChild> = parent.tdef.children_of(&label).to_vec();
            for child in children {
                let c_point = match &child.offset {
                    Some(offset) => match parent_point.add(offset) {
                        Ok(p) => p,
                        Err(_) => continue,
                    },
                    None => parent_point.clone(),
                };
                let Some(c_id) = self.get_spawned_or_merged_task(&c_point, &child.name, &flow_nums) else {
                    continue;
                };
                if completed_only {
                    if let Some(t) = self.proxy_mut(&c_id) {
                        t.prerequisites.satisfy(&parent_point, &parent_name, &label, false);
                        t.suicide_prerequisites.satisfy(&parent_point, &parent_name, &label, false);
                    }
                    self.repool(&c_id);
                    let within = {
                        let limit = self.runahead_limit_point.clone();
                        self.get_task(&c_id)
                            .map(|t| limit.as_ref().map(|l| t.point <= *l).unwrap_or(false))
                            .unwrap_or(false)
                    };
                    if within {
                        self.rh_release_and_queue(&c_id);
                    }
                }
            }
        }
    }

    // Reevalúa la membresía oculto/principal tras satisfacer
    // prerequisitos. La transición es sólo oculto → principal.
    fn repool(&mut self, identity: &str) {
        let Some(point) = pool_point_of(&self.hidden_pool, identity) else {
            return;
        };
        let should_move = self.hidden_pool
                              .get(&point)
                              .and_then(|m| m.get(identity))
                              .map(|t| t.prereqs_all_satisfied() || t.is_manual_submit)
                              .unwrap_or(false);
        if !should_move {
            return;
        }
        let mut moved: Option<TaskProxy> = None;
        if let Some(map) = self.hidden_pool.get_mut(&point) {
            moved = map.shift_remove(identity);
            if map.is_empty() {
                self.hidden_pool.remove(&point);
            }
        }
        if let Some(task) = moved {
            self.main_pool.entry(point).or_default().insert(identity.to_string(), task);
            debug!("[{identity}] promoted to main task pool");
        }
    }

    /// Merge de flows sobre una instancia ya existente en el pool.
    pub fn merge_flows(&mut self, identity: &str, flow_nums: &FlowNums) {
        let Some(task) = self.get_task(identity) else { return };
        if *flow_nums == task.flow_nums {
            // Nada que hacer: mismo flow (AND-trigger o suicidio propio).
            return;
        }
        let was_final_incomplete = task.status.is_final() && !task.outputs.is_complete();
        let was_no_flow_or_wait = task.flow_nums.is_empty() || task.flow_wait;
        let tdef = task.tdef.clone();
        let next = task.next_point();

        if was_final_incomplete {
            info!("[{identity}] incomplete task absorbed by new flow");
            if let Some(t) = self.proxy_mut(identity) {
                t.merge_flow_nums(flow_nums);
                t.state_reset(TaskStatus::Waiting);
            }
            self.queue_task(identity);
        } else if was_no_flow_or_wait {
            info!("[{identity}] spawning on pre-merge outputs");
            let merged = {
                let t = self.proxy_mut(identity).expect("present above");
                t.merge_flow_nums(flow_nums);
                t.flow_wait = false;
                t.flow_nums.clone()
            };
            self.spawn_on_all_outputs(identity, true);
            self.spawn_to_rh_limit(&tdef, next, &merged);
        } else if let Some(t) = self.proxy_mut(identity) {
            t.merge_flow_nums(flow_nums);
        }
    }

    fn persist_tasks_to_hold(&mut self) {
        let rows: Vec<(String, String)> = self.tasks_to_hold
                                              .iter()
                                              .map(|(name, point)| (name.clone(), point.to_string()))
                                              .collect();
        self.db_mgr.put_tasks_to_hold(&rows);
    }
}

// Clave de comparación para elegir el mayor offset futuro.
fn interval_key(interval: &CycleInterval) -> i64 {
    match interval {
        CycleInterval::Integer(n) => *n,
        CycleInterval::Duration(d) => d.nominal_seconds(),
    }
}

// Punto del pool que contiene a `identity`, si alguno.
fn pool_point_of(pool: &PoolMap, identity: &str) -> Option<CyclePoint> {
    pool.iter()
        .find(|(_, map)| map.contains_key(identity))
        .map(|(point, _)| point.clone())
}
