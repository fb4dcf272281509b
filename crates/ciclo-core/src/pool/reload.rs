//! Reload de definiciones en caliente.
//!
//! Huérfanas (nombres ausentes en la nueva config): si están activas
//! siguen corriendo con su definición previa pero sin hijos en el grafo
//! (no engendran más); si no, se remueven. Las demás instancias se
//! reconstruyen desde la nueva definición copiando el estado de runtime.
//! Las colas se rearman desde cero: una tarea liberada que aún no llegó a
//! preparing puede quedar retenida por los límites nuevos.

use log::{info, warn};
use std::sync::Arc;

use crate::config::WorkflowConfig;
use crate::proxy::TaskProxy;
use crate::queues::TaskQueueManager;

use super::{pool_point_of, TaskPool};

impl TaskPool {
    pub fn set_do_reload(&mut self, config: WorkflowConfig) {
        info!("Reload pending");
        self.do_reload_config = Some(config);
    }

    pub fn has_reload_pending(&self) -> bool {
        self.do_reload_config.is_some()
    }

    pub fn reload_taskdefs(&mut self) {
        let Some(new_config) = self.do_reload_config.take() else {
            return;
        };
        info!("Reloading task definitions");

        for identity in self.all_identities() {
            let Some(task) = self.get_task(&identity) else { continue };
            let name = task.name().to_string();

            if !new_config.taskdefs.contains_key(&name) {
                if task.status.is_active() {
                    warn!("[{identity}] orphaned task will run to completion but spawn no children");
                    let mut orphan_def = (*task.tdef).clone();
                    orphan_def.graph_children.clear();
                    if let Some(t) = self.proxy_mut(&identity) {
                        t.tdef = Arc::new(orphan_def);
                    }
                } else {
                    warn!("[{identity}] removed from the pool (task definition removed)");
                    self.remove(&identity, "task definition removed");
                }
                continue;
            }

            // Proxy de reemplazo desde la nueva definición, con el estado
            // de runtime copiado encima.
            let old = self.get_task(&identity).cloned().expect("present above");
            let new_def = new_config.get_taskdef(&name).expect("checked above");
            let initial = new_config.initial_point.clone();
            let mut replacement = TaskProxy::new(new_def,
                                                 old.point.clone(),
                                                 old.flow_nums.clone(),
                                                 old.submit_num,
                                                 old.is_manual_submit,
                                                 old.flow_wait,
                                                 &initial);
            replacement.status = old.status;
            replacement.is_held = old.is_held;
            replacement.is_runahead = old.is_runahead;
            replacement.is_late = old.is_late;
            replacement.try_num = old.try_num;
            replacement.platform = old.platform.clone();
            replacement.time_created = old.time_created.clone();
            replacement.time_updated = old.time_updated.clone();
            replacement.time_submit = old.time_submit.clone();
            replacement.time_run = old.time_run.clone();
            replacement.timeout = old.timeout;
            for label in old.outputs.completed_labels() {
                replacement.outputs.set_completed(&label);
            }
            for (key, state) in old.prerequisites.iter() {
                replacement.prerequisites.set_state(key, state.clone());
            }
            for (key, state) in old.suicide_prerequisites.iter() {
                replacement.suicide_prerequisites.set_state(key, state.clone());
            }
            self.drop_from_pool_maps(&identity);
            self.add_to_pool(replacement, false);
        }

        self.config = new_config;
        self.queue_mgr = TaskQueueManager::new(&self.config.queues);

        // Re-encolar desde cero contra las colas nuevas.
        let main_ids = self.main_identities();
        for identity in &main_ids {
            if let Some(task) = self.proxy_mut(identity) {
                task.is_queued = false;
            }
        }
        for identity in main_ids {
            let ready = self.get_task(&identity).map(|t| t.is_ready_to_run()).unwrap_or(false);
            if ready {
                self.queue_task(&identity);
            }
        }

        self.compute_runahead(true);
        self.release_runahead_tasks();
    }

    // Baja cruda de los mapas, sin updates de base (el reemplazo re-entra
    // por add_to_pool).
    fn drop_from_pool_maps(&mut self, identity: &str) {
        if let Some(point) = pool_point_of(&self.hidden_pool, identity) {
            if let Some(map) = self.hidden_pool.get_mut(&point) {
                map.shift_remove(identity);
                if map.is_empty() {
                    self.hidden_pool.remove(&point);
                }
            }
            return;
        }
        if let Some(point) = pool_point_of(&self.main_pool, identity) {
            if let Some(map) = self.main_pool.get_mut(&point) {
                map.shift_remove(identity);
                if map.is_empty() {
                    self.main_pool.remove(&point);
                }
            }
        }
    }
}
