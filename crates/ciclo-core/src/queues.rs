//! Colas independientes con límite: gobiernan cuántas instancias de cada
//! grupo pueden entrar al pipeline de submission por ciclo del scheduler.
//!
//! Cada tarea pertenece a exactamente una cola (la default si la
//! configuración no la asigna). `release_tasks` respeta el límite contando
//! las instancias activas más las liberadas en la misma ronda.

use indexmap::IndexMap;
use std::collections::VecDeque;

pub const DEFAULT_QUEUE: &str = "default";

/// Límite 0 = sin límite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub limit: usize,
    pub members: Vec<String>,
}

#[derive(Debug)]
struct LimitedQueue {
    limit: usize,
    members: Vec<String>,
    /// Identidades encoladas `punto/nombre`, FIFO.
    deque: VecDeque<(String, String)>, // (identity, task name)
}

impl LimitedQueue {
    fn is_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }
}

#[derive(Debug)]
pub struct TaskQueueManager {
    queues: IndexMap<String, LimitedQueue>,
}

impl TaskQueueManager {
    /// Arma las colas desde configuración más la cola default para tareas
    /// sin asignar.
    pub fn new(configs: &[QueueConfig]) -> Self {
        let mut queues = IndexMap::new();
        for cfg in configs {
            queues.insert(cfg.name.clone(),
                          LimitedQueue { limit: cfg.limit,
                                         members: cfg.members.clone(),
                                         deque: VecDeque::new() });
        }
        queues.entry(DEFAULT_QUEUE.to_string())
              .or_insert(LimitedQueue { limit: 0,
                                        members: Vec::new(),
                                        deque: VecDeque::new() });
        Self { queues }
    }

    fn queue_for(&mut self, task_name: &str, assigned: Option<&str>) -> &mut LimitedQueue {
        let key = assigned.filter(|q| self.queues.contains_key(*q))
                          .map(str::to_string)
                          .or_else(|| {
                              self.queues
                                  .iter()
                                  .find(|(name, q)| *name != DEFAULT_QUEUE && q.is_member(task_name))
                                  .map(|(name, _)| name.clone())
                          })
                          .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        self.queues.get_mut(&key).expect("queue exists by construction")
    }

    /// Encola una identidad si no está ya encolada.
    pub fn push_task(&mut self, task_name: &str, identity: &str, assigned_queue: Option<&str>) {
        let queue = self.queue_for(task_name, assigned_queue);
        if !queue.deque.iter().any(|(id, _)| id == identity) {
            queue.deque.push_back((identity.to_string(), task_name.to_string()));
        }
    }

    pub fn remove_task(&mut self, identity: &str) {
        for queue in self.queues.values_mut() {
            queue.deque.retain(|(id, _)| id != identity);
        }
    }

    pub fn queued_identities(&self) -> Vec<String> {
        self.queues
            .values()
            .flat_map(|q| q.deque.iter().map(|(id, _)| id.clone()))
            .collect()
    }

    /// Libera tareas respetando el límite de cada cola.
    ///
    /// `active_counts` es instancias activas por nombre de tarea (preparing,
    /// submitted, running o en el pipeline de submission).
    pub fn release_tasks(&mut self, active_counts: &IndexMap<String, usize>) -> Vec<String> {
        let mut released = Vec::new();
        for queue in self.queues.values_mut() {
            // Activas que cuentan contra el límite: las de los miembros de
            // la cola más las de los nombres actualmente encolados.
            let mut relevant: std::collections::BTreeSet<String> = queue.members.iter().cloned().collect();
            for (_, name) in &queue.deque {
                relevant.insert(name.clone());
            }
            let mut active: usize = relevant.iter().filter_map(|name| active_counts.get(name)).sum();
            while let Some((identity, _name)) = queue.deque.front() {
                if queue.limit != 0 && active >= queue.limit {
                    break;
                }
                released.push(identity.clone());
                queue.deque.pop_front();
                active += 1;
            }
        }
        released
    }
}
