//! ciclo-core: kernel de scheduling cíclico
//!
//! Propósito:
//! - Mantener el pool de instancias de tarea (principal + oculto) y
//!   conducirlas por su ciclo de vida a través de los puntos de ciclo,
//!   reaccionando a outputs y persistiendo todo por el manager de base de
//!   datos.
//! - El kernel es un lazo cooperativo de un solo hilo: todas las
//!   mutaciones del pool, el staging a base y la lógica de transición
//!   corren en ese lazo; el único punto de suspensión es el poller.
//!
//! Componentes principales:
//! - `pool`: los dos mapas de instancias y los algoritmos de
//!   spawn/release/remove/merge, el governor de runahead, holds, stall,
//!   expiración, restart y reload.
//! - `flow`: contador y metadatos de flows; semántica all/new/none.
//! - `queues`: colas independientes con límite.
//! - `proxy`: la instancia viva de una tarea.
//! - `config`: contrato con el parser de grafo externo.
//! - `poll`: polling acotado de condiciones sobre la base pública.

pub mod config;
pub mod flow;
pub mod poll;
pub mod pool;
pub mod proxy;
pub mod queues;
pub mod util;

pub use config::{RunaheadLimit, WorkflowConfig, WorkflowConfigBuilder};
pub use flow::{validate_flow_opts, FlowManager, FlowMetadata, FLOW_ALL, FLOW_NEW, FLOW_NONE};
pub use poll::{PollChecker, Poller, WorkflowStatePoller};
pub use pool::{StopMode, TaskPool};
pub use proxy::TaskProxy;
pub use queues::{QueueConfig, TaskQueueManager, DEFAULT_QUEUE};
