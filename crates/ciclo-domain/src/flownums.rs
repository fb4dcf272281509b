//! Conjuntos de números de flow y sus formas textuales.
//!
//! La forma JSON ordenada (`serialise_flow_nums`) es la que persiste la base
//! de datos como parte de claves primarias; debe ser estable: mismo conjunto,
//! misma cadena.

use std::collections::BTreeSet;

/// Conjunto no ordenado de números de flow. BTreeSet para iteración estable.
pub type FlowNums = BTreeSet<i64>;

/// Forma JSON ordenada, p.ej. `[1,2]`. Clave en `task_pool`/`task_states`.
pub fn serialise_flow_nums(flow_nums: &FlowNums) -> String {
    let nums: Vec<i64> = flow_nums.iter().copied().collect();
    serde_json::to_string(&nums).unwrap_or_else(|_| "[]".to_string())
}

/// Inversa de `serialise_flow_nums`; entradas corruptas dan el conjunto
/// vacío (tarea fuera de todo flow).
pub fn deserialise_flow_nums(value: &str) -> FlowNums {
    serde_json::from_str::<Vec<i64>>(value).map(|v| v.into_iter().collect())
                                           .unwrap_or_default()
}

/// Forma canónica para humanos: `1,2,3`.
pub fn stringify_flow_nums(flow_nums: &FlowNums) -> String {
    flow_nums.iter()
             .map(|n| n.to_string())
             .collect::<Vec<_>>()
             .join(",")
}

/// Representación para logs. Si `full` es false, el flow default `{1}` se
/// suprime (es el caso abrumadoramente común).
pub fn repr_flow_nums(flow_nums: &FlowNums, full: bool) -> String {
    if !full && flow_nums.len() == 1 && flow_nums.contains(&1) {
        return String::new();
    }
    if flow_nums.is_empty() {
        return "(flows=none)".to_string();
    }
    format!("(flows={})", stringify_flow_nums(flow_nums))
}
