//! Secuencias de recurrencia: puntos válidos sucesivos de una tarea.
//!
//! Una secuencia queda definida por un punto inicial, un intervalo positivo
//! y un punto final opcional. Cada definición de tarea posee su propio
//! subconjunto de puntos válidos (una o más secuencias).

use serde::{Deserialize, Serialize};

use crate::errors::{CyclingError, SequenceDegenerateError};
use crate::interval::CycleInterval;
use crate::point::CyclePoint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSequence {
    start: CyclePoint,
    interval: CycleInterval,
    stop: Option<CyclePoint>,
}

impl CycleSequence {
    /// Construye una secuencia validando que el intervalo avance el punto.
    /// Un intervalo que no avanza produce puntos adyacentes iguales
    /// (secuencia degenerada) y se rechaza aquí, no en runtime.
    pub fn new(start: CyclePoint,
               interval: CycleInterval,
               stop: Option<CyclePoint>)
               -> Result<Self, CyclingError> {
        let next = start.add(&interval)?;
        if next <= start {
            return Err(SequenceDegenerateError(format!("{start} / {interval}")).into());
        }
        Ok(Self { start, interval, stop })
    }

    pub fn start(&self) -> &CyclePoint {
        &self.start
    }

    pub fn stop(&self) -> Option<&CyclePoint> {
        self.stop.as_ref()
    }

    pub fn interval(&self) -> &CycleInterval {
        &self.interval
    }

    /// Primer punto de la secuencia `>= target`, o None si cae tras el stop.
    pub fn first_point(&self, target: &CyclePoint) -> Option<CyclePoint> {
        let mut point = if *target <= self.start {
            self.start.clone()
        } else {
            self.step_to(target)?
        };
        if point < *target {
            point = point.add(&self.interval).ok()?;
        }
        self.bounded(point)
    }

    /// Primer punto de la secuencia estrictamente posterior a `after`.
    pub fn next_point(&self, after: &CyclePoint) -> Option<CyclePoint> {
        if *after < self.start {
            return self.bounded(self.start.clone());
        }
        let at = self.step_to(after)?;
        let next = at.add(&self.interval).ok()?;
        self.bounded(next)
    }

    /// ¿Es `point` un punto válido de esta secuencia?
    pub fn is_valid(&self, point: &CyclePoint) -> bool {
        if *point < self.start {
            return false;
        }
        if let Some(stop) = &self.stop {
            if *point > *stop {
                return false;
            }
        }
        match (&self.start, &self.interval) {
            (CyclePoint::Integer(start), CycleInterval::Integer(step)) => {
                if let CyclePoint::Integer(p) = point {
                    (*p - *start) % *step == 0
                } else {
                    false
                }
            }
            _ => self.step_to(point).as_ref() == Some(point),
        }
    }

    // Mayor punto de la secuencia <= target. Entero: aritmética directa;
    // datetime: iteración desde el inicio (los intervalos de calendario no
    // admiten división exacta).
    fn step_to(&self, target: &CyclePoint) -> Option<CyclePoint> {
        if *target < self.start {
            return None;
        }
        match (&self.start, &self.interval) {
            (CyclePoint::Integer(start), CycleInterval::Integer(step)) => {
                let CyclePoint::Integer(t) = target else { return None };
                let n = (*t - *start) / *step;
                Some(CyclePoint::Integer(*start + n * *step))
            }
            _ => {
                let mut point = self.start.clone();
                loop {
                    let next = point.add(&self.interval).ok()?;
                    if next > *target {
                        return Some(point);
                    }
                    point = next;
                }
            }
        }
    }

    fn bounded(&self, point: CyclePoint) -> Option<CyclePoint> {
        match &self.stop {
            Some(stop) if point > *stop => None,
            _ => Some(point),
        }
    }
}
