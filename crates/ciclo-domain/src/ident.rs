//! Identificadores universales: `user/workflow//cycle/task:selector/job`.
//!
//! El separador `//` parte el id en su mitad de workflow y su mitad
//! relativa. Se aceptan además continuaciones relativas (`//cycle/task`
//! tras un workflow ya conocido) y las formas legadas `task.cycle` y
//! `cycle/task`. Los comodines glob (`*`) se conservan tal cual: la
//! resolución contra el pool ocurre en otra capa.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::InputError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub user: Option<String>,
    pub workflow: Option<String>,
    pub cycle: Option<String>,
    pub cycle_selector: Option<String>,
    pub task: Option<String>,
    pub task_selector: Option<String>,
    pub job: Option<String>,
}

impl Tokens {
    /// Parsea un id completo o relativo.
    pub fn parse(id: &str) -> Result<Tokens, InputError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(InputError("empty id".into()));
        }

        if let Some((head, rel)) = id.split_once("//") {
            let mut tokens = Self::parse_relative(rel)?;
            if !head.is_empty() {
                let head = head.strip_prefix('~').unwrap_or(head);
                match head.split_once('/') {
                    Some((user, workflow)) => {
                        if user.is_empty() || workflow.is_empty() {
                            return Err(InputError(format!("invalid id: {id}")));
                        }
                        tokens.user = Some(user.to_string());
                        tokens.workflow = Some(workflow.to_string());
                    }
                    None => tokens.workflow = Some(head.to_string()),
                }
            }
            return Ok(tokens);
        }

        // Formas legadas sin `//`.
        if let Some((first, rest)) = id.split_once('/') {
            if looks_like_cycle(first) {
                // cycle/task[:selector]
                return Self::parse_relative(&format!("{first}/{rest}"));
            }
            // user/workflow o workflow con barras: todo es el workflow.
            return Ok(Tokens { workflow: Some(id.to_string()),
                               ..Tokens::default() });
        }
        if let Some((task, cycle)) = id.rsplit_once('.') {
            if looks_like_cycle(cycle) && !task.is_empty() {
                // task.cycle (forma de la generación anterior)
                return Ok(Tokens { cycle: Some(cycle.to_string()),
                                   task: Some(task.to_string()),
                                   ..Tokens::default() });
            }
        }
        Ok(Tokens { workflow: Some(id.to_string()),
                    ..Tokens::default() })
    }

    /// Parsea la mitad relativa `cycle[:sel]/task[:sel]/job`.
    pub fn parse_relative(rel: &str) -> Result<Tokens, InputError> {
        let rel = rel.trim();
        if rel.is_empty() {
            return Err(InputError("empty relative id".into()));
        }
        let mut tokens = Tokens::default();
        let mut segments = rel.split('/');

        let cycle_seg = segments.next().filter(|s| !s.is_empty())
                                .ok_or_else(|| InputError(format!("invalid relative id: {rel}")))?;
        let (cycle, cycle_sel) = split_selector(cycle_seg);
        tokens.cycle = Some(cycle.to_string());
        tokens.cycle_selector = cycle_sel.map(str::to_string);

        if let Some(task_seg) = segments.next() {
            if task_seg.is_empty() {
                return Err(InputError(format!("invalid relative id: {rel}")));
            }
            let (task, task_sel) = split_selector(task_seg);
            tokens.task = Some(task.to_string());
            tokens.task_selector = task_sel.map(str::to_string);
        }

        if let Some(job_seg) = segments.next() {
            if job_seg.is_empty() || !job_seg.bytes().all(|b| b.is_ascii_digit() || b == b'*') {
                return Err(InputError(format!("invalid job id: {job_seg}")));
            }
            tokens.job = Some(job_seg.to_string());
        }

        if segments.next().is_some() {
            return Err(InputError(format!("too many id segments: {rel}")));
        }
        Ok(tokens)
    }

    /// Identidad relativa `cycle/task` (la clave del pool).
    pub fn relative_id(&self) -> String {
        match (&self.cycle, &self.task) {
            (Some(c), Some(t)) => format!("{c}/{t}"),
            (Some(c), None) => c.clone(),
            _ => String::new(),
        }
    }

    pub fn is_relative(&self) -> bool {
        self.workflow.is_none() && self.cycle.is_some()
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "~{user}/")?;
        }
        if let Some(workflow) = &self.workflow {
            write!(f, "{workflow}")?;
        }
        if self.cycle.is_some() {
            write!(f, "//{}", self.relative_id())?;
            if let Some(sel) = &self.task_selector {
                write!(f, ":{sel}")?;
            }
            if let Some(job) = &self.job {
                write!(f, "/{job}")?;
            }
        }
        Ok(())
    }
}

fn split_selector(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once(':') {
        Some((head, sel)) => (head, Some(sel)),
        None => (segment, None),
    }
}

// Heurística para las formas legadas: un punto de ciclo empieza con dígito
// o es un glob.
fn looks_like_cycle(s: &str) -> bool {
    s == "*" || s.bytes().next().is_some_and(|b| b.is_ascii_digit())
}
