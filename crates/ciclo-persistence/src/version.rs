//! Versiones del scheduler: triple `major.minor.patch` con sufijo de
//! pre-release opcional (`0.3.0rc1`, `0.3.0-rc1`). Un pre-release ordena
//! antes que la release del mismo triple.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre: Option<String>,
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => std::cmp::Ordering::Equal,
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "{pre}")?;
        }
        Ok(())
    }
}

/// Parseo laxo: acepta `0.9.0`, `0.3.0rc1`, `0.3.0-rc1`, `0.3`.
pub fn parse_version(value: &str) -> Option<Version> {
    let value = value.trim();
    let mut numbers = [0u32; 3];
    let mut pre = None;
    for (i, part) in value.splitn(3, '.').enumerate() {
        let digits_end = part.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits_end == 0 {
            return None;
        }
        numbers[i] = part[..digits_end].parse().ok()?;
        let rest = &part[digits_end..];
        if !rest.is_empty() {
            if i < 2 && value.splitn(3, '.').count() > i + 1 {
                // sufijo en una componente intermedia no es una versión
                return None;
            }
            pre = Some(rest.trim_start_matches('-').to_string());
        }
    }
    Some(Version { major: numbers[0],
                   minor: numbers[1],
                   patch: numbers[2],
                   pre })
}
