//! Intervalos de ciclo y duraciones ISO-8601.
//!
//! En ciclado entero el intervalo es un conteo de ciclos; en datetime es una
//! duración `P[nY][nM][nW][nD][T[nH][nM][nS]]`. Las componentes de calendario
//! (años/meses) se aplican con aritmética de calendario, el resto como
//! segundos exactos.

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::IntervalParsingError;
use crate::point::CyclingMode;

/// Duración ISO-8601 con signo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IsoDuration {
    pub negative: bool,
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl IsoDuration {
    pub fn is_zero(&self) -> bool {
        self.years == 0
        && self.months == 0
        && self.weeks == 0
        && self.days == 0
        && self.hours == 0
        && self.minutes == 0
        && self.seconds == 0
    }

    pub fn negated(mut self) -> Self {
        self.negative = !self.negative;
        self
    }

    /// Aplica la duración a un instante UTC. Meses y años primero (aritmética
    /// de calendario), luego el resto como offset exacto.
    pub fn add_to(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let months = self.years * 12 + self.months;
        let exact = ChronoDuration::weeks(self.weeks as i64)
                    + ChronoDuration::days(self.days as i64)
                    + ChronoDuration::hours(self.hours as i64)
                    + ChronoDuration::minutes(self.minutes as i64)
                    + ChronoDuration::seconds(self.seconds as i64);
        if self.negative {
            dt.checked_sub_months(Months::new(months)).unwrap_or(dt) - exact
        } else {
            dt.checked_add_months(Months::new(months)).unwrap_or(dt) + exact
        }
    }

    /// Segundos nominales de la duración (meses = 30 días, años = 365).
    /// Sólo para estimaciones (expiry de offsets de calendario); la
    /// aritmética de puntos usa `add_to`.
    pub fn nominal_seconds(&self) -> i64 {
        let secs = self.years as i64 * 365 * 86400
                   + self.months as i64 * 30 * 86400
                   + self.weeks as i64 * 7 * 86400
                   + self.days as i64 * 86400
                   + self.hours as i64 * 3600
                   + self.minutes as i64 * 60
                   + self.seconds as i64;
        if self.negative {
            -secs
        } else {
            secs
        }
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "P")?;
        if self.years > 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.weeks > 0 {
            write!(f, "{}W", self.weeks)?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds > 0 {
            write!(f, "T")?;
            if self.hours > 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes > 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds > 0 {
                write!(f, "{}S", self.seconds)?;
            }
        }
        if self.is_zero() {
            write!(f, "T0S")?;
        }
        Ok(())
    }
}

/// Intervalo entre puntos, en el régimen correspondiente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleInterval {
    Integer(i64),
    Duration(IsoDuration),
}

impl CycleInterval {
    pub fn is_zero(&self) -> bool {
        match self {
            CycleInterval::Integer(n) => *n == 0,
            CycleInterval::Duration(d) => d.is_zero(),
        }
    }

    pub fn negated(&self) -> CycleInterval {
        match self {
            CycleInterval::Integer(n) => CycleInterval::Integer(-n),
            CycleInterval::Duration(d) => CycleInterval::Duration(d.negated()),
        }
    }

    pub fn nominal_seconds(&self) -> i64 {
        match self {
            CycleInterval::Integer(_) => 0,
            CycleInterval::Duration(d) => d.nominal_seconds(),
        }
    }
}

impl fmt::Display for CycleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleInterval::Integer(n) => write!(f, "{n}"),
            CycleInterval::Duration(d) => write!(f, "{d}"),
        }
    }
}

/// Parsea un intervalo sin signo externo (el signo lo maneja `add_offset`;
/// aquí se acepta también un `-` inicial para usos directos).
pub fn parse_interval(value: &str, mode: CyclingMode) -> Result<CycleInterval, IntervalParsingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(IntervalParsingError("empty interval".into()));
    }
    match mode {
        CyclingMode::Integer => {
            // P1, P3... también se aceptan en ciclado entero (forma abreviada
            // de recurrencias); el cuerpo tras la P debe ser un entero.
            let body = value.strip_prefix('P').unwrap_or(value);
            body.parse::<i64>()
                .map(CycleInterval::Integer)
                .map_err(|_| IntervalParsingError(value.into()))
        }
        CyclingMode::DateTime => parse_duration(value).map(CycleInterval::Duration),
    }
}

/// Parser de duraciones `[-]P[nY][nM][nW][nD][T[nH][nM][nS]]`.
pub fn parse_duration(value: &str) -> Result<IsoDuration, IntervalParsingError> {
    let original = value;
    let (negative, value) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let body = value.strip_prefix('P').ok_or_else(|| IntervalParsingError(original.into()))?;

    let mut dur = IsoDuration { negative, ..IsoDuration::default() };
    let mut in_time = false;
    let mut digits = String::new();
    let mut seen_any = false;

    for ch in body.chars() {
        match ch {
            'T' if !in_time => {
                if !digits.is_empty() {
                    return Err(IntervalParsingError(original.into()));
                }
                in_time = true;
            }
            '0'..='9' => digits.push(ch),
            designator => {
                let n: u32 = digits.parse().map_err(|_| IntervalParsingError(original.into()))?;
                digits.clear();
                seen_any = true;
                match (designator, in_time) {
                    ('Y', false) => dur.years = n,
                    ('M', false) => dur.months = n,
                    ('W', false) => dur.weeks = n,
                    ('D', false) => dur.days = n,
                    ('H', true) => dur.hours = n,
                    ('M', true) => dur.minutes = n,
                    ('S', true) => dur.seconds = n,
                    _ => return Err(IntervalParsingError(original.into())),
                }
            }
        }
    }
    if !digits.is_empty() || !seen_any {
        return Err(IntervalParsingError(original.into()));
    }
    Ok(dur)
}
