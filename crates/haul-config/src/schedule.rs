//! When the daemon starts a retrieval pass.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::{ConfigError, Result};

/// A parsed `[schedule]` section.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period, first pass immediately
    Every(Duration),
    /// Wall-clock times from a cron expression, evaluated in UTC
    Cron(Box<Schedule>),
}

impl Cadence {
    /// Parse a cron expression.
    ///
    /// Accepts the classic five fields (`min hour dom month dow`) as well as
    /// the six- and seven-field forms with leading seconds and trailing year.
    pub fn cron(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let full = match expr.split_whitespace().count() {
            5 => format!("0 {}", expr),
            _ => expr.to_string(),
        };
        let schedule = Schedule::from_str(&full).map_err(|e| ConfigError::Invalid {
            field: "schedule.cron",
            reason: e.to_string(),
        })?;
        Ok(Cadence::Cron(Box::new(schedule)))
    }

    /// First fire time strictly after `from`, or `None` if there is none.
    ///
    /// A fixed period has no wall-clock anchor and always yields `from + period`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Every(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|d| from.checked_add_signed(d)),
            Cadence::Cron(schedule) => schedule.after(&from).next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_five_field_expression_fires_on_the_minute() {
        let cadence = Cadence::cron("*/15 * * * *").unwrap();

        assert_eq!(cadence.next_after(at(10, 7, 30)), Some(at(10, 15, 0)));
        assert_eq!(cadence.next_after(at(10, 15, 0)), Some(at(10, 30, 0)));
    }

    #[test]
    fn test_six_field_expression_keeps_seconds() {
        let cadence = Cadence::cron("30 0 2 * * *").unwrap();
        assert_eq!(cadence.next_after(at(1, 0, 0)), Some(at(2, 0, 30)));
    }

    #[test]
    fn test_bad_expression_names_field() {
        let err = Cadence::cron("every tuesday").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "schedule.cron",
                ..
            }
        ));
    }

    #[test]
    fn test_every_adds_period() {
        let cadence = Cadence::Every(Duration::from_secs(90));
        assert_eq!(cadence.next_after(at(9, 0, 0)), Some(at(9, 1, 30)));
    }
}
