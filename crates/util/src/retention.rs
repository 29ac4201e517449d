//! Retention windows written as `<number><unit>`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// A retention window such as `30d`, `12h`, `45m`, `90s` or `2w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    amount: i64,
    unit: RetentionUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetentionUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl RetentionUnit {
    fn suffix(self) -> char {
        match self {
            Self::Seconds => 's',
            Self::Minutes => 'm',
            Self::Hours => 'h',
            Self::Days => 'd',
            Self::Weeks => 'w',
        }
    }

    fn seconds(self) -> i64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
        }
    }
}

impl Retention {
    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.amount.saturating_mul(self.unit.seconds()))
    }

    /// Oldest timestamp still retained when evaluated at `now`.
    pub fn cutoff_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.as_delta()).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl FromStr for Retention {
    type Err = RetentionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some(last) = trimmed.chars().last() else {
            return Err(RetentionParseError::Empty);
        };
        let unit = match last.to_ascii_lowercase() {
            's' => RetentionUnit::Seconds,
            'm' => RetentionUnit::Minutes,
            'h' => RetentionUnit::Hours,
            'd' => RetentionUnit::Days,
            'w' => RetentionUnit::Weeks,
            other => return Err(RetentionParseError::UnknownUnit(other)),
        };
        let digits = &trimmed[..trimmed.len() - last.len_utf8()];
        let amount = digits
            .parse::<i64>()
            .ok()
            .filter(|amount| *amount >= 0)
            .ok_or_else(|| RetentionParseError::InvalidAmount(digits.to_string()))?;
        Ok(Self { amount, unit })
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetentionParseError {
    #[error("retention is empty; expected e.g. '30d'")]
    Empty,

    #[error("unknown retention unit '{0}'; expected one of s, m, h, d, w")]
    UnknownUnit(char),

    #[error("invalid retention amount '{0}'")]
    InvalidAmount(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_units() {
        assert_eq!("90s".parse::<Retention>().unwrap().as_delta(), TimeDelta::seconds(90));
        assert_eq!("45m".parse::<Retention>().unwrap().as_delta(), TimeDelta::minutes(45));
        assert_eq!("12h".parse::<Retention>().unwrap().as_delta(), TimeDelta::hours(12));
        assert_eq!("30d".parse::<Retention>().unwrap().as_delta(), TimeDelta::days(30));
        assert_eq!("2W".parse::<Retention>().unwrap().as_delta(), TimeDelta::weeks(2));
        assert_eq!("30d".parse::<Retention>().unwrap().to_string(), "30d");
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!("".parse::<Retention>(), Err(RetentionParseError::Empty));
        assert_eq!("30y".parse::<Retention>(), Err(RetentionParseError::UnknownUnit('y')));
        assert_eq!("d".parse::<Retention>(), Err(RetentionParseError::InvalidAmount(String::new())));
        assert_eq!("-1d".parse::<Retention>(), Err(RetentionParseError::InvalidAmount("-1".into())));
    }

    #[test]
    fn cutoff_subtracts_window() {
        let now = DateTime::parse_from_rfc3339("2024-05-31T00:00:00Z").unwrap().with_timezone(&Utc);
        let cutoff = "30d".parse::<Retention>().unwrap().cutoff_from(now);
        assert_eq!(cutoff.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }
}
