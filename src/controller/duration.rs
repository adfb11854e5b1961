//! # Duration Parsing
//!
//! Duration grammar for `validity`, `renewBefore` and the stored validity annotation.
//!
//! `validity` accepts `<n>h`, `<n>d` and `<n>y` and is converted once, at admission, into
//! an absolute hour count. Issuance and renewal only ever read that stored value.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;
const HOURS_PER_DAY: u64 = 24;
const DAYS_PER_YEAR: u64 = 365;

// Anchored: the whole string must be a sequence of <number><unit> groups
static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:ms|s|m|h))+$").expect("duration pattern is a valid regex")
});

static DURATION_COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ms|s|m|h)").expect("component pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration '{0}'. Expected format: <number><unit> with unit ms, s, m or h (e.g. '5m', '1h30m')")]
    InvalidFormat(String),
    #[error("invalid value {0} for Validity field, should end with `h`(hours), `d`(days) or `y`(years) e.g. 1y, 20d")]
    InvalidValidityUnit(String),
    #[error("invalid number in duration '{0}'")]
    InvalidNumber(String),
    #[error("duration '{0}' is too large")]
    Overflow(String),
    #[error("duration '{0}' must be greater than zero")]
    Zero(String),
}

/// Parse a Go-style compound duration such as "5m", "90s" or "1h30m".
pub fn parse_duration(value: &str) -> Result<Duration, DurationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }
    if !DURATION_REGEX.is_match(trimmed) {
        return Err(DurationError::InvalidFormat(trimmed.to_string()));
    }

    let mut total_millis: u64 = 0;
    for captures in DURATION_COMPONENT_REGEX.captures_iter(trimmed) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|_| DurationError::InvalidNumber(trimmed.to_string()))?;
        let unit_millis = match &captures["unit"] {
            "ms" => 1,
            "s" => 1000,
            "m" => SECS_PER_MINUTE * 1000,
            "h" => SECS_PER_HOUR * 1000,
            _ => return Err(DurationError::InvalidFormat(trimmed.to_string())),
        };
        total_millis = number
            .checked_mul(unit_millis)
            .and_then(|millis| total_millis.checked_add(millis))
            .ok_or_else(|| DurationError::Overflow(trimmed.to_string()))?;
    }

    Ok(Duration::from_millis(total_millis))
}

/// Certificate lifetime, fixed at admission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidityPeriod(Duration);

impl ValidityPeriod {
    pub fn from_hours(hours: u64) -> Result<Self, DurationError> {
        if hours == 0 {
            return Err(DurationError::Zero(format!("{hours}h")));
        }
        let secs = hours
            .checked_mul(SECS_PER_HOUR)
            .ok_or_else(|| DurationError::Overflow(format!("{hours}h")))?;
        Ok(Self(Duration::from_secs(secs)))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whole hours; the stored annotation is always written in hours
    pub fn hours(&self) -> u64 {
        self.0.as_secs() / SECS_PER_HOUR
    }

    /// The lifetime as a chrono duration for timestamp arithmetic
    pub fn to_chrono(&self) -> Result<chrono::Duration, DurationError> {
        chrono::Duration::from_std(self.0).map_err(|_| DurationError::Overflow(self.to_string()))
    }
}

impl fmt::Display for ValidityPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs % SECS_PER_HOUR == 0 && self.0.subsec_nanos() == 0 {
            write!(f, "{}h", secs / SECS_PER_HOUR)
        } else {
            write!(f, "{}ms", self.0.as_millis())
        }
    }
}

/// Parses the stored annotation form, which is any positive compound duration
impl FromStr for ValidityPeriod {
    type Err = DurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let duration = parse_duration(value)?;
        if duration.is_zero() {
            return Err(DurationError::Zero(value.trim().to_string()));
        }
        Ok(Self(duration))
    }
}

/// Convert a spec `validity` (`<n>h`, `<n>d` or `<n>y`) into an absolute lifetime.
pub fn parse_validity(value: &str) -> Result<ValidityPeriod, DurationError> {
    let trimmed = value.trim();
    let Some(unit) = trimmed.chars().last() else {
        return Err(DurationError::Empty);
    };
    let number = &trimmed[..trimmed.len() - unit.len_utf8()];

    let parse_count = |digits: &str| -> Result<u64, DurationError> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DurationError::InvalidNumber(trimmed.to_string()));
        }
        digits
            .parse::<u64>()
            .map_err(|_| DurationError::Overflow(trimmed.to_string()))
    };
    let overflow = || DurationError::Overflow(trimmed.to_string());

    let hours = match unit {
        'd' => parse_count(number)?
            .checked_mul(HOURS_PER_DAY)
            .ok_or_else(overflow)?,
        'y' => parse_count(number)?
            .checked_mul(DAYS_PER_YEAR * HOURS_PER_DAY)
            .ok_or_else(overflow)?,
        'h' => {
            // Hours must also be a valid duration string on their own
            parse_duration(trimmed)
                .map_err(|_| DurationError::InvalidValidityUnit(trimmed.to_string()))?;
            parse_count(number)?
        }
        _ => return Err(DurationError::InvalidValidityUnit(trimmed.to_string())),
    };

    ValidityPeriod::from_hours(hours).map_err(|e| match e {
        DurationError::Zero(_) => DurationError::Zero(trimmed.to_string()),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_single_units() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(" 4m30s ").unwrap(), Duration::from_secs(270));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert!(matches!(parse_duration("5"), Err(DurationError::InvalidFormat(_))));
        assert!(matches!(parse_duration("5d"), Err(DurationError::InvalidFormat(_))));
        assert!(matches!(parse_duration("m5"), Err(DurationError::InvalidFormat(_))));
        assert!(matches!(parse_duration("-5m"), Err(DurationError::InvalidFormat(_))));
        assert!(matches!(
            parse_duration("99999999999999999999h"),
            Err(DurationError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_parse_validity_units() {
        for n in [1_u64, 7, 30, 365] {
            assert_eq!(parse_validity(&format!("{n}d")).unwrap().hours(), n * 24);
            assert_eq!(parse_validity(&format!("{n}y")).unwrap().hours(), n * 365 * 24);
            assert_eq!(parse_validity(&format!("{n}h")).unwrap().hours(), n);
        }
    }

    #[test]
    fn test_parse_validity_rejects_other_units() {
        for value in ["10m", "10s", "10w", "10", "d", "1.5d", "x1d"] {
            assert!(parse_validity(value).is_err(), "{value} should be rejected");
        }
        assert!(matches!(
            parse_validity("10w"),
            Err(DurationError::InvalidValidityUnit(_))
        ));
    }

    #[test]
    fn test_parse_validity_rejects_zero_and_overflow() {
        assert!(matches!(parse_validity("0d"), Err(DurationError::Zero(_))));
        assert!(matches!(
            parse_validity("99999999999999999y"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn test_validity_period_round_trips_through_annotation_form() {
        let period = parse_validity("2d").unwrap();
        assert_eq!(period.to_string(), "48h");
        assert_eq!("48h".parse::<ValidityPeriod>().unwrap(), period);
        assert!("0h".parse::<ValidityPeriod>().is_err());
        assert!("soon".parse::<ValidityPeriod>().is_err());
    }
}
