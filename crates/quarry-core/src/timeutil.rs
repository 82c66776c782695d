//! Time grains, durations, ISO 8601 periods, cron expressions and time zones

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Truncation unit for time dimensions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum TimeGrain {
    #[default]
    Unspecified,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// Parse a time grain. An empty string yields [`TimeGrain::Unspecified`].
pub fn parse_time_grain(s: &str) -> Result<TimeGrain> {
    let grain = match s.trim().to_lowercase().as_str() {
        "" => TimeGrain::Unspecified,
        "ms" | "millisecond" => TimeGrain::Millisecond,
        "s" | "second" => TimeGrain::Second,
        "min" | "minute" => TimeGrain::Minute,
        "h" | "hour" => TimeGrain::Hour,
        "d" | "day" => TimeGrain::Day,
        "w" | "week" => TimeGrain::Week,
        "month" => TimeGrain::Month,
        "q" | "quarter" => TimeGrain::Quarter,
        "y" | "year" => TimeGrain::Year,
        _ => return Err(Error::invalid_value("time grain", s, "unknown unit")),
    };
    Ok(grain)
}

static DURATION_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|s|m|h|d)").expect("valid duration regex"));

/// Parse a duration given as integer seconds or a string like `90s`, `24h` or `1h30m`
pub fn parse_duration(value: &serde_yaml::Value) -> Result<Duration> {
    match value {
        serde_yaml::Value::Number(n) => n
            .as_u64()
            .map(Duration::from_secs)
            .ok_or_else(|| Error::invalid_value("duration", n.to_string(), "must be a positive integer")),
        serde_yaml::Value::String(s) => parse_duration_str(s),
        other => Err(Error::invalid_value(
            "duration",
            format!("{other:?}"),
            "must be a number of seconds or a duration string",
        )),
    }
}

/// Parse a duration string like `90s`, `24h` or `1h30m`; a bare integer means seconds
pub fn parse_duration_str(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut consumed = 0;
    for caps in DURATION_PART.captures_iter(s) {
        let (Some(whole), Some(num), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if whole.start() != consumed {
            break;
        }
        consumed = whole.end();
        let n: f64 = num
            .as_str()
            .parse()
            .map_err(|_| Error::invalid_value("duration", s, "invalid number"))?;
        total += match unit.as_str() {
            "ms" => n / 1000.0,
            "s" => n,
            "m" => n * 60.0,
            "h" => n * 3600.0,
            _ => n * 86400.0,
        };
    }

    if s.is_empty() || consumed != s.len() {
        return Err(Error::invalid_value("duration", s, "expected a value like \"30s\" or \"1h30m\""));
    }
    Duration::try_from_secs_f64(total).map_err(|_| Error::invalid_value("duration", s, "out of range"))
}

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(\d+Y)?(\d+M)?(\d+W)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$")
        .expect("valid ISO 8601 regex")
});

/// Validate an ISO 8601 duration such as `P1W` or `PT1H`. The special value `inf` is accepted.
pub fn validate_iso8601(s: &str) -> Result<()> {
    if s == "inf" {
        return Ok(());
    }
    let valid = ISO_DURATION.is_match(s) && s != "P" && !s.ends_with('T');
    if !valid {
        return Err(Error::invalid_value("ISO 8601 duration", s, "expected a value like \"P1D\" or \"PT1H\""));
    }
    Ok(())
}

static TIME_ZONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(UTC|GMT|Local|[A-Za-z][A-Za-z0-9_+\-]*(/[A-Za-z0-9_+\-]+)+)$")
        .expect("valid time zone regex")
});

/// Validate an IANA time zone name
pub fn validate_time_zone(s: &str) -> Result<()> {
    if TIME_ZONE.is_match(s) {
        Ok(())
    } else {
        Err(Error::invalid_value("time zone", s, "expected an IANA name like \"America/New_York\""))
    }
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Validate a five or six field cron expression, or one of the `@` shorthands
pub fn validate_cron(expr: &str) -> Result<()> {
    let expr = expr.trim();
    if expr.starts_with('@') {
        return match expr {
            "@yearly" | "@annually" | "@monthly" | "@weekly" | "@daily" | "@midnight"
            | "@hourly" => Ok(()),
            _ => Err(Error::invalid_value("cron expression", expr, "unknown shorthand")),
        };
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    // Seconds are optional and come first
    let bounds: &[(u32, u32, &[&str])] = match fields.len() {
        5 => &[(0, 59, &[]), (0, 23, &[]), (1, 31, &[]), (1, 12, &MONTHS), (0, 7, &WEEKDAYS)],
        6 => &[
            (0, 59, &[]),
            (0, 59, &[]),
            (0, 23, &[]),
            (1, 31, &[]),
            (1, 12, &MONTHS),
            (0, 7, &WEEKDAYS),
        ],
        n => {
            return Err(Error::invalid_value(
                "cron expression",
                expr,
                format!("expected 5 or 6 fields, got {n}"),
            ));
        }
    };

    for (field, (min, max, names)) in fields.iter().zip(bounds) {
        validate_cron_field(field, *min, *max, names)
            .map_err(|message| Error::invalid_value("cron expression", expr, message))?;
    }
    Ok(())
}

fn validate_cron_field(field: &str, min: u32, max: u32, names: &[&str]) -> std::result::Result<(), String> {
    let value = |s: &str| -> std::result::Result<u32, String> {
        if let Ok(n) = s.parse::<u32>() {
            if n < min || n > max {
                return Err(format!("value {n} out of range {min}-{max}"));
            }
            return Ok(n);
        }
        let lower = s.to_lowercase();
        names
            .iter()
            .position(|n| *n == lower)
            .map(|i| i as u32 + min)
            .ok_or_else(|| format!("invalid value {s:?}"))
    };

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(format!("invalid step {step:?}")),
            }
        }
        if range == "*" || range == "?" {
            continue;
        }
        match range.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (value(lo)?, value(hi)?);
                if lo > hi {
                    return Err(format!("invalid range {range:?}"));
                }
            }
            None => {
                value(range)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", TimeGrain::Unspecified)]
    #[case("ms", TimeGrain::Millisecond)]
    #[case("minute", TimeGrain::Minute)]
    #[case("Day", TimeGrain::Day)]
    #[case("q", TimeGrain::Quarter)]
    #[case("year", TimeGrain::Year)]
    fn test_parse_time_grain(#[case] input: &str, #[case] expected: TimeGrain) {
        assert_eq!(parse_time_grain(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_time_grain_invalid() {
        assert!(parse_time_grain("fortnight").is_err());
    }

    #[rstest]
    #[case("90", 90)]
    #[case("90s", 90)]
    #[case("24h", 86400)]
    #[case("1h30m", 5400)]
    #[case("2d", 172800)]
    fn test_parse_duration_str(#[case] input: &str, #[case] secs: u64) {
        assert_eq!(parse_duration_str(input).unwrap().as_secs(), secs);
    }

    #[rstest]
    #[case("")]
    #[case("soon")]
    #[case("10 minutes")]
    #[case("99999999999999999999d")]
    #[case("5h garbage")]
    fn test_parse_duration_invalid(#[case] input: &str) {
        assert!(parse_duration_str(input).is_err());
    }

    #[test]
    fn test_parse_duration_number() {
        let value: serde_yaml::Value = serde_yaml::from_str("120").unwrap();
        assert_eq!(parse_duration(&value).unwrap().as_secs(), 120);
    }

    #[rstest]
    #[case("P1D", true)]
    #[case("PT1H", true)]
    #[case("P2W", true)]
    #[case("P1Y2M3DT4H5M6S", true)]
    #[case("inf", true)]
    #[case("P", false)]
    #[case("PT", false)]
    #[case("1 day", false)]
    fn test_validate_iso8601(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(validate_iso8601(input).is_ok(), ok);
    }

    #[rstest]
    #[case("0 * * * *", true)]
    #[case("*/15 9-17 * * mon-fri", true)]
    #[case("0 0 1 jan,jul *", true)]
    #[case("30 0 0 * * *", true)]
    #[case("@daily", true)]
    #[case("60 * * * *", false)]
    #[case("* * *", false)]
    #[case("*/0 * * * *", false)]
    #[case("@sometimes", false)]
    fn test_validate_cron(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(validate_cron(input).is_ok(), ok);
    }

    #[rstest]
    #[case("UTC", true)]
    #[case("America/Los_Angeles", true)]
    #[case("Etc/GMT+5", true)]
    #[case("Not A Zone", false)]
    fn test_validate_time_zone(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(validate_time_zone(input).is_ok(), ok);
    }
}
