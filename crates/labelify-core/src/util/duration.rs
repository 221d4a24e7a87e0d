//! Interval parser for config values.
//!
//! Accepts one or more `<number><unit>` segments:
//! - `250ms`, `30s`, `5m`, `2h`
//! - combined: `1h30m`, `1m30s`

use std::time::Duration;

/// Error type for duration parsing failures.
#[derive(Debug, Clone)]
pub struct DurationParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse duration '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for DurationParseError {}

/// Parse an interval string into a `Duration`.
///
/// # Supported units
///
/// | Unit | Example | Meaning |
/// |------|---------|---------|
/// | `ms` | `250ms` | milliseconds |
/// | `s`  | `30s`   | seconds |
/// | `m`  | `5m`    | minutes |
/// | `h`  | `1h`    | hours |
///
/// # Examples
///
/// ```
/// use labelify_core::util::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    let err = |message: &str| DurationParseError {
        input: input.to_string(),
        message: message.to_string(),
    };

    if input.is_empty() {
        return Err(err("empty duration string"));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(err("expected a number"));
        }
        let (number_str, tail) = rest.split_at(digits);
        let number: u64 = number_str.parse().map_err(|_| err("number out of range"))?;

        let unit_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if unit_len == 0 {
            return Err(err("missing unit (use ms, s, m or h)"));
        }
        let (unit, tail) = tail.split_at(unit_len);

        let segment = match unit {
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number.saturating_mul(60)),
            "h" => Duration::from_secs(number.saturating_mul(3600)),
            _ => return Err(err("unknown unit (use ms, s, m or h)")),
        };

        total = total
            .checked_add(segment)
            .ok_or_else(|| err("duration overflow"))?;
        rest = tail;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_combined_segments() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("1s500ms").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("5m x").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn test_error_message_contains_input() {
        let e = parse_duration("abc").unwrap_err();
        assert_eq!(e.input, "abc");
        assert!(e.to_string().contains("abc"));
    }
}
