use chrono::TimeDelta;
use runguard_core::{AppError, AppResult};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;
const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;
/// Longest accepted window, about a century.
const MAX_WINDOW_SECONDS: i64 = 36_525 * SECONDS_PER_DAY;

/// Strictly positive trailing window configured as an ISO-8601 duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLimit {
    text: String,
    duration: TimeDelta,
}

impl TimeLimit {
    /// Parses a duration such as `PT10M`, `P1DT12H` or `P2W`.
    ///
    /// Years and months are rejected because their length depends on the
    /// calendar. Fractional components are not supported.
    pub fn parse(field_name: &str, text: &str) -> AppResult<Self> {
        let normalized = text.trim().to_ascii_uppercase();
        let seconds = parse_iso8601_seconds(normalized.as_str()).map_err(|reason| {
            AppError::Configuration(format!(
                "{field_name} must be a positive ISO-8601 duration, got '{text}': {reason}"
            ))
        })?;

        if seconds <= 0 {
            return Err(AppError::Configuration(format!(
                "{field_name} must be greater than zero, got '{text}'"
            )));
        }

        let duration = TimeDelta::try_seconds(seconds)
            .filter(|_| seconds <= MAX_WINDOW_SECONDS)
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "{field_name} must not exceed P36525D, got '{text}'"
                ))
            })?;

        Ok(Self {
            text: normalized,
            duration,
        })
    }

    /// Returns the normalized ISO-8601 text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    /// Returns the window length.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.duration
    }
}

fn parse_iso8601_seconds(text: &str) -> Result<i64, &'static str> {
    let Some(rest) = text.strip_prefix('P') else {
        return Err("missing 'P' designator");
    };

    let (date_part, time_part) = match rest.split_once('T') {
        Some((date_part, time_part)) => {
            if time_part.is_empty() {
                return Err("'T' must be followed by a time component");
            }
            (date_part, Some(time_part))
        }
        None => (rest, None),
    };

    if date_part.is_empty() && time_part.is_none() {
        return Err("no duration components");
    }

    let mut total = sum_components(
        date_part,
        &[('W', SECONDS_PER_WEEK), ('D', SECONDS_PER_DAY)],
        "years and months are not supported",
    )?;

    if let Some(time_part) = time_part {
        let time_seconds = sum_components(
            time_part,
            &[
                ('H', SECONDS_PER_HOUR),
                ('M', SECONDS_PER_MINUTE),
                ('S', 1),
            ],
            "unknown time designator",
        )?;
        total = total.checked_add(time_seconds).ok_or("duration overflow")?;
    }

    Ok(total)
}

/// Sums `<digits><unit>` components whose units appear in `units` order.
fn sum_components(
    part: &str,
    units: &[(char, i64)],
    unknown_unit: &'static str,
) -> Result<i64, &'static str> {
    let mut total: i64 = 0;
    let mut next_unit = 0;
    let mut digits = String::new();

    for character in part.chars() {
        if character.is_ascii_digit() {
            digits.push(character);
            continue;
        }

        if digits.is_empty() {
            return Err("designator without a number");
        }

        let position = units[next_unit..]
            .iter()
            .position(|(unit, _)| *unit == character)
            .ok_or(unknown_unit)?;
        let (_, scale) = units[next_unit + position];
        next_unit += position + 1;

        let amount = digits.parse::<i64>().map_err(|_| "component overflow")?;
        let seconds = amount.checked_mul(scale).ok_or("duration overflow")?;
        total = total.checked_add(seconds).ok_or("duration overflow")?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err("number without a designator");
    }

    Ok(total)
}
