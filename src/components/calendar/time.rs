use super::models::EntryDateTime;
use crate::error::{calendar_error, AppResult};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Layout the calendar uses for timestamps, with optional fractional seconds
const ENTRY_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

impl EntryDateTime {
    /// Build a UTC timestamp in the calendar's wire layout
    pub fn utc(at: DateTime<Utc>) -> Self {
        Self {
            date_time: at.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            time_zone: "UTC".to_string(),
        }
    }

    /// Resolve to an instant.
    ///
    /// The entry's own timezone label wins when it is UTC or an IANA name;
    /// anything else (Windows zone names) falls back to `fallback`, which is
    /// the zone the calendar was asked to report times in.
    pub fn resolve(&self, fallback: Tz) -> AppResult<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(self.date_time.trim(), ENTRY_DATE_TIME_FORMAT)
            .map_err(|e| {
                calendar_error(&format!(
                    "Failed to parse datetime '{}': {}",
                    self.date_time, e
                ))
            })?;

        let zone = self.time_zone.trim();
        if zone.is_empty() || zone.eq_ignore_ascii_case("UTC") {
            return Ok(Utc.from_utc_datetime(&naive));
        }

        let tz = zone.parse::<Tz>().unwrap_or(fallback);
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            // Take the earlier reading of a repeated hour
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(calendar_error(&format!(
                "Nonexistent local time '{}' in {}",
                self.date_time, tz
            ))),
        }
    }
}

/// Format an instant as HH:MM in the given zone
pub fn format_clock(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%H:%M").to_string()
}

/// Format a duration as whole minutes, e.g. "30min"
pub fn format_minutes(duration: Duration) -> String {
    format!("{}min", duration.num_minutes())
}
