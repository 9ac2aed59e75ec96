//! Time-window representation and parsing.
//!
//! A pending calendar action's `time_window` is either a relative label
//! ("today_afternoon") or a concrete instant: an explicit two-variant sum
//! type, never inferred from string shape at the use site. Explicit
//! date-time input from the frontend arrives as `YYYY-MM-DDTHH:MM`, an
//! RFC 3339 string, or `YYYY-MM-DDTHH:MM[±off]|Zone` where `Zone` is the
//! IANA name of the user's local zone.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Default block length when a free-text time estimate is unparseable.
pub const DEFAULT_BLOCK_MINUTES: u32 = 30;
/// Accepted calendar-block duration bounds, in minutes.
pub const MIN_BLOCK_MINUTES: u32 = 5;
pub const MAX_BLOCK_MINUTES: u32 = 240;

/// Fixed relative scheduling offsets offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelativeTime {
    #[serde(rename = "now")]
    Now,
    #[serde(rename = "in_1_hour")]
    InOneHour,
    #[serde(rename = "in_2_hours")]
    InTwoHours,
    #[serde(rename = "today_morning")]
    TodayMorning,
    #[serde(rename = "today_afternoon")]
    TodayAfternoon,
    #[serde(rename = "today_evening")]
    TodayEvening,
    #[serde(rename = "tomorrow_morning")]
    TomorrowMorning,
    #[serde(rename = "tomorrow_afternoon")]
    TomorrowAfternoon,
}

impl RelativeTime {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelativeTime::Now => "now",
            RelativeTime::InOneHour => "in_1_hour",
            RelativeTime::InTwoHours => "in_2_hours",
            RelativeTime::TodayMorning => "today_morning",
            RelativeTime::TodayAfternoon => "today_afternoon",
            RelativeTime::TodayEvening => "today_evening",
            RelativeTime::TomorrowMorning => "tomorrow_morning",
            RelativeTime::TomorrowAfternoon => "tomorrow_afternoon",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "now" => Some(RelativeTime::Now),
            "in_1_hour" => Some(RelativeTime::InOneHour),
            "in_2_hours" => Some(RelativeTime::InTwoHours),
            "today_morning" => Some(RelativeTime::TodayMorning),
            "today_afternoon" => Some(RelativeTime::TodayAfternoon),
            "today_evening" => Some(RelativeTime::TodayEvening),
            "tomorrow_morning" => Some(RelativeTime::TomorrowMorning),
            "tomorrow_afternoon" => Some(RelativeTime::TomorrowAfternoon),
            _ => None,
        }
    }

    /// Resolve the label to a wall-clock instant in the user's zone.
    ///
    /// "now" rounds up to the next 5-minute mark; a `today_*` label whose
    /// hour has already passed rolls over to the same hour tomorrow.
    pub fn resolve(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        match self {
            RelativeTime::Now => {
                let base = truncate_to_minute(now);
                let rounded = ((base.minute() / 5) + 1) * 5;
                let start = if rounded >= 60 {
                    (base + Duration::hours(1))
                        .with_minute(0)
                        .unwrap_or(base + Duration::hours(1))
                } else {
                    base.with_minute(rounded).unwrap_or(base)
                };
                if start <= now {
                    truncate_to_minute(now + Duration::minutes(5))
                } else {
                    start
                }
            }
            RelativeTime::InOneHour => truncate_to_minute(now + Duration::hours(1)),
            RelativeTime::InTwoHours => truncate_to_minute(now + Duration::hours(2)),
            RelativeTime::TodayMorning => next_occurrence_of_hour(now, 9),
            RelativeTime::TodayAfternoon => next_occurrence_of_hour(now, 14),
            RelativeTime::TodayEvening => next_occurrence_of_hour(now, 19),
            RelativeTime::TomorrowMorning => at_hour(now, 1, 9),
            RelativeTime::TomorrowAfternoon => at_hour(now, 1, 14),
        }
    }
}

fn truncate_to_minute(dt: DateTime<Tz>) -> DateTime<Tz> {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

/// Today + `day_offset` at `hour`:00 in the zone of `now`.
fn at_hour(now: DateTime<Tz>, day_offset: i64, hour: u32) -> DateTime<Tz> {
    let date = now.date_naive() + Duration::days(day_offset);
    let naive = match date.and_hms_opt(hour, 0, 0) {
        Some(n) => n,
        None => return now,
    };
    now.timezone()
        .from_local_datetime(&naive)
        .earliest()
        // DST gap at the target hour: fall back to the offset applied to now
        .unwrap_or(now + Duration::days(day_offset))
}

fn next_occurrence_of_hour(now: DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let today = at_hour(now, 0, hour);
    if today <= now {
        at_hour(now, 1, hour)
    } else {
        today
    }
}

/// When a pending calendar action is scheduled to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeWindow {
    Relative {
        label: RelativeTime,
    },
    Concrete {
        start: DateTime<Utc>,
        /// IANA zone the user selected the wall-clock time in, when
        /// determinable. Lets the resolving party reconstruct the intended
        /// local moment unambiguously.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone: Option<String>,
    },
}

impl TimeWindow {
    pub fn relative(label: RelativeTime) -> Self {
        TimeWindow::Relative { label }
    }

    pub fn concrete(start: DateTime<Utc>, zone: Option<String>) -> Self {
        TimeWindow::Concrete { start, zone }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, TimeWindow::Concrete { .. })
    }

    /// Normalize to a single instant. Relative labels resolve against the
    /// supplied `now` in the user's zone.
    pub fn resolve(&self, now: DateTime<Tz>) -> DateTime<Utc> {
        match self {
            TimeWindow::Relative { label } => label.resolve(now).with_timezone(&Utc),
            TimeWindow::Concrete { start, .. } => *start,
        }
    }
}

static DATETIME_LOCAL_RE: OnceLock<Regex> = OnceLock::new();

fn datetime_local_re() -> &'static Regex {
    DATETIME_LOCAL_RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2})(?::\d{2})?([+-]\d{2}:\d{2})?")
            .expect("valid regex")
    })
}

/// Parse user-selected time input into a `TimeWindow`.
///
/// Accepted forms, in order: a relative label, `<datetime>|<IANA zone>`
/// (the frontend's datetime-local format), RFC 3339, and a bare
/// `YYYY-MM-DDTHH:MM[:SS]` interpreted in `default_zone`.
pub fn parse_time_input(input: &str, default_zone: Tz) -> Result<TimeWindow, AgentError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AgentError::InvalidTimeWindow("empty input".to_string()));
    }

    if let Some(label) = RelativeTime::parse(s) {
        return Ok(TimeWindow::relative(label));
    }

    if let Some((datetime_part, zone_name)) = s.split_once('|') {
        let zone: Tz = zone_name.trim().parse().unwrap_or(default_zone);
        let start = parse_wall_clock(datetime_part.trim(), zone)?;
        return Ok(TimeWindow::concrete(start, Some(zone.name().to_string())));
    }

    // RFC 3339 with offset or Z
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")) {
        return Ok(TimeWindow::concrete(dt.with_timezone(&Utc), None));
    }

    // Bare wall clock, interpreted in the user's zone
    let start = parse_wall_clock(s, default_zone)?;
    Ok(TimeWindow::concrete(
        start,
        Some(default_zone.name().to_string()),
    ))
}

/// Parse `YYYY-MM-DDTHH:MM` (optionally with seconds and/or an offset we
/// discard in favor of `zone`) as a wall-clock moment in `zone`.
fn parse_wall_clock(s: &str, zone: Tz) -> Result<DateTime<Utc>, AgentError> {
    let captures = datetime_local_re()
        .captures(s)
        .ok_or_else(|| AgentError::InvalidTimeWindow(format!("unrecognized time format: {s}")))?;
    let naive = NaiveDateTime::parse_from_str(&captures[1], "%Y-%m-%dT%H:%M")
        .map_err(|e| AgentError::InvalidTimeWindow(format!("{s}: {e}")))?;
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            AgentError::InvalidTimeWindow(format!("{s} does not exist in zone {}", zone.name()))
        })
}

static DURATION_RE: OnceLock<Regex> = OnceLock::new();

/// Parse a free-text time estimate ("30 minutes", "1 hour", "45") into
/// minutes, defaulting to 30 and clamping to the accepted block range.
pub fn parse_duration_minutes(text: &str) -> u32 {
    let re = DURATION_RE
        .get_or_init(|| {
            Regex::new(r"(?i)(\d+)\s*(hours?|hrs?|h\b|minutes?|mins?|m\b)?").expect("valid regex")
        });

    let Some(caps) = re.captures(text) else {
        return DEFAULT_BLOCK_MINUTES;
    };
    let Ok(value) = caps[1].parse::<u32>() else {
        return DEFAULT_BLOCK_MINUTES;
    };

    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
    let minutes = match unit.as_deref() {
        Some(u) if u.starts_with('h') => value.saturating_mul(60),
        _ => value,
    };
    minutes.clamp(MIN_BLOCK_MINUTES, MAX_BLOCK_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> Tz {
        "America/Los_Angeles".parse().unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        tz().with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_duration_minutes() {
        assert_eq!(parse_duration_minutes("30 minutes"), 30);
        assert_eq!(parse_duration_minutes("1 hour"), 60);
        assert_eq!(parse_duration_minutes("2 hrs"), 120);
        assert_eq!(parse_duration_minutes("45"), 45);
        assert_eq!(parse_duration_minutes("15 min"), 15);
        assert_eq!(parse_duration_minutes("a little while"), 30);
        assert_eq!(parse_duration_minutes(""), 30);
        // Clamped to 5–240
        assert_eq!(parse_duration_minutes("2 minutes"), 5);
        assert_eq!(parse_duration_minutes("10 hours"), 240);
    }

    #[test]
    fn test_now_rounds_to_next_five_minutes() {
        let resolved = RelativeTime::Now.resolve(at(10, 3));
        assert_eq!(resolved, at(10, 5));

        let resolved = RelativeTime::Now.resolve(at(10, 57));
        assert_eq!(resolved, at(11, 0));

        // Exactly on a mark still moves forward
        let resolved = RelativeTime::Now.resolve(at(10, 55));
        assert_eq!(resolved, at(11, 0));
    }

    #[test]
    fn test_today_afternoon_rolls_to_tomorrow_when_past() {
        // 3 PM: today's 14:00 already passed
        let resolved = RelativeTime::TodayAfternoon.resolve(at(15, 0));
        assert_eq!(
            resolved,
            tz().with_ymd_and_hms(2026, 3, 11, 14, 0, 0).unwrap()
        );

        // 9 AM: today's 14:00 is still ahead
        let resolved = RelativeTime::TodayAfternoon.resolve(at(9, 0));
        assert_eq!(resolved, at(14, 0));
    }

    #[test]
    fn test_in_one_hour() {
        let resolved = RelativeTime::InOneHour.resolve(at(10, 30));
        assert_eq!(resolved, at(11, 30));
    }

    #[test]
    fn test_parse_time_input_relative_label() {
        let tw = parse_time_input("in_1_hour", tz()).unwrap();
        assert_eq!(
            tw,
            TimeWindow::relative(RelativeTime::InOneHour)
        );
        assert!(!tw.is_concrete());
    }

    #[test]
    fn test_parse_time_input_with_zone_annotation() {
        let tw = parse_time_input("2026-03-10T14:00|America/New_York", tz()).unwrap();
        match tw {
            TimeWindow::Concrete { start, zone } => {
                assert_eq!(zone.as_deref(), Some("America/New_York"));
                // 2 PM EDT = 18:00 UTC
                assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap());
            }
            other => panic!("expected concrete window, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_time_input_zone_annotation_overrides_offset() {
        // The frontend may include both an offset and a zone name; the zone
        // name is the authoritative wall-clock interpretation.
        let tw = parse_time_input("2026-03-10T14:00-08:00|America/New_York", tz()).unwrap();
        match tw {
            TimeWindow::Concrete { start, .. } => {
                assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap());
            }
            other => panic!("expected concrete window, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_time_input_rfc3339() {
        let tw = parse_time_input("2026-03-10T22:00:00Z", tz()).unwrap();
        match tw {
            TimeWindow::Concrete { start, zone } => {
                assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 10, 22, 0, 0).unwrap());
                assert!(zone.is_none());
            }
            other => panic!("expected concrete window, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_time_input_bare_wall_clock_uses_default_zone() {
        let tw = parse_time_input("2026-03-10T14:00", tz()).unwrap();
        match tw {
            TimeWindow::Concrete { start, zone } => {
                assert_eq!(zone.as_deref(), Some("America/Los_Angeles"));
                // 2 PM PDT = 21:00 UTC (DST active on 2026-03-10)
                assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 10, 21, 0, 0).unwrap());
            }
            other => panic!("expected concrete window, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_time_input_rejects_garbage() {
        assert!(parse_time_input("sometime soon", tz()).is_err());
        assert!(parse_time_input("", tz()).is_err());
    }

    #[test]
    fn test_time_window_resolve_is_stable_for_concrete() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 21, 0, 0).unwrap();
        let tw = TimeWindow::concrete(start, None);
        assert_eq!(tw.resolve(at(9, 0)), start);
        assert_eq!(tw.resolve(at(23, 0)), start);
    }

    #[test]
    fn test_relative_time_serde_names() {
        let json = serde_json::to_string(&RelativeTime::InOneHour).unwrap();
        assert_eq!(json, "\"in_1_hour\"");
        let back: RelativeTime = serde_json::from_str("\"today_afternoon\"").unwrap();
        assert_eq!(back, RelativeTime::TodayAfternoon);
    }
}
