//! Behavioral statistics derived from the action ledger.
//!
//! Statistics are recomputed from the full record set on demand, never
//! updated incrementally. Preference statements use fixed thresholds so
//! the same history always yields the same output.

use std::collections::HashMap;

use chrono::Timelike;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::timewindow::{RelativeTime, TimeWindow};
use crate::types::{
    ActionParams, ActionRecord, ActionStatistics, ActionType, Outcome, TypeStats,
};

const ACCEPT_THRESHOLD: f64 = 0.7;
const DECLINE_THRESHOLD: f64 = 0.3;
const HIGH_RATING_THRESHOLD: f64 = 4.0;
const LOW_RATING_THRESHOLD: f64 = 2.0;

/// Fold raw ledger records into per-type counts, acceptance rates, rating
/// averages, and preference statements.
pub fn compute_statistics(records: &[ActionRecord]) -> ActionStatistics {
    let mut by_type: HashMap<ActionType, TypeStats> = HashMap::new();
    let mut ratings: HashMap<ActionType, Vec<f64>> = HashMap::new();

    for record in records {
        let entry = by_type.entry(record.action_type).or_default();
        entry.count += 1;
        if record.outcome == Outcome::Confirmed {
            entry.confirmed += 1;
        }
        if let Some(rating) = record.rating {
            // Ratings outside the 1–5 scale are malformed rows, not signal
            if (1..=5).contains(&rating) {
                ratings
                    .entry(record.action_type)
                    .or_default()
                    .push(f64::from(rating));
            }
        }
    }

    for (action_type, stats) in by_type.iter_mut() {
        stats.acceptance_rate = f64::from(stats.confirmed) / f64::from(stats.count);
        stats.average_rating = ratings
            .get(action_type)
            .filter(|r| !r.is_empty())
            .map(|r| r.iter().sum::<f64>() / r.len() as f64);
    }

    let preferences = preference_statements(&by_type);

    ActionStatistics {
        total_actions: records.len() as u32,
        by_type,
        preferences,
    }
}

/// Type order is fixed so the statement list is reproducible.
fn preference_statements(by_type: &HashMap<ActionType, TypeStats>) -> Vec<String> {
    let mut types: Vec<&ActionType> = by_type.keys().collect();
    types.sort_by_key(|t| t.as_str());

    let mut statements = Vec::new();
    for action_type in types {
        let stats = &by_type[action_type];
        let name = action_type.human_name();

        if stats.acceptance_rate >= ACCEPT_THRESHOLD {
            statements.push(format!("tends to accept {name} suggestions"));
        } else if stats.acceptance_rate <= DECLINE_THRESHOLD {
            statements.push(format!("tends to decline {name} suggestions"));
        }

        if let Some(rating) = stats.average_rating {
            if rating >= HIGH_RATING_THRESHOLD {
                statements.push(format!("rates {name} highly ({rating:.1}/5)"));
            } else if rating <= LOW_RATING_THRESHOLD {
                statements.push(format!("rates {name} poorly ({rating:.1}/5)"));
            }
        }
    }
    statements
}

/// When the user habitually schedules self-care, extracted from confirmed
/// calendar-block history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredTimes {
    pub preferred_hours: Vec<u32>,
    pub time_of_day: Option<TimeOfDay>,
    pub has_pattern: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

/// Derive the user's preferred scheduling hours from confirmed calendar
/// blocks. At least two data points are needed to call it a pattern.
pub fn analyze_preferred_times(records: &[ActionRecord], zone: Tz) -> PreferredTimes {
    let mut scheduled_hours: Vec<u32> = Vec::new();

    for record in records {
        if record.action_type != ActionType::CreateCalendarBlock
            || record.outcome != Outcome::Confirmed
        {
            continue;
        }
        let Some(ActionParams::CreateCalendarBlock(params)) = &record.params else {
            continue;
        };
        match &params.time_window {
            Some(TimeWindow::Concrete { start, .. }) => {
                scheduled_hours.push(start.with_timezone(&zone).hour());
            }
            Some(TimeWindow::Relative { label }) => match label {
                RelativeTime::TodayMorning | RelativeTime::TomorrowMorning => {
                    scheduled_hours.push(9)
                }
                RelativeTime::TodayAfternoon | RelativeTime::TomorrowAfternoon => {
                    scheduled_hours.push(14)
                }
                RelativeTime::TodayEvening => scheduled_hours.push(19),
                _ => {}
            },
            None => {}
        }
    }

    if scheduled_hours.is_empty() {
        return PreferredTimes::default();
    }

    let mut counts: HashMap<u32, u32> = HashMap::new();
    for hour in &scheduled_hours {
        *counts.entry(*hour).or_default() += 1;
    }
    let mut ranked: Vec<(u32, u32)> = counts.into_iter().collect();
    // Highest count first, earlier hour breaks ties
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let preferred_hours: Vec<u32> = ranked.iter().take(3).map(|(h, _)| *h).collect();

    let mean_hour = scheduled_hours.iter().sum::<u32>() as f64 / scheduled_hours.len() as f64;
    let time_of_day = if mean_hour < 12.0 {
        TimeOfDay::Morning
    } else if mean_hour < 17.0 {
        TimeOfDay::Afternoon
    } else {
        TimeOfDay::Evening
    };

    PreferredTimes {
        preferred_hours,
        time_of_day: Some(time_of_day),
        has_pattern: scheduled_hours.len() >= 2,
    }
}
