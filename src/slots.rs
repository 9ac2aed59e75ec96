//! Free-slot computation and overlap checks over calendar busy intervals.
//!
//! All intervals are half-open `[start, end)`. Slots are emitted in
//! duration-sized steps so adjacent events pack exactly, with no overlap
//! tolerance in either direction.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::stats::PreferredTimes;
use crate::types::{BusyInterval, FreeSlot};

/// Two half-open intervals `[a,b)` and `[c,d)` conflict iff `a < d && c < b`.
/// Boundary adjacency (`b == c`) is not a conflict.
pub fn has_conflict(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    busy: &[BusyInterval],
) -> bool {
    busy.iter().any(|b| start < b.end && b.start < end)
}

/// Coalesce busy intervals into a sorted, non-overlapping set. Touching
/// intervals merge.
fn merge_busy(busy: &[BusyInterval]) -> Vec<BusyInterval> {
    let mut sorted: Vec<BusyInterval> = busy
        .iter()
        .filter(|b| b.start < b.end)
        .cloned()
        .collect();
    sorted.sort_by_key(|b| (b.start, b.end));

    let mut merged: Vec<BusyInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Enumerate free slots of exactly `duration_minutes` within
/// `[window_start, window_end)`, ascending by start. Each gap between busy
/// intervals is walked in duration-sized steps from its beginning, so a
/// 60-minute gap yields two 30-minute slots.
///
/// An empty result is a valid answer and means the caller must ask for an
/// explicit time instead of picking one.
pub fn find_free_slots(
    busy: &[BusyInterval],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration_minutes: u32,
) -> Vec<FreeSlot> {
    if duration_minutes == 0 || window_start >= window_end {
        return Vec::new();
    }
    let duration = Duration::minutes(i64::from(duration_minutes));

    let mut slots = Vec::new();
    let mut cursor = window_start;
    for interval in merge_busy(busy) {
        if interval.end <= window_start {
            continue;
        }
        if interval.start >= window_end {
            break;
        }
        emit_slots(&mut slots, cursor, interval.start.min(window_end), duration);
        cursor = cursor.max(interval.end);
    }
    emit_slots(&mut slots, cursor, window_end, duration);
    slots
}

fn emit_slots(
    slots: &mut Vec<FreeSlot>,
    gap_start: DateTime<Utc>,
    gap_end: DateTime<Utc>,
    duration: Duration,
) {
    let mut start = gap_start;
    while start + duration <= gap_end {
        slots.push(FreeSlot {
            start,
            duration_minutes: duration.num_minutes(),
        });
        start += duration;
    }
}

/// Pick the slot closest to the user's habitual scheduling hours.
///
/// With no established pattern the earliest slot wins. Scoring is
/// `24 - min |slot hour - preferred hour|` over the preferred hours, in
/// the user's zone; ties keep the earlier slot.
pub fn select_best_slot<'a>(
    slots: &'a [FreeSlot],
    preferred: &PreferredTimes,
    zone: Tz,
) -> Option<&'a FreeSlot> {
    if slots.is_empty() {
        return None;
    }
    if !preferred.has_pattern || preferred.preferred_hours.is_empty() {
        return slots.first();
    }

    let score = |slot: &FreeSlot| -> i64 {
        let hour = i64::from(chrono::Timelike::hour(&slot.start.with_timezone(&zone)));
        let distance = preferred
            .preferred_hours
            .iter()
            .map(|p| (hour - i64::from(*p)).abs())
            .min()
            .unwrap_or(12);
        24 - distance
    };

    slots
        .iter()
        .max_by(|a, b| score(a).cmp(&score(b)).then(b.start.cmp(&a.start)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    fn busy(sh: u32, sm: u32, eh: u32, em: u32) -> BusyInterval {
        BusyInterval {
            start: t(sh, sm),
            end: t(eh, em),
        }
    }

    #[test]
    fn test_single_busy_block_splits_window() {
        let slots = find_free_slots(&[busy(10, 0, 10, 30)], t(9, 0), t(11, 0), 30);
        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![t(9, 0), t(9, 30), t(10, 30)]);
        assert!(slots.iter().all(|s| s.duration_minutes == 30));
    }

    #[test]
    fn test_no_availability_yields_empty() {
        let slots = find_free_slots(&[busy(9, 0, 11, 0)], t(9, 0), t(11, 0), 30);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_gap_shorter_than_duration_skipped() {
        // 20-minute gap between events cannot host a 30-minute slot
        let slots = find_free_slots(
            &[busy(9, 0, 9, 40), busy(10, 0, 11, 0)],
            t(9, 0),
            t(11, 0),
            30,
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn test_overlapping_busy_intervals_merge() {
        let slots = find_free_slots(
            &[busy(9, 30, 10, 15), busy(10, 0, 10, 30)],
            t(9, 0),
            t(11, 0),
            30,
        );
        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![t(9, 0), t(10, 30)]);
    }

    #[test]
    fn test_unsorted_input_handled() {
        let slots = find_free_slots(
            &[busy(10, 0, 10, 30), busy(9, 0, 9, 30)],
            t(9, 0),
            t(11, 0),
            30,
        );
        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![t(9, 30), t(10, 30)]);
    }

    #[test]
    fn test_idempotent_for_identical_input() {
        let b = vec![busy(10, 0, 10, 30), busy(12, 0, 13, 0)];
        let a = find_free_slots(&b, t(9, 0), t(14, 0), 30);
        let c = find_free_slots(&b, t(9, 0), t(14, 0), 30);
        assert_eq!(a, c);
    }

    #[test]
    fn test_no_slot_overlaps_busy() {
        let b = vec![busy(9, 10, 9, 50), busy(10, 20, 10, 40), busy(12, 0, 12, 30)];
        let slots = find_free_slots(&b, t(8, 0), t(14, 0), 15);
        for slot in &slots {
            assert!(
                !has_conflict(slot.start, slot.end(), &b),
                "slot at {} overlaps busy time",
                slot.start
            );
        }
    }

    #[test]
    fn test_has_conflict_boundary_adjacency_is_free() {
        let b = vec![busy(10, 0, 10, 30)];
        assert!(!has_conflict(t(9, 30), t(10, 0), &b));
        assert!(!has_conflict(t(10, 30), t(11, 0), &b));
        assert!(has_conflict(t(10, 15), t(10, 45), &b));
        assert!(has_conflict(t(9, 45), t(10, 15), &b));
        assert!(has_conflict(t(9, 0), t(11, 0), &b));
    }

    #[test]
    fn test_select_best_slot_without_pattern_picks_first() {
        let slots = find_free_slots(&[], t(9, 0), t(12, 0), 30);
        let zone: Tz = "UTC".parse().unwrap();
        let best = select_best_slot(&slots, &PreferredTimes::default(), zone).unwrap();
        assert_eq!(best.start, t(9, 0));
    }

    #[test]
    fn test_select_best_slot_prefers_habitual_hour() {
        let slots = find_free_slots(&[], t(9, 0), t(16, 0), 60);
        let zone: Tz = "UTC".parse().unwrap();
        let preferred = PreferredTimes {
            preferred_hours: vec![14],
            time_of_day: None,
            has_pattern: true,
        };
        let best = select_best_slot(&slots, &preferred, zone).unwrap();
        assert_eq!(best.start, t(14, 0));
    }

    #[test]
    fn test_select_best_slot_tie_keeps_earlier() {
        let slots = vec![
            FreeSlot { start: t(13, 0), duration_minutes: 30 },
            FreeSlot { start: t(15, 0), duration_minutes: 30 },
        ];
        let zone: Tz = "UTC".parse().unwrap();
        let preferred = PreferredTimes {
            preferred_hours: vec![14],
            time_of_day: None,
            has_pattern: true,
        };
        // Both slots are one hour from 14:00
        let best = select_best_slot(&slots, &preferred, zone).unwrap();
        assert_eq!(best.start, t(13, 0));
    }
}
