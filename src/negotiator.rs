//! The scheduling state machine: from a confirmed calendar suggestion to
//! a created calendar event, with user-facing retry on conflict.
//!
//! At most one negotiation session exists at a time. The session survives
//! conflicts and non-conflict write failures; the user picks a new time
//! without re-entering purpose or duration. Scheduling is optimistic: the
//! busy set is read without locking and re-fetched immediately before the
//! write, which is the sole concurrency-control mechanism.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{AgentError, SurfacedError};
use crate::providers::{CalendarService, ProviderError};
use crate::slots::{find_free_slots, has_conflict, select_best_slot};
use crate::stats::PreferredTimes;
use crate::timewindow::{parse_duration_minutes, parse_time_input, TimeWindow};
use crate::types::{CreatedEvent, FreeSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Session created, free slots not yet computed.
    AwaitingSlotSuggestion,
    /// Slots (possibly none) presented; waiting for the user to pick a time.
    AwaitingUserChoice,
    /// Calendar write in flight. Cancellation is not honored here.
    Submitting,
}

/// The pending calendar action plus everything the user has chosen so far.
#[derive(Debug, Clone)]
pub struct NegotiationSession {
    pub purpose: String,
    pub duration_minutes: u32,
    /// Unset until a slot is suggested or the user picks a time. Once
    /// concrete, slot suggestion never overwrites it.
    pub time_window: Option<TimeWindow>,
    pub free_slots: Vec<FreeSlot>,
    pub state: NegotiationState,
    /// Conflict or failure from the last submit attempt, dismissible
    /// independently of retrying.
    pub last_error: Option<SurfacedError>,
}

pub struct SchedulingNegotiator {
    calendar: Arc<dyn CalendarService>,
    session: Mutex<Option<NegotiationSession>>,
    zone: Tz,
    lookahead_days: i64,
    min_lead_minutes: i64,
}

impl SchedulingNegotiator {
    pub fn new(
        calendar: Arc<dyn CalendarService>,
        zone: Tz,
        lookahead_days: u32,
        min_lead_minutes: u32,
    ) -> Self {
        Self {
            calendar,
            session: Mutex::new(None),
            zone,
            lookahead_days: i64::from(lookahead_days),
            min_lead_minutes: i64::from(min_lead_minutes),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<NegotiationSession>>, AgentError> {
        self.session
            .lock()
            .map_err(|_| AgentError::SchedulingFailure("Session lock poisoned".to_string()))
    }

    /// Snapshot of the current session, if any.
    pub fn session(&self) -> Result<Option<NegotiationSession>, AgentError> {
        Ok(self.lock()?.clone())
    }

    /// Start a negotiation for a block of `duration_minutes`.
    pub fn begin(&self, purpose: &str, duration_minutes: u32) -> Result<(), AgentError> {
        let mut guard = self.lock()?;
        if guard.is_some() {
            return Err(AgentError::SessionActive);
        }
        *guard = Some(NegotiationSession {
            purpose: purpose.to_string(),
            duration_minutes,
            time_window: None,
            free_slots: Vec::new(),
            state: NegotiationState::AwaitingSlotSuggestion,
            last_error: None,
        });
        Ok(())
    }

    /// Start a negotiation from a free-text time estimate such as
    /// "30 minutes". Unparseable input falls back to the default length.
    pub fn begin_from_estimate(&self, purpose: &str, estimate: &str) -> Result<(), AgentError> {
        self.begin(purpose, parse_duration_minutes(estimate))
    }

    /// Install a time window directly, e.g. one carried by the confirmed
    /// suggestion itself.
    pub fn apply_window(&self, window: TimeWindow) -> Result<(), AgentError> {
        let mut guard = self.lock()?;
        let session = guard.as_mut().ok_or(AgentError::NoSession)?;
        if session.state == NegotiationState::Submitting {
            return Err(AgentError::SubmissionInFlight);
        }
        session.time_window = Some(window);
        Ok(())
    }

    /// Search window: from now plus the minimum lead time through the end
    /// of the last lookahead day, in the user's zone.
    fn search_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = now + Duration::minutes(self.min_lead_minutes);
        let local_now = now.with_timezone(&self.zone);
        let last_day = local_now.date_naive() + Duration::days(self.lookahead_days);
        let end = last_day
            .and_hms_opt(23, 59, 59)
            .and_then(|naive| self.zone.from_local_datetime(&naive).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(start + Duration::days(self.lookahead_days + 1));
        (start, end)
    }

    /// Compute free slots and propose a start time.
    ///
    /// Fetches the busy set, fills the session's slot list, and sets the
    /// time window to the best-scoring slot, unless the window is already
    /// a concrete instant, which re-entry never overwrites. An empty slot
    /// list leaves the window unset; the user must then enter a time.
    pub async fn suggest_slot(
        &self,
        preferred: &PreferredTimes,
    ) -> Result<Option<FreeSlot>, AgentError> {
        let duration = {
            let guard = self.lock()?;
            let session = guard.as_ref().ok_or(AgentError::NoSession)?;
            session.duration_minutes
        };

        let now = Utc::now();
        let (window_start, window_end) = self.search_window(now);
        let busy = self
            .calendar
            .list_busy_intervals(window_start, window_end)
            .await
            .map_err(|e| AgentError::SchedulingFailure(e.to_string()))?;

        let slots = find_free_slots(&busy, window_start, window_end, duration);
        let best = select_best_slot(&slots, preferred, self.zone).copied();

        let mut guard = self.lock()?;
        // Session may have been cancelled while the fetch was in flight
        let session = guard.as_mut().ok_or(AgentError::NoSession)?;
        session.free_slots = slots;
        if !matches!(session.time_window, Some(TimeWindow::Concrete { .. })) {
            session.time_window = best
                .map(|slot| TimeWindow::concrete(slot.start, Some(self.zone.name().to_string())));
        }
        session.state = NegotiationState::AwaitingUserChoice;
        Ok(best)
    }

    /// Record the user's chosen time. Accepts a relative label, an
    /// RFC 3339 instant (e.g. a suggested slot's start), or an explicit
    /// `YYYY-MM-DDTHH:MM[|Zone]` wall-clock time.
    pub fn choose_time(&self, input: &str) -> Result<(), AgentError> {
        let window = parse_time_input(input, self.zone)?;
        let mut guard = self.lock()?;
        let session = guard.as_mut().ok_or(AgentError::NoSession)?;
        if session.state == NegotiationState::Submitting {
            return Err(AgentError::SubmissionInFlight);
        }
        session.time_window = Some(window);
        session.state = NegotiationState::AwaitingUserChoice;
        Ok(())
    }

    /// Write the event to the calendar.
    ///
    /// Re-fetches the busy set and re-checks for overlap immediately
    /// before the write; the proposal may have been computed from a stale
    /// snapshot. On conflict or failure the session stays open in
    /// `AwaitingUserChoice` with the error surfaced. On success the
    /// session is torn down and the created event returned; the caller
    /// appends the ledger record afterwards.
    pub async fn submit(&self, description: &str) -> Result<CreatedEvent, AgentError> {
        let (start, duration, purpose) = {
            let mut guard = self.lock()?;
            let session = guard.as_mut().ok_or(AgentError::NoSession)?;
            if session.state == NegotiationState::Submitting {
                return Err(AgentError::SubmissionInFlight);
            }
            let window = session.time_window.as_ref().ok_or_else(|| {
                AgentError::InvalidTimeWindow("no time selected".to_string())
            })?;
            let start = window.resolve(Utc::now().with_timezone(&self.zone));
            session.state = NegotiationState::Submitting;
            (start, session.duration_minutes, session.purpose.clone())
        };

        let result = self.submit_inner(start, duration, &purpose, description).await;

        let mut guard = self.lock()?;
        match result {
            Ok(event) => {
                // Teardown: slots cleared, pending action cleared
                *guard = None;
                Ok(event)
            }
            Err(err) => {
                if let Some(session) = guard.as_mut() {
                    session.state = NegotiationState::AwaitingUserChoice;
                    session.last_error = Some(SurfacedError::from(&err));
                }
                Err(err)
            }
        }
    }

    async fn submit_inner(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        purpose: &str,
        description: &str,
    ) -> Result<CreatedEvent, AgentError> {
        let end = start + Duration::minutes(i64::from(duration_minutes));

        let busy = self
            .calendar
            .list_busy_intervals(start, end)
            .await
            .map_err(|e| AgentError::SchedulingFailure(e.to_string()))?;
        if has_conflict(start, end, &busy) {
            return Err(AgentError::SchedulingConflict {
                message: format!(
                    "{} conflicts with an existing calendar event. Please pick a different time.",
                    start.with_timezone(&self.zone).format("%I:%M %p")
                ),
            });
        }

        match self
            .calendar
            .create_event(start, duration_minutes, purpose, description)
            .await
        {
            Ok(event) => Ok(event),
            Err(ProviderError::Conflict { message }) => {
                Err(AgentError::SchedulingConflict { message })
            }
            Err(other) => Err(AgentError::SchedulingFailure(other.to_string())),
        }
    }

    /// Clear the surfaced error without retrying or cancelling.
    pub fn dismiss_error(&self) -> Result<(), AgentError> {
        let mut guard = self.lock()?;
        if let Some(session) = guard.as_mut() {
            session.last_error = None;
        }
        Ok(())
    }

    /// Tear down the session. A no-op when idle; refused while a
    /// submission is in flight.
    pub fn cancel(&self) -> Result<(), AgentError> {
        let mut guard = self.lock()?;
        match guard.as_ref() {
            None => Ok(()),
            Some(session) if session.state == NegotiationState::Submitting => {
                Err(AgentError::CancelUnavailable)
            }
            Some(_) => {
                *guard = None;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::types::BusyInterval;

    /// Calendar fake: a fixed busy set, optional forced conflict on write,
    /// and a call counter to assert re-fetching.
    struct FakeCalendar {
        busy: Mutex<Vec<BusyInterval>>,
        conflict_on_create: Mutex<Option<String>>,
        list_calls: AtomicU32,
    }

    impl FakeCalendar {
        fn new() -> Self {
            Self {
                busy: Mutex::new(Vec::new()),
                conflict_on_create: Mutex::new(None),
                list_calls: AtomicU32::new(0),
            }
        }

        fn set_busy(&self, busy: Vec<BusyInterval>) {
            *self.busy.lock().unwrap() = busy;
        }

        fn force_conflict(&self, message: &str) {
            *self.conflict_on_create.lock().unwrap() = Some(message.to_string());
        }
    }

    #[async_trait]
    impl CalendarService for FakeCalendar {
        async fn list_busy_intervals(
            &self,
            _window_start: DateTime<Utc>,
            _window_end: DateTime<Utc>,
        ) -> Result<Vec<BusyInterval>, ProviderError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.busy.lock().unwrap().clone())
        }

        async fn create_event(
            &self,
            start: DateTime<Utc>,
            duration_minutes: u32,
            _title: &str,
            _description: &str,
        ) -> Result<CreatedEvent, ProviderError> {
            if let Some(message) = self.conflict_on_create.lock().unwrap().clone() {
                return Err(ProviderError::Conflict { message });
            }
            Ok(CreatedEvent {
                event_id: "evt-1".to_string(),
                html_link: Some("https://calendar.google.com/event?eid=evt-1".to_string()),
                start,
                end: start + Duration::minutes(i64::from(duration_minutes)),
            })
        }
    }

    fn negotiator(calendar: Arc<FakeCalendar>) -> SchedulingNegotiator {
        let zone: Tz = "America/Los_Angeles".parse().unwrap();
        SchedulingNegotiator::new(calendar, zone, 1, 60)
    }

    fn future_time_input() -> String {
        (Utc::now() + Duration::hours(3))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    }

    #[test]
    fn test_begin_parses_duration_and_rejects_second_session() {
        let negotiator = negotiator(Arc::new(FakeCalendar::new()));
        negotiator.begin_from_estimate("Take a walk", "45 minutes").unwrap();
        let session = negotiator.session().unwrap().unwrap();
        assert_eq!(session.duration_minutes, 45);
        assert_eq!(session.state, NegotiationState::AwaitingSlotSuggestion);
        assert!(session.time_window.is_none());

        assert!(matches!(
            negotiator.begin("Another", 30),
            Err(AgentError::SessionActive)
        ));
    }

    #[tokio::test]
    async fn test_suggest_slot_sets_first_slot() {
        let calendar = Arc::new(FakeCalendar::new());
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();

        let slot = negotiator
            .suggest_slot(&PreferredTimes::default())
            .await
            .unwrap();
        assert!(slot.is_some());

        let session = negotiator.session().unwrap().unwrap();
        assert_eq!(session.state, NegotiationState::AwaitingUserChoice);
        assert!(!session.free_slots.is_empty());
        match session.time_window {
            Some(TimeWindow::Concrete { start, .. }) => {
                assert_eq!(start, slot.unwrap().start);
            }
            other => panic!("expected concrete window, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_suggest_slot_never_overwrites_concrete_choice() {
        let calendar = Arc::new(FakeCalendar::new());
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();

        let chosen = future_time_input();
        negotiator.choose_time(&chosen).unwrap();
        let before = negotiator.session().unwrap().unwrap().time_window;

        negotiator
            .suggest_slot(&PreferredTimes::default())
            .await
            .unwrap();
        let after = negotiator.session().unwrap().unwrap().time_window;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_fully_booked_window_leaves_time_unset() {
        let calendar = Arc::new(FakeCalendar::new());
        let now = Utc::now();
        calendar.set_busy(vec![BusyInterval {
            start: now - Duration::days(1),
            end: now + Duration::days(3),
        }]);
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();

        let slot = negotiator
            .suggest_slot(&PreferredTimes::default())
            .await
            .unwrap();
        assert!(slot.is_none());

        let session = negotiator.session().unwrap().unwrap();
        assert!(session.free_slots.is_empty());
        assert!(session.time_window.is_none());
        assert_eq!(session.state, NegotiationState::AwaitingUserChoice);
    }

    #[tokio::test]
    async fn test_submit_success_tears_down_session() {
        let calendar = Arc::new(FakeCalendar::new());
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();
        negotiator.choose_time(&future_time_input()).unwrap();

        let event = negotiator.submit("Self-care activity").await.unwrap();
        assert_eq!(event.event_id, "evt-1");
        assert!(negotiator.session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_precheck_conflict_keeps_session_and_window() {
        let calendar = Arc::new(FakeCalendar::new());
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();

        let chosen = future_time_input();
        negotiator.choose_time(&chosen).unwrap();
        let window_before = negotiator.session().unwrap().unwrap().time_window;

        // Calendar fills up between choice and submission
        let start = Utc::now() + Duration::hours(3);
        calendar.set_busy(vec![BusyInterval {
            start: start - Duration::hours(1),
            end: start + Duration::hours(1),
        }]);

        let err = negotiator.submit("Self-care activity").await.unwrap_err();
        assert!(err.is_conflict());

        let session = negotiator.session().unwrap().unwrap();
        assert_eq!(session.state, NegotiationState::AwaitingUserChoice);
        assert_eq!(session.time_window, window_before);
        let surfaced = session.last_error.unwrap();
        assert!(!surfaced.message.is_empty());
        assert!(surfaced.can_retry);
    }

    #[tokio::test]
    async fn test_provider_conflict_maps_to_scheduling_conflict() {
        let calendar = Arc::new(FakeCalendar::new());
        calendar.force_conflict("That time was just booked");
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();
        negotiator.choose_time(&future_time_input()).unwrap();

        let err = negotiator.submit("Self-care activity").await.unwrap_err();
        assert!(matches!(err, AgentError::SchedulingConflict { ref message } if message == "That time was just booked"));
        assert!(negotiator.session().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_submit_without_time_is_rejected() {
        let calendar = Arc::new(FakeCalendar::new());
        let negotiator = negotiator(calendar);
        negotiator.begin("Take a walk", 30).unwrap();

        let err = negotiator.submit("Self-care activity").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTimeWindow(_)));
        // Failed precondition did not leave the session stuck in Submitting
        let session = negotiator.session().unwrap().unwrap();
        assert_ne!(session.state, NegotiationState::Submitting);
    }

    #[tokio::test]
    async fn test_dismiss_error_preserves_session() {
        let calendar = Arc::new(FakeCalendar::new());
        calendar.force_conflict("booked");
        let negotiator = negotiator(calendar);
        negotiator.begin("Take a walk", 30).unwrap();
        negotiator.choose_time(&future_time_input()).unwrap();
        let _ = negotiator.submit("Self-care activity").await;

        negotiator.dismiss_error().unwrap();
        let session = negotiator.session().unwrap().unwrap();
        assert!(session.last_error.is_none());
        assert_eq!(session.state, NegotiationState::AwaitingUserChoice);
    }

    #[test]
    fn test_cancel_is_noop_when_idle() {
        let negotiator = negotiator(Arc::new(FakeCalendar::new()));
        negotiator.cancel().unwrap();

        negotiator.begin("Take a walk", 30).unwrap();
        negotiator.cancel().unwrap();
        assert!(negotiator.session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_refetches_busy_set() {
        let calendar = Arc::new(FakeCalendar::new());
        let negotiator = negotiator(calendar.clone());
        negotiator.begin("Take a walk", 30).unwrap();
        negotiator
            .suggest_slot(&PreferredTimes::default())
            .await
            .unwrap();
        let calls_after_suggest = calendar.list_calls.load(Ordering::SeqCst);

        negotiator.submit("Self-care activity").await.unwrap();
        assert_eq!(
            calendar.list_calls.load(Ordering::SeqCst),
            calls_after_suggest + 1,
            "submit must fetch a fresh busy set"
        );
    }
}
