//! Core domain types for the proactive agent engine.
//!
//! Wire-facing structs (`SuggestedAction`, `ActionParams`) keep the
//! snake_case field names the recommendation service produces; app-facing
//! records serialize camelCase for the frontend.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::timewindow::TimeWindow;

/// The kinds of next-best-action the agent can suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateCalendarBlock,
    CreateJournalEntry,
    SuggestRetakeQuiz,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateCalendarBlock => "create_calendar_block",
            ActionType::CreateJournalEntry => "create_journal_entry",
            ActionType::SuggestRetakeQuiz => "suggest_retake_quiz",
        }
    }

    /// Human-readable name: separators replaced with spaces.
    pub fn human_name(&self) -> String {
        self.as_str().replace('_', " ")
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_calendar_block" => Some(ActionType::CreateCalendarBlock),
            "create_journal_entry" => Some(ActionType::CreateJournalEntry),
            "suggest_retake_quiz" => Some(ActionType::SuggestRetakeQuiz),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user did with a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Confirmed,
    Dismissed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Confirmed => "confirmed",
            Outcome::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(Outcome::Confirmed),
            "dismissed" => Some(Outcome::Dismissed),
            _ => None,
        }
    }
}

/// Per-type action parameters, tagged by action type.
///
/// Replaces the original loosely-typed params bag: each variant carries
/// only the fields its action type needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum ActionParams {
    CreateCalendarBlock(CalendarBlockParams),
    CreateJournalEntry(JournalEntryParams),
    SuggestRetakeQuiz(RetakeQuizParams),
}

impl ActionParams {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionParams::CreateCalendarBlock(_) => ActionType::CreateCalendarBlock,
            ActionParams::CreateJournalEntry(_) => ActionType::CreateJournalEntry,
            ActionParams::SuggestRetakeQuiz(_) => ActionType::SuggestRetakeQuiz,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarBlockParams {
    /// Duration in minutes; accepted range is 5–240.
    pub duration_minutes: u32,
    pub purpose: String,
    /// Set by the engine once a free slot is resolved or the user picks a
    /// time explicitly. The recommendation service never supplies this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntryParams {
    pub prompt_template: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetakeQuizParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn default_true() -> bool {
    true
}

/// An ephemeral, in-memory suggestion. No persisted id exists until the
/// user acts on it; identity is structural (type + message + params).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    #[serde(flatten)]
    pub params: ActionParams,
    pub message: String,
    #[serde(default = "default_true")]
    pub requires_confirmation: bool,
}

impl SuggestedAction {
    pub fn action_type(&self) -> ActionType {
        self.params.action_type()
    }
}

/// A persisted record of a confirmed or dismissed suggestion.
///
/// Immutable once created, except for the one-time addition of
/// rating / helpful / feedback timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: String,
    pub user_id: String,
    pub action_type: ActionType,
    pub message: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ActionParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helpful: Option<bool>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_at: Option<DateTime<Utc>>,
}

/// Aggregates for one action type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    pub count: u32,
    pub confirmed: u32,
    /// confirmed / count, in [0, 1]. Always defined here; a `TypeStats`
    /// entry only exists for types with at least one record.
    pub acceptance_rate: f64,
    /// Mean of 1–5 ratings; absent when no record of this type was rated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

/// Derived behavioral statistics. Recomputed from the full record set,
/// never updated incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatistics {
    #[serde(default)]
    pub by_type: HashMap<ActionType, TypeStats>,
    /// Human-readable preference inferences, deterministic order.
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub total_actions: u32,
}

impl ActionStatistics {
    /// "No statistics yet" and "statistics with zero signal" are the same
    /// thing to callers.
    pub fn is_empty(&self) -> bool {
        self.total_actions == 0
    }

    pub fn acceptance_rate(&self, action_type: ActionType) -> Option<f64> {
        self.by_type.get(&action_type).map(|s| s.acceptance_rate)
    }

    pub fn average_rating(&self, action_type: ActionType) -> Option<f64> {
        self.by_type.get(&action_type).and_then(|s| s.average_rating)
    }
}

/// Most recent quiz answers, as far as suggestion selection cares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struggle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<String>,
}

/// Environmental weather signal fed into suggestion selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_chance_percent: Option<u8>,
    #[serde(default)]
    pub activity_suggestions: Vec<String>,
}

fn default_suggestion_limit() -> usize {
    2
}

/// Everything suggestion selection feeds the recommendation service.
///
/// Absent statistics/recent-actions are represented with empty defaults;
/// the service is never handed nulls in required fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_quiz: Option<QuizSummary>,
    #[serde(default)]
    pub toolkit_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_last_quiz: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherSnapshot>,
    #[serde(default)]
    pub statistics: ActionStatistics,
    #[serde(default)]
    pub recent_actions: Vec<ActionRecord>,
    #[serde(default = "default_suggestion_limit")]
    pub limit: usize,
}

impl Default for SuggestionContext {
    fn default() -> Self {
        Self {
            last_quiz: None,
            toolkit_count: 0,
            days_since_last_quiz: None,
            weather: None,
            statistics: ActionStatistics::default(),
            recent_actions: Vec::new(),
            limit: default_suggestion_limit(),
        }
    }
}

/// A busy interval from the external calendar. Read-only view, fetched
/// fresh per negotiation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A schedulable gap derived from the busy set. Lives for one
/// negotiation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSlot {
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
}

impl FreeSlot {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes)
    }
}

/// Result of a successful calendar write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEvent {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of a successful journal-document write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    pub title: String,
    /// True when the prompt was appended to an existing day's document.
    #[serde(default)]
    pub appended: bool,
}
