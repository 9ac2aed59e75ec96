//! Engine: wires the suggestion list, the scheduling negotiator, and the
//! ledger together behind one façade.
//!
//! The ordering invariant lives here: a ledger record for a negotiation
//! is written only after its calendar write succeeded, and ledger
//! failures never undo or surface over the primary side effect.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::ledger::LedgerDb;
use crate::negotiator::{NegotiationSession, SchedulingNegotiator};
use crate::providers::{CalendarService, DocumentService, RecommendationService};
use crate::stats::{analyze_preferred_times, compute_statistics};
use crate::suggest::{error_fallback, memory_summary, RefreshMode, SuggestionSelector};
use crate::types::{
    ActionParams, ActionRecord, ActionStatistics, ActionType, CreatedDocument, CreatedEvent,
    Outcome, QuizSummary, SuggestedAction, SuggestionContext, WeatherSnapshot,
};

fn default_time_zone() -> String {
    "America/Los_Angeles".to_string()
}
fn default_suggestion_limit() -> usize {
    2
}
fn default_lookahead_days() -> u32 {
    1
}
fn default_min_lead_minutes() -> u32 {
    60
}
fn default_recent_actions_limit() -> u32 {
    7
}

/// Configuration from `~/.selfcare/config.json`. Every field has a
/// default, so a missing file means defaults, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: usize,
    /// Slot search reaches from today through this many extra days.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
    /// Suggested slots start at least this far in the future.
    #[serde(default = "default_min_lead_minutes")]
    pub min_lead_minutes: u32,
    /// How many recent outcomes feed the recommendation context.
    #[serde(default = "default_recent_actions_limit")]
    pub recent_actions_limit: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            suggestion_limit: default_suggestion_limit(),
            lookahead_days: default_lookahead_days(),
            min_lead_minutes: default_min_lead_minutes(),
            recent_actions_limit: default_recent_actions_limit(),
        }
    }
}

impl AgentConfig {
    pub fn zone(&self) -> Tz {
        self.time_zone.parse().unwrap_or_else(|_| {
            log::warn!("Unknown time zone {:?}, using default", self.time_zone);
            chrono_tz::America::Los_Angeles
        })
    }
}

fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".selfcare").join("config.json"))
}

/// Load configuration from `~/.selfcare/config.json`.
pub fn load_config() -> Result<AgentConfig, String> {
    let path = config_path()?;
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(AgentConfig::default());
    }
    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Per-refresh context the frontend supplies alongside stored history.
#[derive(Debug, Clone, Default)]
pub struct SuggestionInputs {
    pub last_quiz: Option<QuizSummary>,
    pub toolkit_count: u32,
    pub days_since_last_quiz: Option<i64>,
    pub weather: Option<WeatherSnapshot>,
}

/// What confirming a suggestion led to.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// A scheduling negotiation is now open; drive it via the
    /// `suggest_slot`/`choose_time`/`submit_schedule` calls.
    SchedulingStarted,
    JournalCreated {
        document: CreatedDocument,
        message: String,
    },
    QuizAcknowledged,
}

pub struct AgentEngine {
    config: AgentConfig,
    zone: Tz,
    user_id: String,
    ledger: Mutex<LedgerDb>,
    recommendations: Arc<dyn RecommendationService>,
    documents: Arc<dyn DocumentService>,
    selector: Mutex<SuggestionSelector>,
    negotiator: SchedulingNegotiator,
    stats_cache: Mutex<Option<ActionStatistics>>,
}

impl AgentEngine {
    pub fn new(
        config: AgentConfig,
        user_id: &str,
        ledger: LedgerDb,
        recommendations: Arc<dyn RecommendationService>,
        calendar: Arc<dyn CalendarService>,
        documents: Arc<dyn DocumentService>,
    ) -> Self {
        let zone = config.zone();
        let negotiator = SchedulingNegotiator::new(
            calendar,
            zone,
            config.lookahead_days,
            config.min_lead_minutes,
        );
        let selector = Mutex::new(SuggestionSelector::new(config.suggestion_limit));
        Self {
            config,
            zone,
            user_id: user_id.to_string(),
            ledger: Mutex::new(ledger),
            recommendations,
            documents,
            selector,
            negotiator,
            stats_cache: Mutex::new(None),
        }
    }

    fn lock_err(what: &str) -> AgentError {
        AgentError::SchedulingFailure(format!("{what} lock poisoned"))
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Behavioral statistics, recomputed from the full ledger and cached
    /// until the next recorded outcome. A failed ledger read degrades to
    /// empty statistics rather than an error.
    pub fn statistics(&self) -> Result<ActionStatistics, AgentError> {
        let mut cache = self
            .stats_cache
            .lock()
            .map_err(|_| Self::lock_err("statistics"))?;
        if let Some(stats) = cache.as_ref() {
            return Ok(stats.clone());
        }
        let records = self.all_records();
        let stats = compute_statistics(&records);
        *cache = Some(stats.clone());
        Ok(stats)
    }

    fn invalidate_statistics(&self) {
        if let Ok(mut cache) = self.stats_cache.lock() {
            *cache = None;
        }
    }

    fn all_records(&self) -> Vec<ActionRecord> {
        match self.ledger.lock() {
            Ok(db) => db.all_actions(&self.user_id).unwrap_or_else(|e| {
                log::warn!("Ledger read failed, degrading to empty history: {}", e);
                Vec::new()
            }),
            Err(_) => {
                log::warn!("Ledger lock poisoned, degrading to empty history");
                Vec::new()
            }
        }
    }

    fn recent_records(&self) -> Vec<ActionRecord> {
        match self.ledger.lock() {
            Ok(db) => db
                .recent_actions(&self.user_id, self.config.recent_actions_limit)
                .unwrap_or_else(|e| {
                    log::warn!("Ledger read failed, degrading to empty history: {}", e);
                    Vec::new()
                }),
            Err(_) => Vec::new(),
        }
    }

    /// Best-effort ledger append. The primary side effect already
    /// happened; a failed write is logged and swallowed.
    fn record_outcome(
        &self,
        action_type: ActionType,
        message: &str,
        outcome: Outcome,
        params: Option<&ActionParams>,
    ) -> Option<String> {
        let result = match self.ledger.lock() {
            Ok(db) => db.record(&self.user_id, action_type, message, outcome, params),
            Err(_) => {
                log::warn!("Ledger lock poisoned; outcome not recorded");
                return None;
            }
        };
        match result {
            Ok(id) => {
                self.invalidate_statistics();
                Some(id)
            }
            Err(e) => {
                log::warn!("Ledger write failed (outcome not recorded): {}", e);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Suggestions
    // -----------------------------------------------------------------------

    fn build_context(&self, inputs: &SuggestionInputs) -> Result<SuggestionContext, AgentError> {
        Ok(SuggestionContext {
            last_quiz: inputs.last_quiz.clone(),
            toolkit_count: inputs.toolkit_count,
            days_since_last_quiz: inputs.days_since_last_quiz,
            weather: inputs.weather.clone(),
            statistics: self.statistics()?,
            recent_actions: self.recent_records(),
            limit: self.config.suggestion_limit,
        })
    }

    async fn refresh(
        &self,
        inputs: &SuggestionInputs,
        mode: RefreshMode,
    ) -> Result<Vec<SuggestedAction>, AgentError> {
        let context = self.build_context(inputs)?;
        let candidates = match self.recommendations.select_next_actions(&context).await {
            Ok(candidates) => candidates,
            Err(e) => {
                // Recommendation outages are recovered locally, never
                // surfaced as hard errors
                log::warn!("Recommendation call failed, using fallback: {}", e);
                vec![error_fallback()]
            }
        };
        let mut selector = self
            .selector
            .lock()
            .map_err(|_| Self::lock_err("selector"))?;
        selector.apply(candidates, mode, &context.statistics);
        Ok(selector.pending().to_vec())
    }

    /// Initial load: replace the pending list.
    pub async fn load_suggestions(
        &self,
        inputs: &SuggestionInputs,
    ) -> Result<Vec<SuggestedAction>, AgentError> {
        self.refresh(inputs, RefreshMode::Replace).await
    }

    /// Top the list back up after a confirm or dismiss, preserving
    /// suggestions the user has not acted on.
    pub async fn refill_suggestions(
        &self,
        inputs: &SuggestionInputs,
    ) -> Result<Vec<SuggestedAction>, AgentError> {
        {
            let selector = self
                .selector
                .lock()
                .map_err(|_| Self::lock_err("selector"))?;
            if !selector.needs_top_up() {
                return Ok(selector.pending().to_vec());
            }
        }
        self.refresh(inputs, RefreshMode::TopUp).await
    }

    pub fn pending_suggestions(&self) -> Result<Vec<SuggestedAction>, AgentError> {
        let selector = self
            .selector
            .lock()
            .map_err(|_| Self::lock_err("selector"))?;
        Ok(selector.pending().to_vec())
    }

    /// Recent outcomes, most recent first. The id of each record is what
    /// feedback submission keys on.
    pub fn recent_actions(&self) -> Vec<ActionRecord> {
        self.recent_records()
    }

    /// Prompt context for the recommendation backend.
    pub fn memory_context(&self) -> Result<String, AgentError> {
        let stats = self.statistics()?;
        Ok(memory_summary(&self.recent_records(), &stats))
    }

    /// Act on a confirmed suggestion.
    ///
    /// Calendar blocks open a negotiation (no ledger record yet; that
    /// waits for the calendar write). Journal entries create the document
    /// first, then record. Quiz suggestions just record.
    pub async fn confirm_suggestion(
        &self,
        action: &SuggestedAction,
    ) -> Result<ConfirmOutcome, AgentError> {
        {
            let mut selector = self
                .selector
                .lock()
                .map_err(|_| Self::lock_err("selector"))?;
            if selector.resolve(action).is_none() {
                log::info!("Confirmed suggestion was not in the pending list");
            }
        }

        match &action.params {
            ActionParams::CreateCalendarBlock(params) => {
                self.negotiator
                    .begin(&params.purpose, params.duration_minutes)?;
                if let Some(window) = &params.time_window {
                    self.negotiator.apply_window(window.clone())?;
                }
                Ok(ConfirmOutcome::SchedulingStarted)
            }
            ActionParams::CreateJournalEntry(params) => {
                let title = format!(
                    "Self-Care Journal Entry - {}",
                    Utc::now().with_timezone(&self.zone).format("%B %-d, %Y")
                );
                let document = self
                    .documents
                    .create_journal_document(&title, &params.prompt_template)
                    .await
                    .map_err(|e| AgentError::DocumentFailure(e.to_string()))?;

                let message = if document.appended {
                    "New prompt added to today's journal entry! Click the link to continue writing.".to_string()
                } else {
                    format!(
                        "Journal entry '{}' created! Click the link to start writing.",
                        document.title
                    )
                };
                let _ = self.record_outcome(
                    ActionType::CreateJournalEntry,
                    &action.message,
                    Outcome::Confirmed,
                    Some(&action.params),
                );
                Ok(ConfirmOutcome::JournalCreated { document, message })
            }
            ActionParams::SuggestRetakeQuiz(_) => {
                let _ = self.record_outcome(
                    ActionType::SuggestRetakeQuiz,
                    &action.message,
                    Outcome::Confirmed,
                    Some(&action.params),
                );
                Ok(ConfirmOutcome::QuizAcknowledged)
            }
        }
    }

    /// Record a dismissal and drop the suggestion from the pending list.
    pub fn dismiss_suggestion(&self, action: &SuggestedAction) -> Result<(), AgentError> {
        {
            let mut selector = self
                .selector
                .lock()
                .map_err(|_| Self::lock_err("selector"))?;
            selector.resolve(action);
        }
        let _ = self.record_outcome(
            action.params.action_type(),
            &action.message,
            Outcome::Dismissed,
            Some(&action.params),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Open a negotiation directly, e.g. for a saved toolkit item with a
    /// free-text time estimate.
    pub fn begin_scheduling(&self, purpose: &str, estimate: &str) -> Result<(), AgentError> {
        self.negotiator.begin_from_estimate(purpose, estimate)
    }

    /// Compute free slots, scored against the user's habitual hours, and
    /// propose one.
    pub async fn suggest_slot(&self) -> Result<Option<crate::types::FreeSlot>, AgentError> {
        let preferred = analyze_preferred_times(&self.all_records(), self.zone);
        self.negotiator.suggest_slot(&preferred).await
    }

    pub fn choose_time(&self, input: &str) -> Result<(), AgentError> {
        self.negotiator.choose_time(input)
    }

    /// Commit the negotiated event, then append the ledger record. The
    /// record is written only after the calendar write succeeded; ledger
    /// failure does not undo the event.
    pub async fn submit_schedule(&self) -> Result<CreatedEvent, AgentError> {
        let session = self
            .negotiator
            .session()?
            .ok_or(AgentError::NoSession)?;
        let event = self.negotiator.submit("Self-care activity").await?;

        let params = ActionParams::CreateCalendarBlock(crate::types::CalendarBlockParams {
            duration_minutes: session.duration_minutes,
            purpose: session.purpose.clone(),
            time_window: Some(crate::timewindow::TimeWindow::concrete(
                event.start,
                Some(self.zone.name().to_string()),
            )),
        });
        let _ = self.record_outcome(
            ActionType::CreateCalendarBlock,
            &format!("Scheduled: {}", session.purpose),
            Outcome::Confirmed,
            Some(&params),
        );
        Ok(event)
    }

    pub fn cancel_scheduling(&self) -> Result<(), AgentError> {
        self.negotiator.cancel()
    }

    pub fn dismiss_scheduling_error(&self) -> Result<(), AgentError> {
        self.negotiator.dismiss_error()
    }

    pub fn negotiation_session(&self) -> Result<Option<NegotiationSession>, AgentError> {
        self.negotiator.session()
    }

    // -----------------------------------------------------------------------
    // Feedback
    // -----------------------------------------------------------------------

    /// Overwrite the rating/helpful columns of a past record.
    pub fn record_feedback(
        &self,
        record_id: &str,
        rating: Option<u8>,
        helpful: Option<bool>,
    ) -> Result<(), AgentError> {
        let db = self
            .ledger
            .lock()
            .map_err(|_| Self::lock_err("ledger"))?;
        db.record_feedback(record_id, rating, helpful)
            .map_err(|e| AgentError::Ledger(e.to_string()))?;
        drop(db);
        self.invalidate_statistics();
        Ok(())
    }
}
