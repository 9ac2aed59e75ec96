//! Suggestion list policy: dedup, top-up after confirm/dismiss, and the
//! deterministic fallback when the recommendation backend returns nothing.
//!
//! Candidate generation itself is an external call owned by the engine;
//! this module only decides what the pending list looks like afterwards.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::types::{
    ActionParams, ActionRecord, ActionStatistics, ActionType, JournalEntryParams, Outcome,
    RetakeQuizParams, SuggestedAction,
};

/// Structural identity of a suggestion: type, message, and params. Two
/// suggestions with the same fingerprint are the same suggestion.
pub fn fingerprint(action: &SuggestedAction) -> String {
    let params_json =
        serde_json::to_string(&action.params).unwrap_or_default();
    let mut hasher = Sha256::new();
    for part in [action.params.action_type().as_str(), &action.message, &params_json] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// How a batch of candidates is folded into the pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Initial load: the new batch replaces whatever was pending.
    Replace,
    /// After a confirm or dismiss: keep pending suggestions the user has
    /// not acted on, only append until the limit is reached.
    TopUp,
}

/// Pending-suggestion list with a fixed size limit.
#[derive(Debug)]
pub struct SuggestionSelector {
    pending: Vec<SuggestedAction>,
    limit: usize,
}

impl SuggestionSelector {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    pub fn pending(&self) -> &[SuggestedAction] {
        &self.pending
    }

    pub fn needs_top_up(&self) -> bool {
        self.pending.len() < self.limit
    }

    /// Fold a candidate batch into the pending list. Duplicates of
    /// already-pending suggestions are dropped. If the list would end up
    /// empty, a deterministic fallback is synthesized instead; the user
    /// is never left with nothing.
    pub fn apply(
        &mut self,
        candidates: Vec<SuggestedAction>,
        mode: RefreshMode,
        statistics: &ActionStatistics,
    ) {
        if mode == RefreshMode::Replace {
            self.pending.clear();
        }
        let mut seen: Vec<String> = self.pending.iter().map(fingerprint).collect();
        for candidate in candidates {
            if self.pending.len() >= self.limit {
                break;
            }
            let fp = fingerprint(&candidate);
            if seen.contains(&fp) {
                continue;
            }
            seen.push(fp);
            self.pending.push(candidate);
        }

        if self.pending.is_empty() {
            self.pending.push(fallback_suggestion(statistics));
        }
    }

    /// Remove a suggestion the user acted on, matched structurally.
    /// Returns the removed suggestion, or `None` if it was not pending
    /// (already resolved elsewhere).
    pub fn resolve(&mut self, action: &SuggestedAction) -> Option<SuggestedAction> {
        let fp = fingerprint(action);
        let index = self.pending.iter().position(|a| fingerprint(a) == fp)?;
        Some(self.pending.remove(index))
    }
}

/// Fallback when the recommendation call returned zero candidates.
/// Journaling if the user has a history of accepting it, otherwise the
/// quiz.
pub fn fallback_suggestion(statistics: &ActionStatistics) -> SuggestedAction {
    let base = "How are you feeling today? Would you like to take a moment to reflect or check in with yourself?";

    let journal_acceptance = statistics
        .acceptance_rate(ActionType::CreateJournalEntry)
        .unwrap_or(0.0);

    if journal_acceptance >= 0.5 {
        SuggestedAction {
            params: ActionParams::CreateJournalEntry(JournalEntryParams {
                prompt_template: "Take a moment to check in with yourself. How are you feeling right now? What's one thing you're grateful for today?".to_string(),
            }),
            message: format!("{base} I can create a quick journal entry for you to reflect."),
            requires_confirmation: true,
        }
    } else {
        SuggestedAction {
            params: ActionParams::SuggestRetakeQuiz(RetakeQuizParams {
                reason: Some("Regular check-ins help maintain wellbeing".to_string()),
            }),
            message: format!("{base} Taking our self-care quiz can help identify what you need right now."),
            requires_confirmation: true,
        }
    }
}

/// Fallback when the recommendation call itself failed.
pub fn error_fallback() -> SuggestedAction {
    SuggestedAction {
        params: ActionParams::SuggestRetakeQuiz(RetakeQuizParams {
            reason: Some("Get personalized recommendations".to_string()),
        }),
        message: "We had trouble generating personalized suggestions. Would you like to take our self-care quiz to get started?".to_string(),
        requires_confirmation: true,
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn action_display(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::CreateCalendarBlock => "Scheduled block",
        ActionType::CreateJournalEntry => "Journaling",
        ActionType::SuggestRetakeQuiz => "Quiz retake",
    }
}

fn outcome_display(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Confirmed => "accepted",
        Outcome::Dismissed => "declined",
    }
}

/// Render recent history and behavior statistics as prompt context for
/// the recommendation backend. Last three outcomes in detail, then
/// aggregate counts, then derived preference statements and ratings.
pub fn memory_summary(recent: &[ActionRecord], statistics: &ActionStatistics) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !recent.is_empty() {
        let last = &recent[..recent.len().min(3)];
        parts.push(format!(
            "Last {} suggestions (most recent first):",
            last.len()
        ));
        for (i, action) in last.iter().enumerate() {
            let snippet: String = if action.message.chars().count() > 50 {
                action.message.chars().take(50).collect::<String>() + "..."
            } else {
                action.message.clone()
            };
            parts.push(format!(
                "  {}. {}: \"{}\" -> {}",
                i + 1,
                action_display(action.action_type),
                snippet,
                outcome_display(action.outcome)
            ));
        }

        if recent.len() > 3 {
            let mut counts: BTreeMap<(&str, &str), u32> = BTreeMap::new();
            for action in recent {
                *counts
                    .entry((
                        action.action_type.as_str(),
                        outcome_display(action.outcome),
                    ))
                    .or_default() += 1;
            }
            parts.push(format!("Pattern from last {} actions:", recent.len()));
            for ((type_name, outcome), count) in counts {
                parts.push(format!(
                    "  - {} {} ({})",
                    count,
                    title_case(&type_name.replace('_', " ")),
                    outcome
                ));
            }
        }
    }

    if !statistics.preferences.is_empty() {
        parts.push("User behavior patterns:".to_string());
        for preference in &statistics.preferences {
            parts.push(format!("  - {preference}"));
        }
    }

    let mut rated: Vec<(&ActionType, f64)> = statistics
        .by_type
        .iter()
        .filter_map(|(t, s)| s.average_rating.map(|r| (t, r)))
        .collect();
    if !rated.is_empty() {
        rated.sort_by_key(|(t, _)| t.as_str());
        parts.push("Average ratings by action type:".to_string());
        for (action_type, rating) in rated {
            parts.push(format!(
                "  - {}: {rating:.1}/5",
                title_case(&action_type.human_name())
            ));
        }
    }

    parts.join("\n")
}
