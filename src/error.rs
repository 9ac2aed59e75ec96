//! Error types for the agent engine.
//!
//! Errors are classified by how they reach the user:
//! - SchedulingConflict / SchedulingFailure / DocumentFailure: user-visible,
//!   retryable, the negotiation session survives them.
//! - RecommendationUnavailable: recovered locally with a fallback
//!   suggestion, never surfaced.
//! - Ledger: logged and swallowed, never undoing the primary action.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The recommendation call failed or returned nothing useful.
    #[error("Recommendations unavailable: {0}")]
    RecommendationUnavailable(String),

    /// The destination time is no longer free. Expected and recoverable.
    #[error("{message}")]
    SchedulingConflict { message: String },

    /// Unexpected external error during the calendar write.
    #[error("Failed to create calendar event: {0}")]
    SchedulingFailure(String),

    /// Journal document creation failed.
    #[error("Failed to create journal entry: {0}")]
    DocumentFailure(String),

    /// Ledger write failed. Best-effort: callers log and move on.
    #[error("Ledger write failed: {0}")]
    Ledger(String),

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    /// A submission is already in flight for this session.
    #[error("A scheduling request is already being submitted")]
    SubmissionInFlight,

    /// Only one negotiation session may exist per user at a time.
    #[error("Another scheduling session is already active")]
    SessionActive,

    #[error("No active scheduling session")]
    NoSession,

    /// Cancellation is only honored at state boundaries.
    #[error("Cannot cancel while a submission is in flight")]
    CancelUnavailable,
}

impl AgentError {
    /// Only conflicts and write failures are shown to the user; everything
    /// else is auto-recovered or silently degraded.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            AgentError::SchedulingConflict { .. }
                | AgentError::SchedulingFailure(_)
                | AgentError::DocumentFailure(_)
        )
    }

    /// Returns true if the user may simply try again (possibly with a
    /// different time).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::SchedulingConflict { .. }
                | AgentError::SchedulingFailure(_)
                | AgentError::DocumentFailure(_)
                | AgentError::RecommendationUnavailable(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AgentError::SchedulingConflict { .. })
    }
}

/// Serializable error representation for the UI boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfacedError {
    pub message: String,
    pub kind: SurfacedErrorKind,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfacedErrorKind {
    Conflict,
    Failure,
}

impl From<&AgentError> for SurfacedError {
    fn from(err: &AgentError) -> Self {
        let kind = if err.is_conflict() {
            SurfacedErrorKind::Conflict
        } else {
            SurfacedErrorKind::Failure
        };
        SurfacedError {
            message: err.to_string(),
            kind,
            can_retry: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_scheduling_errors_are_user_visible() {
        assert!(AgentError::SchedulingConflict {
            message: "Time slot conflicts with 'Standup'".to_string()
        }
        .is_user_visible());
        assert!(AgentError::SchedulingFailure("500".to_string()).is_user_visible());
        assert!(!AgentError::RecommendationUnavailable("empty".to_string()).is_user_visible());
        assert!(!AgentError::Ledger("disk full".to_string()).is_user_visible());
    }

    #[test]
    fn test_surfaced_error_kind() {
        let err = AgentError::SchedulingConflict {
            message: "busy".to_string(),
        };
        let surfaced = SurfacedError::from(&err);
        assert_eq!(surfaced.kind, SurfacedErrorKind::Conflict);
        assert!(surfaced.can_retry);
        assert_eq!(surfaced.message, "busy");
    }
}
