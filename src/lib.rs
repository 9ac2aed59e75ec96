//! Proactive self-care agent: quiz-driven suggestions, behavioral
//! statistics, and conflict-aware calendar scheduling.
//!
//! Module map:
//! - types: wire-level action/suggestion/record types
//! - stats: statistics and preferred-time analysis over the ledger
//! - suggest: suggestion list policy and deterministic fallbacks
//! - slots: free-slot computation and overlap checks
//! - timewindow: relative labels and explicit time parsing
//! - negotiator: the scheduling state machine
//! - ledger: SQLite action history
//! - providers: external service traits + Google clients
//! - engine: the façade wiring it all together

pub mod engine;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod negotiator;
pub mod providers;
pub mod slots;
pub mod stats;
pub mod suggest;
pub mod timewindow;
pub mod types;

pub use engine::{
    load_config, AgentConfig, AgentEngine, ConfirmOutcome, SuggestionInputs,
};
pub use error::{AgentError, SurfacedError, SurfacedErrorKind};
pub use ledger::LedgerDb;
pub use negotiator::{NegotiationSession, NegotiationState, SchedulingNegotiator};
pub use timewindow::{RelativeTime, TimeWindow};
pub use types::{
    ActionParams, ActionRecord, ActionStatistics, ActionType, BusyInterval, CreatedDocument,
    CreatedEvent, FreeSlot, Outcome, SuggestedAction, SuggestionContext,
};
