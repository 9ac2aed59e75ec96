//! SQLite-backed action ledger.
//!
//! The database lives at `~/.selfcare/selfcare.db`. The ledger is
//! append-only: one row per suggestion outcome, written after the
//! underlying side effect (calendar event, journal document) has
//! succeeded. User feedback overwrites the rating and helpful columns of
//! an existing row, never creates a new one.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ActionParams, ActionRecord, ActionType, Outcome};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to serialize params: {0}")]
    Serialization(String),

    #[error("No ledger record with id {0}")]
    RecordNotFound(String),
}

pub struct LedgerDb {
    conn: Connection,
}

impl LedgerDb {
    /// Open (or create) the ledger at `~/.selfcare/selfcare.db` and apply
    /// the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a ledger at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        Ok(Self { conn })
    }

    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".selfcare").join("selfcare.db"))
    }

    /// Append an outcome row. Returns the new record's id.
    pub fn record(
        &self,
        user_id: &str,
        action_type: ActionType,
        message: &str,
        outcome: Outcome,
        action_params: Option<&ActionParams>,
    ) -> Result<String, DbError> {
        let id = Uuid::new_v4().to_string();
        let params_json = action_params
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO action_records
                (id, user_id, action_type, message, outcome, params_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user_id,
                action_type.as_str(),
                message,
                outcome.as_str(),
                params_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Overwrite the feedback columns of an existing record.
    pub fn record_feedback(
        &self,
        record_id: &str,
        rating: Option<u8>,
        helpful: Option<bool>,
    ) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE action_records
             SET rating = ?1, helpful = ?2, feedback_at = ?3
             WHERE id = ?4",
            params![
                rating,
                helpful,
                Utc::now().to_rfc3339(),
                record_id,
            ],
        )?;
        if updated == 0 {
            return Err(DbError::RecordNotFound(record_id.to_string()));
        }
        Ok(())
    }

    /// Most recent records first, capped at `limit`.
    pub fn recent_actions(&self, user_id: &str, limit: u32) -> Result<Vec<ActionRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, action_type, message, outcome, params_json,
                    rating, helpful, created_at, feedback_at
             FROM action_records
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], row_to_record)?;
        Ok(collect_records(rows))
    }

    /// The full history for a user, most recent first. Statistics are
    /// recomputed from this set, never updated incrementally.
    pub fn all_actions(&self, user_id: &str) -> Result<Vec<ActionRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, action_type, message, outcome, params_json,
                    rating, helpful, created_at, feedback_at
             FROM action_records
             WHERE user_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_record)?;
        Ok(collect_records(rows))
    }

    /// Fetch a single record by id.
    pub fn get(&self, record_id: &str) -> Result<Option<ActionRecord>, DbError> {
        let record = self
            .conn
            .query_row(
                "SELECT id, user_id, action_type, message, outcome, params_json,
                        rating, helpful, created_at, feedback_at
                 FROM action_records
                 WHERE id = ?1",
                params![record_id],
                row_to_record,
            )
            .optional()?;
        Ok(record.flatten())
    }
}

/// Map a row to a record, yielding `None` for rows whose enum or timestamp
/// columns no longer parse. A malformed row is skipped, not fatal.
fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Option<ActionRecord>> {
    let action_type_raw: String = row.get(2)?;
    let outcome_raw: String = row.get(4)?;
    let params_json: Option<String> = row.get(5)?;
    let created_at_raw: String = row.get(8)?;
    let feedback_at_raw: Option<String> = row.get(9)?;

    let (Some(action_type), Some(outcome)) = (
        ActionType::parse(&action_type_raw),
        Outcome::parse(&outcome_raw),
    ) else {
        return Ok(None);
    };
    let Ok(created_at) = DateTime::parse_from_rfc3339(&created_at_raw) else {
        return Ok(None);
    };

    let params = params_json
        .as_deref()
        .and_then(|json| serde_json::from_str::<ActionParams>(json).ok());
    let feedback_at = feedback_at_raw
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Some(ActionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        action_type,
        message: row.get(3)?,
        outcome,
        params,
        rating: row.get(6)?,
        helpful: row.get(7)?,
        created_at: created_at.with_timezone(&Utc),
        feedback_at,
    }))
}

fn collect_records<I>(rows: I) -> Vec<ActionRecord>
where
    I: Iterator<Item = rusqlite::Result<Option<ActionRecord>>>,
{
    let mut records = Vec::new();
    for row in rows {
        match row {
            Ok(Some(record)) => records.push(record),
            Ok(None) => log::warn!("Skipping malformed ledger row"),
            Err(e) => log::warn!("Failed to read ledger row: {}", e),
        }
    }
    records
}
