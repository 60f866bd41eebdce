//! libSQL ledger backend — async [`Ledger`] implementation.
//!
//! One append-only table keyed by `(message_id, seq)`. Supports a local
//! file (production) and `:memory:` (tests).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::ledger::model::{self, ProcessingRecord, ProcessingState, Transition};
use crate::ledger::Ledger;

/// libSQL-backed processing ledger.
///
/// Stores a single connection reused for all operations; runs are
/// strictly sequential, so there is no contention to manage.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlLedger {
    /// Open (or create) a local ledger file and initialize the schema.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Backend(format!("Failed to create ledger directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LedgerError::Backend(format!("Failed to open ledger database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| LedgerError::Backend(format!("Failed to create connection: {e}")))?;

        let ledger = Self {
            db: Arc::new(db),
            conn,
        };
        ledger.init_schema().await?;
        info!(path = %path.display(), "Ledger opened");
        Ok(ledger)
    }

    /// Create an in-memory ledger (for tests).
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| LedgerError::Backend(format!("Failed to create in-memory ledger: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| LedgerError::Backend(format!("Failed to create connection: {e}")))?;

        let ledger = Self {
            db: Arc::new(db),
            conn,
        };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS processing_log (
                    message_id  TEXT NOT NULL,
                    seq         INTEGER NOT NULL,
                    state       TEXT NOT NULL,
                    detail      TEXT,
                    recorded_at TEXT NOT NULL,
                    PRIMARY KEY (message_id, seq)
                );
                CREATE INDEX IF NOT EXISTS idx_processing_log_message
                    ON processing_log (message_id);
                "#,
            )
            .await
            .map_err(|e| LedgerError::Backend(format!("init_schema: {e}")))?;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse our canonical RFC 3339 write format, tolerating SQLite's
/// `datetime()` output for rows written out-of-band.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to a libsql value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(v) => libsql::Value::Text(v.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_state(message_id: &str, raw: &str) -> Result<ProcessingState, LedgerError> {
    raw.parse().map_err(|e| {
        LedgerError::Backend(format!("corrupt state column for {message_id}: {e}"))
    })
}

// ── Ledger impl ─────────────────────────────────────────────────────

#[async_trait]
impl Ledger for LibSqlLedger {
    async fn get(&self, message_id: &str) -> Result<Option<ProcessingRecord>, LedgerError> {
        let mut rows = self
            .conn
            .query(
                "SELECT state, detail, recorded_at FROM processing_log
                 WHERE message_id = ?1 ORDER BY seq ASC",
                params![message_id],
            )
            .await
            .map_err(|e| LedgerError::Backend(format!("get: {e}")))?;

        let mut transitions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LedgerError::Backend(format!("get: {e}")))?
        {
            let state_str: String = row
                .get(0)
                .map_err(|e| LedgerError::Backend(format!("get: {e}")))?;
            let detail: Option<String> = row.get(1).ok();
            let recorded_str: String = row
                .get(2)
                .map_err(|e| LedgerError::Backend(format!("get: {e}")))?;

            transitions.push(Transition {
                state: parse_state(message_id, &state_str)?,
                recorded_at: parse_datetime(&recorded_str),
                detail,
            });
        }

        if transitions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ProcessingRecord {
                message_id: message_id.to_string(),
                transitions,
            }))
        }
    }

    async fn record_transition(
        &self,
        message_id: &str,
        state: ProcessingState,
        detail: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut rows = self
            .conn
            .query(
                "SELECT state, seq FROM processing_log
                 WHERE message_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![message_id],
            )
            .await
            .map_err(|e| LedgerError::Backend(format!("record_transition: {e}")))?;

        let (current, next_seq) = match rows
            .next()
            .await
            .map_err(|e| LedgerError::Backend(format!("record_transition: {e}")))?
        {
            Some(row) => {
                let state_str: String = row
                    .get(0)
                    .map_err(|e| LedgerError::Backend(format!("record_transition: {e}")))?;
                let seq: i64 = row
                    .get(1)
                    .map_err(|e| LedgerError::Backend(format!("record_transition: {e}")))?;
                (Some(parse_state(message_id, &state_str)?), seq + 1)
            }
            None => (None, 0),
        };

        model::validate_transition(message_id, current, state)?;

        self.conn
            .execute(
                "INSERT INTO processing_log (message_id, seq, state, detail, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message_id,
                    next_seq,
                    state.to_string(),
                    opt_text(detail),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| LedgerError::Backend(format!("record_transition: {e}")))?;

        debug!(message_id, state = %state, "Recorded transition");
        Ok(())
    }
}
