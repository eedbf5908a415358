//! SQLite-backed step store implementation.
//!
//! This module provides [`SqliteStepStore`], a persistent implementation
//! of [`StepStore`] backed by SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ChainSnapshot, StepStore};
use crate::{
    ApprovalError, ApprovalStep, ProposalRecord, ProposalStatus, Result, RoleKind, StepStatus,
};

/// Schema version for migrations.
const SCHEMA_VERSION: i32 = 2;

/// SQL for creating the approval_steps table.
const CREATE_APPROVAL_STEPS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS approval_steps (
        step_id TEXT NOT NULL PRIMARY KEY,
        proposal_id TEXT NOT NULL,
        order_index INTEGER NOT NULL,
        role_required TEXT,
        assigned_to TEXT,
        is_optional INTEGER NOT NULL,
        optional_unlocked INTEGER NOT NULL,
        status TEXT NOT NULL,
        approved_by TEXT,
        decided_by TEXT,
        decided_at TEXT,
        comment TEXT,
        note TEXT,
        version INTEGER NOT NULL,
        UNIQUE (proposal_id, order_index)
    )
"#;

/// SQL for creating the proposals table.
const CREATE_PROPOSALS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS proposals (
        proposal_id TEXT NOT NULL PRIMARY KEY,
        status TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    )
"#;

/// Schema 1 had no proposal version.
const ADD_PROPOSAL_VERSION_COLUMN: &str =
    "ALTER TABLE proposals ADD COLUMN version INTEGER NOT NULL DEFAULT 0";

/// SQL for creating the schema_version table.
const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    )
"#;

/// Index for the per-user inbox query.
const CREATE_ASSIGNEE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_assigned_status
    ON approval_steps (assigned_to, status)
"#;

/// Column list shared by every step query, in [`StepRow`] order.
const STEP_COLUMNS: &str = "step_id, proposal_id, order_index, role_required, assigned_to, \
     is_optional, optional_unlocked, status, approved_by, decided_by, decided_at, comment, \
     note, version";

/// A step as stored, before its text columns are parsed.
struct StepRow {
    step_id: String,
    proposal_id: String,
    order_index: i64,
    role_required: Option<String>,
    assigned_to: Option<String>,
    is_optional: bool,
    optional_unlocked: bool,
    status: String,
    approved_by: Option<String>,
    decided_by: Option<String>,
    decided_at: Option<String>,
    comment: Option<String>,
    note: Option<String>,
    version: i64,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            step_id: row.get(0)?,
            proposal_id: row.get(1)?,
            order_index: row.get(2)?,
            role_required: row.get(3)?,
            assigned_to: row.get(4)?,
            is_optional: row.get(5)?,
            optional_unlocked: row.get(6)?,
            status: row.get(7)?,
            approved_by: row.get(8)?,
            decided_by: row.get(9)?,
            decided_at: row.get(10)?,
            comment: row.get(11)?,
            note: row.get(12)?,
            version: row.get(13)?,
        })
    }
}

impl TryFrom<StepRow> for ApprovalStep {
    type Error = ApprovalError;

    fn try_from(row: StepRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.step_id)
            .map_err(|e| ApprovalError::StepStore(format!("invalid step id: {}", e)))?;
        let role_required = row
            .role_required
            .as_deref()
            .map(str::parse::<RoleKind>)
            .transpose()?;
        let decided_at = row
            .decided_at
            .as_deref()
            .map(|at| {
                DateTime::parse_from_rfc3339(at)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| ApprovalError::StepStore(format!("invalid timestamp: {}", e)))
            })
            .transpose()?;

        Ok(Self {
            id,
            proposal_id: row.proposal_id,
            order_index: u32::try_from(row.order_index)
                .map_err(|e| ApprovalError::StepStore(format!("invalid order index: {}", e)))?,
            role_required,
            assigned_to: row.assigned_to,
            is_optional: row.is_optional,
            optional_unlocked: row.optional_unlocked,
            status: row.status.parse::<StepStatus>()?,
            approved_by: row.approved_by,
            decided_by: row.decided_by,
            decided_at,
            comment: row.comment,
            note: row.note,
            version: u64::try_from(row.version)
                .map_err(|e| ApprovalError::StepStore(format!("invalid version: {}", e)))?,
        })
    }
}

fn db_error(e: rusqlite::Error) -> ApprovalError {
    ApprovalError::Database(e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> ApprovalError {
    ApprovalError::StepStore(format!("spawn_blocking failed: {}", e))
}

fn read_record(conn: &Connection, proposal_id: &str) -> Result<Option<ProposalRecord>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT status, version FROM proposals WHERE proposal_id = ?1",
            params![proposal_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_error)?;

    row.map(|(status, version)| {
        Ok(ProposalRecord {
            status: status.parse()?,
            version: u64::try_from(version)
                .map_err(|e| ApprovalError::StepStore(format!("invalid version: {}", e)))?,
        })
    })
    .transpose()
}

fn query_steps(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ApprovalStep>> {
    let mut stmt = conn.prepare(sql).map_err(db_error)?;
    let rows = stmt
        .query_map(args, StepRow::from_row)
        .map_err(db_error)?;

    let mut steps = Vec::new();
    for row in rows {
        steps.push(ApprovalStep::try_from(row.map_err(db_error)?)?);
    }
    Ok(steps)
}

/// A SQLite-backed implementation of [`StepStore`].
///
/// This store persists approval chains to a SQLite database, so decisions
/// survive process restarts. Commits run inside a transaction and match on
/// each step's `version`, giving the same all-or-nothing guarantee as the
/// in-memory store.
///
/// # Thread Safety
///
/// The store wraps the SQLite connection in a `Mutex` and uses
/// `spawn_blocking` for all database operations, making it safe
/// for use in async contexts.
///
/// # Example
///
/// ```rust,ignore
/// use signoff::SqliteStepStore;
///
/// // Open or create a database file
/// let store = SqliteStepStore::open("signoff.db").await?;
///
/// // Or use an in-memory database for testing
/// let store = SqliteStepStore::open_in_memory().await?;
/// ```
#[derive(Clone)]
pub struct SqliteStepStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStepStore {
    /// Opens a SQLite database at the given path.
    ///
    /// Creates the database and schema if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || Connection::open(&path))
            .await
            .map_err(join_error)?
            .map_err(|e| ApprovalError::Database(format!("failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    /// Opens an in-memory SQLite database.
    ///
    /// Useful for testing. The database is lost when the store is dropped.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(Connection::open_in_memory)
            .await
            .map_err(join_error)?
            .map_err(|e| {
                ApprovalError::Database(format!("failed to open in-memory database: {}", e))
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    /// Runs schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            conn.execute(CREATE_SCHEMA_VERSION_TABLE, [])?;

            let version: Option<i32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?;

            if version.map_or(true, |v| v < SCHEMA_VERSION) {
                if version == Some(1) {
                    conn.execute(ADD_PROPOSAL_VERSION_COLUMN, [])?;
                }
                conn.execute(CREATE_APPROVAL_STEPS_TABLE, [])?;
                conn.execute(CREATE_PROPOSALS_TABLE, [])?;
                conn.execute(CREATE_ASSIGNEE_INDEX, [])?;

                conn.execute("DELETE FROM schema_version", [])?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }

            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(join_error)?
        .map_err(|e| ApprovalError::Database(format!("migration failed: {}", e)))
    }

    /// Checks if the required tables exist.
    ///
    /// Useful for testing that the schema was created correctly.
    pub async fn tables_exist(&self) -> Result<bool> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('approval_steps', 'proposals', 'schema_version')",
            )?;
            let tables: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();

            Ok::<bool, rusqlite::Error>(tables.len() == 3)
        })
        .await
        .map_err(join_error)?
        .map_err(db_error)
    }
}

impl std::fmt::Debug for SqliteStepStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStepStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepStore for SqliteStepStore {
    async fn insert_chain(
        &mut self,
        proposal_id: &str,
        steps: &[ApprovalStep],
        status: ProposalStatus,
    ) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let proposal_id = proposal_id.to_string();
        let steps = steps.to_vec();
        let updated_at = Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(db_error)?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM proposals WHERE proposal_id = ?1",
                    params![proposal_id],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_error)?
                .is_some();
            if exists {
                return Err(ApprovalError::ChainAlreadyExists(proposal_id));
            }

            for step in &steps {
                tx.execute(
                    &format!(
                        "INSERT INTO approval_steps ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                        STEP_COLUMNS
                    ),
                    params![
                        step.id.to_string(),
                        proposal_id,
                        step.order_index,
                        step.role_required.map(|r| r.as_str()),
                        step.assigned_to,
                        step.is_optional,
                        step.optional_unlocked,
                        step.status.as_str(),
                        step.approved_by,
                        step.decided_by,
                        step.decided_at.map(|at| at.to_rfc3339()),
                        step.comment,
                        step.note,
                        step.version as i64,
                    ],
                )
                .map_err(db_error)?;
            }

            tx.execute(
                "INSERT INTO proposals (proposal_id, status, updated_at) VALUES (?1, ?2, ?3)",
                params![proposal_id, status.as_str(), updated_at],
            )
            .map_err(db_error)?;

            tx.commit().map_err(db_error)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_step(&self, step_id: Uuid) -> Result<Option<ApprovalStep>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let row = conn
                .query_row(
                    &format!("SELECT {} FROM approval_steps WHERE step_id = ?1", STEP_COLUMNS),
                    params![step_id.to_string()],
                    StepRow::from_row,
                )
                .optional()
                .map_err(db_error)?;

            row.map(ApprovalStep::try_from).transpose()
        })
        .await
        .map_err(join_error)?
    }

    async fn get_chain(&self, proposal_id: &str) -> Result<Vec<ApprovalStep>> {
        let conn = Arc::clone(&self.conn);
        let proposal_id = proposal_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            query_steps(
                &conn,
                &format!(
                    "SELECT {} FROM approval_steps WHERE proposal_id = ?1 ORDER BY order_index",
                    STEP_COLUMNS
                ),
                &[&proposal_id],
            )
        })
        .await
        .map_err(join_error)?
    }

    async fn load_snapshot(&self, proposal_id: &str) -> Result<Option<ChainSnapshot>> {
        let conn = Arc::clone(&self.conn);
        let proposal_id = proposal_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let Some(proposal) = read_record(&conn, &proposal_id)? else {
                return Ok(None);
            };
            let steps = query_steps(
                &conn,
                &format!(
                    "SELECT {} FROM approval_steps WHERE proposal_id = ?1 ORDER BY order_index",
                    STEP_COLUMNS
                ),
                &[&proposal_id],
            )?;

            Ok(Some(ChainSnapshot { proposal, steps }))
        })
        .await
        .map_err(join_error)?
    }

    async fn commit(
        &mut self,
        proposal_id: &str,
        expected_version: u64,
        steps: &[ApprovalStep],
        status: ProposalStatus,
    ) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let proposal_id = proposal_id.to_string();
        let steps = steps.to_vec();
        let updated_at = Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(db_error)?;

            let record = read_record(&tx, &proposal_id)?
                .ok_or_else(|| ApprovalError::ProposalNotFound(proposal_id.clone()))?;
            if record.status.is_closed() {
                return Err(ApprovalError::ProposalClosed(proposal_id));
            }
            if record.version != expected_version {
                return Err(ApprovalError::ProposalConflict(proposal_id));
            }

            for step in &steps {
                let updated = tx
                    .execute(
                        "UPDATE approval_steps SET assigned_to = ?1, optional_unlocked = ?2, \
                         status = ?3, approved_by = ?4, decided_by = ?5, decided_at = ?6, \
                         comment = ?7, note = ?8, version = version + 1 \
                         WHERE step_id = ?9 AND proposal_id = ?10 AND version = ?11",
                        params![
                            step.assigned_to,
                            step.optional_unlocked,
                            step.status.as_str(),
                            step.approved_by,
                            step.decided_by,
                            step.decided_at.map(|at| at.to_rfc3339()),
                            step.comment,
                            step.note,
                            step.id.to_string(),
                            proposal_id,
                            step.version as i64,
                        ],
                    )
                    .map_err(db_error)?;

                if updated == 0 {
                    // Dropping the transaction rolls back earlier updates
                    let exists = tx
                        .query_row(
                            "SELECT 1 FROM approval_steps WHERE step_id = ?1 AND proposal_id = ?2",
                            params![step.id.to_string(), proposal_id],
                            |_| Ok(()),
                        )
                        .optional()
                        .map_err(db_error)?
                        .is_some();
                    return Err(if exists {
                        ApprovalError::Conflict(step.id)
                    } else {
                        ApprovalError::StepNotFound(step.id)
                    });
                }
            }

            let updated = tx
                .execute(
                    "UPDATE proposals SET status = ?1, updated_at = ?2, version = version + 1 \
                     WHERE proposal_id = ?3 AND version = ?4",
                    params![status.as_str(), updated_at, proposal_id, expected_version as i64],
                )
                .map_err(db_error)?;
            if updated == 0 {
                return Err(ApprovalError::ProposalConflict(proposal_id));
            }

            tx.commit().map_err(db_error)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_proposal(&self, proposal_id: &str) -> Result<Option<ProposalRecord>> {
        let conn = Arc::clone(&self.conn);
        let proposal_id = proposal_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            read_record(&conn, &proposal_id)
        })
        .await
        .map_err(join_error)?
    }

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<ApprovalStep>> {
        let conn = Arc::clone(&self.conn);
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            query_steps(
                &conn,
                &format!(
                    "SELECT {} FROM approval_steps \
                     WHERE assigned_to = ?1 AND status = 'pending' \
                     AND (is_optional = 0 OR optional_unlocked = 1) \
                     ORDER BY proposal_id, order_index",
                    STEP_COLUMNS
                ),
                &[&user_id],
            )
        })
        .await
        .map_err(join_error)?
    }

    async fn unassigned_steps(&self) -> Result<Vec<ApprovalStep>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            query_steps(
                &conn,
                &format!(
                    "SELECT {} FROM approval_steps \
                     WHERE assigned_to IS NULL AND status IN ('pending', 'waiting') \
                     ORDER BY proposal_id, order_index",
                    STEP_COLUMNS
                ),
                &[],
            )
        })
        .await
        .map_err(join_error)?
    }

    async fn delete_proposal(&mut self, proposal_id: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let proposal_id = proposal_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM approval_steps WHERE proposal_id = ?1",
                params![proposal_id],
            )?;
            tx.execute(
                "DELETE FROM proposals WHERE proposal_id = ?1",
                params![proposal_id],
            )?;

            tx.commit()
        })
        .await
        .map_err(join_error)?
        .map_err(|e| ApprovalError::Database(format!("delete failed: {}", e)))
    }

    async fn list_proposals(&self) -> Result<Vec<String>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let mut stmt = conn.prepare("SELECT proposal_id FROM proposals ORDER BY proposal_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;

            rows.collect::<std::result::Result<Vec<String>, _>>()
        })
        .await
        .map_err(join_error)?
        .map_err(db_error)
    }
}
