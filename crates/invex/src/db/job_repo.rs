//! Job repository — CRUD operations for the `jobs` table.
//!
//! This layer moves rows; lifecycle rules (legal transitions, monotonic
//! progress) live in `jobs::store`.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub message_id: String,
    pub status: String,
    pub progress: u8,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub queued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            result: row.get("result")?,
            error_message: row.get("error_message")?,
            queued_at: row.get("queued_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, message_id, status, progress, result, error_message,
             queued_at, started_at, finished_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.message_id,
                job.status,
                job.progress,
                job.result,
                job.error_message,
                job.queued_at,
                job.started_at,
                job.finished_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds the success-status job for a message id, if one exists.
/// The partial unique index guarantees at most one row.
pub fn find_success_for_message(
    db: &Database,
    message_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE message_id = ?1 AND status = 'success'")?;
        let mut rows = stmt.query_map(params![message_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists all jobs for a message id, newest first.
pub fn find_by_message(db: &Database, message_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE message_id = ?1 ORDER BY queued_at DESC")?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![message_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Updates status and the related lifecycle columns.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    started_at: Option<&str>,
    finished_at: Option<&str>,
    result: Option<&str>,
    error_message: Option<&str>,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = ?2,
                 started_at = COALESCE(?3, started_at),
                 finished_at = COALESCE(?4, finished_at),
                 result = COALESCE(?5, result),
                 error_message = COALESCE(?6, error_message),
                 updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                status,
                started_at,
                finished_at,
                result,
                error_message,
                updated_at
            ],
        )?;
        Ok(())
    })
}

/// Raises progress to `progress` if the stored value is lower. Progress
/// never moves backwards.
pub fn raise_progress(
    db: &Database,
    id: &str,
    progress: u8,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET progress = MAX(progress, ?2), updated_at = ?3 WHERE id = ?1",
            params![id, progress, updated_at],
        )?;
        Ok(())
    })
}

/// Counts jobs in a given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
