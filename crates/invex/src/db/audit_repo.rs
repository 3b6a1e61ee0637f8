//! Audit log repository.
//!
//! Append-only by construction: the module exposes `append` and reads,
//! nothing else. Rows are written by manual correction flows (external);
//! the extraction pipeline itself never appends here. Its extracted and
//! normalized writes are first-write or engine-owned and bypass audit.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub id: i64,
    pub invoice_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub recorded_at: String,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            invoice_id: row.get("invoice_id")?,
            field: row.get("field")?,
            old_value: row.get("old_value")?,
            new_value: row.get("new_value")?,
            actor: row.get("actor")?,
            recorded_at: row.get("recorded_at")?,
        })
    }
}

/// Appends an audit entry and returns its id.
pub fn append(
    db: &Database,
    invoice_id: &str,
    field: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    actor: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO audit_log (invoice_id, field, old_value, new_value, actor, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                invoice_id,
                field,
                old_value,
                new_value,
                actor,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists audit entries for an invoice in insertion order.
pub fn list_for_invoice(db: &Database, invoice_id: &str) -> Result<Vec<AuditRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM audit_log WHERE invoice_id = ?1 ORDER BY id ASC")?;
        let rows: Vec<AuditRow> = stmt
            .query_map(params![invoice_id], AuditRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
