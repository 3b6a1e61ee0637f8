//! Invoice repository — persistence for `InvoiceRecord`.
//!
//! Heterogeneous maps (`extracted`, `normalized`, `suggestions`) are
//! stored as JSON columns and decoded on read.

use rusqlite::{params, Row};

use crate::model::{
    ExtractedFields, InvoiceRecord, NormalizedFields, ReconciliationStatus, SuggestionSet,
};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
struct InvoiceRow {
    id: String,
    source_message_id: String,
    raw_text: String,
    extracted: String,
    normalized: String,
    reconciliation_status: String,
    tags: String,
    suggestions: String,
    created_at: String,
    updated_at: String,
}

impl InvoiceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_message_id: row.get("source_message_id")?,
            raw_text: row.get("raw_text")?,
            extracted: row.get("extracted")?,
            normalized: row.get("normalized")?,
            reconciliation_status: row.get("reconciliation_status")?,
            tags: row.get("tags")?,
            suggestions: row.get("suggestions")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_record(self) -> Result<InvoiceRecord, DatabaseError> {
        let corrupt = |column: &'static str, reason: String| DatabaseError::CorruptColumn {
            column,
            id: self.id.clone(),
            reason,
        };

        let extracted: ExtractedFields = serde_json::from_str(&self.extracted)
            .map_err(|e| corrupt("extracted", e.to_string()))?;
        let normalized: NormalizedFields = serde_json::from_str(&self.normalized)
            .map_err(|e| corrupt("normalized", e.to_string()))?;
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).map_err(|e| corrupt("tags", e.to_string()))?;
        let suggestions: SuggestionSet = serde_json::from_str(&self.suggestions)
            .map_err(|e| corrupt("suggestions", e.to_string()))?;
        let reconciliation_status = ReconciliationStatus::parse(&self.reconciliation_status)
            .ok_or_else(|| {
                corrupt(
                    "reconciliation_status",
                    format!("unknown status '{}'", self.reconciliation_status),
                )
            })?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt("created_at", e.to_string()))?
            .with_timezone(&chrono::Utc);
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| corrupt("updated_at", e.to_string()))?
            .with_timezone(&chrono::Utc);

        Ok(InvoiceRecord {
            id: self.id,
            source_message_id: self.source_message_id,
            raw_text: self.raw_text,
            extracted,
            normalized,
            reconciliation_status,
            tags,
            suggestions,
            created_at,
            updated_at,
        })
    }
}

fn encode(record: &InvoiceRecord) -> Result<InvoiceRow, DatabaseError> {
    let corrupt = |column: &'static str, reason: String| DatabaseError::CorruptColumn {
        column,
        id: record.id.clone(),
        reason,
    };
    Ok(InvoiceRow {
        id: record.id.clone(),
        source_message_id: record.source_message_id.clone(),
        raw_text: record.raw_text.clone(),
        extracted: serde_json::to_string(&record.extracted)
            .map_err(|e| corrupt("extracted", e.to_string()))?,
        normalized: serde_json::to_string(&record.normalized)
            .map_err(|e| corrupt("normalized", e.to_string()))?,
        reconciliation_status: record.reconciliation_status.as_str().to_string(),
        tags: serde_json::to_string(&record.tags).map_err(|e| corrupt("tags", e.to_string()))?,
        suggestions: serde_json::to_string(&record.suggestions)
            .map_err(|e| corrupt("suggestions", e.to_string()))?,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    })
}

/// Inserts a new invoice. First-write only; there is no upsert.
pub fn insert(db: &Database, record: &InvoiceRecord) -> Result<(), DatabaseError> {
    let row = encode(record)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO invoices (id, source_message_id, raw_text, extracted, normalized,
             reconciliation_status, tags, suggestions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.source_message_id,
                row.raw_text,
                row.extracted,
                row.normalized,
                row.reconciliation_status,
                row.tags,
                row.suggestions,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Persists the reconciliation outcome: normalized fields, status and
/// suggestions. Nothing else on the row is touched.
pub fn update_reconciliation(db: &Database, record: &InvoiceRecord) -> Result<(), DatabaseError> {
    let row = encode(record)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE invoices SET normalized = ?2, reconciliation_status = ?3,
             suggestions = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                row.id,
                row.normalized,
                row.reconciliation_status,
                row.suggestions,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Finds an invoice by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<InvoiceRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM invoices WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], InvoiceRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(InvoiceRow::into_record).transpose()
}

/// Finds invoices created from a given source message, newest first.
pub fn find_by_message(
    db: &Database,
    message_id: &str,
) -> Result<Vec<InvoiceRecord>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM invoices WHERE source_message_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows: Vec<InvoiceRow> = stmt
            .query_map(params![message_id], InvoiceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(InvoiceRow::into_record).collect()
}

/// Lists invoices in a given reconciliation status, oldest first.
pub fn find_by_reconciliation_status(
    db: &Database,
    status: ReconciliationStatus,
    limit: u64,
) -> Result<Vec<InvoiceRecord>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM invoices WHERE reconciliation_status = ?1
             ORDER BY created_at ASC LIMIT ?2",
        )?;
        let rows: Vec<InvoiceRow> = stmt
            .query_map(params![status.as_str(), limit], InvoiceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(InvoiceRow::into_record).collect()
}

/// Substring search over stored raw text, newest first.
pub fn search_raw_text(
    db: &Database,
    needle: &str,
    limit: u64,
) -> Result<Vec<InvoiceRecord>, DatabaseError> {
    let pattern = format!(
        "%{}%",
        needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM invoices WHERE raw_text LIKE ?1 ESCAPE '\\'
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows: Vec<InvoiceRow> = stmt
            .query_map(params![pattern, limit], InvoiceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(InvoiceRow::into_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, Provenance, Suggestion};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample(message_id: &str, text: &str) -> InvoiceRecord {
        let mut extracted = BTreeMap::new();
        extracted.insert(
            "vendor_name".to_string(),
            FieldValue {
                value: json!("ACME SUPPLIES"),
                confidence: 0.9,
                provenance: Provenance {
                    method: "header_pattern".to_string(),
                    pattern: None,
                    snippet: "ACME SUPPLIES".to_string(),
                },
            },
        );
        InvoiceRecord::new(message_id, text.to_string(), extracted)
    }

    #[test]
    fn test_insert_and_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let record = sample("m1", "Invoice INV-1 from ACME");
        insert(&db, &record).unwrap();

        let loaded = find_by_id(&db, &record.id).unwrap().unwrap();
        assert_eq!(loaded.source_message_id, "m1");
        assert_eq!(
            loaded.reconciliation_status,
            ReconciliationStatus::NeedsReview
        );
        assert_eq!(
            loaded.extracted.get("vendor_name").unwrap().as_str(),
            Some("ACME SUPPLIES")
        );
        assert!(loaded.normalized.vendor_id.is_none());
    }

    #[test]
    fn test_update_reconciliation() {
        let db = Database::open_in_memory().unwrap();
        let mut record = sample("m1", "text");
        insert(&db, &record).unwrap();

        record.normalized.vendor_id = Some(7);
        record.normalized.vendor_name = Some("ACME Supplies Pvt Ltd".to_string());
        record.reconciliation_status = ReconciliationStatus::AutoMatched;
        record.suggestions.vendors.push(Suggestion {
            entry_id: 7,
            name: "ACME Supplies Pvt Ltd".to_string(),
            score: 100,
        });
        update_reconciliation(&db, &record).unwrap();

        let loaded = find_by_id(&db, &record.id).unwrap().unwrap();
        assert_eq!(loaded.normalized.vendor_id, Some(7));
        assert_eq!(
            loaded.reconciliation_status,
            ReconciliationStatus::AutoMatched
        );
        assert_eq!(loaded.suggestions.vendors.len(), 1);
        // raw_text untouched by the reconciliation write.
        assert_eq!(loaded.raw_text, "text");
    }

    #[test]
    fn test_find_by_message() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample("m1", "a")).unwrap();
        insert(&db, &sample("m1", "b")).unwrap();
        insert(&db, &sample("m2", "c")).unwrap();

        assert_eq!(find_by_message(&db, "m1").unwrap().len(), 2);
        assert_eq!(find_by_message(&db, "m2").unwrap().len(), 1);
        assert!(find_by_message(&db, "m3").unwrap().is_empty());
    }

    #[test]
    fn test_find_by_reconciliation_status() {
        let db = Database::open_in_memory().unwrap();
        let mut matched = sample("m1", "a");
        matched.reconciliation_status = ReconciliationStatus::AutoMatched;
        insert(&db, &matched).unwrap();
        insert(&db, &sample("m2", "b")).unwrap();

        let pending =
            find_by_reconciliation_status(&db, ReconciliationStatus::NeedsReview, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_message_id, "m2");
    }

    #[test]
    fn test_search_raw_text() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample("m1", "Invoice INV-2025-123 from ACME")).unwrap();
        insert(&db, &sample("m2", "Receipt for office chairs")).unwrap();

        let hits = search_raw_text(&db, "INV-2025", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_message_id, "m1");

        // LIKE wildcards in the needle are escaped, not interpreted.
        assert!(search_raw_text(&db, "%", 10).unwrap().is_empty());
    }
}
