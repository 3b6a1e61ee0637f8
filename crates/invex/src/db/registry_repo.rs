//! Registry repository — read access to canonical vendors and projects.
//!
//! The registry is owned externally; the pipeline only reads it. Inserts
//! exist for seeding and tests.

use rusqlite::{params, Row};

use crate::model::{RegistryEntry, RegistryKind};

use super::{Database, DatabaseError};

fn kind_from_str(s: &str, id: i64) -> Result<RegistryKind, DatabaseError> {
    match s {
        "vendor" => Ok(RegistryKind::Vendor),
        "project" => Ok(RegistryKind::Project),
        other => Err(DatabaseError::CorruptColumn {
            column: "kind",
            id: id.to_string(),
            reason: format!("unknown kind '{}'", other),
        }),
    }
}

fn entry_from_row(row: &Row<'_>) -> Result<(i64, String, String, String, String), rusqlite::Error> {
    Ok((
        row.get("id")?,
        row.get("kind")?,
        row.get("canonical_name")?,
        row.get("aliases")?,
        row.get("metadata")?,
    ))
}

fn decode(
    (id, kind, canonical_name, aliases, metadata): (i64, String, String, String, String),
) -> Result<RegistryEntry, DatabaseError> {
    let aliases: Vec<String> =
        serde_json::from_str(&aliases).map_err(|e| DatabaseError::CorruptColumn {
            column: "aliases",
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    let metadata: serde_json::Value =
        serde_json::from_str(&metadata).map_err(|e| DatabaseError::CorruptColumn {
            column: "metadata",
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    Ok(RegistryEntry {
        id,
        kind: kind_from_str(&kind, id)?,
        canonical_name,
        aliases,
        metadata,
    })
}

/// Inserts a registry entry and returns its id.
pub fn insert(
    db: &Database,
    kind: RegistryKind,
    canonical_name: &str,
    aliases: &[&str],
) -> Result<i64, DatabaseError> {
    let aliases_json =
        serde_json::to_string(aliases).map_err(|e| DatabaseError::CorruptColumn {
            column: "aliases",
            id: canonical_name.to_string(),
            reason: e.to_string(),
        })?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO registry_entries (kind, canonical_name, aliases, metadata, created_at)
             VALUES (?1, ?2, ?3, '{}', ?4)",
            params![
                kind.as_str(),
                canonical_name,
                aliases_json,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists all entries of one kind, ordered by id for deterministic
/// iteration (tie-breaks in the reconciliation engine depend on this).
pub fn list(db: &Database, kind: RegistryKind) -> Result<Vec<RegistryEntry>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, kind, canonical_name, aliases, metadata
             FROM registry_entries WHERE kind = ?1 ORDER BY id ASC",
        )?;
        let rows: Vec<_> = stmt
            .query_map(params![kind.as_str()], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    raw.into_iter().map(decode).collect()
}

/// Finds a single entry by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<RegistryEntry>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, kind, canonical_name, aliases, metadata
             FROM registry_entries WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], entry_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    raw.map(decode).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_list_ordered_by_id() {
        let db = Database::open_in_memory().unwrap();
        let id1 = insert(
            &db,
            RegistryKind::Vendor,
            "ACME Supplies Pvt Ltd",
            &["ACME Supplies"],
        )
        .unwrap();
        let id2 = insert(&db, RegistryKind::Vendor, "Globex Corporation", &[]).unwrap();
        insert(&db, RegistryKind::Project, "Project Alpha", &["ALPHA"]).unwrap();

        assert!(id1 < id2);

        let vendors = list(&db, RegistryKind::Vendor).unwrap();
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[0].id, id1);
        assert_eq!(vendors[0].canonical_name, "ACME Supplies Pvt Ltd");
        assert_eq!(vendors[0].aliases, vec!["ACME Supplies"]);
        assert_eq!(vendors[1].id, id2);

        let projects = list(&db, RegistryKind::Project).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].kind, RegistryKind::Project);
    }

    #[test]
    fn test_find_by_id() {
        let db = Database::open_in_memory().unwrap();
        let id = insert(&db, RegistryKind::Vendor, "ACME", &[]).unwrap();

        let entry = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(entry.canonical_name, "ACME");
        assert!(find_by_id(&db, id + 100).unwrap().is_none());
    }
}
