//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: "CREATE TABLE jobs (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                progress INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                error_message TEXT,
                queued_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                updated_at TEXT NOT NULL
              );
              CREATE INDEX idx_jobs_message ON jobs(message_id);
              CREATE INDEX idx_jobs_status ON jobs(status);
              -- At most one successful job per message id. Queued inserts
              -- never touch this index; the losing success-write of a
              -- dispatch race fails here.
              CREATE UNIQUE INDEX idx_jobs_message_success
                ON jobs(message_id) WHERE status = 'success';",
    },
    Migration {
        version: 2,
        description: "create_invoices_table",
        sql: "CREATE TABLE invoices (
                id TEXT PRIMARY KEY,
                source_message_id TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                extracted TEXT NOT NULL DEFAULT '{}',
                normalized TEXT NOT NULL DEFAULT '{}',
                reconciliation_status TEXT NOT NULL DEFAULT 'needs_review',
                tags TEXT NOT NULL DEFAULT '[]',
                suggestions TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
              );
              CREATE INDEX idx_invoices_message ON invoices(source_message_id);
              CREATE INDEX idx_invoices_recon ON invoices(reconciliation_status);",
    },
    Migration {
        version: 3,
        description: "create_registry_entries_table",
        sql: "CREATE TABLE registry_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL CHECK (kind IN ('vendor', 'project')),
                canonical_name TEXT NOT NULL,
                aliases TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
              );
              CREATE INDEX idx_registry_kind ON registry_entries(kind);",
    },
    Migration {
        version: 4,
        description: "create_audit_log_table",
        sql: "CREATE TABLE audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id TEXT NOT NULL,
                field TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                actor TEXT NOT NULL,
                recorded_at TEXT NOT NULL
              );
              CREATE INDEX idx_audit_invoice ON audit_log(invoice_id);",
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh_conn();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh_conn();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_success_index_allows_repeated_failures() {
        let conn = fresh_conn();
        for (id, status) in [("j1", "failed"), ("j2", "failed"), ("j3", "queued")] {
            conn.execute(
                "INSERT INTO jobs (id, message_id, status, progress, queued_at, updated_at)
                 VALUES (?1, 'm1', ?2, 0, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
                rusqlite::params![id, status],
            )
            .unwrap();
        }

        let count: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE message_id = 'm1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_success_index_rejects_second_success() {
        let conn = fresh_conn();
        conn.execute(
            "INSERT INTO jobs (id, message_id, status, progress, queued_at, updated_at)
             VALUES ('j1', 'm1', 'success', 100, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO jobs (id, message_id, status, progress, queued_at, updated_at)
             VALUES ('j2', 'm1', 'success', 100, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        );
        assert!(result.is_err());

        // A success for a different message id is fine.
        conn.execute(
            "INSERT INTO jobs (id, message_id, status, progress, queued_at, updated_at)
             VALUES ('j3', 'm2', 'success', 100, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_registry_kind_check_constraint() {
        let conn = fresh_conn();
        let result = conn.execute(
            "INSERT INTO registry_entries (kind, canonical_name, created_at)
             VALUES ('department', 'X', '2026-01-01T00:00:00+00:00')",
            [],
        );
        assert!(result.is_err());
    }
}
