use std::path::Path;

use rusqlite::Connection;

use super::DatabaseError;

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// SQLite leaves foreign keys off per connection. They back the
/// `order_administration_times` cascade and the rule that every
/// administration event names an existing order.
fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    // Rollback journal keeps the ward database a single file.
    conn.execute_batch(
        "PRAGMA journal_mode=DELETE;
         PRAGMA foreign_keys=ON;"
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn)?;

    let migrations: Vec<(i64, &str)> = vec![
        (1, include_str!("../../resources/migrations/001_orders.sql")),
        (2, include_str!("../../resources/migrations/002_administration_log.sql")),
        (3, include_str!("../../resources/migrations/003_barcode_registry.sql")),
    ];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Highest applied migration. A database without `schema_version` is fresh
/// and reports 0; any other read failure is returned, so a damaged schema
/// is never migrated over as if it were empty.
fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let tracked: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !tracked {
        return Ok(0);
    }
    let version = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    Ok(version.unwrap_or(0))
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_initializes_all_tables() {
        let conn = open_memory_database().unwrap();
        // schema_version + medication_orders + order_administration_times
        // + administration_events + barcode_registry
        let count = count_tables(&conn).unwrap();
        assert_eq!(count, 5, "Expected 5 tables, got {count}");
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database().unwrap();
        // Run migrations again, should not error
        let result = run_migrations(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_memory_database().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn fresh_connection_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_current_version(&conn).unwrap(), 0);
        run_migrations(&conn).unwrap();
        assert_eq!(get_current_version(&conn).unwrap(), 3);
    }

    #[test]
    fn deleting_order_cascades_to_its_times() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch(
            "INSERT INTO medication_orders
                 (id, patient_id, drug_name, dosage, route, frequency, category, start_date)
             VALUES ('o-1', 'MRN-1', 'Metformin', '500 mg', 'oral', 'twice_daily', 'scheduled', '2025-03-01');
             INSERT INTO order_administration_times (order_id, position, time_of_day)
             VALUES ('o-1', 0, '08:00:00'), ('o-1', 1, '20:00:00');",
        )
        .unwrap();

        conn.execute("DELETE FROM medication_orders WHERE id = 'o-1'", []).unwrap();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM order_administration_times", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);

        // Times for an unknown order are refused outright.
        assert!(conn
            .execute(
                "INSERT INTO order_administration_times (order_id, position, time_of_day)
                 VALUES ('missing', 0, '08:00:00')",
                [],
            )
            .is_err());
    }

    #[test]
    fn file_database_persists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medpass.db");
        {
            let conn = open_database(&path).unwrap();
            assert_eq!(count_tables(&conn).unwrap(), 5);
        }
        let reopened = open_database(&path).unwrap();
        let version: i64 = reopened
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 3);
    }
}
