use landmark_core::db::migrations::latest_version;
use landmark_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "landmarks");
    assert_table_exists(&conn, "operation_queue");
    assert_table_exists(&conn, "session_entries");
}

#[test]
fn reopening_a_file_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("landmarks.db");

    let first = open_db(&path).unwrap();
    first
        .execute(
            "INSERT INTO session_entries (key, value, updated_at) VALUES ('token', 't', 1);",
            [],
        )
        .unwrap();
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    let kept: i64 = second
        .query_row("SELECT COUNT(*) FROM session_entries;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(kept, 1);
}

#[test]
fn file_database_uses_wal_journal() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("wal.db")).unwrap();

    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_ascii_lowercase(), "wal");
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn schema_rejects_out_of_range_coordinates() {
    let conn = open_db_in_memory().unwrap();

    let result = conn.execute(
        "INSERT INTO landmarks (local_key, title, latitude, longitude, created_at, updated_at)
         VALUES ('k', 'Bad', 95.0, 0.0, 1, 1);",
        [],
    );

    assert!(result.is_err());
}

#[test]
fn schema_rejects_unknown_queue_status() {
    let conn = open_db_in_memory().unwrap();

    let result = conn.execute(
        "INSERT INTO operation_queue (operation_type, local_key, payload, status, created_at)
         VALUES ('CREATE', 'k', '{}', 'LOST', 1);",
        [],
    );

    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
