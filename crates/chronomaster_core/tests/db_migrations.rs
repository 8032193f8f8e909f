use chronomaster_core::db::migrations::latest_version;
use chronomaster_core::db::{open_db, open_db_in_memory, open_db_with_config, DbError};
use chronomaster_core::MasterConfig;
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "documents");
    assert_table_exists(&conn, "name_aliases");
    assert_table_exists(&conn, "history_events");
    assert_table_exists(&conn, "history_changes");
    assert_table_exists(&conn, "data_points");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chronomaster.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "documents");
}

#[test]
fn file_databases_use_wal_and_foreign_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = MasterConfig {
        busy_timeout_ms: 250,
        ..MasterConfig::default()
    };
    let conn = open_db_with_config(dir.path().join("wal.db"), &config).unwrap();

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal");

    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
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
fn live_name_index_rejects_second_live_row() {
    let conn = open_db_in_memory().unwrap();
    let insert = "INSERT INTO documents (
            kind, doc_oid, ver_from, ver_to, corr_from, corr_to, name, name_key, payload
        ) VALUES ('user', ?1, 1, 9223372036854775807, 1, 9223372036854775807, 'a', 'a', '{}');";

    conn.execute(insert, ["oid-1"]).unwrap();
    let err = conn.execute(insert, ["oid-2"]).unwrap_err();
    assert_eq!(
        chronomaster_core::db::classify(&err),
        chronomaster_core::StorageFailure::Contention
    );
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
