//! Tests for the sqlx-backed SQLite data source

use serde_json::{Value as JsonValue, json};
use sqlx_tx_conn_mgr::{
   ConnectionManager, DataSource, DataSourceHandle, Error, GENERATED_KEY_COLUMN, IsolationLevel,
   SqliteDataSource, SqliteDataSourceConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open(temp_dir: &TempDir, name: &str) -> Arc<SqliteDataSource> {
   let path = temp_dir.path().join(name);
   let source = SqliteDataSource::connect(&path, None).unwrap();
   let conn = source.get_connection().unwrap();
   conn
      .execute(
         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
         &[],
      )
      .unwrap();
   conn.close().unwrap();
   Arc::new(source)
}

fn count_users(source: &SqliteDataSource) -> i64 {
   let conn = source.get_connection().unwrap();
   let rows = conn.query("SELECT COUNT(*) AS n FROM users", &[]).unwrap();
   conn.close().unwrap();
   rows[0]["n"].as_i64().unwrap()
}

#[test]
fn test_execute_query_and_insert() {
   let temp_dir = TempDir::new().unwrap();
   let source = open(&temp_dir, "basic.db");
   let conn = source.get_connection().unwrap();

   let keys = conn
      .insert(
         "INSERT INTO users (name, age) VALUES (?, ?)",
         &[json!("Alice"), json!(30)],
      )
      .unwrap();
   assert_eq!(keys[0][GENERATED_KEY_COLUMN], json!(1));

   let affected = conn
      .execute("UPDATE users SET age = ? WHERE name = ?", &[json!(31), json!("Alice")])
      .unwrap();
   assert_eq!(affected, 1);

   let rows = conn
      .query("SELECT name, age FROM users WHERE id = ?", &[json!(1)])
      .unwrap();
   assert_eq!(rows.len(), 1);
   assert_eq!(rows[0]["name"], json!("Alice"));
   assert_eq!(rows[0]["age"], json!(31));

   // Column order follows the select list
   let columns: Vec<_> = rows[0].keys().cloned().collect();
   assert_eq!(columns, vec!["name", "age"]);

   conn.close().unwrap();
   assert!(conn.is_closed());
   assert!(matches!(conn.execute("SELECT 1", &[]), Err(Error::ConnectionClosed)));
}

#[test]
fn test_batch_reports_per_row_counts() {
   let temp_dir = TempDir::new().unwrap();
   let source = open(&temp_dir, "batch.db");
   let conn = source.get_connection().unwrap();

   let rows: Vec<_> = (0..5).map(|i| vec![json!(format!("user{i}")), json!(i)]).collect();
   let counts = conn
      .batch("INSERT INTO users (name, age) VALUES (?, ?)", &rows)
      .unwrap();
   assert_eq!(counts, vec![1; 5]);

   let keys = conn
      .insert_batch("INSERT INTO users (name) VALUES (?)", &[vec![json!("x")], vec![json!("y")]])
      .unwrap();
   assert_eq!(keys.len(), 2);
   assert_eq!(keys[1][GENERATED_KEY_COLUMN], json!(7));

   conn.close().unwrap();
   assert_eq!(count_users(&source), 7);
}

#[test]
fn test_failed_batch_outside_transaction_is_all_or_nothing() {
   let temp_dir = TempDir::new().unwrap();
   let source = open(&temp_dir, "atomic_batch.db");
   let conn = source.get_connection().unwrap();

   let rows = vec![vec![json!("ok")], vec![JsonValue::Null]];
   assert!(conn.batch("INSERT INTO users (name) VALUES (?)", &rows).is_err());
   conn.close().unwrap();

   assert_eq!(count_users(&source), 0);
}

#[test]
fn test_transaction_commit_and_rollback() {
   let temp_dir = TempDir::new().unwrap();
   let source = open(&temp_dir, "tx.db");
   let handle = DataSourceHandle::from(Arc::clone(&source));
   let manager = ConnectionManager::new();

   manager
      .start_transaction(&handle, IsolationLevel::ReadCommitted)
      .unwrap();
   let conn = manager.acquire(&handle).unwrap();
   conn
      .execute("INSERT INTO users (name) VALUES (?)", &[json!("rolled back")])
      .unwrap();
   manager.rollback(&handle).unwrap();

   conn
      .execute("INSERT INTO users (name) VALUES (?)", &[json!("kept")])
      .unwrap();
   manager.commit(&handle).unwrap();
   manager.end_transaction(&handle).unwrap();

   let conn = source.get_connection().unwrap();
   let rows = conn.query("SELECT name FROM users", &[]).unwrap();
   conn.close().unwrap();
   assert_eq!(rows.len(), 1);
   assert_eq!(rows[0]["name"], json!("kept"));
}

#[test]
fn test_end_transaction_discards_uncommitted_work() {
   let temp_dir = TempDir::new().unwrap();
   let source = open(&temp_dir, "abandon.db");
   let handle = DataSourceHandle::from(Arc::clone(&source));
   let manager = ConnectionManager::new();

   let conn = manager
      .start_transaction(&handle, IsolationLevel::ReadCommitted)
      .unwrap();
   conn
      .execute("INSERT INTO users (name) VALUES (?)", &[json!("pending")])
      .unwrap();
   // Neither commit nor rollback before ending
   manager.end_transaction(&handle).unwrap();

   assert!(conn.is_closed());
   assert_eq!(count_users(&source), 0);
}

#[test]
fn test_end_transaction_resets_read_uncommitted() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("isolation.db");
   let config = SqliteDataSourceConfig {
      max_connections: 1,
      ..Default::default()
   };
   let source = DataSourceHandle::new(SqliteDataSource::connect(&path, Some(config)).unwrap());
   let manager = ConnectionManager::new();

   let conn = manager
      .start_transaction(&source, IsolationLevel::ReadUncommitted)
      .unwrap();
   let rows = conn.query("PRAGMA read_uncommitted", &[]).unwrap();
   assert_eq!(rows[0]["read_uncommitted"], json!(1));
   manager.end_transaction(&source).unwrap();

   // The pool holds a single connection, so this is the same one
   let conn = manager.acquire(&source).unwrap();
   let rows = conn.query("PRAGMA read_uncommitted", &[]).unwrap();
   manager.release(&conn, &source).unwrap();
   assert_eq!(rows[0]["read_uncommitted"], json!(0));
}

#[test]
fn test_blob_and_null_decoding() {
   let temp_dir = TempDir::new().unwrap();
   let source = open(&temp_dir, "decode.db");
   let conn = source.get_connection().unwrap();

   let rows = conn
      .query("SELECT x'68656c6c6f' AS data, NULL AS nothing, 1.5 AS ratio", &[])
      .unwrap();
   assert_eq!(rows[0]["data"], json!("aGVsbG8="));
   assert_eq!(rows[0]["nothing"], JsonValue::Null);
   assert_eq!(rows[0]["ratio"], json!(1.5));

   conn.close().unwrap();
}

#[test]
fn test_closed_source_refuses_connections() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("closed.db");
   let config = SqliteDataSourceConfig {
      max_connections: 2,
      ..Default::default()
   };
   let source = SqliteDataSource::connect(&path, Some(config)).unwrap();
   source.close();

   assert!(matches!(
      source.get_connection(),
      Err(Error::DataSourceClosed(_))
   ));
}

#[test]
fn test_empty_path_is_rejected() {
   assert!(matches!(
      SqliteDataSource::connect("", None),
      Err(Error::Io(_))
   ));
}
