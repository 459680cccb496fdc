//! SQLite data source backed by a sqlx connection pool
//!
//! sqlx is asynchronous while the connection manager is driven from ordinary
//! threads, so each data source owns a small tokio runtime and blocks on it for
//! every statement. Do not call into these types from inside another tokio
//! runtime.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tokio::runtime::Runtime;
use tracing::{error, trace};

use crate::Result;
use crate::config::SqliteDataSourceConfig;
use crate::decode::decode_rows;
use crate::error::Error;
use crate::source::{Connection, ConnectionRef, DataSource, IsolationLevel, Row};

/// Column name under which generated keys are reported
pub const GENERATED_KEY_COLUMN: &str = "last_insert_rowid";

/// A [`DataSource`] handing out pooled SQLite connections
///
/// # Example
///
/// ```no_run
/// use sqlx_tx_conn_mgr::{DataSource, SqliteDataSource};
///
/// # fn example() -> sqlx_tx_conn_mgr::Result<()> {
/// let source = SqliteDataSource::connect("app.db", None)?;
/// let conn = source.get_connection()?;
/// conn.execute("CREATE TABLE IF NOT EXISTS users (name TEXT)", &[])?;
/// conn.close()?;
/// source.close();
/// # Ok(())
/// # }
/// ```
pub struct SqliteDataSource {
   name: String,
   pool: Option<Pool<Sqlite>>,
   runtime: Arc<Runtime>,
   closed: AtomicBool,
}

impl SqliteDataSource {
   /// Open (creating if missing) the database at `path`
   ///
   /// Pass `None` for `custom_config` to use the defaults.
   pub fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDataSourceConfig>,
   ) -> Result<Self> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let runtime = tokio::runtime::Builder::new_multi_thread()
         .worker_threads(1)
         .thread_name("sqlx-tx-conn-mgr")
         .enable_all()
         .build()?;

      let options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(true);

      let pool = runtime.block_on(
         SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options),
      )?;

      Ok(Self {
         name: path.display().to_string(),
         pool: Some(pool),
         runtime: Arc::new(runtime),
         closed: AtomicBool::new(false),
      })
   }

   fn pool(&self) -> Result<&Pool<Sqlite>> {
      match &self.pool {
         Some(pool) if !self.closed.load(Ordering::SeqCst) => Ok(pool),
         _ => Err(Error::DataSourceClosed(self.name.clone())),
      }
   }

   /// Close the pool, waiting for every outstanding connection to be returned
   pub fn close(&self) {
      self.closed.store(true, Ordering::SeqCst);
      if let Some(pool) = &self.pool {
         self.runtime.block_on(pool.close());
      }
   }
}

impl DataSource for SqliteDataSource {
   fn get_connection(&self) -> Result<ConnectionRef> {
      let pool = self.pool()?;
      let conn = self.runtime.block_on(pool.acquire())?;
      trace!(source = %self.name, "Connection acquired from pool");
      Ok(Arc::new(SqliteConnectionHandle::new(
         conn,
         Arc::clone(&self.runtime),
      )))
   }

   fn name(&self) -> &str {
      &self.name
   }
}

impl Drop for SqliteDataSource {
   fn drop(&mut self) {
      // Pool teardown spawns onto the runtime
      let _enter = self.runtime.enter();
      drop(self.pool.take());
   }
}

struct ConnState {
   conn: Option<PoolConnection<Sqlite>>,
   auto_commit: bool,
   open_transaction: bool,
   read_uncommitted: bool,
}

/// A pooled SQLite connection usable from synchronous code
///
/// With auto-commit off, a `BEGIN` is issued lazily before the next statement
/// and again after every commit or rollback.
pub struct SqliteConnectionHandle {
   state: Mutex<ConnState>,
   runtime: Arc<Runtime>,
}

impl SqliteConnectionHandle {
   fn new(conn: PoolConnection<Sqlite>, runtime: Arc<Runtime>) -> Self {
      Self {
         state: Mutex::new(ConnState {
            conn: Some(conn),
            auto_commit: true,
            open_transaction: false,
            read_uncommitted: false,
         }),
         runtime,
      }
   }

   /// Runs `f` against the live connection, opening a pending transaction first
   ///
   /// `f` is told whether it runs outside any transaction.
   fn with_live<R>(
      &self,
      f: impl FnOnce(&Runtime, &mut SqliteConnection, bool) -> Result<R>,
   ) -> Result<R> {
      let mut guard = self.state.lock();
      let state = &mut *guard;
      let conn = state.conn.as_deref_mut().ok_or(Error::ConnectionClosed)?;

      if !state.auto_commit && !state.open_transaction {
         run_raw(&self.runtime, conn, "BEGIN")?;
         state.open_transaction = true;
      }

      f(&self.runtime, conn, !state.open_transaction)
   }

   /// Finishes the open transaction, if any, with `COMMIT` or `ROLLBACK`
   fn finish(&self, statement: &str) -> Result<()> {
      let mut guard = self.state.lock();
      let state = &mut *guard;
      let conn = state.conn.as_deref_mut().ok_or(Error::ConnectionClosed)?;

      if state.open_transaction {
         run_raw(&self.runtime, conn, statement)?;
         state.open_transaction = false;
      }
      Ok(())
   }

   fn run_rows<R>(
      &self,
      sql: &str,
      rows: &[Vec<JsonValue>],
      mut each: impl FnMut(&Runtime, &mut SqliteConnection, &[JsonValue]) -> Result<R>,
   ) -> Result<Vec<R>> {
      self.with_live(|runtime, conn, implicit| {
         // A batch outside a transaction is still applied all-or-nothing
         if implicit {
            run_raw(runtime, conn, "BEGIN")?;
         }

         let mut results = Vec::with_capacity(rows.len());
         for row in rows {
            match each(runtime, conn, row.as_slice()) {
               Ok(r) => results.push(r),
               Err(e) => {
                  if implicit && let Err(rollback_err) = run_raw(runtime, conn, "ROLLBACK") {
                     error!(sql = %sql, "Batch rollback failed: {}", rollback_err);
                  }
                  return Err(e);
               }
            }
         }

         if implicit {
            run_raw(runtime, conn, "COMMIT")?;
         }
         Ok(results)
      })
   }
}

impl Connection for SqliteConnectionHandle {
   fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
      if auto_commit {
         self.finish("COMMIT")?;
      }
      self.state.lock().auto_commit = auto_commit;
      Ok(())
   }

   fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
      // SQLite is always serializable; only dirty reads can be toggled
      let read_uncommitted = matches!(level, IsolationLevel::ReadUncommitted);
      let pragma = format!("PRAGMA read_uncommitted = {}", read_uncommitted as u8);
      self.with_live(|runtime, conn, _| run_raw(runtime, conn, &pragma))?;
      self.state.lock().read_uncommitted = read_uncommitted;
      Ok(())
   }

   fn commit(&self) -> Result<()> {
      self.finish("COMMIT")
   }

   fn rollback(&self) -> Result<()> {
      self.finish("ROLLBACK")
   }

   fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<u64> {
      self.with_live(|runtime, conn, _| {
         let done = runtime.block_on(bind_all(sqlx::query(sql), params).execute(&mut *conn))?;
         Ok(done.rows_affected())
      })
   }

   fn query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>> {
      self.with_live(|runtime, conn, _| {
         let rows = runtime.block_on(bind_all(sqlx::query(sql), params).fetch_all(&mut *conn))?;
         decode_rows(rows)
      })
   }

   fn insert(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>> {
      self.with_live(|runtime, conn, _| {
         let done = runtime.block_on(bind_all(sqlx::query(sql), params).execute(&mut *conn))?;
         Ok(vec![generated_key(done.last_insert_rowid())])
      })
   }

   fn batch(&self, sql: &str, rows: &[Vec<JsonValue>]) -> Result<Vec<u64>> {
      self.run_rows(sql, rows, |runtime, conn, params| {
         let done = runtime.block_on(bind_all(sqlx::query(sql), params).execute(&mut *conn))?;
         Ok(done.rows_affected())
      })
   }

   fn insert_batch(&self, sql: &str, rows: &[Vec<JsonValue>]) -> Result<Vec<Row>> {
      self.run_rows(sql, rows, |runtime, conn, params| {
         let done = runtime.block_on(bind_all(sqlx::query(sql), params).execute(&mut *conn))?;
         Ok(generated_key(done.last_insert_rowid()))
      })
   }

   fn close(&self) -> Result<()> {
      release(&self.runtime, &mut self.state.lock())
   }

   fn is_closed(&self) -> bool {
      self.state.lock().conn.is_none()
   }
}

impl Drop for SqliteConnectionHandle {
   fn drop(&mut self) {
      if let Err(e) = release(&self.runtime, self.state.get_mut()) {
         error!("Failed to reset connection on drop: {}", e);
      }
   }
}

/// Rolls back open work, resets session settings and returns the connection
/// to the pool
///
/// The connection goes back to the pool even when a reset statement fails;
/// the first failure is reported.
fn release(runtime: &Runtime, state: &mut ConnState) -> Result<()> {
   let Some(mut conn) = state.conn.take() else {
      return Ok(());
   };

   let mut result = Ok(());
   if state.open_transaction {
      result = run_raw(runtime, &mut conn, "ROLLBACK");
      state.open_transaction = false;
   }
   if state.read_uncommitted {
      let reset = run_raw(runtime, &mut conn, "PRAGMA read_uncommitted = 0");
      result = result.and(reset);
      state.read_uncommitted = false;
   }
   state.auto_commit = true;

   // Returning to the pool spawns onto the runtime
   let _enter = runtime.enter();
   drop(conn);
   trace!("Connection returned to pool");
   result
}

fn run_raw(runtime: &Runtime, conn: &mut SqliteConnection, sql: &str) -> Result<()> {
   runtime.block_on(sqlx::query(sql).execute(conn))?;
   Ok(())
}

fn generated_key(rowid: i64) -> Row {
   let mut row = Row::default();
   row.insert(GENERATED_KEY_COLUMN.to_string(), JsonValue::from(rowid));
   row
}

/// Bind every JSON value to a sqlx query, in order
pub fn bind_all<'q>(
   mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
   values: &[JsonValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   for value in values {
      query = bind_value(query, value);
   }
   query
}

/// Bind a single JSON value to a sqlx query
pub fn bind_value<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   value: &JsonValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::Bool(b) => query.bind(*b),
      JsonValue::String(s) => query.bind(s.clone()),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Too large for SQLite's INTEGER, fall back to REAL
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      JsonValue::Array(_) | JsonValue::Object(_) => query.bind(value.to_string()),
   }
}
