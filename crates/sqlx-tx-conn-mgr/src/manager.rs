//! Thread-scoped connection bindings and transaction state

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::Result;
use crate::error::Error;
use crate::source::{ConnectionRef, DataSourceHandle, IsolationLevel, same_connection};
use crate::thread_scoped::ThreadScopedState;

/// A connection bound to one thread for the lifetime of a transaction
struct ConnectionBinding {
   connection: ConnectionRef,
   isolation: IsolationLevel,
   transaction_id: Uuid,
}

/// Decides which connection a thread uses for a data source
///
/// Outside a transaction every [`acquire`](Self::acquire) obtains a fresh
/// connection that the caller hands back through [`release`](Self::release).
/// Once a transaction begins, the connection is bound to the calling thread and
/// every nested acquisition for the same source observes that same connection
/// until [`end_transaction`](Self::end_transaction) runs.
///
/// Bindings are strictly thread-scoped: a transaction started on one thread is
/// invisible to every other thread.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sqlx_tx_conn_mgr::{ConnectionManager, DataSourceHandle, IsolationLevel, SqliteDataSource};
///
/// # fn example() -> sqlx_tx_conn_mgr::Result<()> {
/// let source = DataSourceHandle::new(SqliteDataSource::connect("app.db", None)?);
/// let manager = Arc::new(ConnectionManager::new());
///
/// manager.start_transaction(&source, IsolationLevel::ReadCommitted)?;
/// let conn = manager.acquire(&source)?;
/// conn.execute("INSERT INTO users (name) VALUES (?)", &["Alice".into()])?;
/// manager.release(&conn, &source)?; // still owned by the transaction
/// manager.commit(&source)?;
/// manager.end_transaction(&source)?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ConnectionManager {
   bindings: ThreadScopedState<IndexMap<DataSourceHandle, ConnectionBinding>>,
}

impl ConnectionManager {
   pub fn new() -> Self {
      Self::default()
   }

   /// Returns the connection the calling thread should use for `source`
   ///
   /// Inside a transaction this is always the bound connection. Otherwise a new
   /// connection is obtained from the source and is not registered anywhere.
   pub fn acquire(&self, source: &DataSourceHandle) -> Result<ConnectionRef> {
      if let Some(conn) = self.bound_connection(source) {
         trace!(source = %source.name(), "Reusing transaction-bound connection");
         return Ok(conn);
      }

      source
         .get_connection()
         .map_err(|e| Error::acquisition(source.name(), e))
   }

   /// The connection bound to the calling thread for `source`, if any
   pub fn bound_connection(&self, source: &DataSourceHandle) -> Option<ConnectionRef> {
      self.bindings.inspect(|bindings| {
         bindings
            .and_then(|b| b.get(source))
            .map(|binding| Arc::clone(&binding.connection))
      })
   }

   /// True iff the calling thread has an active transaction on `source`
   pub fn is_in_transaction(&self, source: &DataSourceHandle) -> bool {
      self
         .bindings
         .inspect(|bindings| bindings.is_some_and(|b| b.contains_key(source)))
   }

   /// Isolation level of the calling thread's transaction on `source`
   pub fn isolation_level(&self, source: &DataSourceHandle) -> Option<IsolationLevel> {
      self.bindings.inspect(|bindings| {
         bindings
            .and_then(|b| b.get(source))
            .map(|binding| binding.isolation)
      })
   }

   /// Binds `connection` to the calling thread and opens a transaction on it
   ///
   /// Fails with [`Error::TransactionAlreadyActive`] if the thread already has a
   /// transaction on `source`. The binding is only registered once the
   /// connection accepted the isolation level and left auto-commit mode.
   pub fn begin_transaction(
      &self,
      source: &DataSourceHandle,
      connection: ConnectionRef,
      isolation: IsolationLevel,
   ) -> Result<()> {
      if self.is_in_transaction(source) {
         return Err(Error::TransactionAlreadyActive(source.name().to_string()));
      }

      connection.set_isolation_level(isolation)?;
      connection.set_auto_commit(false)?;

      let transaction_id = Uuid::new_v4();
      self.bindings.with(|bindings| {
         bindings.insert(
            source.clone(),
            ConnectionBinding {
               connection,
               isolation,
               transaction_id,
            },
         )
      });

      debug!(
         source = %source.name(),
         transaction_id = %transaction_id,
         isolation = ?isolation,
         "Transaction started"
      );
      Ok(())
   }

   /// Acquires a connection and begins a transaction on it
   ///
   /// If the transaction cannot begin, the freshly acquired connection is
   /// closed before the error is returned.
   pub fn start_transaction(
      &self,
      source: &DataSourceHandle,
      isolation: IsolationLevel,
   ) -> Result<ConnectionRef> {
      if self.is_in_transaction(source) {
         return Err(Error::TransactionAlreadyActive(source.name().to_string()));
      }

      let conn = self.acquire(source)?;
      if let Err(e) = self.begin_transaction(source, Arc::clone(&conn), isolation) {
         if let Err(close_err) = conn.close() {
            warn!(
               source = %source.name(),
               "Failed to close connection after begin failure: {}", close_err
            );
         }
         return Err(e);
      }
      Ok(conn)
   }

   /// Commits the calling thread's transaction on `source`
   pub fn commit(&self, source: &DataSourceHandle) -> Result<()> {
      let (conn, transaction_id) = self.active(source)?;
      conn.commit()?;
      debug!(source = %source.name(), transaction_id = %transaction_id, "Transaction committed");
      Ok(())
   }

   /// Rolls back the calling thread's transaction on `source`
   pub fn rollback(&self, source: &DataSourceHandle) -> Result<()> {
      let (conn, transaction_id) = self.active(source)?;
      conn.rollback()?;
      debug!(source = %source.name(), transaction_id = %transaction_id, "Transaction rolled back");
      Ok(())
   }

   /// Commits every transaction the calling thread has open, in begin order
   ///
   /// Stops at the first failure so the caller can roll back the remainder.
   pub fn commit_transaction(&self) -> Result<()> {
      let active = self.active_sources();
      if active.is_empty() {
         return Err(Error::NoActiveTransaction("any data source".to_string()));
      }
      for source in &active {
         self.commit(source)?;
      }
      Ok(())
   }

   /// Rolls back every transaction the calling thread has open
   ///
   /// Every source is attempted; the first failure is returned afterwards.
   pub fn rollback_transaction(&self) -> Result<()> {
      let active = self.active_sources();
      if active.is_empty() {
         return Err(Error::NoActiveTransaction("any data source".to_string()));
      }

      let mut first_error = None;
      for source in &active {
         if let Err(e) = self.rollback(source) {
            warn!(source = %source.name(), "Rollback failed: {}", e);
            first_error.get_or_insert(e);
         }
      }
      first_error.map_or(Ok(()), Err)
   }

   /// Removes the calling thread's binding for `source` and closes its connection
   ///
   /// Runs unconditionally: a missing binding is not an error. Work that was
   /// neither committed nor rolled back is discarded by the close; auto-commit
   /// is never restored first, since that would commit it.
   pub fn end_transaction(&self, source: &DataSourceHandle) -> Result<()> {
      let Some(binding) = self
         .bindings
         .with(|bindings| bindings.shift_remove(source))
      else {
         return Ok(());
      };

      debug!(
         source = %source.name(),
         transaction_id = %binding.transaction_id,
         "Transaction ended"
      );
      binding.connection.close()
   }

   /// Ends every transaction the calling thread has open
   pub fn end_all_transactions(&self) -> Result<()> {
      let mut first_error = None;
      for source in self.active_sources() {
         if let Err(e) = self.end_transaction(&source) {
            first_error.get_or_insert(e);
         }
      }
      first_error.map_or(Ok(()), Err)
   }

   /// Hands a connection back
   ///
   /// A connection owned by the calling thread's transaction stays open; any
   /// other connection is closed immediately.
   pub fn release(&self, connection: &ConnectionRef, source: &DataSourceHandle) -> Result<()> {
      if let Some(bound) = self.bound_connection(source)
         && same_connection(&bound, connection)
      {
         trace!(source = %source.name(), "Connection owned by transaction; release deferred");
         return Ok(());
      }
      connection.close()
   }

   /// Sources with an open transaction on the calling thread, in begin order
   pub fn active_sources(&self) -> Vec<DataSourceHandle> {
      self.bindings.inspect(|bindings| {
         bindings
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
      })
   }

   fn active(&self, source: &DataSourceHandle) -> Result<(ConnectionRef, Uuid)> {
      self
         .bindings
         .inspect(|bindings| {
            bindings
               .and_then(|b| b.get(source))
               .map(|binding| (Arc::clone(&binding.connection), binding.transaction_id))
         })
         .ok_or_else(|| Error::NoActiveTransaction(format!("data source '{}'", source.name())))
   }
}
