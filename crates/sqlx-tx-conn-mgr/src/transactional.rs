//! Unit-of-work transaction demarcation

use std::fmt::Display;
use std::sync::Arc;

use tracing::warn;

use crate::error::Error;
use crate::manager::ConnectionManager;
use crate::source::{DataSourceHandle, IsolationLevel};

/// Runs closures inside a transaction on one data source
///
/// Nested calls on the same thread join the outer transaction instead of
/// opening a second one. The outermost call commits on success, rolls back on
/// failure and always ends the transaction, even if the closure panics.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sqlx_tx_conn_mgr::{ConnectionManager, DataSourceHandle, SqliteDataSource, Transactional};
///
/// # fn example() -> Result<(), sqlx_tx_conn_mgr::Error> {
/// let source = DataSourceHandle::new(SqliteDataSource::connect("app.db", None)?);
/// let manager = Arc::new(ConnectionManager::new());
/// let tx = Transactional::new(Arc::clone(&manager), source.clone());
///
/// tx.run(|| {
///    let conn = manager.acquire(&source)?;
///    conn.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1", &[])?;
///    conn.execute("UPDATE accounts SET balance = balance + 10 WHERE id = 2", &[])?;
///    Ok::<_, sqlx_tx_conn_mgr::Error>(())
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transactional {
   manager: Arc<ConnectionManager>,
   source: DataSourceHandle,
   isolation: IsolationLevel,
}

impl Transactional {
   /// Demarcates transactions on `source` at READ COMMITTED isolation
   pub fn new(manager: Arc<ConnectionManager>, source: DataSourceHandle) -> Self {
      Self {
         manager,
         source,
         isolation: IsolationLevel::default(),
      }
   }

   pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
      self.isolation = isolation;
      self
   }

   pub fn isolation(&self) -> IsolationLevel {
      self.isolation
   }

   /// Runs `work` inside a transaction
   ///
   /// A failure from `work` or from the commit triggers a rollback and is
   /// returned unchanged; a failing rollback is logged and never replaces it.
   pub fn run<T, E, F>(&self, work: F) -> Result<T, E>
   where
      F: FnOnce() -> Result<T, E>,
      E: From<Error> + Display,
   {
      if self.manager.is_in_transaction(&self.source) {
         return work();
      }

      self.manager.start_transaction(&self.source, self.isolation)?;
      let mut guard = EndGuard {
         manager: &self.manager,
         source: &self.source,
         armed: true,
      };

      let outcome = work().and_then(|value| {
         self.manager.commit(&self.source)?;
         Ok(value)
      });

      if let Err(e) = &outcome
         && let Err(rollback_err) = self.manager.rollback(&self.source)
      {
         warn!(
            source = %self.source.name(),
            "Rollback failed after '{}': {}", e, rollback_err
         );
      }

      guard.armed = false;
      let ended = self.manager.end_transaction(&self.source);

      match (outcome, ended) {
         (Ok(value), Ok(())) => Ok(value),
         (Ok(_), Err(end_err)) => Err(end_err.into()),
         (Err(e), Ok(())) => Err(e),
         (Err(e), Err(end_err)) => {
            warn!(source = %self.source.name(), "Failed to end transaction: {}", end_err);
            Err(e)
         }
      }
   }
}

/// Rolls back and ends the transaction if `run` unwinds before finishing
struct EndGuard<'a> {
   manager: &'a ConnectionManager,
   source: &'a DataSourceHandle,
   armed: bool,
}

impl Drop for EndGuard<'_> {
   fn drop(&mut self) {
      if !self.armed {
         return;
      }
      if let Err(e) = self.manager.rollback(self.source) {
         warn!(source = %self.source.name(), "Rollback during unwind failed: {}", e);
      }
      if let Err(e) = self.manager.end_transaction(self.source) {
         warn!(source = %self.source.name(), "Ending transaction during unwind failed: {}", e);
      }
   }
}
