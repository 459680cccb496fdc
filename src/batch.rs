//! Per-thread coalescing of consecutive statements into driver batches
//!
//! While a thread is collecting, execute/insert/update calls are cached as
//! [`PendingOperation`]s. The cache only ever holds one homogeneous run: a
//! call whose shape differs from the last cached one flushes the cache first,
//! and reaching the configured batch size flushes it too.

use std::mem;

use sqlx_tx_conn_mgr::{ConnectionRef, ThreadScopedState, Vacancy, same_connection};
use tracing::warn;

use crate::config::{HandlerEquality, log_sql};
use crate::error::{Error, Result};
use crate::handlers::{HandlerRef, MapListHandler, ResultHandler, same_handler};
use crate::outcome::Outcome;
use crate::params::Params;
use crate::scope::ConnectionScope;

/// The kind of call a statement was issued through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
   /// Arbitrary statement; affected rows, or handler output when a handler is given
   Execute,
   /// INSERT reporting generated keys
   Insert,
   /// UPDATE/DELETE reporting affected rows
   Update,
   /// SELECT; never batched
   Query,
}

impl OperationKind {
   pub fn is_batchable(self) -> bool {
      match self {
         OperationKind::Execute | OperationKind::Insert | OperationKind::Update => true,
         OperationKind::Query => false,
      }
   }

   /// Whether this kind produces rows rather than update counts
   pub(crate) fn returns_rows(self, has_handler: bool) -> bool {
      match self {
         OperationKind::Insert | OperationKind::Query => true,
         OperationKind::Execute | OperationKind::Update => has_handler,
      }
   }
}

/// A statement waiting in the batch cache
pub struct PendingOperation {
   pub kind: OperationKind,
   pub handler: Option<HandlerRef>,
   /// Final SQL, after template expansion and interceptor rewrites
   pub sql: String,
   /// Connection supplied by the caller; `None` uses the runner's data source
   pub connection: Option<ConnectionRef>,
   pub params: Params,
}

impl PendingOperation {
   /// True if both operations can share one physical batch call
   pub fn same_shape(&self, other: &PendingOperation, equality: HandlerEquality) -> bool {
      self.kind == other.kind
         && self.sql == other.sql
         && same_handler(self.handler.as_ref(), other.handler.as_ref(), equality)
         && match (&self.connection, &other.connection) {
            (None, None) => true,
            (Some(a), Some(b)) => same_connection(a, b),
            _ => false,
         }
   }
}

#[derive(Default)]
struct BatchState {
   collecting: bool,
   cache: Vec<PendingOperation>,
}

impl Vacancy for BatchState {
   fn is_vacant(&self) -> bool {
      !self.collecting && self.cache.is_empty()
   }
}

/// Per-thread batch cache and its flush logic
pub(crate) struct BatchCoalescer {
   scope: ConnectionScope,
   batch_size: usize,
   equality: HandlerEquality,
   show_sql: bool,
   state: ThreadScopedState<BatchState>,
}

impl BatchCoalescer {
   pub(crate) fn new(
      scope: ConnectionScope,
      batch_size: usize,
      equality: HandlerEquality,
      show_sql: bool,
   ) -> Self {
      Self {
         scope,
         batch_size,
         equality,
         show_sql,
         state: ThreadScopedState::new(),
      }
   }

   pub(crate) fn is_collecting(&self) -> bool {
      self
         .state
         .inspect(|state| state.is_some_and(|s| s.collecting))
   }

   pub(crate) fn pending(&self) -> usize {
      self.state.inspect(|state| state.map_or(0, |s| s.cache.len()))
   }

   /// Starts collecting on the calling thread
   pub(crate) fn begin(&self) -> Result<()> {
      if self.pending() > 0 {
         warn!("Batch begun with pending operations; flushing them first");
         self.flush()?;
      }
      self.state.with(|state| state.collecting = true);
      Ok(())
   }

   /// Flushes the remainder and stops collecting
   ///
   /// Collecting stops even when the final flush fails.
   pub(crate) fn end(&self) -> Result<Option<Outcome>> {
      let flushed = self.flush();
      self.state.with(|state| state.collecting = false);
      flushed
   }

   /// Drops whatever is cached and sets the collecting flag to `collecting`
   pub(crate) fn discard(&self, collecting: bool) {
      let dropped = self.state.with(|state| {
         state.collecting = collecting;
         mem::take(&mut state.cache).len()
      });
      if dropped > 0 {
         warn!(dropped, "Discarded batched operations of a failed transaction");
      }
   }

   /// Caches `op`, flushing first on a shape change and afterwards when full
   pub(crate) fn enqueue(&self, op: PendingOperation) -> Result<()> {
      let shape_changed = self.state.inspect(|state| {
         state
            .and_then(|s| s.cache.last())
            .is_some_and(|last| !last.same_shape(&op, self.equality))
      });
      if shape_changed {
         self.flush()?;
      }

      let full = self.state.with(|state| {
         state.cache.push(op);
         state.cache.len() >= self.batch_size
      });
      if full {
         self.flush()?;
      }
      Ok(())
   }

   /// Runs everything cached as one physical batch call
   ///
   /// Returns `None` when nothing was cached. The cache is emptied before the
   /// call runs, so a failed flush is reported once and never retried.
   pub(crate) fn flush(&self) -> Result<Option<Outcome>> {
      let ops = self.state.with(|state| mem::take(&mut state.cache));
      if ops.is_empty() {
         return Ok(None);
      }
      self.execute(ops).map(Some)
   }

   fn execute(&self, ops: Vec<PendingOperation>) -> Result<Outcome> {
      let mut ops = ops.into_iter();
      let Some(first) = ops.next() else {
         return Ok(Outcome::Affected(0));
      };

      let width = first.params.width();
      let mut rows = Vec::with_capacity(ops.len() + 1);
      rows.push(first.params.into_row());
      for (i, op) in ops.enumerate() {
         let found = op.params.width();
         if found != width {
            return Err(Error::MalformedBatch {
               row: i + 1,
               expected: width,
               found,
            });
         }
         rows.push(op.params.into_row());
      }

      log_sql!(
         self.show_sql,
         rows = rows.len(),
         sql = %first.sql,
         first = ?rows.first(),
         last = ?rows.last(),
         "Flushing batch"
      );

      let returns_rows = first.kind.returns_rows(first.handler.is_some());
      self
         .scope
         .with_connection(first.connection.as_ref(), |conn| {
            if returns_rows {
               let keys = conn.insert_batch(&first.sql, &rows)?;
               let value = match &first.handler {
                  Some(handler) => handler.handle(keys)?,
                  None => MapListHandler.handle(keys)?,
               };
               Ok(Outcome::Value(value))
            } else {
               let counts = conn.batch(&first.sql, &rows)?;
               Ok(Outcome::Affected(counts.iter().sum()))
            }
         })
   }
}

/// Ties the calling thread's batch to one outermost transaction
///
/// Rows queued inside the transaction are flushed through its connection
/// before the commit by [`drain`](Self::drain). If the transaction fails or
/// unwinds, dropping the guard discards them and restores the collecting flag
/// the thread had before the transaction began.
pub(crate) struct TransactionBatch<'a> {
   coalescer: &'a BatchCoalescer,
   was_collecting: bool,
   armed: bool,
}

impl<'a> TransactionBatch<'a> {
   /// Flushes rows queued before the transaction so they stay outside it
   pub(crate) fn open(coalescer: &'a BatchCoalescer) -> Result<Self> {
      coalescer.flush()?;
      Ok(Self {
         coalescer,
         was_collecting: coalescer.is_collecting(),
         armed: true,
      })
   }

   /// Runs everything queued inside the transaction
   ///
   /// A batch begun inside the transaction is ended; one begun before it keeps
   /// collecting.
   pub(crate) fn drain(&self) -> Result<()> {
      if self.was_collecting {
         self.coalescer.flush()?;
      } else {
         self.coalescer.end()?;
      }
      Ok(())
   }

   /// Marks the transaction as committed
   pub(crate) fn committed(mut self) {
      self.armed = false;
   }
}

impl Drop for TransactionBatch<'_> {
   fn drop(&mut self) {
      if self.armed {
         self.coalescer.discard(self.was_collecting);
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::handlers::ScalarHandler;
   use std::sync::Arc;

   fn op(kind: OperationKind, sql: &str, handler: Option<HandlerRef>) -> PendingOperation {
      PendingOperation {
         kind,
         handler,
         sql: sql.to_string(),
         connection: None,
         params: Params::None,
      }
   }

   #[test]
   fn test_shape_compares_kind_sql_and_handler() {
      let a = op(OperationKind::Update, "UPDATE t SET a = ?", None);
      let b = op(OperationKind::Update, "UPDATE t SET a = ?", None);
      let c = op(OperationKind::Update, "UPDATE t SET b = ?", None);
      let d = op(OperationKind::Execute, "UPDATE t SET a = ?", None);

      assert!(a.same_shape(&b, HandlerEquality::Identity));
      assert!(!a.same_shape(&c, HandlerEquality::Identity));
      assert!(!a.same_shape(&d, HandlerEquality::Identity));
   }

   #[test]
   fn test_shape_uses_handler_policy() {
      let h1: HandlerRef = Arc::new(ScalarHandler::first());
      let h2: HandlerRef = Arc::new(ScalarHandler::first());
      let a = op(OperationKind::Insert, "INSERT INTO t VALUES (?)", Some(h1));
      let b = op(OperationKind::Insert, "INSERT INTO t VALUES (?)", Some(h2));

      assert!(!a.same_shape(&b, HandlerEquality::Identity));
      assert!(a.same_shape(&b, HandlerEquality::Structural));
   }

   #[test]
   fn test_only_queries_are_never_batched() {
      assert!(OperationKind::Execute.is_batchable());
      assert!(OperationKind::Insert.is_batchable());
      assert!(OperationKind::Update.is_batchable());
      assert!(!OperationKind::Query.is_batchable());
   }
}
