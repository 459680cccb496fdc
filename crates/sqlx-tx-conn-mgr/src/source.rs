//! Data source and connection seams
//!
//! A [`DataSource`] hands out raw connections and takes them back when they
//! are closed. The connection manager never pools anything itself; it only
//! decides which connection a thread should be using.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Result;

/// A decoded result row, keyed by column name in select-list order
pub type Row = IndexMap<String, JsonValue>;

/// Shared handle to a live connection
///
/// Two handles refer to the same connection only if they share an allocation;
/// use [`same_connection`] to compare them.
pub type ConnectionRef = Arc<dyn Connection>;

/// Transaction isolation levels, from weakest to strongest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
   ReadUncommitted,
   #[default]
   ReadCommitted,
   RepeatableRead,
   Serializable,
}

/// Synchronous statement primitives offered by a raw connection
///
/// Implementations use interior mutability: a connection is shared between the
/// binding that owns it and the calls that borrow it on the same thread.
pub trait Connection: Send + Sync {
   /// Switches auto-commit mode. Turning it back on commits pending work.
   fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

   fn set_isolation_level(&self, level: IsolationLevel) -> Result<()>;

   fn commit(&self) -> Result<()>;

   fn rollback(&self) -> Result<()>;

   /// Runs a statement and returns the number of rows affected
   fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<u64>;

   /// Runs a query and returns every row
   fn query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>>;

   /// Runs an INSERT and returns the generated keys, one row per inserted row
   fn insert(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>>;

   /// Runs `sql` once per parameter row and returns per-row update counts
   fn batch(&self, sql: &str, rows: &[Vec<JsonValue>]) -> Result<Vec<u64>>;

   /// Runs an INSERT once per parameter row and returns the generated keys
   fn insert_batch(&self, sql: &str, rows: &[Vec<JsonValue>]) -> Result<Vec<Row>>;

   /// Returns the connection to its data source. Closing twice is a no-op.
   ///
   /// Uncommitted transactional work is rolled back and per-transaction
   /// session settings are reset before the connection is handed back.
   fn close(&self) -> Result<()>;

   fn is_closed(&self) -> bool;
}

/// Returns true if both handles point at the same connection
pub fn same_connection(a: &ConnectionRef, b: &ConnectionRef) -> bool {
   std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A factory for raw connections
pub trait DataSource: Send + Sync {
   /// Obtains a fresh connection. Never returns a connection already in use.
   fn get_connection(&self) -> Result<ConnectionRef>;

   /// Human readable name used in logs and error messages
   fn name(&self) -> &str {
      "data source"
   }
}

/// Identity of a data source, compared by reference
///
/// Cloning the handle keeps the identity; wrapping the same source twice with
/// [`DataSourceHandle::new`] produces two distinct handles.
#[derive(Clone)]
pub struct DataSourceHandle(Arc<dyn DataSource>);

impl DataSourceHandle {
   pub fn new(source: impl DataSource + 'static) -> Self {
      Self(Arc::new(source))
   }

   pub fn from_arc(source: Arc<dyn DataSource>) -> Self {
      Self(source)
   }

   pub fn name(&self) -> &str {
      self.0.name()
   }

   /// Access to the underlying source for advanced usage
   pub fn inner(&self) -> &Arc<dyn DataSource> {
      &self.0
   }

   pub(crate) fn get_connection(&self) -> Result<ConnectionRef> {
      self.0.get_connection()
   }

   fn address(&self) -> *const () {
      Arc::as_ptr(&self.0) as *const ()
   }
}

impl PartialEq for DataSourceHandle {
   fn eq(&self, other: &Self) -> bool {
      self.address() == other.address()
   }
}

impl Eq for DataSourceHandle {}

impl Hash for DataSourceHandle {
   fn hash<H: Hasher>(&self, state: &mut H) {
      self.address().hash(state);
   }
}

impl fmt::Debug for DataSourceHandle {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("DataSourceHandle")
         .field("name", &self.name())
         .field("address", &self.address())
         .finish()
   }
}

impl<S: DataSource + 'static> From<Arc<S>> for DataSourceHandle {
   fn from(source: Arc<S>) -> Self {
      Self(source)
   }
}
