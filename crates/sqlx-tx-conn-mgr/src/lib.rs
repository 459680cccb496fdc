//! # sqlx-tx-conn-mgr
//!
//! Thread-scoped, transaction-aware connection management over pluggable data
//! sources.
//!
//! ## Core Types
//!
//! - **[`DataSource`]** / **[`Connection`]**: Seams a database driver implements
//! - **[`DataSourceHandle`]**: Reference-identity key for a data source
//! - **[`ConnectionManager`]**: Binds one connection per thread and data source
//!   for the lifetime of a transaction
//! - **[`Transactional`]**: Commit-or-rollback wrapper around a closure
//! - **[`SqliteDataSource`]**: sqlx-backed SQLite implementation of the seams
//! - **[`ThreadScopedState`]**: Per-thread slots that clean up after themselves
//! - **[`Error`]**: Error type for connection and transaction operations
//!
//! ## Architecture
//!
//! - **No pooling of its own**: Data sources pool; the manager only decides which
//!   connection a thread should be using
//! - **Thread affinity**: Transactions never leak across threads
//! - **Release is ownership-aware**: Releasing the transaction's connection is a
//!   no-op, releasing anything else closes it
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_tx_conn_mgr::{ConnectionManager, DataSourceHandle, IsolationLevel, SqliteDataSource};
//!
//! fn main() -> sqlx_tx_conn_mgr::Result<()> {
//!     let source = DataSourceHandle::new(SqliteDataSource::connect("example.db", None)?);
//!     let manager = ConnectionManager::new();
//!
//!     // Outside a transaction every acquire is a fresh connection
//!     let conn = manager.acquire(&source)?;
//!     conn.execute("CREATE TABLE IF NOT EXISTS users (name TEXT)", &[])?;
//!     manager.release(&conn, &source)?;
//!
//!     // Inside one, every acquire on this thread sees the same connection
//!     manager.start_transaction(&source, IsolationLevel::ReadCommitted)?;
//!     let conn = manager.acquire(&source)?;
//!     conn.execute("INSERT INTO users (name) VALUES (?)", &["Alice".into()])?;
//!     manager.commit(&source)?;
//!     manager.end_transaction(&source)?;
//!     Ok(())
//! }
//! ```

mod config;
mod decode;
mod error;
mod manager;
mod source;
mod sqlite;
mod thread_scoped;
mod transactional;

// Re-export public types
pub use config::SqliteDataSourceConfig;
pub use decode::{decode_rows, to_json};
pub use error::Error;
pub use manager::ConnectionManager;
pub use source::{
   Connection, ConnectionRef, DataSource, DataSourceHandle, IsolationLevel, Row, same_connection,
};
pub use sqlite::{
   GENERATED_KEY_COLUMN, SqliteConnectionHandle, SqliteDataSource, bind_all, bind_value,
};
pub use thread_scoped::{ThreadScopedState, Vacancy};
pub use transactional::Transactional;

// Re-export sqlx so callers can match on driver errors
pub use sqlx;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
