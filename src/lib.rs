//! # sqlx-batch-runner
//!
//! Synchronous SQL execution under thread-scoped transactions, with batch
//! coalescing, SQL templates and call-scoped interceptors.
//!
//! ## Core Types
//!
//! - **[`SqlRunner`]**: The execution facade; every call goes through
//!   [`SqlRunner::run`]
//! - **[`Operation`]** / **[`OperationKind`]**: One call and the kind of statement it runs
//! - **[`ResultHandler`]**: Turns rows into a value ([`ScalarHandler`],
//!   [`MapHandler`], [`MapListHandler`], [`ColumnListHandler`])
//! - **[`Interceptor`]** / **[`SqlInterceptor`]**: Rewrite SQL and transform
//!   results for the next call only
//! - **[`Paginator`]**: Dialect hook used by [`SqlRunner::paginate`]
//! - **[`RunnerConfig`]**: Batch size, SQL logging and handler equality
//! - **[`Error`]**: The single error type surfaced by the runner
//!
//! ## Architecture
//!
//! - **Thread-scoped state**: Connection bindings, the batch cache, pending
//!   interceptors, template values and inline parameters all live per thread
//! - **Transactions**: Delegated to [`ConnectionManager`]; inside a transaction
//!   every call on a thread uses the same connection
//! - **Batching**: Between [`SqlRunner::batch_begin`] and
//!   [`SqlRunner::batch_end`], consecutive statements of the same shape are
//!   sent as one driver batch
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlx_batch_runner::{
//!     DataSourceHandle, HandlerRef, LimitOffsetPaginator, MapListHandler, SqlRunner,
//!     SqliteDataSource, TemplateBindings, params,
//! };
//!
//! fn main() -> sqlx_batch_runner::Result<()> {
//!     let source = DataSourceHandle::new(SqliteDataSource::connect("example.db", None)?);
//!     let runner = SqlRunner::builder(source)
//!         .paginator(LimitOffsetPaginator)
//!         .build()?;
//!
//!     runner.execute("CREATE TABLE IF NOT EXISTS users (name TEXT, age INTEGER)", params![])?;
//!
//!     // Everything inside commits together or not at all
//!     runner.in_transaction(|| {
//!         runner.batch_begin()?;
//!         runner.insert("INSERT INTO users (name, age) VALUES (?, ?)", params!["Alice", 30])?;
//!         runner.insert("INSERT INTO users (name, age) VALUES (?, ?)", params!["Bob", 25])?;
//!         runner.batch_end()?;
//!         Ok(())
//!     })?;
//!
//!     // Templates, with a marker call registering pagination for this query
//!     let rows: HandlerRef = Arc::new(MapListHandler);
//!     let page = runner.template_query(
//!         &format!("SELECT * FROM users WHERE age > #{{age}}{}", runner.paginate(1, 10)),
//!         &rows,
//!         TemplateBindings::new().with("age", 18),
//!     )?;
//!     println!("{page}");
//!     Ok(())
//! }
//! ```

mod batch;
mod config;
mod error;
mod handlers;
mod inline;
mod interceptor;
mod outcome;
mod params;
mod runner;
mod scope;

// Re-export public types
pub use batch::{OperationKind, PendingOperation};
pub use config::{HandlerEquality, RunnerConfig};
pub use error::{Error, Result};
pub use handlers::{
   Column, ColumnListHandler, HandlerRef, MapHandler, MapListHandler, ResultHandler,
   ScalarHandler, same_handler,
};
pub use interceptor::{
   InterceptContext, Interceptor, LimitOffsetPaginator, Paginator, SqlInterceptor,
};
pub use outcome::Outcome;
pub use params::Params;
pub use runner::{Operation, SqlRunner, SqlRunnerBuilder, SqlText};

pub use serde_json::Value as JsonValue;

// Re-export the collaborating crates' public types for convenience
pub use sqlx_sql_template::{Expansion, TemplateBindings, TemplateEngine};
pub use sqlx_tx_conn_mgr::{
   Connection, ConnectionManager, ConnectionRef, DataSource, DataSourceHandle, IsolationLevel,
   Row, SqliteDataSource, SqliteDataSourceConfig, Transactional, same_connection,
};
