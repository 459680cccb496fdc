//! The execution facade
//!
//! Every public call follows the same path: expand the template if there is
//! one, run the call's interceptors over the SQL, then either cache the
//! statement for a batch or run it on the connection the thread should be
//! using, and finally pass the outcome back through the interceptors.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx_sql_template::{TemplateBindings, TemplateEngine};
use sqlx_tx_conn_mgr::{
   ConnectionManager, ConnectionRef, DataSourceHandle, IsolationLevel, ThreadScopedState,
   Transactional,
};
use tracing::{debug, trace};

use crate::batch::{BatchCoalescer, OperationKind, PendingOperation, TransactionBatch};
use crate::config::{HandlerEquality, RunnerConfig, log_sql};
use crate::error::Result;
use crate::handlers::{HandlerRef, MapListHandler, ResultHandler, ScalarHandler};
use crate::inline::{InlineParams, values_clause};
use crate::interceptor::{
   InterceptContext, Interceptor, Paginator, SqlInterceptor, rewrite_all, transform_all,
};
use crate::outcome::Outcome;
use crate::params::Params;
use crate::scope::ConnectionScope;

/// SQL text of an [`Operation`]
#[derive(Debug, Clone)]
pub enum SqlText {
   /// SQL used as written, with `?` markers for the operation's params
   Raw(String),
   /// A template and its explicit bindings
   Template(String, TemplateBindings),
}

/// One call into [`SqlRunner::run`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sqlx_batch_runner::{HandlerRef, Operation, OperationKind, ScalarHandler, params};
///
/// let handler: HandlerRef = Arc::new(ScalarHandler::first());
/// let op = Operation::new(OperationKind::Query, "SELECT name FROM users WHERE id = ?")
///    .params(params![7])
///    .handler(&handler);
/// assert_eq!(op.kind(), OperationKind::Query);
/// ```
pub struct Operation {
   kind: OperationKind,
   text: SqlText,
   handler: Option<HandlerRef>,
   params: Params,
   connection: Option<ConnectionRef>,
}

impl Operation {
   pub fn new(kind: OperationKind, sql: impl Into<String>) -> Self {
      Self {
         kind,
         text: SqlText::Raw(sql.into()),
         handler: None,
         params: Params::None,
         connection: None,
      }
   }

   /// An operation whose SQL is expanded from `template`
   ///
   /// Values for `?` markers in a template come from the bindings' positional
   /// list, followed by any values given through [`params`](Self::params).
   pub fn template(
      kind: OperationKind,
      template: impl Into<String>,
      bindings: TemplateBindings,
   ) -> Self {
      Self {
         text: SqlText::Template(template.into(), bindings),
         ..Self::new(kind, String::new())
      }
   }

   pub fn params(mut self, params: impl Into<Params>) -> Self {
      self.params = params.into();
      self
   }

   pub fn handler(mut self, handler: &HandlerRef) -> Self {
      self.handler = Some(Arc::clone(handler));
      self
   }

   /// Runs on `connection` instead of one from the runner's data source
   ///
   /// The caller keeps ownership: the runner never releases it.
   pub fn on(mut self, connection: &ConnectionRef) -> Self {
      self.connection = Some(Arc::clone(connection));
      self
   }

   pub fn kind(&self) -> OperationKind {
      self.kind
   }
}

/// Clears the calling thread's template stack when a top-level call ends
struct CallScope<'a> {
   engine: &'a TemplateEngine,
}

impl Drop for CallScope<'_> {
   fn drop(&mut self) {
      self.engine.clear_bindings();
   }
}

/// Synchronous SQL execution over a data source
///
/// All per-call state (interceptors, template values, inline parameters, the
/// batch cache) is kept per thread, so one runner can be shared freely.
///
/// # Example
///
/// ```no_run
/// use sqlx_batch_runner::{DataSourceHandle, SqlRunner, SqliteDataSource, params};
///
/// # fn example() -> sqlx_batch_runner::Result<()> {
/// let source = DataSourceHandle::new(SqliteDataSource::connect("app.db", None)?);
/// let runner = SqlRunner::builder(source).batch_size(500).build()?;
///
/// runner.batch_begin()?;
/// for i in 0..1_000 {
///    runner.insert("INSERT INTO numbers (n) VALUES (?)", params![i])?;
/// }
/// runner.batch_end()?;
///
/// let total = runner.query_for_long("SELECT COUNT(*) FROM numbers", params![])?;
/// assert_eq!(total, 1_000);
/// # Ok(())
/// # }
/// ```
pub struct SqlRunner {
   scope: ConnectionScope,
   engine: Arc<TemplateEngine>,
   paginator: Option<Arc<dyn Paginator>>,
   config: RunnerConfig,
   interceptors: ThreadScopedState<Vec<Interceptor>>,
   inline: InlineParams,
   batch: BatchCoalescer,
}

impl SqlRunner {
   /// A runner with default configuration, its own connection manager and no
   /// paginator
   pub fn new(source: DataSourceHandle) -> Self {
      Self::from_parts(
         source,
         Arc::new(ConnectionManager::new()),
         Arc::new(TemplateEngine::new()),
         None,
         RunnerConfig::default(),
      )
   }

   pub fn builder(source: DataSourceHandle) -> SqlRunnerBuilder {
      SqlRunnerBuilder::new(source)
   }

   fn from_parts(
      source: DataSourceHandle,
      manager: Arc<ConnectionManager>,
      engine: Arc<TemplateEngine>,
      paginator: Option<Arc<dyn Paginator>>,
      config: RunnerConfig,
   ) -> Self {
      let scope = ConnectionScope { manager, source };
      let batch = BatchCoalescer::new(
         scope.clone(),
         config.batch_size,
         config.handler_equality,
         config.show_sql,
      );
      Self {
         scope,
         engine,
         paginator,
         config,
         interceptors: ThreadScopedState::new(),
         inline: InlineParams::default(),
         batch,
      }
   }

   pub fn config(&self) -> &RunnerConfig {
      &self.config
   }

   pub fn source(&self) -> &DataSourceHandle {
      &self.scope.source
   }

   pub fn manager(&self) -> &Arc<ConnectionManager> {
      &self.scope.manager
   }

   pub fn engine(&self) -> &Arc<TemplateEngine> {
      &self.engine
   }

   // ---------------------------------------------------------------------
   // Core
   // ---------------------------------------------------------------------

   /// Runs one operation
   ///
   /// Interceptors registered on the calling thread are consumed by this call
   /// and the thread's template values are cleared when it returns, whether
   /// it succeeded or not.
   pub fn run(&self, op: Operation) -> Result<Outcome> {
      let interceptors = self.interceptors.take();
      let _scope = CallScope {
         engine: &self.engine,
      };
      self.dispatch(op, &interceptors)
   }

   fn dispatch(&self, op: Operation, interceptors: &[Interceptor]) -> Result<Outcome> {
      let Operation {
         kind,
         text,
         handler,
         params,
         connection,
      } = op;

      let (sql, params) = match text {
         SqlText::Raw(sql) => (sql, params),
         SqlText::Template(template, mut bindings) => {
            for value in params.into_row() {
               bindings.push_positional(value);
            }
            let expansion = self.engine.expand(&template, &bindings)?;
            (expansion.sql, Params::List(expansion.params))
         }
      };

      let ctx = InterceptContext {
         kind,
         params: &params,
         paginator: self.paginator.as_deref(),
      };
      let sql = rewrite_all(interceptors, &ctx, sql)?;

      let outcome = if kind.is_batchable() && self.batch.is_collecting() {
         trace!(sql = %sql, "Statement cached for batch");
         self.batch.enqueue(PendingOperation {
            kind,
            handler,
            sql,
            connection,
            params,
         })?;
         Outcome::Queued
      } else {
         self.execute_now(kind, &sql, handler.as_ref(), &params, connection.as_ref())?
      };

      transform_all(interceptors, outcome)
   }

   fn execute_now(
      &self,
      kind: OperationKind,
      sql: &str,
      handler: Option<&HandlerRef>,
      params: &Params,
      connection: Option<&ConnectionRef>,
   ) -> Result<Outcome> {
      log_sql!(
         self.config.show_sql,
         sql = %sql,
         params = ?params.as_slice(),
         "Executing statement"
      );

      self.scope.with_connection(connection, |conn| {
         let values = params.as_slice();
         let rows = match (kind, handler) {
            (OperationKind::Execute | OperationKind::Update, None) => {
               return Ok(Outcome::Affected(conn.execute(sql, values)?));
            }
            (OperationKind::Insert, _) => conn.insert(sql, values)?,
            (OperationKind::Query, _)
            | (OperationKind::Execute | OperationKind::Update, Some(_)) => conn.query(sql, values)?,
         };

         let value = match handler {
            Some(handler) => handler.handle(rows)?,
            None => MapListHandler.handle(rows)?,
         };
         Ok(Outcome::Value(value))
      })
   }

   // ---------------------------------------------------------------------
   // Raw SQL
   // ---------------------------------------------------------------------

   /// Runs a statement; returns rows affected, `0` when cached for a batch
   pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<u64> {
      self
         .run(Operation::new(OperationKind::Execute, sql).params(params))
         .map(|o| o.affected())
   }

   /// Runs a statement returning rows and passes them to `handler`
   pub fn execute_with(
      &self,
      sql: &str,
      handler: &HandlerRef,
      params: impl Into<Params>,
   ) -> Result<JsonValue> {
      self
         .run(
            Operation::new(OperationKind::Execute, sql)
               .handler(handler)
               .params(params),
         )
         .map(Outcome::into_value)
   }

   /// Runs an INSERT; returns the generated keys, `null` when cached for a batch
   pub fn insert(&self, sql: &str, params: impl Into<Params>) -> Result<JsonValue> {
      self
         .run(Operation::new(OperationKind::Insert, sql).params(params))
         .map(Outcome::into_value)
   }

   /// Runs an INSERT and passes the generated keys to `handler`
   pub fn insert_with(
      &self,
      sql: &str,
      handler: &HandlerRef,
      params: impl Into<Params>,
   ) -> Result<JsonValue> {
      self
         .run(
            Operation::new(OperationKind::Insert, sql)
               .handler(handler)
               .params(params),
         )
         .map(Outcome::into_value)
   }

   /// Runs an UPDATE or DELETE; returns rows affected, `0` when cached
   pub fn update(&self, sql: &str, params: impl Into<Params>) -> Result<u64> {
      self
         .run(Operation::new(OperationKind::Update, sql).params(params))
         .map(|o| o.affected())
   }

   /// Runs a query through `handler`; queries are never batched
   pub fn query(
      &self,
      sql: &str,
      handler: &HandlerRef,
      params: impl Into<Params>,
   ) -> Result<JsonValue> {
      self
         .run(
            Operation::new(OperationKind::Query, sql)
               .handler(handler)
               .params(params),
         )
         .map(Outcome::into_value)
   }

   /// First column of the first row, deserialized into `T`
   pub fn query_for_object<T: DeserializeOwned>(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> Result<T> {
      let handler: HandlerRef = Arc::new(ScalarHandler::first());
      let value = self.query(sql, &handler, params)?;
      Ok(serde_json::from_value(value)?)
   }

   /// First column of the first row as an integer
   pub fn query_for_long(&self, sql: &str, params: impl Into<Params>) -> Result<i64> {
      self.query_for_object(sql, params)
   }

   /// Every row, each deserialized into `T` by column name
   pub fn query_for_rows<T: DeserializeOwned>(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> Result<Vec<T>> {
      let handler: HandlerRef = Arc::new(MapListHandler);
      let value = self.query(sql, &handler, params)?;
      Ok(serde_json::from_value(value)?)
   }

   // ---------------------------------------------------------------------
   // Caller-owned connections
   // ---------------------------------------------------------------------

   pub fn execute_on(
      &self,
      conn: &ConnectionRef,
      sql: &str,
      params: impl Into<Params>,
   ) -> Result<u64> {
      self
         .run(Operation::new(OperationKind::Execute, sql).params(params).on(conn))
         .map(|o| o.affected())
   }

   pub fn insert_on(
      &self,
      conn: &ConnectionRef,
      sql: &str,
      params: impl Into<Params>,
   ) -> Result<JsonValue> {
      self
         .run(Operation::new(OperationKind::Insert, sql).params(params).on(conn))
         .map(Outcome::into_value)
   }

   pub fn update_on(
      &self,
      conn: &ConnectionRef,
      sql: &str,
      params: impl Into<Params>,
   ) -> Result<u64> {
      self
         .run(Operation::new(OperationKind::Update, sql).params(params).on(conn))
         .map(|o| o.affected())
   }

   pub fn query_on(
      &self,
      conn: &ConnectionRef,
      sql: &str,
      handler: &HandlerRef,
      params: impl Into<Params>,
   ) -> Result<JsonValue> {
      self
         .run(
            Operation::new(OperationKind::Query, sql)
               .handler(handler)
               .params(params)
               .on(conn),
         )
         .map(Outcome::into_value)
   }

   // ---------------------------------------------------------------------
   // Templates
   // ---------------------------------------------------------------------

   pub fn template_execute(&self, template: &str, bindings: TemplateBindings) -> Result<u64> {
      self
         .run(Operation::template(OperationKind::Execute, template, bindings))
         .map(|o| o.affected())
   }

   pub fn template_insert(&self, template: &str, bindings: TemplateBindings) -> Result<JsonValue> {
      self
         .run(Operation::template(OperationKind::Insert, template, bindings))
         .map(Outcome::into_value)
   }

   pub fn template_update(&self, template: &str, bindings: TemplateBindings) -> Result<u64> {
      self
         .run(Operation::template(OperationKind::Update, template, bindings))
         .map(|o| o.affected())
   }

   pub fn template_query(
      &self,
      template: &str,
      handler: &HandlerRef,
      bindings: TemplateBindings,
   ) -> Result<JsonValue> {
      self
         .run(Operation::template(OperationKind::Query, template, bindings).handler(handler))
         .map(Outcome::into_value)
   }

   /// Clears the thread's template values, then binds `name`; returns `""`
   pub fn put0(&self, name: impl Into<String>, value: impl Into<JsonValue>) -> &'static str {
      self.engine.put0(name, value)
   }

   /// Binds `name` for the next templated call; returns `""`
   pub fn put(&self, name: impl Into<String>, value: impl Into<JsonValue>) -> &'static str {
      self.engine.put(name, value)
   }

   /// Binds raw text for a `${name}` placeholder; returns `""`
   pub fn replace(&self, name: impl Into<String>, text: impl Into<String>) -> &'static str {
      self.engine.replace(name, text)
   }

   /// Drops the thread's template values
   pub fn clear_bindings(&self) {
      self.engine.clear_bindings();
   }

   // ---------------------------------------------------------------------
   // Inline parameters
   // ---------------------------------------------------------------------

   /// Starts a new inline parameter list with `value`; returns `""`
   pub fn param0(&self, value: impl Into<JsonValue>) -> &'static str {
      self.inline.reset(value.into());
      ""
   }

   /// Appends `value` to the inline parameter list; returns `""`
   pub fn param(&self, value: impl Into<JsonValue>) -> &'static str {
      self.inline.push(value.into());
      ""
   }

   /// Like [`param0`](Self::param0) but returns `"?"`
   pub fn question0(&self, value: impl Into<JsonValue>) -> &'static str {
      self.inline.reset(value.into());
      "?"
   }

   /// Like [`param`](Self::param) but returns `"?"`
   pub fn question(&self, value: impl Into<JsonValue>) -> &'static str {
      self.inline.push(value.into());
      "?"
   }

   /// ` VALUES (?, ...)` with one marker per inline parameter collected so far
   pub fn values_questions(&self) -> String {
      values_clause(self.inline.len())
   }

   pub fn inline_execute(&self, sql: &str) -> Result<u64> {
      let params = Params::List(self.inline.take());
      self.execute(sql, params)
   }

   pub fn inline_insert(&self, sql: &str) -> Result<JsonValue> {
      let params = Params::List(self.inline.take());
      self.insert(sql, params)
   }

   pub fn inline_update(&self, sql: &str) -> Result<u64> {
      let params = Params::List(self.inline.take());
      self.update(sql, params)
   }

   pub fn inline_query(&self, sql: &str, handler: &HandlerRef) -> Result<JsonValue> {
      let params = Params::List(self.inline.take());
      self.query(sql, handler, params)
   }

   // ---------------------------------------------------------------------
   // Interceptors
   // ---------------------------------------------------------------------

   /// Restricts the next call to one page; returns `""`
   ///
   /// The next call fails with [`Error::MissingCapability`](crate::Error::MissingCapability)
   /// if the runner has no paginator.
   pub fn paginate(&self, page_number: u64, page_size: u64) -> &'static str {
      self.push_interceptor(Interceptor::Paginate {
         page_number,
         page_size,
      })
   }

   /// Registers `interceptor` for the next call; returns `""`
   pub fn intercept(&self, interceptor: Arc<dyn SqlInterceptor>) -> &'static str {
      self.push_interceptor(Interceptor::Custom(interceptor))
   }

   fn push_interceptor(&self, interceptor: Interceptor) -> &'static str {
      self.interceptors.with(|chain| chain.push(interceptor));
      ""
   }

   /// Interceptors waiting for the next call on this thread
   pub fn pending_interceptors(&self) -> usize {
      self.interceptors.inspect(|chain| chain.map_or(0, Vec::len))
   }

   /// Drops every call-scoped value on the calling thread: interceptors,
   /// template values and inline parameters
   pub fn clear_all(&self) {
      self.interceptors.clear_for_current_thread();
      self.engine.clear_bindings();
      self.inline.clear();
   }

   // ---------------------------------------------------------------------
   // Batching
   // ---------------------------------------------------------------------

   /// Starts caching execute, insert and update calls on this thread
   pub fn batch_begin(&self) -> Result<()> {
      self.batch.begin()?;
      debug!(batch_size = self.config.batch_size, "Batch started");
      Ok(())
   }

   /// Flushes whatever is cached and stops caching
   ///
   /// Returns the outcome of the final flush, `None` if nothing was cached.
   pub fn batch_end(&self) -> Result<Option<Outcome>> {
      let outcome = self.batch.end();
      debug!("Batch ended");
      outcome
   }

   /// Flushes whatever is cached and keeps caching
   pub fn batch_flush(&self) -> Result<Option<Outcome>> {
      self.batch.flush()
   }

   pub fn is_batch_enabled(&self) -> bool {
      self.batch.is_collecting()
   }

   /// Operations cached on this thread
   pub fn pending_batch_len(&self) -> usize {
      self.batch.pending()
   }

   // ---------------------------------------------------------------------
   // Transactions
   // ---------------------------------------------------------------------

   /// Transaction wrapper over this runner's data source
   pub fn transactional(&self) -> Transactional {
      Transactional::new(Arc::clone(&self.scope.manager), self.scope.source.clone())
   }

   /// Runs `work` in a transaction at READ COMMITTED, joining an existing one
   ///
   /// Statements batched inside the outermost transaction are flushed before
   /// it commits, and discarded if it rolls back.
   pub fn in_transaction<T>(&self, work: impl FnOnce() -> Result<T>) -> Result<T> {
      self.in_transaction_with(IsolationLevel::default(), work)
   }

   /// Runs `work` in a transaction at `isolation`, joining an existing one
   pub fn in_transaction_with<T>(
      &self,
      isolation: IsolationLevel,
      work: impl FnOnce() -> Result<T>,
   ) -> Result<T> {
      if self.is_in_transaction() {
         return work();
      }

      let batch = TransactionBatch::open(&self.batch)?;
      let value = self.transactional().with_isolation(isolation).run(|| {
         let value = work()?;
         batch.drain()?;
         Ok::<T, crate::Error>(value)
      })?;
      batch.committed();
      Ok(value)
   }

   pub fn is_in_transaction(&self) -> bool {
      self.scope.manager.is_in_transaction(&self.scope.source)
   }
}

/// Builder for [`SqlRunner`]
pub struct SqlRunnerBuilder {
   source: DataSourceHandle,
   manager: Option<Arc<ConnectionManager>>,
   engine: Option<Arc<TemplateEngine>>,
   paginator: Option<Arc<dyn Paginator>>,
   config: RunnerConfig,
}

impl SqlRunnerBuilder {
   fn new(source: DataSourceHandle) -> Self {
      Self {
         source,
         manager: None,
         engine: None,
         paginator: None,
         config: RunnerConfig::default(),
      }
   }

   /// Share a connection manager, and so the thread's transactions, with
   /// other runners
   pub fn manager(mut self, manager: Arc<ConnectionManager>) -> Self {
      self.manager = Some(manager);
      self
   }

   pub fn engine(mut self, engine: Arc<TemplateEngine>) -> Self {
      self.engine = Some(engine);
      self
   }

   pub fn paginator(mut self, paginator: impl Paginator + 'static) -> Self {
      self.paginator = Some(Arc::new(paginator));
      self
   }

   pub fn config(mut self, config: RunnerConfig) -> Self {
      self.config = config;
      self
   }

   pub fn batch_size(mut self, batch_size: usize) -> Self {
      self.config.batch_size = batch_size;
      self
   }

   pub fn show_sql(mut self, show_sql: bool) -> Self {
      self.config.show_sql = show_sql;
      self
   }

   pub fn handler_equality(mut self, equality: HandlerEquality) -> Self {
      self.config.handler_equality = equality;
      self
   }

   pub fn build(self) -> Result<SqlRunner> {
      self.config.validate()?;
      debug!(
         source = %self.source.name(),
         batch_size = self.config.batch_size,
         paginator = self.paginator.is_some(),
         "SQL runner configured"
      );
      Ok(SqlRunner::from_parts(
         self.source,
         self.manager.unwrap_or_default(),
         self.engine.unwrap_or_default(),
         self.paginator,
         self.config,
      ))
   }
}
