//! Call-scoped SQL rewriting and result transformation
//!
//! Interceptors are registered by marker calls made while the arguments of the
//! next runner call are evaluated, and are consumed by that call. Rewrites run
//! in registration order, and so do result transforms; each stage sees the
//! previous stage's output.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::batch::OperationKind;
use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::params::Params;

/// Rewrites a query so that it returns a single page
pub trait Paginator: Send + Sync {
   /// `page_number` starts at 1
   fn paginate(&self, page_number: u64, page_size: u64, sql: &str) -> Result<String>;
}

/// `LIMIT`/`OFFSET` pagination as understood by SQLite, PostgreSQL and MySQL
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOffsetPaginator;

impl Paginator for LimitOffsetPaginator {
   fn paginate(&self, page_number: u64, page_size: u64, sql: &str) -> Result<String> {
      let offset = page_number.saturating_sub(1).saturating_mul(page_size);
      Ok(format!("{} LIMIT {} OFFSET {}", sql.trim_end(), page_size, offset))
   }
}

/// What an interceptor may inspect about the call it rewrites
pub struct InterceptContext<'a> {
   pub(crate) kind: OperationKind,
   pub(crate) params: &'a Params,
   pub(crate) paginator: Option<&'a dyn Paginator>,
}

impl<'a> InterceptContext<'a> {
   pub fn kind(&self) -> OperationKind {
      self.kind
   }

   pub fn params(&self) -> &'a Params {
      self.params
   }

   /// The runner's paginator, if one was configured
   pub fn paginator(&self) -> Option<&'a dyn Paginator> {
      self.paginator
   }
}

/// A user-supplied interception stage
pub trait SqlInterceptor: Send + Sync {
   fn rewrite_sql(&self, _ctx: &InterceptContext<'_>, sql: String) -> Result<String> {
      Ok(sql)
   }

   fn transform_result(&self, outcome: Outcome) -> Result<Outcome> {
      Ok(outcome)
   }
}

/// One registered interception stage
#[derive(Clone)]
pub enum Interceptor {
   /// Restrict a query to one page through the configured [`Paginator`]
   Paginate { page_number: u64, page_size: u64 },
   Custom(Arc<dyn SqlInterceptor>),
}

impl Interceptor {
   pub fn rewrite_sql(&self, ctx: &InterceptContext<'_>, sql: String) -> Result<String> {
      match self {
         Interceptor::Paginate {
            page_number,
            page_size,
         } => {
            let paginator = ctx.paginator.ok_or_else(|| {
               Error::MissingCapability(
                  "cannot paginate SQL: no paginator is configured".to_string(),
               )
            })?;
            paginator.paginate(*page_number, *page_size, &sql)
         }
         Interceptor::Custom(interceptor) => interceptor.rewrite_sql(ctx, sql),
      }
   }

   pub fn transform_result(&self, outcome: Outcome) -> Result<Outcome> {
      match self {
         Interceptor::Paginate { .. } => Ok(outcome),
         Interceptor::Custom(interceptor) => interceptor.transform_result(outcome),
      }
   }
}

impl fmt::Debug for Interceptor {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Interceptor::Paginate {
            page_number,
            page_size,
         } => f
            .debug_struct("Paginate")
            .field("page_number", page_number)
            .field("page_size", page_size)
            .finish(),
         Interceptor::Custom(_) => f.write_str("Custom(..)"),
      }
   }
}

pub(crate) fn rewrite_all(
   chain: &[Interceptor],
   ctx: &InterceptContext<'_>,
   mut sql: String,
) -> Result<String> {
   for interceptor in chain {
      sql = interceptor.rewrite_sql(ctx, sql)?;
      trace!(interceptor = ?interceptor, sql = %sql, "SQL rewritten");
   }
   Ok(sql)
}

pub(crate) fn transform_all(chain: &[Interceptor], mut outcome: Outcome) -> Result<Outcome> {
   for interceptor in chain {
      outcome = interceptor.transform_result(outcome)?;
   }
   Ok(outcome)
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   struct Suffix(&'static str);

   impl SqlInterceptor for Suffix {
      fn rewrite_sql(&self, _ctx: &InterceptContext<'_>, sql: String) -> Result<String> {
         Ok(format!("{}{}", sql, self.0))
      }

      fn transform_result(&self, outcome: Outcome) -> Result<Outcome> {
         let mut value = outcome.into_value();
         if let Some(items) = value.as_array_mut() {
            items.push(json!(self.0));
         }
         Ok(Outcome::Value(value))
      }
   }

   fn ctx<'a>(params: &'a Params, paginator: Option<&'a dyn Paginator>) -> InterceptContext<'a> {
      InterceptContext {
         kind: OperationKind::Query,
         params,
         paginator,
      }
   }

   #[test]
   fn test_limit_offset_pagination() {
      let sql = LimitOffsetPaginator.paginate(3, 20, "SELECT * FROM t ").unwrap();
      assert_eq!(sql, "SELECT * FROM t LIMIT 20 OFFSET 40");

      let sql = LimitOffsetPaginator.paginate(0, 10, "SELECT 1").unwrap();
      assert_eq!(sql, "SELECT 1 LIMIT 10 OFFSET 0");
   }

   #[test]
   fn test_paginate_without_paginator_is_missing_capability() {
      let params = Params::None;
      let err = rewrite_all(
         &[Interceptor::Paginate {
            page_number: 1,
            page_size: 10,
         }],
         &ctx(&params, None),
         "SELECT 1".into(),
      )
      .unwrap_err();
      assert!(matches!(err, Error::MissingCapability(_)));
   }

   #[test]
   fn test_stages_run_in_registration_order() {
      let chain = vec![
         Interceptor::Custom(Arc::new(Suffix(" /*a*/"))),
         Interceptor::Paginate {
            page_number: 2,
            page_size: 5,
         },
         Interceptor::Custom(Arc::new(Suffix(" /*b*/"))),
      ];
      let params = Params::None;

      let sql = rewrite_all(&chain, &ctx(&params, Some(&LimitOffsetPaginator)), "SELECT 1".into())
         .unwrap();
      assert_eq!(sql, "SELECT 1 /*a*/ LIMIT 5 OFFSET 5 /*b*/");

      let outcome = transform_all(&chain, Outcome::Value(json!([]))).unwrap();
      assert_eq!(outcome, Outcome::Value(json!([" /*a*/", " /*b*/"])));
   }
}
