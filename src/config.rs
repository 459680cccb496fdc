//! Runner configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the batch coalescer decides two result handlers are the same
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerEquality {
   /// Only the very same handler instance matches
   #[default]
   Identity,
   /// Handlers reporting the same [`shape_key`](crate::ResultHandler::shape_key)
   /// also match
   Structural,
}

/// Configuration for [`SqlRunner`](crate::SqlRunner)
///
/// # Examples
///
/// ```
/// use sqlx_batch_runner::{HandlerEquality, RunnerConfig};
///
/// let config = RunnerConfig {
///     batch_size: 500,
///     handler_equality: HandlerEquality::Structural,
///     ..Default::default()
/// };
/// assert!(!config.show_sql);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
   /// Pending operations cached before the batch is flushed automatically
   ///
   /// Default: 100
   pub batch_size: usize,

   /// Log every statement, its parameters and every batch flush at `info`
   ///
   /// When off the same events are logged at `debug`.
   ///
   /// Default: false
   pub show_sql: bool,

   /// Handler comparison used when deciding whether a batch run continues
   ///
   /// Default: [`HandlerEquality::Identity`]
   pub handler_equality: HandlerEquality,
}

impl Default for RunnerConfig {
   fn default() -> Self {
      Self {
         batch_size: 100,
         show_sql: false,
         handler_equality: HandlerEquality::default(),
      }
   }
}

impl RunnerConfig {
   pub(crate) fn validate(&self) -> Result<()> {
      if self.batch_size == 0 {
         return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
      }
      Ok(())
   }
}

/// Logs at `info` when `$show` is set, `debug` otherwise
macro_rules! log_sql {
   ($show:expr, $($arg:tt)+) => {
      if $show {
         tracing::info!($($arg)+);
      } else {
         tracing::debug!($($arg)+);
      }
   };
}

pub(crate) use log_sql;
