//! Configuration for the SQLite data source

use serde::{Deserialize, Serialize};

/// Configuration for [`SqliteDataSource`](crate::SqliteDataSource) connection pooling
///
/// # Examples
///
/// ```
/// use sqlx_tx_conn_mgr::SqliteDataSourceConfig;
///
/// // Use defaults
/// let config = SqliteDataSourceConfig::default();
///
/// // Override just one field
/// let config = SqliteDataSourceConfig {
///     max_connections: 4,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteDataSourceConfig {
   /// Maximum number of pooled connections handed out at the same time
   ///
   /// Every thread inside a transaction holds one connection until the
   /// transaction ends, so this bounds the number of concurrent transactions.
   ///
   /// Default: 8
   pub max_connections: u32,

   /// Idle timeout for pooled connections (in seconds)
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// How long `get_connection` waits for a free connection (in seconds)
   ///
   /// Default: 10
   pub acquire_timeout_secs: u64,
}

impl Default for SqliteDataSourceConfig {
   fn default() -> Self {
      Self {
         max_connections: 8,
         idle_timeout_secs: 30,
         acquire_timeout_secs: 10,
      }
   }
}
