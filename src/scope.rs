use std::sync::Arc;

use sqlx_tx_conn_mgr::{ConnectionManager, ConnectionRef, DataSourceHandle};
use tracing::warn;

use crate::error::Result;

/// The data source a runner works against and the manager deciding which of
/// its connections the calling thread uses
#[derive(Clone)]
pub(crate) struct ConnectionScope {
   pub(crate) manager: Arc<ConnectionManager>,
   pub(crate) source: DataSourceHandle,
}

impl ConnectionScope {
   /// Runs `f` on `explicit`, or on a connection acquired for this call
   ///
   /// An acquired connection is always released afterwards. Inside a
   /// transaction that leaves the bound connection open.
   pub(crate) fn with_connection<R>(
      &self,
      explicit: Option<&ConnectionRef>,
      f: impl FnOnce(&ConnectionRef) -> Result<R>,
   ) -> Result<R> {
      if let Some(conn) = explicit {
         return f(conn);
      }

      let conn = self.manager.acquire(&self.source)?;
      let result = f(&conn);
      match self.manager.release(&conn, &self.source) {
         Ok(()) => result,
         Err(release_err) if result.is_err() => {
            warn!(source = %self.source.name(), "Failed to release connection: {}", release_err);
            result
         }
         Err(release_err) => Err(release_err.into()),
      }
   }
}
