//! Error types for sqlx-tx-conn-mgr

use thiserror::Error;

/// Errors that may occur while acquiring connections or driving transactions
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// No connection could be obtained from the data source
   #[error("Cannot obtain a connection from data source '{source_name}': {cause}")]
   ConnectionAcquisition {
      source_name: String,
      #[source]
      cause: Box<Error>,
   },

   /// A transaction is already bound to this thread for the data source
   #[error("Transaction already active for data source '{0}' on this thread")]
   TransactionAlreadyActive(String),

   /// Commit or rollback was requested without an active transaction
   #[error("No active transaction for {0} on this thread")]
   NoActiveTransaction(String),

   /// The connection was already closed or returned to its data source
   #[error("Connection has been closed")]
   ConnectionClosed,

   /// The data source has been closed and cannot hand out connections
   #[error("Data source '{0}' has been closed")]
   DataSourceClosed(String),

   /// SQLite type that cannot be mapped to JSON
   #[error("Unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Failure reported by a driver that is not backed by sqlx
   #[error("Driver error: {0}")]
   Driver(String),
}

impl Error {
   /// Wraps a failure raised while obtaining a connection from `source_name`
   pub fn acquisition(source_name: impl Into<String>, cause: Error) -> Self {
      Self::ConnectionAcquisition {
         source_name: source_name.into(),
         cause: Box::new(cause),
      }
   }

   /// Returns true if this error describes a transaction state violation
   pub fn is_transaction_state(&self) -> bool {
      matches!(
         self,
         Self::TransactionAlreadyActive(_) | Self::NoActiveTransaction(_)
      )
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_acquisition_keeps_cause() {
      let err = Error::acquisition("main.db", Error::Driver("pool exhausted".into()));
      assert!(err.to_string().contains("main.db"));
      assert!(err.to_string().contains("pool exhausted"));
      assert!(std::error::Error::source(&err).is_some());
   }

   #[test]
   fn test_transaction_state_classification() {
      assert!(Error::TransactionAlreadyActive("a".into()).is_transaction_state());
      assert!(Error::NoActiveTransaction("a".into()).is_transaction_state());
      assert!(!Error::ConnectionClosed.is_transaction_state());
   }
}
