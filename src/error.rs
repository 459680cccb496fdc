/// Result type alias for runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The single error surfaced by [`SqlRunner`](crate::SqlRunner).
///
/// Failures from the connection manager and the template engine are
/// translated into one of these kinds at the runner boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// No connection could be obtained from the data source.
   #[error("cannot obtain a connection from data source '{source_name}': {cause}")]
   ConnectionAcquisition {
      source_name: String,
      #[source]
      cause: Box<sqlx_tx_conn_mgr::Error>,
   },

   /// Begin with a transaction already active, or commit/rollback with none.
   #[error(transparent)]
   TransactionState(sqlx_tx_conn_mgr::Error),

   /// A template path names a member that does not exist.
   #[error("cannot resolve template path '{path}': no member '{segment}'")]
   TemplateResolution { path: String, segment: String },

   /// A template placeholder has no binding at all.
   #[error("unbound template parameter: {0}")]
   UnboundTemplateParameter(String),

   /// Template text that cannot be parsed.
   #[error("malformed template at byte {position}: {reason}")]
   MalformedTemplate { position: usize, reason: String },

   /// An interceptor needs a collaborator that was never configured.
   #[error("missing capability: {0}")]
   MissingCapability(String),

   /// Cached batch rows disagree on their width.
   #[error("malformed batch: row {row} has {found} parameters, expected {expected}")]
   MalformedBatch {
      row: usize,
      expected: usize,
      found: usize,
   },

   /// The underlying connection or statement call failed.
   #[error("driver error: {0}")]
   Driver(#[source] sqlx_tx_conn_mgr::Error),

   /// A result could not be converted to the requested type.
   #[error("decode error: {0}")]
   Decode(#[from] serde_json::Error),

   /// A result handler could not find the column it reads.
   #[error("column not found: {0}")]
   ColumnNotFound(String),

   /// Runner configuration that cannot work.
   #[error("invalid configuration: {0}")]
   InvalidConfig(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::ConnectionAcquisition { .. } => "CONNECTION_ACQUISITION".to_string(),
         Error::TransactionState(_) => "TRANSACTION_STATE".to_string(),
         Error::TemplateResolution { .. } => "TEMPLATE_RESOLUTION".to_string(),
         Error::UnboundTemplateParameter(_) => "UNBOUND_TEMPLATE_PARAMETER".to_string(),
         Error::MalformedTemplate { .. } => "MALFORMED_TEMPLATE".to_string(),
         Error::MissingCapability(_) => "MISSING_CAPABILITY".to_string(),
         Error::MalformedBatch { .. } => "MALFORMED_BATCH".to_string(),
         Error::Driver(sqlx_tx_conn_mgr::Error::Sqlx(e)) => {
            // Extract SQLite error codes from sqlx errors
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Driver(_) => "DRIVER_ERROR".to_string(),
         Error::Decode(_) => "DECODE_ERROR".to_string(),
         Error::ColumnNotFound(_) => "COLUMN_NOT_FOUND".to_string(),
         Error::InvalidConfig(_) => "INVALID_CONFIG".to_string(),
      }
   }
}

impl From<sqlx_tx_conn_mgr::Error> for Error {
   fn from(err: sqlx_tx_conn_mgr::Error) -> Self {
      match err {
         sqlx_tx_conn_mgr::Error::ConnectionAcquisition { source_name, cause } => {
            Error::ConnectionAcquisition { source_name, cause }
         }
         err if err.is_transaction_state() => Error::TransactionState(err),
         err => Error::Driver(err),
      }
   }
}

impl From<sqlx_sql_template::Error> for Error {
   fn from(err: sqlx_sql_template::Error) -> Self {
      match err {
         sqlx_sql_template::Error::UnboundParameter(name) => Error::UnboundTemplateParameter(name),
         sqlx_sql_template::Error::Resolution { path, segment } => {
            Error::TemplateResolution { path, segment }
         }
         sqlx_sql_template::Error::Malformed { position, reason } => {
            Error::MalformedTemplate { position, reason }
         }
         sqlx_sql_template::Error::Serialize(e) => Error::Decode(e),
      }
   }
}
