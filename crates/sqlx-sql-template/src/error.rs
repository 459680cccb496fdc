/// Result type alias for template operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or expanding a SQL template.
///
/// Every variant is raised before any SQL reaches a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// No binding exists for a placeholder's root name.
   #[error("unbound template parameter: {0}")]
   UnboundParameter(String),

   /// A binding exists but a nested segment of the path does not.
   #[error("cannot resolve template path '{path}': no member '{segment}'")]
   Resolution { path: String, segment: String },

   /// The template text itself is not well-formed.
   #[error("malformed template at byte {position}: {reason}")]
   Malformed { position: usize, reason: String },

   /// A value could not be converted into a bindable JSON value.
   #[error("cannot serialize template value: {0}")]
   Serialize(#[from] serde_json::Error),
}

impl Error {
   pub(crate) fn malformed(position: usize, reason: impl Into<String>) -> Self {
      Self::Malformed {
         position,
         reason: reason.into(),
      }
   }
}
