//! Error types for the sqlx-pg-observer crate.

/// Errors that can occur while decoding or observing change notifications.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Notification payload could not be parsed as a structured document.
   #[error("malformed payload: {0}")]
   MalformedPayload(String),

   /// Subscribing failed or the connection dropped mid-stream.
   #[error("transport connection error: {0}")]
   TransportConnection(String),

   /// Invalid observer or connection parameters supplied at startup.
   #[error("invalid configuration: {0}")]
   Configuration(String),

   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::MalformedPayload(_) => "MALFORMED_PAYLOAD".to_string(),
         Error::TransportConnection(_) => "TRANSPORT_CONNECTION".to_string(),
         Error::Configuration(_) => "CONFIGURATION".to_string(),
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("POSTGRES_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Other(_) => "ERROR".to_string(),
      }
   }

   /// Returns true if the subscription loop should reconnect after this error
   /// rather than give up.
   pub fn is_transient(&self) -> bool {
      matches!(self, Error::TransportConnection(_) | Error::Sqlx(_))
   }
}
