use std::time::Duration;

/// Every failure a compile call can end in. None of them are retried inside the crate; a failed
/// compile is retried by issuing a brand-new call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested compiler version could not be resolved, fetched or instantiated.
  #[error("Failed to load solc {version}: {reason}")]
  EngineLoad { version: String, reason: String },
  /// A loaded engine failed to run (process crash, unreadable output).
  #[error("Solc engine failed: {0}")]
  Engine(String),
  /// The channel into the execution unit failed before a response arrived.
  #[error("Compiler worker transport failed: {0}")]
  Transport(String),
  /// The execution unit was torn down while the request was outstanding.
  #[error("Compiler worker terminated before request {id} completed")]
  Terminated { id: u64 },
  /// Error-severity diagnostics, newline-joined in engine order.
  #[error("{0}")]
  Diagnostic(String),
  #[error("No contracts found in the source code")]
  NoArtifacts,
  #[error("Compile request {id} timed out after {after:?}")]
  Timeout { id: u64, after: Duration },
  #[error("Compile request {id} was cancelled")]
  Cancelled { id: u64 },
  #[error("Invalid compile input: {0}")]
  InvalidInput(String),
  #[error("{context}: {source}")]
  Serialization {
    context: String,
    #[source]
    source: serde_json::Error,
  },
}

impl Error {
  pub fn engine_load(version: impl Into<String>, reason: impl ToString) -> Self {
    Error::EngineLoad {
      version: version.into(),
      reason: reason.to_string(),
    }
  }

  /// Compiler-reported failures that belong inline in an editor rather than in a transient
  /// infrastructure notice.
  pub fn is_diagnostic(&self) -> bool {
    matches!(self, Error::Diagnostic(_) | Error::NoArtifacts)
  }

  /// Infrastructure failures where suggesting a retry makes sense.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Error::EngineLoad { .. }
        | Error::Engine(_)
        | Error::Transport(_)
        | Error::Terminated { .. }
        | Error::Timeout { .. }
    )
  }
}

/// Result alias bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Annotate a `serde_json` failure with `context`.
pub(crate) fn map_serde_error<T>(result: serde_json::Result<T>, context: &str) -> Result<T> {
  result.map_err(|source| Error::Serialization {
    context: context.to_owned(),
    source,
  })
}

/// Create a transport error for a poisoned lock, naming the guarded resource.
pub(crate) fn poisoned(resource: &str, err: impl std::fmt::Display) -> Error {
  Error::Transport(format!("{resource} mutex poisoned: {err}"))
}
