use std::time::Duration;

use super::solc::DEFAULT_SOLC_VERSION;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_WORKER_NAME: &str = "solc-worker";

/// Finalised configuration consumed by the compile facade, its execution unit and the engine
/// loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerConfig {
  /// Deadline applied to every dispatched request. `None` waits indefinitely.
  pub request_timeout: Option<Duration>,
  /// Never download engines; versions that are not installed fail to load.
  pub offline: bool,
  /// OS thread name of the execution unit.
  pub worker_name: String,
  /// Version warmed by [`crate::Compiler::preload_default`].
  pub default_version: String,
}

impl Default for CompilerConfig {
  fn default() -> Self {
    CompilerConfig {
      request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
      offline: false,
      worker_name: DEFAULT_WORKER_NAME.to_string(),
      default_version: DEFAULT_SOLC_VERSION.to_string(),
    }
  }
}

/// Optional overrides merged on top of a [`CompilerConfig`].
#[derive(Clone, Debug, Default)]
pub struct CompilerConfigOptions {
  pub request_timeout: Option<Option<Duration>>,
  pub offline: Option<bool>,
  pub worker_name: Option<String>,
  pub default_version: Option<String>,
}

impl CompilerConfig {
  pub fn from_options(options: Option<CompilerConfigOptions>) -> Self {
    Self::default().merge_options(options.as_ref())
  }

  pub fn merge_options(&self, options: Option<&CompilerConfigOptions>) -> Self {
    let mut merged = self.clone();
    let Some(overrides) = options else {
      return merged;
    };

    if let Some(timeout) = overrides.request_timeout {
      merged.request_timeout = timeout;
    }
    if let Some(offline) = overrides.offline {
      merged.offline = offline;
    }
    if let Some(name) = overrides.worker_name.as_ref().filter(|name| !name.trim().is_empty()) {
      merged.worker_name = name.clone();
    }
    if let Some(version) = overrides
      .default_version
      .as_ref()
      .filter(|version| !version.trim().is_empty())
    {
      merged.default_version = version.clone();
    }
    merged
  }
}
