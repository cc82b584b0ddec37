//! Compiler engine handles and the loaders that produce them.
//!
//! An [`Engine`] is a loaded, versioned compiler: a pure `compile(json) -> json` function with no
//! observable side effects beyond CPU time. Engines are produced by an [`EngineLoader`] and shared
//! through the [`EngineCache`], which loads each version at most once per process.

use std::sync::Arc;

use foundry_compilers::solc::Solc;
use serde_json::Value;

use crate::internal::errors::{map_serde_error, Error, Result};
use crate::internal::solc;

mod cache;

pub use cache::EngineCache;

/// A loaded compiler engine. Implementations must be callable from any thread; the crate only
/// ever invokes them from inside the execution unit.
pub trait Engine: Send + Sync {
  /// Version the engine reports for itself.
  fn version(&self) -> &str;

  /// Run one standard-JSON compilation. Both sides are serialised text.
  fn compile(&self, input: &str) -> Result<String>;
}

pub type EngineHandle = Arc<dyn Engine>;

/// Resolves a version string to a freshly instantiated [`Engine`]. Loading is I/O bound and may
/// fail; a failure must never fall back to a different version.
pub trait EngineLoader: Send + Sync {
  fn load(&self, version: &str) -> Result<EngineHandle>;

  /// Versions that can be loaded without fetching anything.
  fn installed_versions(&self) -> Vec<String> {
    Vec::new()
  }
}

/// Native `solc` binary managed by svm.
pub struct SolcEngine {
  solc: Solc,
  version: String,
}

impl SolcEngine {
  pub fn new(solc: Solc) -> Self {
    let version = solc.version.to_string();
    Self { solc, version }
  }
}

impl Engine for SolcEngine {
  fn version(&self) -> &str {
    &self.version
  }

  fn compile(&self, input: &str) -> Result<String> {
    let input: Value =
      map_serde_error(serde_json::from_str(input), "Failed to parse engine input")?;
    let bytes = self
      .solc
      .compile_output(&input)
      .map_err(|err| Error::Engine(err.to_string()))?;
    String::from_utf8(bytes)
      .map_err(|err| Error::Engine(format!("solc produced non UTF-8 output: {err}")))
  }
}

/// Production loader: finds the requested release in the svm data directory and downloads it
/// when missing (unless offline).
#[derive(Clone, Debug, Default)]
pub struct SvmLoader {
  offline: bool,
}

impl SvmLoader {
  pub fn new(offline: bool) -> Self {
    Self { offline }
  }
}

impl EngineLoader for SvmLoader {
  fn load(&self, version: &str) -> Result<EngineHandle> {
    let parsed = solc::parse_version(version)?;
    let solc = solc::ensure_installed(&parsed, self.offline).map_err(|err| match err {
      Error::EngineLoad { reason, .. } => Error::engine_load(version, reason),
      other => other,
    })?;
    Ok(Arc::new(SolcEngine::new(solc)))
  }

  fn installed_versions(&self) -> Vec<String> {
    solc::installed_versions()
      .into_iter()
      .map(|version| version.to_string())
      .collect()
  }
}
