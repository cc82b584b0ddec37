use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{Error, Result};

const SOLIDITY: &str = "Solidity";

/// Per-call compiler settings supplied alongside the sources. `version` and `language` are
/// required; only `evmVersion` and the optimizer (disabled, 0 runs) may be left out.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilerSettings {
  /// Engine version to compile with, e.g. `0.8.26` or `0.8.26+commit.8a97fa7a`.
  pub version: String,
  pub language: String,
  /// Omitted from the engine input when absent so the engine picks its own default.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub evm_version: Option<String>,
  #[serde(default)]
  pub optimize: bool,
  #[serde(default)]
  pub runs: u32,
  /// Raw settings deep-merged into the engine `settings` object (`remappings`, `viaIR`, ...).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub overrides: Option<Value>,
}

impl CompilerSettings {
  /// Settings for Solidity sources, optimizer off.
  pub fn new(version: impl Into<String>) -> Self {
    Self::for_language(version, SOLIDITY)
  }

  pub fn for_language(version: impl Into<String>, language: impl Into<String>) -> Self {
    Self {
      version: version.into(),
      language: language.into(),
      evm_version: None,
      optimize: false,
      runs: 0,
      overrides: None,
    }
  }

  pub fn with_optimizer(mut self, runs: u32) -> Self {
    self.optimize = true;
    self.runs = runs;
    self
  }

  pub fn with_evm_version(mut self, evm_version: impl Into<String>) -> Self {
    self.evm_version = Some(evm_version.into());
    self
  }

  pub(crate) fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(Error::InvalidInput("settings.version is required".into()));
    }
    if self.language.trim().is_empty() {
      return Err(Error::InvalidInput("settings.language is required".into()));
    }
    if let Some(overrides) = &self.overrides {
      if !overrides.is_object() {
        return Err(Error::InvalidInput(
          "settings.overrides must be a JSON object".into(),
        ));
      }
    }
    Ok(())
  }
}

/// Recursively merge `overrides` into `base`; objects merge key by key, anything else replaces.
pub(crate) fn merge_settings_json(base: &mut Value, overrides: Value) {
  match (base, overrides) {
    (Value::Object(base_map), Value::Object(overrides_map)) => {
      for (key, value) in overrides_map {
        match base_map.get_mut(&key) {
          Some(existing) => merge_settings_json(existing, value),
          None => {
            base_map.insert(key, value);
          }
        }
      }
    }
    (target, value) => {
      *target = value;
    }
  }
}
