use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::internal::errors::{map_serde_error, Result};
use crate::internal::settings::{merge_settings_json, CompilerSettings};

/// One caller-supplied source file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
  pub content: String,
}

impl Source {
  pub fn new(content: impl Into<String>) -> Self {
    Self {
      content: content.into(),
    }
  }
}

/// Source name -> source, the shape callers hand to [`crate::Compiler::compile`].
pub type Sources = BTreeMap<String, Source>;

/// Standard-JSON input for one compile request. Built fresh per request and serialised before it
/// crosses into the execution unit.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EngineInput {
  pub language: String,
  pub sources: Sources,
  pub settings: Value,
}

impl EngineInput {
  pub fn build(sources: &Sources, settings: &CompilerSettings) -> Self {
    let mut engine_settings = json!({
      "outputSelection": { "*": { "*": ["*"] } },
      "optimizer": {
        "enabled": settings.optimize,
        "runs": settings.runs,
      },
    });
    if let Some(evm_version) = &settings.evm_version {
      engine_settings["evmVersion"] = Value::String(evm_version.clone());
    }
    if let Some(overrides) = settings.overrides.clone() {
      merge_settings_json(&mut engine_settings, overrides);
    }

    Self {
      language: settings.language.clone(),
      sources: sources.clone(),
      settings: engine_settings,
    }
  }

  pub fn to_payload(&self) -> Result<String> {
    map_serde_error(serde_json::to_string(self), "Failed to serialise engine input")
  }
}
