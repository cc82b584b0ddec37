use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::input::Sources;
use crate::internal::errors::{map_serde_error, Error, Result};

/// One contract found in the engine output.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilationArtifact {
  pub contract_name: String,
  pub source_name: String,
  /// Copied verbatim from the engine; `null` when the engine omitted it.
  pub abi: Value,
  /// `evm.bytecode.object` verbatim; empty for abstract contracts and interfaces.
  pub byte_code: String,
}

impl CompilationArtifact {
  /// Decode [`Self::byte_code`] into raw bytes. Fails for unlinked bytecode that still carries
  /// library placeholders.
  pub fn bytecode_bytes(&self) -> std::result::Result<Vec<u8>, hex::FromHexError> {
    let trimmed = self.byte_code.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
  }
}

/// Normalised outcome of a successful compile.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResult {
  /// In the order the engine returned them.
  pub artifacts: Vec<CompilationArtifact>,
  /// Formatted warning diagnostics in engine order.
  pub warnings: Vec<String>,
  pub source_version: String,
  pub original_sources: Sources,
}

impl CompilationResult {
  pub fn artifact(&self, contract_name: &str) -> Option<&CompilationArtifact> {
    self
      .artifacts
      .iter()
      .find(|artifact| artifact.contract_name == contract_name)
  }
}

enum Severity {
  Error,
  Warning,
  Other,
}

fn severity(diagnostic: &Value) -> Severity {
  // A diagnostic without a severity is treated as fatal.
  match diagnostic.get("severity").and_then(Value::as_str) {
    None => Severity::Error,
    Some(label) if label.eq_ignore_ascii_case("error") => Severity::Error,
    Some(label) if label.eq_ignore_ascii_case("warning") => Severity::Warning,
    Some(_) => Severity::Other,
  }
}

fn diagnostic_text(diagnostic: &Value) -> String {
  diagnostic
    .get("formattedMessage")
    .and_then(Value::as_str)
    .or_else(|| diagnostic.get("message").and_then(Value::as_str))
    .unwrap_or("Unknown compiler diagnostic")
    .trim_end()
    .to_string()
}

fn artifact(source_name: &str, contract_name: &str, contract: &Value) -> CompilationArtifact {
  CompilationArtifact {
    contract_name: contract_name.to_string(),
    source_name: source_name.to_string(),
    abi: contract.get("abi").cloned().unwrap_or(Value::Null),
    byte_code: contract
      .pointer("/evm/bytecode/object")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
  }
}

/// Normalise serialised engine output.
pub fn normalize(
  raw: &str,
  source_version: &str,
  original_sources: Sources,
) -> Result<CompilationResult> {
  let value: Value = map_serde_error(serde_json::from_str(raw), "Failed to parse engine output")?;
  normalize_value(&value, source_version, original_sources)
}

/// Normalise already-parsed engine output. Every field is optional; entries of the wrong shape are
/// skipped.
pub fn normalize_value(
  raw: &Value,
  source_version: &str,
  original_sources: Sources,
) -> Result<CompilationResult> {
  let mut errors = Vec::new();
  let mut warnings = Vec::new();
  for diagnostic in raw
    .get("errors")
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .filter(|diagnostic| diagnostic.is_object())
  {
    match severity(diagnostic) {
      Severity::Error => errors.push(diagnostic_text(diagnostic)),
      Severity::Warning => warnings.push(diagnostic_text(diagnostic)),
      Severity::Other => {
        trace!(diagnostic = %diagnostic_text(diagnostic), "ignoring info diagnostic")
      }
    }
  }

  if !errors.is_empty() {
    debug!(errors = errors.len(), "compilation failed with diagnostics");
    return Err(Error::Diagnostic(errors.join("\n")));
  }

  let empty = Map::new();
  let contracts = raw
    .get("contracts")
    .and_then(Value::as_object)
    .unwrap_or(&empty);
  let artifacts: Vec<CompilationArtifact> = contracts
    .iter()
    .filter_map(|(source_name, per_source)| {
      per_source.as_object().map(|per_source| (source_name, per_source))
    })
    .flat_map(|(source_name, per_source)| {
      per_source
        .iter()
        .map(move |(contract_name, contract)| artifact(source_name, contract_name, contract))
    })
    .collect();

  if artifacts.is_empty() {
    return Err(Error::NoArtifacts);
  }

  debug!(
    artifacts = artifacts.len(),
    warnings = warnings.len(),
    "normalised compiler output"
  );
  Ok(CompilationResult {
    artifacts,
    warnings,
    source_version: source_version.to_string(),
    original_sources,
  })
}
