use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::compiler::Sources;
use crate::internal::errors::{Error, Result};

static IMPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?m)^\s*import\s+(?:[^;"']*?\bfrom\s+)?["']([^"']+)["']"#)
    .expect("import pattern is valid")
});

/// Reject source maps the engine could never compile: no entries, or blank source names.
pub fn validate_sources(sources: &Sources) -> Result<()> {
  if sources.is_empty() {
    return Err(Error::InvalidInput("at least one source is required".into()));
  }
  if sources.keys().any(|name| name.trim().is_empty()) {
    return Err(Error::InvalidInput("source names must not be empty".into()));
  }
  Ok(())
}

/// Paths named by `import` directives, in order of appearance.
pub fn import_paths(content: &str) -> Vec<String> {
  IMPORT_PATTERN
    .captures_iter(content)
    .filter_map(|captures| captures.get(1))
    .map(|path| path.as_str().to_string())
    .collect()
}

/// Imports that name a file not among `sources`. Relative imports are matched by file name only;
/// the engine remains the authority on resolution.
pub fn unresolved_imports(sources: &Sources) -> Vec<(String, String)> {
  let mut missing = Vec::new();
  for (name, source) in sources {
    for path in import_paths(&source.content) {
      let file = path.rsplit('/').next().unwrap_or(path.as_str());
      let known = sources
        .keys()
        .any(|candidate| candidate == &path || candidate.rsplit('/').next() == Some(file));
      if !known {
        missing.push((name.clone(), path));
      }
    }
  }
  missing
}

pub(crate) fn warn_unresolved_imports(sources: &Sources) {
  for (source, path) in unresolved_imports(sources) {
    warn!(%source, import = %path, "import not among submitted sources");
  }
}
