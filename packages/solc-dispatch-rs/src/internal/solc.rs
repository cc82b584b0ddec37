use std::sync::{Mutex, OnceLock};

use foundry_compilers::solc::Solc;
use semver::{BuildMetadata, Version};
use tracing::info;

use super::errors::{poisoned, Error, Result};

pub(crate) const DEFAULT_SOLC_VERSION: &str = "0.8.30";

const RELEASE_BASE_URL: &str = "https://binaries.soliditylang.org/bin";

/// Strip the decorations users copy from release listings (`v`, `soljson-`, `.js`) and return the
/// bare version text, build metadata included.
fn bare_version(version: &str) -> &str {
  let trimmed = version.trim();
  let trimmed = trimmed.strip_prefix("soljson-").unwrap_or(trimmed);
  let trimmed = trimmed.strip_suffix(".js").unwrap_or(trimmed);
  trimmed.trim_start_matches('v')
}

/// Parse a solc version string such as `0.8.26`, `v0.8.26` or `0.8.26+commit.8a97fa7a`. Build
/// metadata is dropped because installations are keyed by the release triple.
pub fn parse_version(version: &str) -> Result<Version> {
  let mut parsed = Version::parse(bare_version(version))
    .map_err(|err| Error::engine_load(version, format!("invalid version string ({err})")))?;
  parsed.build = BuildMetadata::EMPTY;
  Ok(parsed)
}

/// Deterministic fetch location of the soljson release for `version`.
pub fn release_url(version: &str) -> Result<String> {
  parse_version(version)?;
  Ok(format!("{RELEASE_BASE_URL}/soljson-v{}.js", bare_version(version)))
}

pub(crate) fn find_installed_version(version: &Version) -> Result<Option<Solc>> {
  Solc::find_svm_installed_version(version).map_err(|err| {
    Error::engine_load(
      version.to_string(),
      format!("failed to inspect installed solc versions: {err}"),
    )
  })
}

pub(crate) fn installed_versions() -> Vec<Version> {
  Solc::installed_versions()
}

fn install_mutex() -> &'static Mutex<()> {
  static INSTALL_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
  INSTALL_MUTEX.get_or_init(|| Mutex::new(()))
}

/// Return the installed binary for `version`, downloading it first unless `offline`. Downloads
/// are serialised process-wide since they share the svm data directory.
pub(crate) fn ensure_installed(version: &Version, offline: bool) -> Result<Solc> {
  if let Some(solc) = find_installed_version(version)? {
    return Ok(solc);
  }
  if offline {
    return Err(Error::engine_load(
      version.to_string(),
      "not installed and offline mode is enabled",
    ));
  }

  let _guard = install_mutex()
    .lock()
    .map_err(|err| poisoned("solc install", err))?;

  if let Some(solc) = find_installed_version(version)? {
    return Ok(solc);
  }
  info!(%version, "installing solc");
  Solc::blocking_install(version).map_err(|err| Error::engine_load(version.to_string(), err))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_decorated_versions() {
    assert_eq!(parse_version("0.8.26").unwrap(), Version::new(0, 8, 26));
    assert_eq!(parse_version(" v0.8.26 ").unwrap(), Version::new(0, 8, 26));
    assert_eq!(
      parse_version("0.8.26+commit.8a97fa7a").unwrap(),
      Version::new(0, 8, 26)
    );
    assert_eq!(
      parse_version("soljson-v0.8.19+commit.7dd6d404.js").unwrap(),
      Version::new(0, 8, 19)
    );
  }

  #[test]
  fn unparseable_versions_name_the_request() {
    let err = parse_version("latest-and-greatest").unwrap_err();
    match err {
      Error::EngineLoad { version, .. } => assert_eq!(version, "latest-and-greatest"),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn release_url_keeps_commit_metadata() {
    assert_eq!(
      release_url("0.8.26+commit.8a97fa7a").unwrap(),
      "https://binaries.soliditylang.org/bin/soljson-v0.8.26+commit.8a97fa7a.js"
    );
    assert_eq!(
      release_url("v0.8.30").unwrap(),
      "https://binaries.soliditylang.org/bin/soljson-v0.8.30.js"
    );
    assert!(release_url("nope").is_err());
  }

  #[test]
  fn default_version_parses() {
    assert_eq!(parse_version(DEFAULT_SOLC_VERSION).unwrap(), Version::new(0, 8, 30));
  }
}
