use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::{EngineHandle, EngineLoader, SvmLoader};
use crate::internal::errors::Result;

/// Version string -> loaded engine. Entries are created on the first request for a version and
/// kept for the lifetime of the cache; engines are stateless once loaded.
///
/// Each version owns a single-flight slot: concurrent first requests for the same version block on
/// one load instead of fetching twice. A failed load leaves the slot empty so a later call can try
/// again.
pub struct EngineCache {
  loader: Arc<dyn EngineLoader>,
  slots: DashMap<String, Arc<OnceCell<EngineHandle>>>,
}

impl EngineCache {
  pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
    Self {
      loader,
      slots: DashMap::new(),
    }
  }

  /// Process-wide cache backed by an online [`SvmLoader`].
  pub fn shared() -> Arc<EngineCache> {
    static SHARED: OnceLock<Arc<EngineCache>> = OnceLock::new();
    SHARED
      .get_or_init(|| Arc::new(EngineCache::new(Arc::new(SvmLoader::default()))))
      .clone()
  }

  /// Return the engine for `version`, loading it on first use.
  pub fn get_or_load(&self, version: &str) -> Result<EngineHandle> {
    let key = version.trim();
    // Clone the slot out so the map shard is not locked while loading.
    let slot = Arc::clone(&self.slots.entry(key.to_string()).or_default());

    if let Some(engine) = slot.get() {
      trace!(version = key, "engine cache hit");
      return Ok(Arc::clone(engine));
    }

    slot
      .get_or_try_init(|| {
        debug!(version = key, "loading engine");
        self.loader.load(key).map_err(|err| {
          warn!(version = key, error = %err, "engine load failed");
          err
        })
      })
      .map(Arc::clone)
  }

  pub fn is_loaded(&self, version: &str) -> bool {
    self
      .slots
      .get(version.trim())
      .map(|slot| slot.get().is_some())
      .unwrap_or(false)
  }

  pub fn loaded_versions(&self) -> Vec<String> {
    let mut versions: Vec<String> = self
      .slots
      .iter()
      .filter(|entry| entry.value().get().is_some())
      .map(|entry| entry.key().clone())
      .collect();
    versions.sort();
    versions
  }

  pub fn loader(&self) -> &Arc<dyn EngineLoader> {
    &self.loader
  }
}
