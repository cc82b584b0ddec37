use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{EngineCache, EngineLoader, SvmLoader};
use crate::internal::config::{CompilerConfig, CompilerConfigOptions};
use crate::internal::errors::{poisoned, Error, Result};
use crate::internal::settings::CompilerSettings;
use crate::multiplexer::{Multiplexer, PendingCompile};
use crate::sources::{validate_sources, warn_unresolved_imports};
pub use input::{EngineInput, Source, Sources};
pub use output::{normalize, normalize_value, CompilationArtifact, CompilationResult};

mod input;
pub mod output;

/// Single entry point for compiling Solidity.
///
/// The compiler owns one execution unit, spawned lazily on the first compile and reused for every
/// call after that, so the cost of loading an engine is paid once. Engines come from an
/// [`EngineCache`]; by default the process-wide cache is shared between compilers.
///
/// Any number of compiles may be in flight at once. Each resolves independently, so a small
/// source submitted late can finish before a large one submitted early.
pub struct Compiler {
  config: CompilerConfig,
  cache: Arc<EngineCache>,
  unit: Mutex<Option<Arc<Multiplexer>>>,
}

impl Compiler {
  /// Create a compiler backed by svm-managed `solc` binaries. Offline compilers get a private
  /// cache that never downloads.
  pub fn new(options: Option<CompilerConfigOptions>) -> Self {
    let config = CompilerConfig::from_options(options);
    let cache = if config.offline {
      Arc::new(EngineCache::new(Arc::new(SvmLoader::new(true))))
    } else {
      EngineCache::shared()
    };
    Self::from_parts(config, cache)
  }

  /// Create a compiler whose engines come from `loader`, cached privately.
  pub fn with_loader(
    loader: Arc<dyn EngineLoader>,
    options: Option<CompilerConfigOptions>,
  ) -> Self {
    Self::with_cache(Arc::new(EngineCache::new(loader)), options)
  }

  pub fn with_cache(cache: Arc<EngineCache>, options: Option<CompilerConfigOptions>) -> Self {
    Self::from_parts(CompilerConfig::from_options(options), cache)
  }

  fn from_parts(config: CompilerConfig, cache: Arc<EngineCache>) -> Self {
    Self {
      config,
      cache,
      unit: Mutex::new(None),
    }
  }

  pub fn config(&self) -> &CompilerConfig {
    &self.config
  }

  /// Compile `sources` with `settings`. Fails with the first error along the way; no partial
  /// results are returned. Warnings ride along on success.
  pub async fn compile(
    &self,
    sources: Sources,
    settings: CompilerSettings,
  ) -> Result<CompilationResult> {
    self.submit(sources, settings)?.outcome().await
  }

  /// Dispatch a compile and return a handle that can be cancelled before it completes. Must be
  /// called from within a Tokio runtime.
  pub fn submit(&self, sources: Sources, settings: CompilerSettings) -> Result<CompileJob> {
    validate_sources(&sources)?;
    settings.validate()?;
    warn_unresolved_imports(&sources);

    let payload = EngineInput::build(&sources, &settings).to_payload()?;
    let unit = self.unit()?;
    let pending = unit.submit(&settings.version, payload)?;
    debug!(
      correlation_id = pending.id(),
      version = %settings.version,
      sources = sources.len(),
      "compile dispatched"
    );

    let timeout = self.config.request_timeout;
    Ok(CompileJob {
      pending,
      unit,
      timeout,
      deadline: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
      version: settings.version,
      sources,
    })
  }

  /// Load `version` into the engine cache without compiling anything.
  pub async fn preload(&self, version: &str) -> Result<()> {
    let cache = Arc::clone(&self.cache);
    let version = version.to_string();
    tokio::task::spawn_blocking(move || cache.get_or_load(&version).map(|_| ()))
      .await
      .map_err(|err| Error::Transport(format!("engine preload task failed: {err}")))?
  }

  pub async fn preload_default(&self) -> Result<()> {
    self.preload(&self.config.default_version).await
  }

  /// Versions that can be loaded without fetching.
  pub fn installed_versions(&self) -> Vec<String> {
    self.cache.loader().installed_versions()
  }

  /// Versions already loaded into this compiler's engine cache.
  pub fn loaded_versions(&self) -> Vec<String> {
    self.cache.loaded_versions()
  }

  /// Tear down the execution unit. Outstanding compiles fail with [`Error::Terminated`]; the next
  /// compile spawns a fresh unit.
  pub fn terminate(&self) {
    let unit = match self.unit.lock() {
      Ok(mut guard) => guard.take(),
      Err(poisoned_guard) => poisoned_guard.into_inner().take(),
    };
    if let Some(mux) = unit {
      info!(worker = %self.config.worker_name, "terminating compiler worker");
      mux.terminate();
    }
  }

  /// The live execution unit, spawned on first use or after the previous one went away. The lock
  /// is held across creation so concurrent first calls share one unit.
  fn unit(&self) -> Result<Arc<Multiplexer>> {
    let mut guard = self
      .unit
      .lock()
      .map_err(|err| poisoned("compiler worker", err))?;
    if let Some(mux) = guard.as_ref().filter(|mux| !mux.is_closed()) {
      return Ok(Arc::clone(mux));
    }

    let mux = Multiplexer::spawn_unit(&self.config.worker_name, Arc::clone(&self.cache))?;
    info!(worker = %self.config.worker_name, "compiler worker spawned");
    *guard = Some(Arc::clone(&mux));
    Ok(mux)
  }
}

impl Drop for Compiler {
  fn drop(&mut self) {
    self.terminate();
  }
}

/// One dispatched compile. Its deadline runs from dispatch, not from the first await.
pub struct CompileJob {
  pending: PendingCompile,
  unit: Arc<Multiplexer>,
  timeout: Option<Duration>,
  deadline: Option<Instant>,
  version: String,
  sources: Sources,
}

impl CompileJob {
  pub fn id(&self) -> u64 {
    self.pending.id()
  }

  /// Reject the job with [`Error::Cancelled`] without waiting for the engine.
  pub fn cancel(&self) -> bool {
    self.pending.cancel()
  }

  /// Wait for the engine and normalise its output.
  ///
  /// A timeout also retires the execution unit: it runs one request at a time, so a stuck engine
  /// would stall every later compile. Other requests still outstanding on that unit fail with
  /// [`Error::Terminated`] and the next compile spawns a fresh unit.
  pub async fn outcome(self) -> Result<CompilationResult> {
    let CompileJob {
      pending,
      unit,
      timeout,
      deadline,
      version,
      sources,
    } = self;
    let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
    match pending.wait(remaining).await {
      Ok(raw) => normalize(&raw, &version, sources),
      Err(Error::Timeout { id, after }) => {
        warn!(correlation_id = id, "retiring compiler worker after request timeout");
        unit.terminate();
        Err(Error::Timeout {
          id,
          after: timeout.unwrap_or(after),
        })
      }
      Err(err) => Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Barrier;
  use std::thread;

  use serde_json::{json, Value};

  use super::*;
  use crate::engine::{Engine, EngineHandle};

  /// Answers every input with one contract per source, named after the file stem.
  struct StubEngine {
    version: String,
    delay: Duration,
  }

  impl Engine for StubEngine {
    fn version(&self) -> &str {
      &self.version
    }

    fn compile(&self, input: &str) -> Result<String> {
      thread::sleep(self.delay);
      let input: Value = serde_json::from_str(input).expect("engine input");
      let mut contracts = serde_json::Map::new();
      for name in input["sources"].as_object().expect("sources").keys() {
        let stem = name.trim_end_matches(".sol").to_string();
        contracts.insert(
          name.clone(),
          json!({ stem: { "abi": [], "evm": { "bytecode": { "object": "6080" } } } }),
        );
      }
      Ok(json!({ "contracts": contracts }).to_string())
    }
  }

  #[derive(Default)]
  struct StubLoader {
    loads: AtomicUsize,
  }

  impl EngineLoader for StubLoader {
    fn load(&self, version: &str) -> Result<EngineHandle> {
      self.loads.fetch_add(1, Ordering::SeqCst);
      if version == "0.0.99" {
        return Err(Error::engine_load(version, "unknown release"));
      }
      let delay = match version {
        "slow" => Duration::from_millis(300),
        "hung" => Duration::from_secs(2),
        _ => Duration::ZERO,
      };
      Ok(Arc::new(StubEngine {
        version: version.to_string(),
        delay,
      }))
    }
  }

  fn sources(name: &str) -> Sources {
    Sources::from([(name.to_string(), Source::new("contract X {}"))])
  }

  #[tokio::test]
  async fn compiles_through_a_single_lazily_spawned_unit() {
    let loader = Arc::new(StubLoader::default());
    let compiler = Compiler::with_loader(loader.clone(), None);
    assert!(compiler.unit.lock().unwrap().is_none());

    let first = compiler
      .compile(sources("A.sol"), CompilerSettings::new("0.8.26"))
      .await
      .expect("first");
    let unit = compiler.unit.lock().unwrap().clone().expect("unit");
    let second = compiler
      .compile(sources("B.sol"), CompilerSettings::new("0.8.26"))
      .await
      .expect("second");

    assert_eq!(first.artifacts[0].contract_name, "A");
    assert_eq!(second.artifacts[0].contract_name, "B");
    assert!(Arc::ptr_eq(
      &unit,
      compiler.unit.lock().unwrap().as_ref().expect("unit")
    ));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(compiler.loaded_versions(), vec!["0.8.26"]);
  }

  #[tokio::test]
  async fn invalid_input_never_reaches_the_unit() {
    let compiler = Compiler::with_loader(Arc::new(StubLoader::default()), None);
    let err = compiler
      .compile(Sources::new(), CompilerSettings::new("0.8.26"))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(compiler.unit.lock().unwrap().is_none());
  }

  #[tokio::test]
  async fn unknown_versions_surface_as_engine_load_errors() {
    let compiler = Compiler::with_loader(Arc::new(StubLoader::default()), None);
    match compiler
      .compile(sources("A.sol"), CompilerSettings::new("0.0.99"))
      .await
    {
      Err(Error::EngineLoad { version, .. }) => assert_eq!(version, "0.0.99"),
      other => panic!("unexpected outcome: {other:?}"),
    }
  }

  #[tokio::test]
  async fn jobs_time_out_with_the_configured_deadline() {
    let compiler = Compiler::with_loader(
      Arc::new(StubLoader::default()),
      Some(CompilerConfigOptions {
        request_timeout: Some(Some(Duration::from_millis(20))),
        ..Default::default()
      }),
    );
    let err = compiler
      .compile(sources("A.sol"), CompilerSettings::new("slow"))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
  }

  #[tokio::test]
  async fn a_timed_out_engine_does_not_block_later_compiles() {
    let compiler = Compiler::with_loader(
      Arc::new(StubLoader::default()),
      Some(CompilerConfigOptions {
        request_timeout: Some(Some(Duration::from_millis(200))),
        ..Default::default()
      }),
    );
    let hung = compiler
      .submit(sources("Hung.sol"), CompilerSettings::new("hung"))
      .expect("submit hung");
    let stuck_unit = Arc::clone(&hung.unit);

    let err = hung.outcome().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { after, .. } if after == Duration::from_millis(200)));
    assert!(stuck_unit.is_closed());

    let result = compiler
      .compile(sources("Fast.sol"), CompilerSettings::new("0.8.26"))
      .await
      .expect("fresh unit compiles");
    assert_eq!(result.artifacts[0].contract_name, "Fast");
  }

  #[tokio::test]
  async fn the_deadline_starts_at_dispatch() {
    let compiler = Compiler::with_loader(
      Arc::new(StubLoader::default()),
      Some(CompilerConfigOptions {
        request_timeout: Some(Some(Duration::from_millis(100))),
        ..Default::default()
      }),
    );
    let job = compiler
      .submit(sources("A.sol"), CompilerSettings::new("slow"))
      .expect("submit");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let waited_from = Instant::now();
    let err = job.outcome().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { after, .. } if after == Duration::from_millis(100)));
    assert!(waited_from.elapsed() < Duration::from_millis(80));
  }

  #[tokio::test]
  async fn ids_stay_unique_across_respawned_units() {
    let compiler = Compiler::with_loader(Arc::new(StubLoader::default()), None);
    let first = compiler
      .submit(sources("A.sol"), CompilerSettings::new("slow"))
      .expect("submit");
    let first_id = first.id();
    compiler.terminate();
    assert!(matches!(first.outcome().await, Err(Error::Terminated { id }) if id == first_id));

    let second = compiler
      .submit(sources("B.sol"), CompilerSettings::new("0.8.26"))
      .expect("submit after respawn");
    assert_ne!(second.id(), first_id);
    second.outcome().await.expect("compile");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn concurrent_first_calls_share_one_unit() {
    let compiler = Arc::new(Compiler::with_loader(Arc::new(StubLoader::default()), None));
    let runtime = tokio::runtime::Handle::current();
    let barrier = Arc::new(Barrier::new(8));

    let threads: Vec<_> = (0..8)
      .map(|index| {
        let compiler = Arc::clone(&compiler);
        let runtime = runtime.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
          let _entered = runtime.enter();
          barrier.wait();
          compiler
            .submit(sources(&format!("C{index}.sol")), CompilerSettings::new("0.8.26"))
            .expect("submit")
        })
      })
      .collect();
    let jobs: Vec<CompileJob> = threads
      .into_iter()
      .map(|handle| handle.join().expect("submitting thread"))
      .collect();

    let unit = compiler.unit.lock().unwrap().clone().expect("unit");
    assert!(jobs.iter().all(|job| Arc::ptr_eq(&job.unit, &unit)));
    for job in jobs {
      job.outcome().await.expect("compile");
    }
  }

  #[tokio::test]
  async fn cancelled_jobs_reject_immediately() {
    let compiler = Compiler::with_loader(Arc::new(StubLoader::default()), None);
    let job = compiler
      .submit(sources("A.sol"), CompilerSettings::new("slow"))
      .expect("submit");
    assert!(job.cancel());
    assert!(matches!(job.outcome().await, Err(Error::Cancelled { .. })));
  }

  #[tokio::test]
  async fn terminate_rejects_in_flight_jobs_and_respawns_lazily() {
    let compiler = Compiler::with_loader(Arc::new(StubLoader::default()), None);
    let job = compiler
      .submit(sources("A.sol"), CompilerSettings::new("slow"))
      .expect("submit");

    compiler.terminate();
    assert!(matches!(job.outcome().await, Err(Error::Terminated { .. })));
    assert!(compiler.unit.lock().unwrap().is_none());

    let result = compiler
      .compile(sources("B.sol"), CompilerSettings::new("0.8.26"))
      .await
      .expect("fresh unit compiles");
    assert_eq!(result.artifacts[0].contract_name, "B");
  }

  #[tokio::test]
  async fn preload_warms_the_cache_once() {
    let loader = Arc::new(StubLoader::default());
    let compiler = Compiler::with_loader(
      loader.clone(),
      Some(CompilerConfigOptions {
        default_version: Some("0.8.24".into()),
        ..Default::default()
      }),
    );
    compiler.preload_default().await.expect("preload");
    compiler.preload("0.8.24").await.expect("preload again");
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert!(matches!(
      compiler.preload("0.0.99").await,
      Err(Error::EngineLoad { .. })
    ));
  }
}
