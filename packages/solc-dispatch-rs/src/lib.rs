//! Worker-backed Solidity compilation.
//!
//! Callers hand sources and settings to a [`Compiler`]; the compiler builds standard-JSON input,
//! tags it with a correlation id and passes it to a dedicated execution unit that runs the
//! versioned engine off the caller's runtime. Raw engine output is normalised into a
//! [`CompilationResult`], or into one [`Error`] describing why there is none.
//!
//! ```no_run
//! use solc_dispatch_rs::{Compiler, CompilerSettings, Source, Sources};
//!
//! # async fn run() -> solc_dispatch_rs::Result<()> {
//! let compiler = Compiler::new(None);
//! let sources = Sources::from([("A.sol".to_string(), Source::new("contract A {}"))]);
//! let result = compiler.compile(sources, CompilerSettings::new("0.8.26")).await?;
//! assert_eq!(result.artifacts[0].contract_name, "A");
//! # Ok(())
//! # }
//! ```

mod compiler;
mod engine;
mod internal;
mod multiplexer;
mod sources;
mod worker;

pub use compiler::{
  normalize, normalize_value, CompilationArtifact, CompilationResult, CompileJob, Compiler,
  EngineInput, Source, Sources,
};
pub use engine::{Engine, EngineCache, EngineHandle, EngineLoader, SolcEngine, SvmLoader};
pub use internal::config::{CompilerConfig, CompilerConfigOptions};
pub use internal::errors::{Error, Result};
pub use internal::settings::CompilerSettings;
pub use internal::solc::{parse_version, release_url};
pub use multiplexer::{Multiplexer, PendingCompile};
pub use sources::{import_paths, unresolved_imports, validate_sources};
pub use worker::{CompileRequest, CompileResponse, ExecutionUnit, Outbound};
