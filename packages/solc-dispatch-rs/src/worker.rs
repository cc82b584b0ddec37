use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use dashmap::DashSet;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace};

use crate::engine::EngineCache;
use crate::internal::errors::{poisoned, Error, Result};

/// Outbound boundary message: one compile job for the execution unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileRequest {
  pub correlation_id: u64,
  /// Engine version the payload is compiled with.
  pub version: String,
  /// Serialised standard-JSON input.
  pub input_payload: String,
}

/// Inbound boundary message: the engine's serialised output, or why there is none.
#[derive(Debug)]
pub struct CompileResponse {
  pub correlation_id: u64,
  pub result: Result<String>,
}

/// Anything a [`crate::Multiplexer`] can push requests into.
pub trait Outbound: Send + Sync {
  /// Fire-and-forget delivery into the unit.
  fn send(&self, request: CompileRequest) -> Result<()>;

  /// Nobody waits for `correlation_id` any more; the unit may skip it if it has not started.
  fn withdraw(&self, _correlation_id: u64) {}

  /// Release the unit. No further requests are accepted afterwards.
  fn terminate(&self);
}

/// A dedicated OS thread that owns engine invocation, so long compiles never block the caller's
/// runtime. Requests are processed one at a time in arrival order; responses stream back through
/// the receiver returned by [`ExecutionUnit::spawn`].
pub struct ExecutionUnit {
  name: String,
  sender: Mutex<Option<UnboundedSender<CompileRequest>>>,
  withdrawn: Arc<DashSet<u64>>,
  thread: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionUnit {
  pub fn spawn(
    name: &str,
    cache: Arc<EngineCache>,
  ) -> Result<(Self, UnboundedReceiver<CompileResponse>)> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let withdrawn = Arc::new(DashSet::new());
    let worker = Worker {
      name: name.to_string(),
      cache,
      withdrawn: Arc::clone(&withdrawn),
    };
    let handle = thread::Builder::new()
      .name(worker.name.clone())
      .spawn(move || worker.run(request_rx, response_tx))
      .map_err(|err| Error::Transport(format!("Failed to spawn compiler worker: {err}")))?;

    let unit = Self {
      name: name.to_string(),
      sender: Mutex::new(Some(request_tx)),
      withdrawn,
      thread: Mutex::new(Some(handle)),
    };
    Ok((unit, response_rx))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_terminated(&self) -> bool {
    self
      .sender
      .lock()
      .map(|sender| sender.as_ref().map_or(true, |tx| tx.is_closed()))
      .unwrap_or(true)
  }
}

impl Outbound for ExecutionUnit {
  fn send(&self, request: CompileRequest) -> Result<()> {
    let guard = self
      .sender
      .lock()
      .map_err(|err| poisoned("compiler worker", err))?;
    let sender = guard
      .as_ref()
      .ok_or_else(|| Error::Transport("compiler worker has been terminated".into()))?;
    sender
      .send(request)
      .map_err(|_| Error::Transport("compiler worker exited".into()))
  }

  fn withdraw(&self, correlation_id: u64) {
    self.withdrawn.insert(correlation_id);
  }

  fn terminate(&self) {
    // Dropping the sender ends the worker loop once the job in flight (if any) returns.
    if let Ok(mut sender) = self.sender.lock() {
      sender.take();
    }
    if let Ok(mut thread) = self.thread.lock() {
      if thread.take().is_some() {
        debug!(worker = %self.name, "compiler worker detached");
      }
    }
  }
}

impl Drop for ExecutionUnit {
  fn drop(&mut self) {
    self.terminate();
  }
}

struct Worker {
  name: String,
  cache: Arc<EngineCache>,
  withdrawn: Arc<DashSet<u64>>,
}

impl Worker {
  fn run(
    self,
    mut requests: UnboundedReceiver<CompileRequest>,
    responses: UnboundedSender<CompileResponse>,
  ) {
    let name = &self.name;
    info!(worker = %name, "compiler worker started");
    while let Some(request) = requests.blocking_recv() {
      let correlation_id = request.correlation_id;
      if self.withdrawn.remove(&correlation_id).is_some() {
        trace!(worker = %name, correlation_id, "skipping withdrawn request");
        continue;
      }

      trace!(worker = %name, correlation_id, version = %request.version, "compiling");
      let result = self
        .cache
        .get_or_load(&request.version)
        .and_then(|engine| engine.compile(&request.input_payload));
      // A withdrawal that raced the compile; the multiplexer drops this response.
      self.withdrawn.remove(&correlation_id);

      if responses
        .send(CompileResponse {
          correlation_id,
          result,
        })
        .is_err()
      {
        break;
      }
    }
    info!(worker = %name, "compiler worker stopped");
  }
}
