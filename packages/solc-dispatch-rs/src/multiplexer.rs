//! Correlation-id request multiplexer.
//!
//! Every dispatched request gets the next id from a process-wide counter, so ids never repeat
//! across multiplexers or respawned units, and a one-shot completion stored under that id.
//! Responses are matched purely by id, so they may arrive in any order. A response whose id has
//! no completion (late, duplicate or unknown) is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::engine::EngineCache;
use crate::internal::errors::{Error, Result};
use crate::worker::{CompileRequest, CompileResponse, ExecutionUnit, Outbound};

type Completion = oneshot::Sender<Result<String>>;

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(0);

pub struct Multiplexer {
  pending: DashMap<u64, Completion>,
  outbound: Box<dyn Outbound>,
  closed: AtomicBool,
  pump: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
  pub fn new(outbound: impl Outbound + 'static) -> Arc<Self> {
    Arc::new(Self {
      pending: DashMap::new(),
      outbound: Box::new(outbound),
      closed: AtomicBool::new(false),
      pump: Mutex::new(None),
    })
  }

  /// Spawn a fresh [`ExecutionUnit`] and subscribe to its responses. Must be called from within a
  /// Tokio runtime.
  pub fn spawn_unit(name: &str, cache: Arc<EngineCache>) -> Result<Arc<Self>> {
    let (unit, inbound) = ExecutionUnit::spawn(name, cache)?;
    let mux = Self::new(unit);
    mux.attach(inbound)?;
    Ok(mux)
  }

  /// Drain `inbound` on a background task, settling completions as responses arrive. When the
  /// stream ends (the unit exited) every outstanding completion is rejected.
  pub fn attach(self: &Arc<Self>, mut inbound: UnboundedReceiver<CompileResponse>) -> Result<()> {
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|err| Error::Transport(format!("compiler worker requires a Tokio runtime: {err}")))?;
    let weak: Weak<Self> = Arc::downgrade(self);
    let task = runtime.spawn(async move {
      while let Some(response) = inbound.recv().await {
        let Some(mux) = weak.upgrade() else {
          return;
        };
        mux.settle(response);
      }
      if let Some(mux) = weak.upgrade() {
        mux.closed.store(true, Ordering::SeqCst);
        mux.fail_all(|_| Error::Transport("compiler worker exited".into()));
      }
    });

    if let Ok(mut pump) = self.pump.lock() {
      if let Some(previous) = pump.replace(task) {
        previous.abort();
      }
    }
    Ok(())
  }

  /// Register a completion under a new correlation id and hand the payload to the unit.
  pub fn submit(self: &Arc<Self>, version: &str, input_payload: String) -> Result<PendingCompile> {
    if self.is_closed() {
      return Err(Error::Transport("compiler worker has been terminated".into()));
    }

    let correlation_id = NEXT_CORRELATION_ID.fetch_add(1, Ordering::SeqCst);
    let (sender, receiver) = oneshot::channel();
    self.pending.insert(correlation_id, sender);

    // A concurrent terminate may have drained the table between the check above and the insert.
    if self.is_closed() {
      self.pending.remove(&correlation_id);
      return Err(Error::Transport("compiler worker has been terminated".into()));
    }

    trace!(correlation_id, version, "dispatching compile request");
    let request = CompileRequest {
      correlation_id,
      version: version.to_string(),
      input_payload,
    };
    if let Err(err) = self.outbound.send(request) {
      self.pending.remove(&correlation_id);
      return Err(err);
    }

    Ok(PendingCompile {
      correlation_id,
      receiver,
      mux: Arc::clone(self),
    })
  }

  /// Submit and wait, applying `timeout` when given.
  pub async fn dispatch(
    self: &Arc<Self>,
    version: &str,
    input_payload: String,
    timeout: Option<Duration>,
  ) -> Result<String> {
    self.submit(version, input_payload)?.wait(timeout).await
  }

  /// Deliver one inbound message. Returns whether a completion was settled.
  pub fn settle(&self, response: CompileResponse) -> bool {
    let CompileResponse {
      correlation_id,
      result,
    } = response;
    match self.pending.remove(&correlation_id) {
      Some((_, completion)) => {
        trace!(correlation_id, ok = result.is_ok(), "settling compile request");
        // The waiter may already be gone; nothing else to notify.
        let _ = completion.send(result);
        true
      }
      None => {
        debug!(correlation_id, "dropping response without a pending request");
        false
      }
    }
  }

  /// Reject a pending request with [`Error::Cancelled`] without waiting for its response.
  pub fn cancel(&self, correlation_id: u64) -> bool {
    match self.pending.remove(&correlation_id) {
      Some((_, completion)) => {
        debug!(correlation_id, "compile request cancelled");
        self.outbound.withdraw(correlation_id);
        let _ = completion.send(Err(Error::Cancelled {
          id: correlation_id,
        }));
        true
      }
      None => false,
    }
  }

  /// Release the execution unit and reject everything outstanding with [`Error::Terminated`].
  pub fn terminate(&self) {
    if self.closed.swap(true, Ordering::SeqCst) {
      return;
    }
    self.outbound.terminate();
    if let Ok(mut pump) = self.pump.lock() {
      if let Some(task) = pump.take() {
        task.abort();
      }
    }
    let rejected = self.fail_all(|id| Error::Terminated { id });
    debug!(rejected, "compiler worker terminated");
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  /// Drop the completion for `correlation_id` and tell the unit it need not run the request.
  fn forget(&self, correlation_id: u64) -> bool {
    let removed = self.pending.remove(&correlation_id).is_some();
    if removed {
      self.outbound.withdraw(correlation_id);
    }
    removed
  }

  fn fail_all(&self, error: impl Fn(u64) -> Error) -> usize {
    let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
    let mut failed = 0;
    for id in ids {
      if let Some((_, completion)) = self.pending.remove(&id) {
        let _ = completion.send(Err(error(id)));
        failed += 1;
      }
    }
    failed
  }
}

/// Caller side of one in-flight request. Dropping it before it settles withdraws the request, so
/// a late response for it is dropped.
pub struct PendingCompile {
  correlation_id: u64,
  receiver: oneshot::Receiver<Result<String>>,
  mux: Arc<Multiplexer>,
}

impl PendingCompile {
  pub fn id(&self) -> u64 {
    self.correlation_id
  }

  pub fn cancel(&self) -> bool {
    self.mux.cancel(self.correlation_id)
  }

  /// Wait for the matching response. On expiry the request is withdrawn and
  /// [`Error::Timeout`] returned.
  pub async fn wait(mut self, timeout: Option<Duration>) -> Result<String> {
    let correlation_id = self.correlation_id;
    let received = match timeout {
      Some(after) => match tokio::time::timeout(after, &mut self.receiver).await {
        Ok(received) => received.map_err(|_| closed(correlation_id)),
        Err(_) => {
          if self.mux.forget(correlation_id) {
            warn!(correlation_id, ?after, "compile request timed out");
            return Err(Error::Timeout {
              id: correlation_id,
              after,
            });
          }
          // Settled right at the deadline; the value is already in the channel.
          self.receiver.try_recv().map_err(|_| closed(correlation_id))
        }
      },
      None => (&mut self.receiver).await.map_err(|_| closed(correlation_id)),
    };
    received?
  }
}

impl Drop for PendingCompile {
  fn drop(&mut self) {
    if self.mux.forget(self.correlation_id) {
      trace!(correlation_id = self.correlation_id, "withdrew unsettled compile request");
    }
  }
}

fn closed(correlation_id: u64) -> Error {
  Error::Transport(format!(
    "response channel for request {correlation_id} closed"
  ))
}
