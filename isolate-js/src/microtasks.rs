//! Native microtasks and the microtask checkpoint.

use std::collections::VecDeque;

use crate::gateway::AccessMethod;
use crate::try_catch::TrapKind;
use crate::BridgeError;
use crate::Isolate;

/// A native microtask.
pub type Microtask = Box<dyn FnOnce(&Isolate)>;

/// A FIFO list of native microtasks.
#[derive(Default)]
pub struct MicrotaskQueue {
  queue: VecDeque<Microtask>,
}

impl MicrotaskQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enqueue(&mut self, task: Microtask) {
    self.queue.push_back(task);
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  /// Takes every queued task, leaving the queue empty for tasks enqueued while they run.
  pub fn take(&mut self) -> VecDeque<Microtask> {
    std::mem::take(&mut self.queue)
  }

  pub fn clear(&mut self) {
    self.queue.clear();
  }
}

impl Isolate {
  pub fn enqueue_microtask(&self, task: impl FnOnce(&Isolate) + 'static) {
    self.microtasks.borrow_mut().enqueue(Box::new(task));
  }

  pub fn pending_microtasks(&self) -> usize {
    self.microtasks.borrow().len()
  }

  /// Runs one checkpoint: every native microtask queued before the call, in order, then the
  /// managed runtime's own queue.
  ///
  /// Tasks enqueued while the checkpoint runs wait for the next checkpoint. An exception left
  /// pending by the managed drain is reported as uncaught.
  pub fn run_microtasks(&self) -> Result<(), BridgeError> {
    let _trap = self.push_trap(TrapKind::Dummy);
    let tasks = self.microtasks.borrow_mut().take();
    tracing::trace!(count = tasks.len(), "running native microtasks");
    for task in tasks {
      task(self);
    }
    self.call_void(AccessMethod::IsolateRunMicrotasks, &[])?;
    if self.has_pending_exception() {
      self.report_uncaught_exception()?;
    }
    Ok(())
  }
}
