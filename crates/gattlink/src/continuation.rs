//! Single-fire result handles bridging asynchronous completion to either an
//! awaiting task or a registered callback

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::oneshot;

use crate::error::{LinkError, Result};

// ----------------------------------------------------------------------------
// Continuation
// ----------------------------------------------------------------------------

/// Delivers the outcome of one queued operation exactly once.
///
/// The channel flavor feeds an awaiting caller through a oneshot; the
/// callback flavor invokes a handler on the driver task. Resolution consumes
/// the handle, so resolving twice is unrepresentable. If the awaiting side
/// has already given up (timeout drops the receiver), a late resolution is
/// discarded silently.
pub enum Continuation<T> {
    Channel(oneshot::Sender<Result<T>>),
    Callback(Box<dyn FnOnce(Result<T>) + Send + 'static>),
}

impl<T: Send + 'static> Continuation<T> {
    /// Channel flavor; the receiver is awaited by the facade
    pub fn channel() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Continuation::Channel(tx), rx)
    }

    /// Callback flavor; `handler` fires once when the operation resolves
    pub fn callback(handler: impl FnOnce(Result<T>) + Send + 'static) -> Self {
        Continuation::Callback(Box::new(handler))
    }

    pub fn resolve(self, value: T) {
        self.finish(Ok(value));
    }

    pub fn fail(self, error: LinkError) {
        self.finish(Err(error));
    }

    /// Deliver the outcome, consuming the handle
    pub fn finish(self, result: Result<T>) {
        match self {
            Continuation::Channel(tx) => {
                if tx.send(result).is_err() {
                    // Caller timed out or dropped the receiver; absorb.
                    tracing::debug!("late resolution dropped, caller gave up waiting");
                }
            }
            Continuation::Callback(handler) => {
                invoke_guarded("continuation", move || handler(result));
            }
        }
    }
}

impl<T> core::fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Continuation::Channel(_) => f.write_str("Continuation::Channel"),
            Continuation::Callback(_) => f.write_str("Continuation::Callback"),
        }
    }
}

// ----------------------------------------------------------------------------
// Callback Boundary
// ----------------------------------------------------------------------------

/// Run caller-supplied code behind a panic boundary.
///
/// A panicking handler must never unwind into the driver loop; it would
/// corrupt queue ordering or kill the task that every other continuation
/// depends on. The panic is reported and swallowed.
pub(crate) fn invoke_guarded(context: &'static str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .copied()
            .map(str::to_owned)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        tracing::error!(context, %message, "caller callback panicked");
    }
}
