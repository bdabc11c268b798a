//! FIFO operation queue with a single in-flight slot.
//!
//! The queue owns the invariant that at most one request is ever outstanding
//! against the transport. It is touched only from the driver task; callers
//! reach it through the command channel.

use std::collections::VecDeque;

use crate::continuation::Continuation;
use crate::error::{LinkError, Result};
use crate::protocol::{GattStatus, Service};
use crate::transport::GattTransport;

// ----------------------------------------------------------------------------
// Operation Outcomes
// ----------------------------------------------------------------------------

/// Untyped payload of a completed operation; the facade converts it back to
/// the caller-visible type
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OpOutput {
    Done,
    Value(Vec<u8>),
    Mtu(u16),
    Services(Vec<Service>),
}

/// State a start closure may touch: the transport itself plus the shadow
/// copy kept for in-flight reliable writes. The shadow is stashed at start
/// time, not enqueue time, so a reliable write queued behind another cannot
/// clobber the one in flight.
pub(crate) struct OpContext<'a> {
    pub transport: &'a mut dyn GattTransport,
    pub reliable_shadow: &'a mut Option<Vec<u8>>,
}

pub(crate) type StartFn = Box<dyn FnOnce(&mut OpContext<'_>) -> bool + Send>;
type FinishFn = Box<dyn FnOnce(Result<OpOutput>) + Send>;

// ----------------------------------------------------------------------------
// Work Item
// ----------------------------------------------------------------------------

/// One queued transport request plus its completion handle
pub(crate) struct WorkItem {
    tag: &'static str,
    start: Option<StartFn>,
    finish: Option<FinishFn>,
}

impl WorkItem {
    pub fn new<T: Send + 'static>(
        tag: &'static str,
        continuation: Continuation<T>,
        convert: impl FnOnce(OpOutput) -> T + Send + 'static,
        start: impl FnOnce(&mut OpContext<'_>) -> bool + Send + 'static,
    ) -> Self {
        Self {
            tag,
            start: Some(Box::new(start)),
            finish: Some(Box::new(move |result| {
                continuation.finish(result.map(convert));
            })),
        }
    }

    /// Build an item whose outcome is delivered to a raw sink instead of a
    /// typed continuation (used for retained reconnect handlers)
    pub fn with_sink(
        tag: &'static str,
        sink: impl FnOnce(Result<OpOutput>) + Send + 'static,
        start: impl FnOnce(&mut OpContext<'_>) -> bool + Send + 'static,
    ) -> Self {
        Self {
            tag,
            start: Some(Box::new(start)),
            finish: Some(Box::new(sink)),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    fn begin(&mut self, ctx: &mut OpContext<'_>) -> bool {
        let start = self.start.take().expect("work item started twice");
        start(ctx)
    }

    pub fn finish(mut self, result: Result<OpOutput>) {
        if let Some(finish) = self.finish.take() {
            finish(result);
        }
    }
}

impl core::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkItem").field("tag", &self.tag).finish()
    }
}

// ----------------------------------------------------------------------------
// Operation Queue
// ----------------------------------------------------------------------------

/// FIFO of work items with a single `current` slot
#[derive(Debug, Default)]
pub(crate) struct OpQueue {
    current: Option<WorkItem>,
    pending: VecDeque<WorkItem>,
}

impl OpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items queued or in flight
    pub fn outstanding(&self) -> usize {
        usize::from(self.current.is_some()) + self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    pub fn current_tag(&self) -> Option<&'static str> {
        self.current.as_ref().map(WorkItem::tag)
    }

    /// Append an item; starts it immediately when nothing is in flight
    pub fn enqueue(&mut self, item: WorkItem, ctx: &mut OpContext<'_>) {
        tracing::debug!(tag = item.tag(), pending = self.pending.len(), "operation enqueued");
        self.pending.push_back(item);
        if self.current.is_none() {
            self.start_next(ctx);
        }
    }

    /// Pop pending items until one is accepted by the transport. Items the
    /// transport refuses to issue fail with `IssueFailed` and the queue
    /// keeps advancing.
    fn start_next(&mut self, ctx: &mut OpContext<'_>) {
        debug_assert!(
            self.current.is_none(),
            "start attempted while an operation is outstanding"
        );
        while let Some(mut item) = self.pending.pop_front() {
            let tag = item.tag();
            tracing::debug!(tag, "starting operation");
            if item.begin(ctx) {
                self.current = Some(item);
                return;
            }
            tracing::warn!(tag, "transport refused issuance");
            item.finish(Err(LinkError::IssueFailed { tag }));
        }
    }

    /// Resolve the current operation with a transport status and advance.
    ///
    /// The next pending item is started *before* the finished item's
    /// continuation runs, so a callback that immediately enqueues new work
    /// observes a queue already primed for it. A completion with nothing
    /// outstanding is a protocol violation surfaced to the caller of this
    /// method, never silently accepted.
    pub fn complete(
        &mut self,
        event: &'static str,
        status: GattStatus,
        output: OpOutput,
        ctx: &mut OpContext<'_>,
    ) -> Result<()> {
        let Some(item) = self.current.take() else {
            return Err(LinkError::ProtocolViolation { event });
        };
        self.start_next(ctx);
        let tag = item.tag();
        match LinkError::check(tag, status) {
            Ok(()) => item.finish(Ok(output)),
            Err(err) => item.finish(Err(err)),
        }
        Ok(())
    }

    /// Fail the current operation with a synthesized error and advance,
    /// same ordering discipline as [`OpQueue::complete`]
    pub fn fail_current(
        &mut self,
        event: &'static str,
        error: LinkError,
        ctx: &mut OpContext<'_>,
    ) -> Result<()> {
        let Some(item) = self.current.take() else {
            return Err(LinkError::ProtocolViolation { event });
        };
        self.start_next(ctx);
        item.finish(Err(error));
        Ok(())
    }

    /// Remove the current item without starting the next one. Used when the
    /// driver must resolve the item against state of its own (a requested
    /// disconnect) before draining the rest.
    pub fn take_current(&mut self) -> Option<WorkItem> {
        self.current.take()
    }

    /// Fail everything outstanding, current first then pending in FIFO
    /// order. Returns how many items were failed.
    pub fn drain(&mut self, error: LinkError) -> usize {
        let mut failed = 0;
        if let Some(item) = self.current.take() {
            tracing::debug!(tag = item.tag(), "draining in-flight operation");
            item.finish(Err(error.clone()));
            failed += 1;
        }
        while let Some(item) = self.pending.pop_front() {
            tracing::debug!(tag = item.tag(), "draining pending operation");
            item.finish(Err(error.clone()));
            failed += 1;
        }
        failed
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
