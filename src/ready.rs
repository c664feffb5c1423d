//! [`ReadyQueue`] wires wake callbacks into a scheduler's ready list.
//!
//! Contexts themselves are confined to the thread that drives them, but the events that wake
//! them often are not. A [`ReadyQueue`] is a cheap, cloneable, `Send + Sync` handle over a
//! lock-free queue of [`ContextId`]s: the driver installs [`ReadyQueue::wake_fn`] on its
//! contexts and pops ids to decide what to poll next, while other threads call
//! [`ReadyQueue::notify`] directly.
use std::fmt;
use std::sync::Arc;

use concurrent_queue::{ConcurrentQueue, PushError};
use log::warn;

use crate::context::{Context, ContextId, ErasedContext, PrivateData};

/// Shared FIFO of woken context ids.
#[derive(Clone)]
pub struct ReadyQueue {
    queue: Arc<ConcurrentQueue<ContextId>>,
}

impl ReadyQueue {
    /// A queue that never rejects a wake.
    pub fn unbounded() -> Self {
        let queue = ConcurrentQueue::unbounded();
        let queue = Arc::new(queue);
        ReadyQueue { queue }
    }

    /// A queue holding at most `capacity` pending wakes. Wakes past that are dropped.
    ///
    /// ### Panics
    /// If `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        let queue = ConcurrentQueue::bounded(capacity);
        let queue = Arc::new(queue);
        ReadyQueue { queue }
    }

    /// Mark the context `id` as ready. Callable from any thread.
    pub fn notify(&self, id: ContextId) {
        match self.queue.push(id) {
            Ok(()) => {}
            Err(PushError::Full(id)) => {
                warn!("ready queue is full, dropping wake of context {}", id)
            }
            Err(PushError::Closed(id)) => {
                warn!("ready queue is closed, dropping wake of context {}", id)
            }
        }
    }

    /// A wake callback that marks the waking context as ready.
    pub fn wake_fn<T>(&self) -> impl Fn(&Context<T>) + 'static
    where
        T: PrivateData + 'static,
    {
        let ready = self.clone();
        move |cx: &Context<T>| ready.notify(cx.id())
    }

    /// A wake callback that marks the waking erased context as ready.
    pub fn erased_wake_fn(&self) -> impl Fn(&ErasedContext) + 'static {
        let ready = self.clone();
        move |cx: &ErasedContext| ready.notify(cx.id())
    }

    /// The id of the next ready context, oldest first.
    pub fn pop(&self) -> Option<ContextId> {
        self.queue.pop().ok()
    }

    /// Pop ready ids until the queue is empty.
    pub fn drain(&self) -> impl Iterator<Item = ContextId> + '_ {
        std::iter::from_fn(move || self.pop())
    }

    /// Number of wakes waiting to be popped.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when no wake is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Stop accepting wakes. Ids already queued can still be popped.
    ///
    /// Returns false if the queue was already closed.
    pub fn close(&self) -> bool {
        self.queue.close()
    }

    /// Whether [`close`](ReadyQueue::close) was called.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyQueue")
            .field("len", &self.queue.len())
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}
