//! Polling contexts: per-operation private data paired with a wake callback.
//!
//! A [`Context<T>`] owns the private data `T` of one asynchronous operation. Whoever drives the
//! operation calls [`Context::poll`] with a future-like value, which the private data completes
//! once the operation is done. Whoever observes progress (a timer, an I/O completion, a child
//! task) calls [`Context::wake`], which forwards to the installed wake callback so the driver
//! can schedule another poll.
//!
//! # Example
//!
//! ```
//! use poll_context::{Context, Embedded, PollWith, PrivateData};
//!
//! #[derive(Default)]
//! struct Slot {
//!     result: Option<u32>,
//! }
//!
//! #[derive(Clone)]
//! struct Countdown {
//!     remaining: u32,
//! }
//!
//! impl PrivateData for Countdown {
//!     type Storage = Embedded<Self>;
//!
//!     fn on_attach(&mut self, _: &Context<Self>) {}
//! }
//!
//! impl PollWith<Slot> for Countdown {
//!     fn on_poll(&mut self, slot: &mut Slot, cx: &Context<Self>) {
//!         if self.remaining == 0 {
//!             slot.result = Some(42);
//!         } else {
//!             self.remaining -= 1;
//!             cx.wake();
//!         }
//!     }
//! }
//!
//! let cx = Context::new(Countdown { remaining: 2 });
//! let mut slot = Slot::default();
//! while slot.result.is_none() {
//!     cx.poll(&mut slot);
//! }
//! assert_eq!(slot.result, Some(42));
//! ```
//!
//! Heterogeneous operations are handled uniformly through [`ErasedContext`], either built
//! directly from closures or produced from a typed context with [`Context::erase`].
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod storage;
pub use storage::{Embedded, Shared, Storage};

mod typed;
pub use typed::{Context, PollWith, PrivateData, WakeFn};

mod erased;
pub use erased::{ErasedContext, ErasedPollFn, ErasedWakeFn, PollEvent};

mod builder;
pub use builder::ContextBuilder;

/// Process-unique identity of a context instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value of this id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
