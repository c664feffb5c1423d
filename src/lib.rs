//! Polling contexts for cooperative asynchronous execution.
//!
//! A context is the unit a scheduler deals with for one in-flight asynchronous operation. It
//! owns the operation's private data, a state machine that knows how to advance the operation
//! and complete a future-like value, and a wake callback that event sources use to ask for
//! another poll.
//!
//! There are two flavors:
//!
//! - [`Context<T>`] is generic over its private data `T`. Polling dispatches statically to
//!   [`PollWith::on_poll`], and `T` chooses at compile time whether its value is embedded in the
//!   context ([`Embedded`]) or shared by every clone of it ([`Shared`]).
//! - [`ErasedContext`] is not generic. It holds an opaque pointer and two closures, so contexts
//!   for unrelated operations can live in one collection. [`Context::erase`] produces one from
//!   a typed context.
//!
//! Neither flavor imposes a threading model. Polls of one context must be serialized by the
//! caller, and a context stays on the thread that drives it. Wakes that originate on other
//! threads go through a [`ReadyQueue`], whose handle is `Send + Sync`.
//!
//! [`ContextFuture`] adapts a context to `std::future::Future`, for use under any executor.

mod context;
pub use context::{
    Context, ContextBuilder, ContextId, Embedded, ErasedContext, ErasedPollFn, ErasedWakeFn,
    PollEvent, PollWith, PrivateData, Shared, Storage, WakeFn,
};

mod error;
pub use error::{ContextError, Result};

mod ready;
pub use ready::ReadyQueue;

mod bridge;
pub use bridge::{Completion, ContextFuture};
