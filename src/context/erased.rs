//! The type-erased [`ErasedContext`].
//!
//! An [`ErasedContext`] carries no private data type. It stores an opaque pointer and two
//! closures, and the poll closure is the only place where the concrete types come back. That
//! trades the compile time checks of [`Context<T>`] for a single concrete type that a scheduler
//! can keep in one collection, whatever the operations behind it are.
//!
//! The future handed to [`ErasedContext::poll`] reaches the closure as a [`PollEvent`], which
//! remembers the future's type and only gives it back under that type.
use std::any::TypeId;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use log::{trace, warn};

use crate::context::{Context, ContextId, PollWith, PrivateData};

/// Poll closure of an [`ErasedContext`].
pub type ErasedPollFn = Rc<dyn Fn(&ErasedContext, PollEvent<'_>)>;

/// Wake closure of an [`ErasedContext`].
pub type ErasedWakeFn = Rc<dyn Fn(&ErasedContext)>;

/// What a poll closure receives: the future being polled and the context's private data
/// pointer. Only valid for the duration of the poll call.
pub struct PollEvent<'a> {
    future: NonNull<()>,
    future_type: TypeId,
    private_data: Option<NonNull<()>>,
    _marker: PhantomData<&'a mut ()>,
}

impl<'a> PollEvent<'a> {
    fn new<F>(future: &'a mut F, private_data: Option<NonNull<()>>) -> Self
    where
        F: 'static,
    {
        PollEvent {
            future: NonNull::from(future).cast(),
            future_type: TypeId::of::<F>(),
            private_data,
            _marker: PhantomData,
        }
    }

    /// Whether the polled future is of type `F`.
    #[inline]
    pub fn is_future<F>(&self) -> bool
    where
        F: 'static,
    {
        self.future_type == TypeId::of::<F>()
    }

    /// The polled future, if it is of type `F`.
    pub fn future_mut<F>(&mut self) -> Option<&mut F>
    where
        F: 'static,
    {
        if self.is_future::<F>() {
            // Safety: the pointer was built from a `&'a mut F` with this exact type id, and the
            // event is neither `Clone` nor `Copy`, so this is the only path to it.
            Some(unsafe { self.future.cast::<F>().as_mut() })
        } else {
            None
        }
    }

    /// Untyped address of the polled future.
    #[inline]
    pub fn future_ptr(&self) -> NonNull<()> {
        self.future
    }

    /// The private data pointer the context was built with.
    #[inline]
    pub fn private_data(&self) -> Option<NonNull<()>> {
        self.private_data
    }
}

impl fmt::Debug for PollEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollEvent")
            .field("future", &self.future)
            .field("private_data", &self.private_data)
            .finish()
    }
}

/// A polling context that does not know the type of its private data.
///
/// The private data pointer is not owned: whoever builds the context keeps the pointee alive
/// for as long as the context, and every copy of it, can be polled. Copies share the pointer
/// and the closures; the pointee is never cloned.
pub struct ErasedContext {
    id: ContextId,
    private_data: Option<NonNull<()>>,
    poll_fn: Option<ErasedPollFn>,
    wake_fn: Option<ErasedWakeFn>,
}

impl ErasedContext {
    /// Create a context around `poll_fn`, with no private data pointer.
    pub fn new<P>(poll_fn: P) -> Self
    where
        P: Fn(&ErasedContext, PollEvent<'_>) + 'static,
    {
        Self::from_parts(Some(Rc::new(poll_fn)), None)
    }

    /// Create a context around `poll_fn` that hands `private_data` to every poll.
    pub fn with_private_data<P>(poll_fn: P, private_data: NonNull<()>) -> Self
    where
        P: Fn(&ErasedContext, PollEvent<'_>) + 'static,
    {
        Self::from_parts(Some(Rc::new(poll_fn)), Some(private_data))
    }

    /// Create a context from an already shared poll closure.
    pub fn from_parts(poll_fn: Option<ErasedPollFn>, private_data: Option<NonNull<()>>) -> Self {
        ErasedContext {
            id: ContextId::next(),
            private_data,
            poll_fn,
            wake_fn: None,
        }
    }

    /// Identity of this context instance.
    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Always false: an erased context owns no storage to share.
    #[inline]
    pub const fn is_shared_storage() -> bool {
        false
    }

    /// True when there is no poll closure, e.g. after [`take`](ErasedContext::take).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.poll_fn.is_none()
    }

    /// Call the poll closure with `future` and the private data pointer.
    pub fn poll<F>(&self, future: &mut F)
    where
        F: 'static,
    {
        match &self.poll_fn {
            Some(poll_fn) => poll_fn(self, PollEvent::new(future, self.private_data)),
            None => trace!("poll on empty erased context {}", self.id),
        }
    }

    /// Request a poll by invoking the wake closure, if one is installed.
    pub fn wake(&self) {
        match &self.wake_fn {
            Some(wake_fn) => wake_fn(self),
            None => trace!("wake on erased context {} without a wake fn", self.id),
        }
    }

    /// Install the wake closure, replacing any previous one.
    pub fn set_wake_fn<W>(&mut self, wake_fn: W)
    where
        W: Fn(&ErasedContext) + 'static,
    {
        self.wake_fn = Some(Rc::new(wake_fn));
    }

    /// The installed wake closure, if any.
    #[inline]
    pub fn wake_fn(&self) -> Option<&ErasedWakeFn> {
        self.wake_fn.as_ref()
    }

    /// Remove and return the wake closure.
    pub fn take_wake_fn(&mut self) -> Option<ErasedWakeFn> {
        self.wake_fn.take()
    }

    /// The poll closure, shared with every copy of this context.
    #[inline]
    pub fn poll_fn(&self) -> Option<&ErasedPollFn> {
        self.poll_fn.as_ref()
    }

    /// The unowned private data pointer.
    #[inline]
    pub fn private_data(&self) -> Option<NonNull<()>> {
        self.private_data
    }

    /// Move the closures and the pointer into a new context, leaving this one empty.
    pub fn take(&mut self) -> ErasedContext {
        ErasedContext {
            id: ContextId::next(),
            private_data: self.private_data.take(),
            poll_fn: self.poll_fn.take(),
            wake_fn: self.wake_fn.take(),
        }
    }

    /// Move the closures and the pointer of `other` into this context, leaving `other` empty.
    pub fn move_from(&mut self, other: &mut ErasedContext) {
        self.private_data = other.private_data.take();
        self.poll_fn = other.poll_fn.take();
        self.wake_fn = other.wake_fn.take();
    }
}

impl Clone for ErasedContext {
    fn clone(&self) -> Self {
        ErasedContext {
            id: ContextId::next(),
            private_data: self.private_data,
            poll_fn: self.poll_fn.clone(),
            wake_fn: self.wake_fn.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.private_data = source.private_data;
        self.poll_fn = source.poll_fn.clone();
        self.wake_fn = source.wake_fn.clone();
    }
}

impl fmt::Debug for ErasedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedContext")
            .field("id", &self.id)
            .field("private_data", &self.private_data)
            .field("poll_fn", &self.poll_fn.is_some())
            .field("wake_fn", &self.wake_fn.is_some())
            .finish()
    }
}

impl<T> Context<T>
where
    T: PrivateData + 'static,
{
    /// Hide this context behind an [`ErasedContext`] polled with futures of type `F`.
    ///
    /// The erased context takes over this context's [`ContextId`] and its wake fn. Polling
    /// with an `F` forwards to [`Context::poll`], polling with any other type only logs a
    /// warning. While a poll runs, a [`Context::wake`] from the private data wakes the erased
    /// context being polled, so whatever wake fn is installed on it later sees every wake. The
    /// erased context has no private data pointer.
    pub fn erase<F>(mut self) -> ErasedContext
    where
        T: PollWith<F>,
        F: 'static,
    {
        let polling: Rc<Cell<Option<NonNull<ErasedContext>>>> = Rc::new(Cell::new(None));
        let previous = self.take_wake_fn();

        let target = Rc::clone(&polling);
        let fallback = previous.clone();
        self.set_wake_fn(move |typed: &Context<T>| match target.get() {
            // Safety: only set while the poll closure below runs, and that call borrows the
            // erased context.
            Some(erased) => unsafe { erased.as_ref() }.wake(),
            None => {
                if let Some(wake_fn) = &fallback {
                    wake_fn(typed)
                }
            }
        });

        let id = self.id();
        let typed = Rc::new(self);
        let polled = Rc::clone(&typed);
        let mut erased = ErasedContext::new(move |cx, mut event| match event.future_mut::<F>() {
            Some(future) => {
                let _polling = Polling::enter(&polling, cx);
                polled.poll(future)
            }
            None => warn!(
                "erased context {} polled with a future its private data cannot complete",
                cx.id()
            ),
        });
        erased.id = id;
        if let Some(wake_fn) = previous {
            erased.set_wake_fn(move |_| wake_fn(&*typed));
        }
        erased
    }
}

/// Marks an erased context as the one being polled, until dropped.
struct Polling<'a> {
    slot: &'a Cell<Option<NonNull<ErasedContext>>>,
    outer: Option<NonNull<ErasedContext>>,
}

impl<'a> Polling<'a> {
    fn enter(slot: &'a Cell<Option<NonNull<ErasedContext>>>, cx: &ErasedContext) -> Self {
        let outer = slot.replace(Some(NonNull::from(cx)));
        Polling { slot, outer }
    }
}

impl Drop for Polling<'_> {
    fn drop(&mut self) {
        self.slot.set(self.outer);
    }
}
