//! The typed [`Context`], generic over the private data it owns.
use std::cell::{Ref, RefMut};
use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::context::storage::Storage;
use crate::context::{ContextBuilder, ContextId};
use crate::error::{ContextError, Result};

/// State machine of one asynchronous operation, owned by a [`Context`].
///
/// Implementors choose their storage strategy through [`PrivateData::Storage`], and must also
/// implement [`PollWith<F>`] for every future-like type `F` they know how to complete.
///
/// ### Ownership
/// Private data must never keep the context that owns it, not even a clone of it: the context
/// owns the private data, and owning the context back forms a cycle that is never freed. Hooks
/// only ever receive a `&Context<Self>` that is valid for the duration of the call.
pub trait PrivateData: Sized {
    /// Either [`Embedded<Self>`](crate::Embedded) or [`Shared<Self>`](crate::Shared).
    type Storage: Storage<Self>;

    /// Called every time this value becomes associated with a context: on construction, on
    /// clone and clone assignment, and on [`Context::take`] and [`Context::move_from`].
    ///
    /// `cx` is the context the value now belongs to. Anything bound to a previous context, such
    /// as a wake registration keyed by [`Context::id`], must be re-established here.
    fn on_attach(&mut self, cx: &Context<Self>);
}

/// Capability of private data to advance a future-like value of type `F`.
pub trait PollWith<F>: PrivateData {
    /// Advance the operation, and fill the result of `future` once it is complete.
    ///
    /// `cx` can be used to [`wake`](Context::wake) the context, but not to borrow the private
    /// data again, which is already borrowed as `self`.
    fn on_poll(&mut self, future: &mut F, cx: &Context<Self>);
}

/// Wake callback of a [`Context`]. Cloned along with the context.
pub type WakeFn<T> = Rc<dyn Fn(&Context<T>)>;

/// A polling context owning one private data value of type `T` and an optional wake callback.
///
/// Cloning follows the storage strategy of `T`: embedded values are duplicated, shared values
/// are aliased. Plain Rust moves of a context are not observable by its private data; the
/// handoffs that re-attach are [`take`](Context::take) and [`move_from`](Context::move_from).
pub struct Context<T>
where
    T: PrivateData,
{
    id: ContextId,
    private_data: Option<T::Storage>,
    wake_fn: Option<WakeFn<T>>,
}

impl<T> Context<T>
where
    T: PrivateData,
{
    /// Create a context owning `value`, then attach `value` to it.
    pub fn new(value: T) -> Self {
        Self::with_wake_fn(value, None)
    }

    /// Start configuring a context. See [`ContextBuilder`].
    pub fn builder() -> ContextBuilder<T> {
        ContextBuilder::new()
    }

    pub(crate) fn with_wake_fn(value: T, wake_fn: Option<WakeFn<T>>) -> Self {
        let storage = <T::Storage as Storage<T>>::new(value);
        let cx = Context {
            id: ContextId::next(),
            private_data: Some(storage),
            wake_fn,
        };
        cx.attach();
        cx
    }

    /// Identity of this context instance.
    ///
    /// Fresh for every constructed, cloned or taken context. Assignments keep the target's id.
    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Whether private data of type `T` is aliased, rather than duplicated, by a clone.
    #[inline]
    pub fn is_shared_storage() -> bool {
        <T::Storage as Storage<T>>::IS_SHARED
    }

    /// True once the private data has been moved out of this context.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.private_data.is_none()
    }

    /// Number of contexts referring to this context's private data, including this one.
    ///
    /// Always 1 for embedded storage, and 0 for an empty context.
    pub fn storage_refs(&self) -> usize {
        self.private_data
            .as_ref()
            .map_or(0, |storage| storage.refs())
    }

    /// Drive the operation one step by handing `future` to the private data.
    ///
    /// No-op on an empty context.
    ///
    /// ### Panics
    /// If the private data is already borrowed. Polls of one context, and of contexts sharing
    /// storage, must be serialized by the caller; [`try_poll`](Context::try_poll) reports the
    /// overlap instead.
    pub fn poll<F>(&self, future: &mut F)
    where
        T: PollWith<F>,
    {
        match &self.private_data {
            Some(storage) => storage.cell().borrow_mut().on_poll(future, self),
            None => trace!("poll on empty context {}", self.id),
        }
    }

    /// Like [`poll`](Context::poll), but reports an empty context or an overlapping borrow.
    pub fn try_poll<F>(&self, future: &mut F) -> Result<()>
    where
        T: PollWith<F>,
    {
        let mut private_data = self.borrow_checked()?;
        private_data.on_poll(future, self);
        Ok(())
    }

    /// Request a poll by invoking the wake callback, if one is installed.
    ///
    /// Never polls by itself.
    pub fn wake(&self) {
        match &self.wake_fn {
            Some(wake_fn) => wake_fn(self),
            None => trace!("wake on context {} without a wake fn", self.id),
        }
    }

    /// Install the wake callback, replacing any previous one.
    pub fn set_wake_fn<W>(&mut self, wake_fn: W)
    where
        W: Fn(&Context<T>) + 'static,
    {
        self.wake_fn = Some(Rc::new(wake_fn));
    }

    /// The installed wake callback.
    #[inline]
    pub fn wake_fn(&self) -> Option<&WakeFn<T>> {
        self.wake_fn.as_ref()
    }

    /// Remove and return the installed wake callback.
    pub fn take_wake_fn(&mut self) -> Option<WakeFn<T>> {
        self.wake_fn.take()
    }

    /// Install an already shared wake callback, or none, returning the previous one.
    pub fn replace_wake_fn(&mut self, wake_fn: Option<WakeFn<T>>) -> Option<WakeFn<T>> {
        std::mem::replace(&mut self.wake_fn, wake_fn)
    }

    /// Borrow the private data, or `None` if the context is empty.
    ///
    /// For shared storage this is the value every aliasing context sees.
    ///
    /// ### Panics
    /// If the private data is mutably borrowed, e.g. when called from inside a hook.
    pub fn private_data(&self) -> Option<Ref<'_, T>> {
        self.private_data
            .as_ref()
            .map(|storage| storage.cell().borrow())
    }

    /// Mutably borrow the private data, or `None` if the context is empty.
    ///
    /// ### Panics
    /// If the private data is already borrowed.
    pub fn private_data_mut(&mut self) -> Option<RefMut<'_, T>> {
        self.private_data
            .as_ref()
            .map(|storage| storage.cell().borrow_mut())
    }

    /// Checked variant of [`private_data`](Context::private_data).
    pub fn try_private_data(&self) -> Result<Ref<'_, T>> {
        let storage = self.private_data.as_ref().ok_or(ContextError::Empty)?;
        storage.cell().try_borrow().map_err(|_| ContextError::Busy)
    }

    /// Checked variant of [`private_data_mut`](Context::private_data_mut).
    pub fn try_private_data_mut(&mut self) -> Result<RefMut<'_, T>> {
        self.borrow_checked()
    }

    /// Move the private data and the wake callback into a new context, leaving this one empty.
    ///
    /// The private data is attached to the returned context.
    pub fn take(&mut self) -> Context<T> {
        let cx = Context {
            id: ContextId::next(),
            private_data: self.private_data.take(),
            wake_fn: self.wake_fn.take(),
        };
        cx.attach();
        cx
    }

    /// Move the private data and the wake callback of `other` into this context, dropping what
    /// this context held before and leaving `other` empty.
    ///
    /// The private data is attached to this context.
    pub fn move_from(&mut self, other: &mut Context<T>) {
        self.wake_fn = other.wake_fn.take();
        self.private_data = other.private_data.take();
        self.attach();
    }

    fn borrow_checked(&self) -> Result<RefMut<'_, T>> {
        let storage = self.private_data.as_ref().ok_or(ContextError::Empty)?;
        storage
            .cell()
            .try_borrow_mut()
            .map_err(|_| ContextError::Busy)
    }

    fn attach(&self) {
        if let Some(storage) = &self.private_data {
            trace!("attaching private data to context {}", self.id);
            storage.cell().borrow_mut().on_attach(self);
        }
    }
}

impl<T> Clone for Context<T>
where
    T: PrivateData,
{
    fn clone(&self) -> Self {
        let cx = Context {
            id: ContextId::next(),
            private_data: self.private_data.as_ref().map(|storage| storage.duplicate()),
            wake_fn: self.wake_fn.clone(),
        };
        cx.attach();
        cx
    }

    fn clone_from(&mut self, source: &Self) {
        self.wake_fn = source.wake_fn.clone();
        self.private_data = source
            .private_data
            .as_ref()
            .map(|storage| storage.duplicate());
        self.attach();
    }
}

impl<T> Default for Context<T>
where
    T: PrivateData + Default,
{
    fn default() -> Self {
        Context::new(T::default())
    }
}

impl<T> fmt::Debug for Context<T>
where
    T: PrivateData,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("shared", &Self::is_shared_storage())
            .field("empty", &self.is_empty())
            .field("wake_fn", &self.wake_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Embedded, Shared};
    use std::cell::Cell;

    #[derive(Debug, Default)]
    struct Slot {
        result: Option<u32>,
    }

    #[derive(Clone, Default)]
    struct Probe {
        value: u32,
        attaches: Rc<Cell<usize>>,
        polls: usize,
        attached_to: Option<ContextId>,
        last_future: usize,
    }

    impl PrivateData for Probe {
        type Storage = Embedded<Self>;

        fn on_attach(&mut self, cx: &Context<Self>) {
            self.attaches.set(self.attaches.get() + 1);
            self.attached_to = Some(cx.id());
        }
    }

    impl PollWith<Slot> for Probe {
        fn on_poll(&mut self, future: &mut Slot, _: &Context<Self>) {
            self.polls += 1;
            self.last_future = &*future as *const Slot as usize;
            future.result = Some(self.value);
        }
    }

    // Not Clone: can only be shared.
    struct Socket {
        value: u32,
        attaches: Rc<Cell<usize>>,
    }

    impl PrivateData for Socket {
        type Storage = Shared<Self>;

        fn on_attach(&mut self, _: &Context<Self>) {
            self.attaches.set(self.attaches.get() + 1);
        }
    }

    impl PollWith<Slot> for Socket {
        fn on_poll(&mut self, future: &mut Slot, cx: &Context<Self>) {
            if self.value == 0 {
                cx.wake();
            } else {
                future.result = Some(self.value);
            }
        }
    }

    fn probe(value: u32) -> (Probe, Rc<Cell<usize>>) {
        let attaches = Rc::new(Cell::new(0));
        let probe = Probe {
            value,
            attaches: Rc::clone(&attaches),
            ..Default::default()
        };
        (probe, attaches)
    }

    fn socket(value: u32) -> (Socket, Rc<Cell<usize>>) {
        let attaches = Rc::new(Cell::new(0));
        let socket = Socket {
            value,
            attaches: Rc::clone(&attaches),
        };
        (socket, attaches)
    }

    #[test]
    fn test_storage_selection() {
        assert!(!Context::<Probe>::is_shared_storage());
        assert!(Context::<Socket>::is_shared_storage());
    }

    #[test]
    fn test_embedded_clone_is_independent() {
        let (value, _) = probe(1);
        let mut cx1 = Context::new(value);
        let cx2 = cx1.clone();

        cx1.private_data_mut().unwrap().value = 5;

        assert_eq!(cx1.private_data().unwrap().value, 5);
        assert_eq!(cx2.private_data().unwrap().value, 1);
        assert_eq!(cx1.storage_refs(), 1);
        assert_eq!(cx2.storage_refs(), 1);
    }

    #[test]
    fn test_shared_clone_aliases() {
        let (value, _) = socket(1);
        let mut cx1 = Context::new(value);
        let cx2 = cx1.clone();
        assert_eq!(cx1.storage_refs(), 2);

        cx1.private_data_mut().unwrap().value = 9;
        assert_eq!(cx2.private_data().unwrap().value, 9);

        let mut slot = Slot::default();
        cx2.poll(&mut slot);
        assert_eq!(slot.result, Some(9));

        drop(cx1);
        assert_eq!(cx2.storage_refs(), 1);
    }

    #[test]
    fn test_attach_on_every_handoff() {
        let (value, attaches) = probe(1);
        let mut cx1 = Context::new(value);
        assert_eq!(attaches.get(), 1);
        assert_eq!(cx1.private_data().unwrap().attached_to, Some(cx1.id()));

        let cx2 = cx1.clone();
        assert_eq!(attaches.get(), 2);
        assert_eq!(cx2.private_data().unwrap().attached_to, Some(cx2.id()));
        // The original value is not re-attached by a clone.
        assert_eq!(cx1.private_data().unwrap().attached_to, Some(cx1.id()));

        let mut cx3 = cx1.take();
        assert_eq!(attaches.get(), 3);
        assert_eq!(cx3.private_data().unwrap().attached_to, Some(cx3.id()));

        let mut cx4 = cx2.clone();
        assert_eq!(attaches.get(), 4);
        cx4.move_from(&mut cx3);
        assert_eq!(attaches.get(), 5);
        assert_eq!(cx4.private_data().unwrap().attached_to, Some(cx4.id()));

        cx1.clone_from(&cx4);
        assert_eq!(attaches.get(), 6);
        assert_eq!(cx1.private_data().unwrap().attached_to, Some(cx1.id()));

        // Handoffs of empty contexts attach nothing.
        let _ = cx3.take();
        cx4.clone_from(&cx3);
        assert!(cx4.is_empty());
        assert_eq!(attaches.get(), 6);
    }

    #[test]
    fn test_shared_attach_count() {
        let (value, attaches) = socket(1);
        let mut cx1 = Context::new(value);
        let cx2 = cx1.clone();
        let mut cx3 = cx1.take();
        cx3.move_from(&mut cx1);
        assert!(cx3.is_empty());
        cx3.clone_from(&cx2);
        assert_eq!(attaches.get(), 4);
        assert_eq!(cx3.storage_refs(), 2);
    }

    #[test]
    fn test_take_clears_source() {
        let (value, _) = probe(3);
        let mut cx1 = Context::new(value);
        cx1.set_wake_fn(|_| {});

        let cx2 = cx1.take();
        assert!(cx1.is_empty());
        assert!(cx1.private_data().is_none());
        assert!(cx1.wake_fn().is_none());
        assert_eq!(cx1.storage_refs(), 0);
        assert!(cx2.wake_fn().is_some());
        assert_eq!(cx2.private_data().unwrap().value, 3);
    }

    #[test]
    fn test_move_from_clears_source() {
        let (value, _) = socket(3);
        let mut cx1 = Context::new(value);
        cx1.set_wake_fn(|_| {});
        let mut cx2 = Context::new(socket(4).0);

        cx2.move_from(&mut cx1);
        assert!(cx1.private_data().is_none());
        assert!(cx1.wake_fn().is_none());
        assert!(cx2.wake_fn().is_some());
        assert_eq!(cx2.private_data().unwrap().value, 3);
    }

    #[test]
    fn test_wake() {
        let (value, _) = probe(1);
        let mut cx = Context::new(value);
        // No wake fn, no-op.
        cx.wake();

        let woken = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(None));
        let (w, s) = (Rc::clone(&woken), Rc::clone(&seen));
        cx.set_wake_fn(move |cx| {
            w.set(w.get() + 1);
            s.set(Some(cx.id()));
        });

        cx.wake();
        assert_eq!(woken.get(), 1);
        assert_eq!(seen.get(), Some(cx.id()));

        // The wake fn is copied by a clone and sees the clone.
        let cx2 = cx.clone();
        cx2.wake();
        assert_eq!(woken.get(), 2);
        assert_eq!(seen.get(), Some(cx2.id()));

        // Waking never polls.
        assert_eq!(cx.private_data().unwrap().polls, 0);

        assert!(cx.take_wake_fn().is_some());
        cx.wake();
        assert_eq!(woken.get(), 2);
    }

    #[test]
    fn test_poll() {
        let (value, _) = probe(11);
        let mut cx = Context::new(value);
        let mut slot = Slot::default();

        cx.poll(&mut slot);
        cx.poll(&mut slot);
        assert_eq!(slot.result, Some(11));
        {
            let pd = cx.private_data().unwrap();
            assert_eq!(pd.polls, 2);
            assert_eq!(pd.last_future, &slot as *const Slot as usize);
        }

        let taken = cx.take();
        let mut other = Slot::default();
        cx.poll(&mut other);
        assert_eq!(other.result, None);
        assert_eq!(taken.private_data().unwrap().polls, 2);
    }

    #[test]
    fn test_poll_wakes_from_hook() {
        let (value, _) = socket(0);
        let mut cx = Context::new(value);
        let woken = Rc::new(Cell::new(0));
        let w = Rc::clone(&woken);
        cx.set_wake_fn(move |_| w.set(w.get() + 1));

        let mut slot = Slot::default();
        cx.poll(&mut slot);
        assert_eq!(woken.get(), 1);
        assert_eq!(slot.result, None);

        cx.private_data_mut().unwrap().value = 2;
        cx.poll(&mut slot);
        assert_eq!(woken.get(), 1);
        assert_eq!(slot.result, Some(2));
    }

    #[test]
    fn test_try_poll() {
        let (value, _) = probe(1);
        let mut cx = Context::new(value);
        let mut slot = Slot::default();

        {
            let _guard = cx.private_data();
            assert_eq!(cx.try_poll(&mut slot), Err(ContextError::Busy));
        }
        assert_eq!(cx.try_poll(&mut slot), Ok(()));
        assert_eq!(slot.result, Some(1));

        let _taken = cx.take();
        assert_eq!(cx.try_poll(&mut slot), Err(ContextError::Empty));
        assert!(matches!(cx.try_private_data(), Err(ContextError::Empty)));
        assert!(matches!(cx.try_private_data_mut(), Err(ContextError::Empty)));
    }

    #[test]
    fn test_round_trip_moves() {
        let (value, _) = socket(8);
        let mut cx1 = Context::new(value);
        let addr = {
            let pd = cx1.private_data().unwrap();
            &*pd as *const Socket
        };
        let mut cx2 = cx1.take();
        let cx3 = cx2.take();
        let moved = {
            let pd = cx3.private_data().unwrap();
            &*pd as *const Socket
        };
        assert_eq!(moved, addr);
        assert!(Context::<Socket>::is_shared_storage());

        let (value, _) = probe(8);
        let mut cx1 = Context::new(value);
        let mut cx2 = cx1.take();
        let cx3 = cx2.take();
        assert_eq!(cx3.private_data().unwrap().value, 8);
        assert!(!Context::<Probe>::is_shared_storage());
    }

    #[test]
    fn test_default() {
        let cx: Context<Probe> = Context::default();
        assert_eq!(cx.private_data().unwrap().attaches.get(), 1);
        assert_eq!(cx.private_data().unwrap().value, 0);
    }

    #[test]
    fn test_random_handoffs() {
        let (value, attaches) = probe(1);
        let mut contexts = vec![Context::new(value)];
        let mut expected = 1;

        for _ in 0..200 {
            let from = fastrand::usize(..contexts.len());
            let attaching = !contexts[from].is_empty();
            match fastrand::u8(..4) {
                0 => {
                    let cx = contexts[from].clone();
                    contexts.push(cx);
                }
                1 => {
                    let cx = contexts[from].take();
                    contexts.push(cx);
                }
                2 => {
                    let to = fastrand::usize(..contexts.len());
                    if to == from {
                        continue;
                    }
                    let mut source = contexts[from].take();
                    expected += attaching as usize;
                    contexts[to].move_from(&mut source);
                }
                _ => {
                    let to = fastrand::usize(..contexts.len());
                    let source = contexts[from].clone();
                    expected += attaching as usize;
                    contexts[to].clone_from(&source);
                }
            }
            expected += attaching as usize;
            assert_eq!(attaches.get(), expected);
        }
    }

    #[test]
    #[should_panic]
    fn test_borrow_from_hook_panics() {
        #[derive(Clone)]
        struct Reentrant;

        impl PrivateData for Reentrant {
            type Storage = Embedded<Self>;

            fn on_attach(&mut self, _: &Context<Self>) {}
        }

        impl PollWith<Slot> for Reentrant {
            fn on_poll(&mut self, _: &mut Slot, cx: &Context<Self>) {
                let _ = cx.private_data();
            }
        }

        let cx = Context::new(Reentrant);
        cx.poll(&mut Slot::default());
    }
}
