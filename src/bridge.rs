//! Drive a [`Context`] from a `std::future::Future` executor.
//!
//! [`ContextFuture`] pairs a context with the future-like value its private data completes, and
//! polls them together whenever the executor polls it. The context's wake callback is wrapped so
//! that a [`Context::wake`] also wakes the executor task currently waiting on the pair.
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{self, Poll, Waker};

use crate::context::{Context, PollWith, PrivateData, WakeFn};

/// A future-like value that eventually yields an output.
pub trait Completion {
    type Output;

    /// Take the output if the operation has completed. Called after every poll of the context.
    fn take_output(&mut self) -> Option<Self::Output>;
}

impl<R> Completion for Option<R> {
    type Output = R;

    fn take_output(&mut self) -> Option<R> {
        self.take()
    }
}

/// A [`Future`] polling a [`Context`] with a future-like value of type `F`.
pub struct ContextFuture<T, F>
where
    T: PrivateData,
{
    context: Context<T>,
    future: F,
    waker: Rc<RefCell<Option<Waker>>>,
    previous: Option<WakeFn<T>>,
}

/// No pinning projection: neither the context nor `F` is ever pinned.
impl<T, F> Unpin for ContextFuture<T, F> where T: PrivateData {}

impl<T, F> ContextFuture<T, F>
where
    T: PrivateData + 'static,
{
    /// Pair `context` with `future`.
    ///
    /// The wake callback already installed on `context`, if any, keeps being called on every
    /// wake, before the executor task is woken.
    pub fn new(mut context: Context<T>, future: F) -> Self {
        let waker: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
        let previous = context.take_wake_fn();

        let registered = Rc::clone(&waker);
        let chained = previous.clone();
        context.set_wake_fn(move |cx| {
            if let Some(wake_fn) = &chained {
                wake_fn(cx);
            }
            if let Some(waker) = registered.borrow().as_ref() {
                waker.wake_by_ref();
            }
        });

        ContextFuture {
            context,
            future,
            waker,
            previous,
        }
    }

    /// The polled context, e.g. to wake it from an event source.
    pub fn context(&self) -> &Context<T> {
        &self.context
    }

    /// Split into the context, with its original wake callback restored, and the future-like value.
    pub fn into_inner(self) -> (Context<T>, F) {
        let ContextFuture {
            mut context,
            future,
            previous,
            ..
        } = self;
        context.replace_wake_fn(previous);
        (context, future)
    }
}

impl<T, F> Future for ContextFuture<T, F>
where
    T: PollWith<F>,
    F: Completion,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        replace_waker(&mut this.waker.borrow_mut(), cx);

        this.context.poll(&mut this.future);
        match this.future.take_output() {
            Some(output) => Poll::Ready(output),
            None => Poll::Pending,
        }
    }
}

impl<T, F> fmt::Debug for ContextFuture<T, F>
where
    T: PrivateData,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFuture")
            .field("context", &self.context)
            .finish()
    }
}

// Replace a waker if needed
#[inline]
fn replace_waker(old: &mut Option<Waker>, cx: &mut task::Context<'_>) {
    if let Some(ref old_waker) = old {
        if !old_waker.will_wake(cx.waker()) {
            *old = Some(cx.waker().clone())
        }
    } else {
        *old = Some(cx.waker().clone())
    }
}
