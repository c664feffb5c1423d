use std::fmt;
use std::rc::Rc;

use crate::context::{Context, PrivateData, WakeFn};

/// Configures a [`Context`] before its private data is attached.
///
/// A wake callback configured here is already installed when
/// [`PrivateData::on_attach`] first runs, so the private data can rely on it.
///
/// ```
/// use poll_context::{Context, Embedded, PrivateData};
///
/// #[derive(Clone, Default)]
/// struct Noop;
///
/// impl PrivateData for Noop {
///     type Storage = Embedded<Self>;
///
///     fn on_attach(&mut self, cx: &Context<Self>) {
///         assert!(cx.wake_fn().is_some());
///     }
/// }
///
/// let cx = Context::<Noop>::builder()
///     .wake_fn(|cx| println!("woken {}", cx.id()))
///     .make_default();
/// cx.wake();
/// ```
pub struct ContextBuilder<T>
where
    T: PrivateData,
{
    wake_fn: Option<WakeFn<T>>,
}

impl<T> ContextBuilder<T>
where
    T: PrivateData,
{
    /// Generates the base configuration: no wake callback.
    pub fn new() -> Self {
        ContextBuilder { wake_fn: None }
    }

    /// Sets the wake callback.
    pub fn wake_fn<W>(mut self, wake_fn: W) -> Self
    where
        W: Fn(&Context<T>) + 'static,
    {
        self.wake_fn = Some(Rc::new(wake_fn));
        self
    }

    /// Sets a wake callback that is already shared with other contexts.
    pub fn shared_wake_fn(mut self, wake_fn: WakeFn<T>) -> Self {
        self.wake_fn = Some(wake_fn);
        self
    }

    /// Make a context owning `value`.
    pub fn make(self, value: T) -> Context<T> {
        Context::with_wake_fn(value, self.wake_fn)
    }

    /// Make a context owning `T::default()`.
    pub fn make_default(self) -> Context<T>
    where
        T: Default,
    {
        self.make(T::default())
    }
}

impl<T> Default for ContextBuilder<T>
where
    T: PrivateData,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ContextBuilder<T>
where
    T: PrivateData,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("wake_fn", &self.wake_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextId, Shared};
    use std::cell::Cell;

    struct Registration {
        registered: Rc<Cell<Option<ContextId>>>,
    }

    impl PrivateData for Registration {
        type Storage = Shared<Self>;

        fn on_attach(&mut self, cx: &Context<Self>) {
            if cx.wake_fn().is_some() {
                self.registered.set(Some(cx.id()));
            }
        }
    }

    #[test]
    fn test_wake_fn_installed_before_attach() {
        let registered = Rc::new(Cell::new(None));
        let woken = Rc::new(Cell::new(0));
        let w = Rc::clone(&woken);

        let cx = ContextBuilder::<Registration>::new()
            .wake_fn(move |_| w.set(w.get() + 1))
            .make(Registration {
                registered: Rc::clone(&registered),
            });

        assert_eq!(registered.get(), Some(cx.id()));
        cx.wake();
        assert_eq!(woken.get(), 1);
    }

    #[test]
    fn test_without_wake_fn() {
        let registered = Rc::new(Cell::new(None));
        let cx = Context::builder().make(Registration {
            registered: Rc::clone(&registered),
        });

        assert_eq!(registered.get(), None);
        assert!(cx.wake_fn().is_none());
    }

    #[test]
    fn test_shared_wake_fn() {
        let woken = Rc::new(Cell::new(0));
        let w = Rc::clone(&woken);
        let wake_fn: WakeFn<Registration> =
            Rc::new(move |_: &Context<Registration>| w.set(w.get() + 1));

        let registered = Rc::new(Cell::new(None));
        let cx1 = ContextBuilder::new()
            .shared_wake_fn(Rc::clone(&wake_fn))
            .make(Registration {
                registered: Rc::clone(&registered),
            });
        let cx2 = ContextBuilder::new()
            .shared_wake_fn(wake_fn)
            .make(Registration { registered });

        cx1.wake();
        cx2.wake();
        assert_eq!(woken.get(), 2);
    }
}
