//! Storage strategies for the private data owned by a [`Context`].
//!
//! A private data type picks its strategy through [`PrivateData::Storage`]. The choice is an
//! associated type, so it is fixed per type and resolved entirely at compile time:
//!
//! | Strategy          | Clone of the context        | Take / move of the context          |
//! |-------------------|-----------------------------|-------------------------------------|
//! | [`Embedded<T>`]   | clones the value            | moves the value, source is emptied  |
//! | [`Shared<T>`]     | bumps a reference count     | moves the handle, source is emptied |
//!
//! [`Embedded<T>`] only implements [`Storage`] for `T: Clone`, so a type that cannot be
//! duplicated by value and still selects it is rejected by the compiler rather than being
//! quietly aliased. Types that wrap non-duplicable resources, or whose identity matters, select
//! [`Shared<T>`] instead. Every context cloned from one original then refers to the same value,
//! and mutations made through any of them are observed by all of them.
//!
//! ```compile_fail
//! use poll_context::{Context, Embedded, PrivateData};
//!
//! // A file handle cannot be duplicated by value.
//! struct Log(std::fs::File);
//!
//! impl PrivateData for Log {
//!     type Storage = Embedded<Self>;
//!
//!     fn on_attach(&mut self, _: &Context<Self>) {}
//! }
//! ```
//!
//! Both strategies keep the value in a [`RefCell`]. Hooks receive `&mut T` together with a
//! `&Context<T>`, and the cell is what makes that pairing possible without aliasing `&mut`.
//!
//! [`Context`]: crate::Context
//! [`PrivateData::Storage`]: crate::PrivateData::Storage
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

mod sealed {
    pub trait Sealed {}
}

/// Compile time storage strategy for a private data value of type `T`.
///
/// This trait is sealed: the only strategies are [`Embedded`] and [`Shared`].
pub trait Storage<T>: sealed::Sealed + Sized {
    /// True if cloning a context aliases the value instead of duplicating it.
    const IS_SHARED: bool;

    /// Place `value` into freshly created storage.
    fn new(value: T) -> Self;

    /// Produce the storage for a cloned context.
    ///
    /// ### Panics
    /// Embedded storage panics if the value is mutably borrowed, which only happens when a hook
    /// tries to clone the context that is currently invoking it.
    fn duplicate(&self) -> Self;

    /// The cell holding the value.
    fn cell(&self) -> &RefCell<T>;

    /// Number of live storages referring to this value.
    fn refs(&self) -> usize;
}

/// Private data held inline, duplicated on clone.
pub struct Embedded<T> {
    value: RefCell<T>,
}

impl<T> sealed::Sealed for Embedded<T> {}

impl<T> Storage<T> for Embedded<T>
where
    T: Clone,
{
    const IS_SHARED: bool = false;

    fn new(value: T) -> Self {
        Embedded {
            value: RefCell::new(value),
        }
    }

    fn duplicate(&self) -> Self {
        let value = self.value.borrow().clone();
        Embedded {
            value: RefCell::new(value),
        }
    }

    #[inline]
    fn cell(&self) -> &RefCell<T> {
        &self.value
    }

    #[inline]
    fn refs(&self) -> usize {
        1
    }
}

impl<T> fmt::Debug for Embedded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Embedded")
    }
}

/// Private data held behind a reference count, aliased on clone.
pub struct Shared<T> {
    value: Rc<RefCell<T>>,
}

impl<T> sealed::Sealed for Shared<T> {}

impl<T> Storage<T> for Shared<T> {
    const IS_SHARED: bool = true;

    fn new(value: T) -> Self {
        let value = RefCell::new(value);
        let value = Rc::new(value);
        Shared { value }
    }

    fn duplicate(&self) -> Self {
        Shared {
            value: Rc::clone(&self.value),
        }
    }

    #[inline]
    fn cell(&self) -> &RefCell<T> {
        &self.value
    }

    #[inline]
    fn refs(&self) -> usize {
        Rc::strong_count(&self.value)
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("refs", &Rc::strong_count(&self.value))
            .finish()
    }
}
