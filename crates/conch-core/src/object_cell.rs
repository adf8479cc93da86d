//! Thread-confined interior mutability for heap objects.
//!
//! `ObjectCell<T>` wraps `RefCell<T>` so overlapping mutable borrows are
//! caught at runtime in every build mode. The collector reads the contents
//! through [`ObjectCell::peek`] during marking, when no mutator borrow can
//! be active because collections only happen at safe points.

use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};

/// Thread-confined interior mutability wrapper.
pub struct ObjectCell<T> {
    value: RefCell<T>,
}

impl<T> ObjectCell<T> {
    /// Create a new `ObjectCell` with the given value.
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    /// Borrow the value immutably.
    ///
    /// Panics if an exclusive borrow is active.
    #[inline]
    pub fn borrow(&self) -> ObjectCellRef<'_, T> {
        ObjectCellRef {
            inner: self.value.borrow(),
        }
    }

    /// Borrow the value mutably.
    ///
    /// Panics if any borrow (shared or exclusive) is active.
    #[inline]
    pub fn borrow_mut(&self) -> ObjectCellRefMut<'_, T> {
        ObjectCellRefMut {
            inner: self.value.borrow_mut(),
        }
    }

    /// Read the value without registering a borrow.
    ///
    /// # Safety
    /// No mutable borrow may be active or start while the returned reference
    /// is alive. Mark procedures satisfy this because they only run inside a
    /// collection, which never overlaps a mutator borrow.
    ///
    /// # Panics
    /// Panics if a mutable borrow is active at the time of the call.
    #[inline]
    pub unsafe fn peek(&self) -> &T {
        // SAFETY: caller guarantees no concurrent mutable borrow
        match unsafe { self.value.try_borrow_unguarded() } {
            Ok(value) => value,
            Err(_) => panic!("object mutably borrowed during collection"),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObjectCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value.try_borrow() {
            Ok(value) => f
                .debug_struct("ObjectCell")
                .field("value", &*value)
                .finish(),
            Err(_) => f
                .debug_struct("ObjectCell")
                .field("value", &"<borrowed>")
                .finish(),
        }
    }
}

/// Immutable borrow guard for `ObjectCell<T>`.
pub struct ObjectCellRef<'a, T> {
    inner: Ref<'a, T>,
}

impl<T> Deref for ObjectCellRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Mutable borrow guard for `ObjectCell<T>`.
pub struct ObjectCellRefMut<'a, T> {
    inner: RefMut<'a, T>,
}

impl<T> Deref for ObjectCellRefMut<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for ObjectCellRefMut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_borrow() {
        let cell = ObjectCell::new(42);
        assert_eq!(*cell.borrow(), 42);
        *cell.borrow_mut() = 100;
        assert_eq!(*cell.borrow(), 100);
    }

    #[test]
    fn test_peek_sees_latest_value() {
        let cell = ObjectCell::new(vec![1, 2]);
        cell.borrow_mut().push(3);
        assert_eq!(unsafe { cell.peek() }.len(), 3);
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn test_borrow_mut_while_borrowed() {
        let cell = ObjectCell::new(42);
        let _a = cell.borrow();
        let _b = cell.borrow_mut();
    }

    #[test]
    #[should_panic(expected = "mutably borrowed during collection")]
    fn test_peek_while_mut_borrowed() {
        let cell = ObjectCell::new(42);
        let _guard = cell.borrow_mut();
        let _ = unsafe { cell.peek() };
    }
}
