//! Exclusive access to the bus session
//!
//! Every driver operation runs inside exactly one [`AccessGuard::with_access`]
//! call, so a config-mode bracket or a data-flash sequence can never be
//! interleaved with another caller's transactions. The strategy is a type
//! parameter of the driver:
//!
//! - [`NoopGuard`] for single-context firmware, always grants access.
//! - [`TimedMutex`] (feature `std`) for handles shared between threads.

use core::cell::RefCell;
use core::time::Duration;

/// Scoped exclusive access to a value
pub trait AccessGuard<T> {
    /// Wrap `value`
    fn new(value: T) -> Self
    where
        Self: Sized;

    /// Run `f` with exclusive access to the value.
    ///
    /// Returns `None`, without calling `f`, when access was not granted
    /// within `timeout`. Access ends when `f` returns.
    fn with_access<R, F>(&self, timeout: Duration, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R;

    /// Unwrap the value
    fn into_inner(self) -> T
    where
        Self: Sized;
}

/// Guard for callers that never share the driver between execution contexts.
///
/// Not `Sync`, so the compiler rules out concurrent use.
pub struct NoopGuard<T>(RefCell<T>);

impl<T> AccessGuard<T> for NoopGuard<T> {
    fn new(value: T) -> Self {
        NoopGuard(RefCell::new(value))
    }

    fn with_access<R, F>(&self, _timeout: Duration, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        // Only a nested call from inside `f` can find the cell borrowed
        let mut value = self.0.try_borrow_mut().ok()?;
        Some(f(&mut value))
    }

    fn into_inner(self) -> T {
        self.0.into_inner()
    }
}

#[cfg(feature = "std")]
pub use self::timed::TimedMutex;

#[cfg(feature = "std")]
mod timed {
    use super::AccessGuard;
    use core::time::Duration;
    use parking_lot::Mutex;

    /// Mutex-backed guard with a bounded wait
    pub struct TimedMutex<T>(Mutex<T>);

    impl<T> AccessGuard<T> for TimedMutex<T> {
        fn new(value: T) -> Self {
            TimedMutex(Mutex::new(value))
        }

        fn with_access<R, F>(&self, timeout: Duration, f: F) -> Option<R>
        where
            F: FnOnce(&mut T) -> R,
        {
            let mut value = self.0.try_lock_for(timeout)?;
            Some(f(&mut value))
        }

        fn into_inner(self) -> T {
            self.0.into_inner()
        }
    }
}
