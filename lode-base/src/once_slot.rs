use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// A thread-safe container that holds at most one value, written exactly once.
/// The slot starts empty, may be initialized from any thread with `set`, and
/// is read by shared reference afterwards. Values set in the slot are
/// immutable. Calling `set` a second time panics.
///
/// Readers that race with a concurrent `set` simply observe the slot as
/// empty; a reader that sees `READY` is guaranteed to see the fully written
/// value (release store in `set`, acquire load in `get`).
pub struct OnceSlot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// The slot hands out &T only after the value is fully initialized and never
// mutates it afterwards.
unsafe impl<T: Send> Send for OnceSlot<T> {}
unsafe impl<T: Send + Sync> Sync for OnceSlot<T> {}

impl<T> Default for OnceSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceSlot<T> {
    pub fn new() -> Self {
        OnceSlot {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Initializes the slot. Panics if the slot was already set, including
    /// when another thread is in the middle of setting it.
    pub fn set(
        &self,
        value: T,
    ) {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .unwrap_or_else(|_| panic!("OnceSlot set more than once"));

        unsafe {
            // SAFETY: The compare_exchange above guarantees exactly one
            // thread ever reaches this write, and no reader dereferences the
            // cell until the READY store below is visible.
            (*self.value.get()).write(value);
        }

        self.state.store(READY, Ordering::Release);
    }

    /// Returns the value if the slot has been set.
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) != READY {
            return None;
        }

        unsafe {
            // SAFETY: READY is only stored after the value is written, and
            // the value is never written again or mutated.
            Some((*self.value.get()).assume_init_ref())
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }
}

impl<T> Drop for OnceSlot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            unsafe {
                // SAFETY: READY implies the value was initialized.
                (*self.value.get()).assume_init_drop();
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for OnceSlot<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("OnceSlot").field("value", &self.get()).finish()
    }
}
