//! Synchronization primitives
//!
//! Everything here is built on the IRQL-aware spinlock in [`irql`]: acquiring
//! raises the calling processor to `DISPATCH` before spinning, so a lock
//! holder can never be preempted by the scheduler on its own processor.

pub mod irql;

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::AtomicU32;

use strand_api::Irql;

use crate::kernel::Kernel;

/// Spinlock-protected data that raises IRQL while held
pub struct IrqlSpinLock<T> {
    lock: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `lock`.
unsafe impl<T: Send> Send for IrqlSpinLock<T> {}
unsafe impl<T: Send> Sync for IrqlSpinLock<T> {}

impl<T> IrqlSpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the lock on the calling processor of `kernel`
    pub fn lock<'a>(&'a self, kernel: &'a Kernel) -> IrqlSpinLockGuard<'a, T> {
        let irql = kernel.spinlock(&self.lock);
        IrqlSpinLockGuard {
            lock: self,
            kernel,
            irql,
        }
    }

    /// Whether some processor holds the lock
    pub fn is_locked(&self) -> bool {
        self.lock.load(core::sync::atomic::Ordering::Relaxed) != 0
    }
}

/// RAII guard of an [`IrqlSpinLock`]
///
/// Dropping releases the lock and restores the IRQL observed at acquisition.
/// Guards must be dropped in reverse acquisition order.
pub struct IrqlSpinLockGuard<'a, T> {
    lock: &'a IrqlSpinLock<T>,
    kernel: &'a Kernel,
    irql: Irql,
}

impl<T> IrqlSpinLockGuard<'_, T> {
    /// IRQL that will be restored on release
    pub fn saved_irql(&self) -> Irql {
        self.irql
    }
}

impl<T> Deref for IrqlSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqlSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqlSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.kernel.unlock(&self.lock.lock, self.irql);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_api::SchedulerConfig;
    use strand_sim::SimPlatform;

    #[test]
    fn test_guard_restores_level_in_reverse_order() {
        let sim = SimPlatform::new(1).leak();
        let kernel = Kernel::new(sim, SchedulerConfig::default()).unwrap();
        kernel.start_processor().unwrap();
        let outer = IrqlSpinLock::new(1u32);
        let inner = IrqlSpinLock::new(2u32);

        {
            let mut first = outer.lock(&kernel);
            assert!(outer.is_locked());
            assert_eq!(first.saved_irql(), Irql::PASSIVE);
            assert_eq!(kernel.current_irql(), Irql::DISPATCH);
            *first += 10;

            let second = inner.lock(&kernel);
            assert_eq!(second.saved_irql(), Irql::DISPATCH);
            assert_eq!(*second, 2);
            drop(second);
            assert!(!inner.is_locked());
            assert_eq!(kernel.current_irql(), Irql::DISPATCH);
        }

        assert!(!outer.is_locked());
        assert_eq!(kernel.current_irql(), Irql::PASSIVE);
        assert_eq!(*outer.lock(&kernel), 11);
    }
}
