//! IRQL management and the spinlock primitive
//!
//! Every processor runs at an interrupt request level. Only interrupt
//! sources above the current level are delivered; anything at or below it is
//! latched and replayed when the level drops. Dropping below `DISPATCH` in
//! thread context also runs a scheduling pass that was requested while the
//! level was high.
//!
//! Raise/lower pairs must nest strictly: `lower_irql` must be given exactly
//! the value the matching `raise_irql` (or `spinlock`) returned.

use core::sync::atomic::{AtomicU32, Ordering};

use strand_api::{Error, InterruptState, Irql, Result};

use crate::cpu::ProcessorBlock;
use crate::kernel::Kernel;
use crate::sched::SwitchOrigin;

impl Kernel {
    /// IRQL of the calling processor
    pub fn current_irql(&self) -> Irql {
        self.this_processor().irql()
    }

    /// Raises the calling processor to `level`, returns the previous level
    ///
    /// # Panics
    ///
    /// If `level` is below the current level.
    pub fn raise_irql(&self, level: Irql) -> Irql {
        let cpu = self.this_processor();
        let previous = cpu.irql();
        assert!(
            level >= previous,
            "raise_irql: {} is below the current level {}",
            level,
            previous
        );
        if level != previous {
            self.set_irql(cpu, level);
        }
        previous
    }

    /// Lowers the calling processor to `level`
    ///
    /// Interrupts latched while the level was higher are delivered now, and
    /// a requested dispatch runs once the level is below `DISPATCH`.
    ///
    /// # Panics
    ///
    /// If `level` is above the current level.
    pub fn lower_irql(&self, level: Irql) {
        let cpu = self.this_processor();
        let current = cpu.irql();
        assert!(
            level <= current,
            "lower_irql: {} is above the current level {}",
            level,
            current
        );
        self.set_irql(cpu, level);
        self.replay_pending(cpu, level);

        if level < Irql::DISPATCH && !cpu.in_interrupt() && cpu.dispatch_pending() {
            let state = self.platform().disable_interrupts();
            self.reschedule(cpu, SwitchOrigin::Voluntary);
            self.platform().restore_interrupts(state);
        }
    }

    /// Sets the level without replaying or dispatching
    pub(crate) fn set_irql(&self, cpu: &ProcessorBlock, level: Irql) {
        cpu.store_irql(level);
        self.platform().set_hardware_irql(level);
    }

    /// Acquires `lock`, returns the IRQL to hand back to [`Kernel::unlock`]
    ///
    /// The calling processor is raised to `DISPATCH` (or stays where it is if
    /// already higher) before spinning.
    pub fn spinlock(&self, lock: &AtomicU32) -> Irql {
        let level = self.current_irql().max(Irql::DISPATCH);
        let previous = self.raise_irql(level);
        while lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while lock.load(Ordering::Relaxed) != 0 {
                core::hint::spin_loop();
            }
        }
        previous
    }

    /// Releases `lock` and lowers to `irql`
    ///
    /// # Panics
    ///
    /// If `lock` is not held.
    pub fn unlock(&self, lock: &AtomicU32, irql: Irql) {
        let held = lock.swap(0, Ordering::Release);
        assert!(held != 0, "unlock of a spinlock that is not held");
        self.lower_irql(irql);
    }

    /// Masks interrupt delivery on the calling processor only
    ///
    /// Stops scheduling and IPI delivery here and delays every processor
    /// that waits on this one. Keep masked sections short.
    pub fn disable_interrupts(&self) -> InterruptState {
        self.platform().disable_interrupts()
    }

    /// Restores a state returned by [`Kernel::disable_interrupts`]
    pub fn enable_interrupts(&self, state: InterruptState) {
        self.platform().restore_interrupts(state);
    }

    /// Checks that the calling thread may give up its processor
    pub(crate) fn ensure_can_block(&self, cpu: &ProcessorBlock) -> Result<()> {
        if cpu.in_interrupt() {
            return Err(Error::NotInThreadContext);
        }
        if cpu.irql() >= Irql::DISPATCH {
            return Err(Error::InvalidState("cannot yield at DISPATCH or above"));
        }
        if !cpu.is_online() {
            return Err(Error::InvalidState("processor is offline"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_api::SchedulerConfig;
    use strand_sim::SimPlatform;

    fn started() -> (&'static SimPlatform, alloc::boxed::Box<Kernel>) {
        let sim = SimPlatform::new(1).leak();
        let kernel = Kernel::new(sim, SchedulerConfig::default()).unwrap();
        kernel.start_processor().unwrap();
        (sim, kernel)
    }

    #[test]
    fn test_nested_raise_lower_restores_exactly() {
        let (sim, kernel) = started();
        let a = kernel.raise_irql(Irql(4));
        let b = kernel.raise_irql(Irql(12));
        let c = kernel.raise_irql(Irql::HIGH);
        assert_eq!((a, b, c), (Irql::PASSIVE, Irql(4), Irql(12)));

        kernel.lower_irql(c);
        assert_eq!(kernel.current_irql(), Irql(12));
        kernel.lower_irql(b);
        assert_eq!(kernel.current_irql(), Irql(4));
        kernel.lower_irql(a);
        assert_eq!(kernel.current_irql(), Irql::PASSIVE);
        assert_eq!(sim.hardware_irql(strand_api::ProcessorId(0)), Irql::PASSIVE);
    }

    #[test]
    fn test_spinlock_raises_to_dispatch() {
        let (_sim, kernel) = started();
        let lock = AtomicU32::new(0);
        let irql = kernel.spinlock(&lock);
        assert_eq!(irql, Irql::PASSIVE);
        assert_eq!(kernel.current_irql(), Irql::DISPATCH);
        assert_eq!(lock.load(Ordering::Relaxed), 1);
        kernel.unlock(&lock, irql);
        assert_eq!(kernel.current_irql(), Irql::PASSIVE);
        assert_eq!(lock.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_spinlock_keeps_higher_level() {
        let (_sim, kernel) = started();
        let outer = kernel.raise_irql(Irql::CLOCK);
        let lock = AtomicU32::new(0);
        let irql = kernel.spinlock(&lock);
        assert_eq!(irql, Irql::CLOCK);
        assert_eq!(kernel.current_irql(), Irql::CLOCK);
        kernel.unlock(&lock, irql);
        kernel.lower_irql(outer);
    }

    #[test]
    #[should_panic(expected = "below the current level")]
    fn test_raise_below_current_panics() {
        let (_sim, kernel) = started();
        kernel.raise_irql(Irql::CLOCK);
        kernel.raise_irql(Irql::DISPATCH);
    }

    #[test]
    #[should_panic(expected = "above the current level")]
    fn test_lower_above_current_panics() {
        let (_sim, kernel) = started();
        kernel.lower_irql(Irql::DISPATCH);
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn test_unlock_free_lock_panics() {
        let (_sim, kernel) = started();
        let lock = AtomicU32::new(0);
        kernel.unlock(&lock, Irql::PASSIVE);
    }

    #[test]
    fn test_cannot_block_at_dispatch() {
        let (_sim, kernel) = started();
        let previous = kernel.raise_irql(Irql::DISPATCH);
        assert!(kernel.ensure_can_block(kernel.this_processor()).is_err());
        kernel.lower_irql(previous);
        assert!(kernel.ensure_can_block(kernel.this_processor()).is_ok());
    }
}
