//! Hardware seam
//!
//! Everything the scheduler core needs from the machine goes through the
//! [`Platform`] trait: which processor is executing, the timebase, interrupt
//! masking, the hardware IPI line, stack memory and the raw register switch.
//! A board support layer implements it for real silicon; the hosted
//! simulator implements it for tests.

use crate::context::Context;
use crate::types::{Irql, ProcessorId, Ticks};

/// Thread entry point: receives the creation argument, returns the exit code
pub type ThreadEntry = extern "C" fn(usize) -> u32;

/// Stack memory handed out by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    /// Lowest address of the region
    pub base: u64,
    /// Size in bytes
    pub size: usize,
}

impl Stack {
    /// One past the highest address, where a descending stack starts
    #[inline]
    pub fn top(&self) -> u64 {
        self.base + self.size as u64
    }
}

/// Interrupt enable state captured by [`Platform::disable_interrupts`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState(pub bool);

impl InterruptState {
    /// Whether interrupts were enabled when the state was captured
    #[inline]
    pub fn was_enabled(self) -> bool {
        self.0
    }
}

/// Machine services required by the scheduler core
///
/// Implementations must be callable from every processor at once.
pub trait Platform: Sync {
    /// Number of processors present
    fn processor_count(&self) -> usize;

    /// Processor executing the caller
    ///
    /// Must be O(1) and must not allocate or take locks.
    fn current_processor(&self) -> ProcessorId;

    /// Current timebase value
    fn now(&self) -> Ticks;

    /// Timebase ticks per millisecond
    fn ticks_per_ms(&self) -> Ticks;

    /// Masks interrupt delivery on the calling processor
    fn disable_interrupts(&self) -> InterruptState;

    /// Restores a state captured by [`Platform::disable_interrupts`]
    fn restore_interrupts(&self, state: InterruptState);

    /// Programs the interrupt controller's priority gate for the caller
    fn set_hardware_irql(&self, irql: Irql);

    /// Raises the inter-processor interrupt on `target`
    fn raise_ipi(&self, target: ProcessorId);

    /// Allocates a thread stack, `None` when memory is exhausted
    fn allocate_stack(&self, size: usize) -> Option<Stack>;

    /// Returns a stack obtained from [`Platform::allocate_stack`]
    fn free_stack(&self, stack: Stack);

    /// Address new threads return to when their entry point returns
    fn thread_exit_trampoline(&self) -> u64;

    /// Machine state a new thread starts with
    fn initial_msr(&self) -> u64;

    /// Saves the caller's registers into `from` and resumes `to`
    ///
    /// Called with interrupts masked. Returns when something later switches
    /// back to `from`.
    fn switch_context(&self, from: &mut Context, to: &Context);

    /// Snapshots the caller's registers
    fn save_context(&self, ctx: &mut Context);

    /// Loads a register snapshot; on hardware this does not return
    fn load_context(&self, ctx: &Context);

    /// Halts until the next interrupt
    fn wait_for_interrupt(&self);
}
