//! Strand Kernel Library
//!
//! SMP priority-preemptive thread scheduler core for a bare-metal, shared
//! address space system of up to six hardware threads.
//!
//! # Architecture
//!
//! - **Kernel** (`kernel`): the instance owning every control block
//! - **Processors** (`cpu`): per-processor blocks, lists and statistics
//! - **Threads** (`thread`): thread table, lifecycle and scheduling parameters
//! - **Scheduler** (`sched`): per-processor scheduling pass and selection policy
//! - **Interrupts** (`interrupt`, `ipi`): vector dispatch, IRQL latching and
//!   broadcast inter-processor calls
//! - **Synchronization** (`sync`): IRQL management and the spinlock
//! - **Context** (`context`): explicit register snapshots
//!
//! The hardware is reached only through [`strand_api::Platform`].
//!
//! # Usage
//!
//! ```no_run
//! use strand_api::{CreateFlags, Platform, SchedulerConfig};
//!
//! extern "C" fn worker(arg: usize) -> u32 {
//!     arg as u32
//! }
//!
//! fn boot(platform: &'static dyn Platform) -> strand_api::Result<()> {
//!     let kernel = strand_kernel::init(platform, SchedulerConfig::default())?;
//!     let handle = kernel.create(worker, 0, 7, CreateFlags::empty())?;
//!     kernel.set_priority(handle, 9)?;
//!     kernel.idle_loop()
//! }
//! ```
//!
//! Secondary processors call [`Kernel::start_processor`] on the instance
//! returned by [`kernel`] once the boot processor has called [`init`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;

use log::info;
use spin::RwLock;

pub mod context;
pub mod cpu;
pub mod interrupt;
pub mod ipi;
pub mod kernel;
pub mod sched;
pub mod sync;
pub mod thread;

pub use crate::cpu::StatsSnapshot;
pub use crate::interrupt::InterruptHandler;
pub use crate::ipi::IpiRoutine;
pub use crate::kernel::Kernel;
pub use crate::thread::ThreadHandle;
pub use strand_api::{
    Context, CreateFlags, Error, Irql, Platform, ProcessorId, Result, SchedulerConfig, ThreadId,
    ThreadState, Vector,
};

/// The instance published by [`init`]
static KERNEL: RwLock<Option<&'static Kernel>> = RwLock::new(None);

/// Builds the scheduler core and brings the calling processor online
///
/// The instance lives for the rest of the program; [`shutdown`] stops it but
/// does not free it.
pub fn init(platform: &'static dyn Platform, config: SchedulerConfig) -> Result<&'static Kernel> {
    let mut slot = KERNEL.write();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    let kernel: &'static Kernel = Box::leak(Kernel::new(platform, config)?);
    kernel.start_processor()?;
    *slot = Some(kernel);
    info!("strand kernel initialized");
    Ok(kernel)
}

/// The instance published by [`init`]
pub fn kernel() -> Result<&'static Kernel> {
    (*KERNEL.read()).ok_or(Error::NotInitialized)
}

/// Shuts the published instance down and unpublishes it
pub fn shutdown() -> Result<()> {
    let kernel = KERNEL.write().take().ok_or(Error::NotInitialized)?;
    kernel.shutdown()
}
