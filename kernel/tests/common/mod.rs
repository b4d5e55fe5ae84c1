//! Common test utilities for kernel integration tests

#![allow(dead_code)]

use strand_api::{ProcessorId, SchedulerConfig, ThreadId, Vector};
use strand_kernel::Kernel;
use strand_sim::{bind_processor, SimPlatform};

/// Entry point for threads whose body never actually runs on the simulator
pub extern "C" fn entry(arg: usize) -> u32 {
    arg as u32
}

/// Boots a kernel on `processors` simulated processors, all online
///
/// The calling OS thread is left bound to processor 0.
pub fn boot(processors: usize) -> (&'static SimPlatform, &'static Kernel) {
    boot_with(processors, SchedulerConfig::default())
}

pub fn boot_with(
    processors: usize,
    config: SchedulerConfig,
) -> (&'static SimPlatform, &'static Kernel) {
    let sim = SimPlatform::new(processors).leak();
    let kernel: &'static Kernel = Box::leak(Kernel::new(sim, config).expect("kernel"));
    for index in (0..kernel.processor_count()).rev() {
        bind_processor(ProcessorId(index as u8));
        kernel.start_processor().expect("processor start");
    }
    (sim, kernel)
}

/// Advances the timebase by `ms` and delivers a clock interrupt to the bound
/// processor
pub fn tick(sim: &SimPlatform, kernel: &Kernel, ms: u64) {
    sim.advance_ms(ms);
    kernel.dispatch_interrupt(Vector::CLOCK);
}

/// Ticks one millisecond at a time until `processor` runs `id`
///
/// Returns the number of milliseconds it took, `None` after `limit`.
pub fn tick_until(
    sim: &SimPlatform,
    kernel: &Kernel,
    processor: u8,
    id: ThreadId,
    limit: u64,
) -> Option<u64> {
    for elapsed in 1..=limit {
        tick(sim, kernel, 1);
        if current(kernel, processor) == id {
            return Some(elapsed);
        }
    }
    None
}

pub fn current(kernel: &Kernel, processor: u8) -> ThreadId {
    kernel
        .current_thread(ProcessorId(processor))
        .expect("valid processor")
}

pub fn ready(kernel: &Kernel, processor: u8) -> Vec<ThreadId> {
    kernel
        .ready_threads(ProcessorId(processor))
        .expect("valid processor")
        .iter()
        .copied()
        .collect()
}
