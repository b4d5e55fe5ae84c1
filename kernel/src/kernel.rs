//! Scheduler core instance
//!
//! [`Kernel`] owns every control block. It is built once, before any
//! processor takes interrupts, and each processor then joins with
//! [`Kernel::start_processor`].

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, info};
use strand_api::{
    Context, Error, Irql, Milliseconds, Platform, ProcessorId, Result, SchedulerConfig, Stack,
    ThreadId, Vector, IDLE_PRIORITY, MAX_THREADS,
};

use crate::cpu::{ProcessorBlock, StatsSnapshot};
use crate::interrupt::{clock_handler, ipi_handler};
use crate::sync::IrqlSpinLock;
use crate::thread::table::GlobalTable;
use crate::thread::tcb::{ThreadControlBlock, ThreadFlags, ThreadHandle, ThreadParams};

/// The scheduler core
pub struct Kernel {
    platform: &'static dyn Platform,
    config: SchedulerConfig,
    quantum_ms: AtomicU32,
    processors: Box<[ProcessorBlock]>,
    threads: Box<[ThreadControlBlock]>,
    table: IrqlSpinLock<GlobalTable>,
    shut_down: AtomicBool,
}

impl Kernel {
    /// Builds all processor blocks and idle threads
    ///
    /// No processor is online afterwards; each one has to call
    /// [`Kernel::start_processor`].
    pub fn new(platform: &'static dyn Platform, config: SchedulerConfig) -> Result<Box<Kernel>> {
        let available = platform.processor_count();
        config.validate(available)?;
        let count = config.resolved_processors(available);

        let processors: Box<[ProcessorBlock]> = (0..count)
            .map(|index| ProcessorBlock::new(ProcessorId(index as u8), ThreadId(index as u8)))
            .collect();
        let threads: Box<[ThreadControlBlock]> = (0..MAX_THREADS)
            .map(|index| ThreadControlBlock::new(ThreadId(index as u8)))
            .collect();

        let now = platform.now();
        for cpu in processors.iter() {
            let idle = &threads[cpu.idle_thread().index()];
            idle.prepare(ThreadParams {
                context: Context::zeroed(),
                processor: cpu.number(),
                priority: IDLE_PRIORITY,
                priority_boost: 0,
                max_priority_boost: 0,
                suspend_count: 0,
                stack: None,
                now,
            });
            idle.set(ThreadFlags::VALID | ThreadFlags::HANDLE_OPEN | ThreadFlags::IDLE);

            *cpu.vectors[Vector::CLOCK.index()].write() = Some(clock_handler);
            *cpu.vectors[Vector::IPI.index()].write() = Some(ipi_handler);
        }

        info!(
            "scheduler core: {} of {} processors, quantum {} ms",
            count, available, config.quantum_ms
        );

        Ok(Box::new(Kernel {
            platform,
            config,
            quantum_ms: AtomicU32::new(config.quantum_ms),
            processors,
            threads,
            table: IrqlSpinLock::new(GlobalTable::new(count)),
            shut_down: AtomicBool::new(false),
        }))
    }

    /// Brings the calling processor online
    ///
    /// The calling execution becomes the processor's idle thread.
    pub fn start_processor(&self) -> Result<()> {
        let id = self.platform.current_processor();
        let cpu = self.processor(id)?;
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::InvalidState("scheduler has been shut down"));
        }
        if cpu.set_online(true) {
            return Err(Error::InvalidState("processor already online"));
        }

        let idle = self.thread(cpu.idle_thread());
        idle.set(ThreadFlags::RUNNING);
        cpu.set_current(idle.id());
        cpu.set_quantum_end(self.platform.now().saturating_add(self.quantum_ticks()));
        self.set_irql(cpu, Irql::PASSIVE);

        info!("{} online", id);
        Ok(())
    }

    /// Takes every processor offline and releases every thread
    ///
    /// Stacks of threads that were never closed are returned to the platform.
    /// Control blocks stay allocated.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidState("scheduler already shut down"));
        }
        for cpu in self.processors.iter() {
            cpu.set_online(false);
        }

        for cpu in self.processors.iter() {
            let mut lists = cpu.lists.lock(self);
            while lists.full.pop_front().is_some() {}
            while lists.ready.pop_front().is_some() {}
            let mut swap = cpu.swap.lock(self);
            swap.clear();
        }

        let mut stacks: heapless::Vec<Stack, MAX_THREADS> = heapless::Vec::new();
        {
            let mut table = self.table.lock(self);
            let live: heapless::Vec<ThreadId, MAX_THREADS> = table
                .all()
                .iter()
                .filter(|&id| !self.thread(id).is_idle())
                .collect();
            for id in live {
                let tcb = self.thread(id);
                if let Some(stack) = tcb.take_stack() {
                    let _ = stacks.push(stack);
                }
                tcb.retire();
                table.release(id);
            }
        }

        let released = stacks.len();
        for stack in stacks {
            self.platform.free_stack(stack);
        }
        info!("scheduler core shut down, {} threads released", released);
        Ok(())
    }

    /// Parks the calling processor's idle thread
    pub fn idle_loop(&self) -> ! {
        loop {
            self.platform.wait_for_interrupt();
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Control block of the calling processor
    ///
    /// # Panics
    ///
    /// If the platform reports a processor outside the configured set.
    #[inline]
    pub fn this_processor(&self) -> &ProcessorBlock {
        &self.processors[self.platform.current_processor().index()]
    }

    pub fn processor(&self, id: ProcessorId) -> Result<&ProcessorBlock> {
        self.processors
            .get(id.index())
            .ok_or(Error::InvalidProcessor(id))
    }

    /// Number of managed processors
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn online_processors(&self) -> usize {
        self.processors.iter().filter(|cpu| cpu.is_online()).count()
    }

    pub fn processor_stats(&self, id: ProcessorId) -> Result<StatsSnapshot> {
        Ok(self.processor(id)?.stats())
    }

    #[inline]
    pub(crate) fn processors(&self) -> &[ProcessorBlock] {
        &self.processors
    }

    #[inline]
    pub(crate) fn thread(&self, id: ThreadId) -> &ThreadControlBlock {
        &self.threads[id.index()]
    }

    /// Control block behind `handle`, if the handle is still valid
    pub(crate) fn resolve(&self, handle: ThreadHandle) -> Result<&ThreadControlBlock> {
        let tcb = self.thread(handle.id());
        if tcb.matches(handle) {
            Ok(tcb)
        } else {
            Err(Error::InvalidHandle)
        }
    }

    pub(crate) fn table(&self) -> &IrqlSpinLock<GlobalTable> {
        &self.table
    }

    // ========================================================================
    // Quantum
    // ========================================================================

    /// Scheduling quantum in milliseconds
    pub fn quantum_length(&self) -> Milliseconds {
        self.quantum_ms.load(Ordering::Acquire)
    }

    /// Changes the quantum; deadlines already armed are not moved
    pub fn set_quantum_length(&self, ms: Milliseconds) -> Result<()> {
        if ms == 0 {
            return Err(Error::InvalidArgument("quantum must be at least one millisecond"));
        }
        let old = self.quantum_ms.swap(ms, Ordering::AcqRel);
        debug!("quantum {} ms -> {} ms", old, ms);
        Ok(())
    }
}
