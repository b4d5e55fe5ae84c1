//! Interrupt dispatcher
//!
//! The trap entry code saves the interrupted registers into the processor's
//! trap frame and calls [`Kernel::dispatch_interrupt`] with the vector. Vector
//! `n` runs at IRQL `n`; a vector at or below the current level is latched
//! and delivered when the level drops.
//!
//! Only the outermost trap may switch threads: nested entries leave a
//! requested dispatch for the outermost exit.

use log::{trace, warn};
use strand_api::{Error, Irql, ProcessorId, Result, TrapFrame, Vector};

use crate::cpu::ProcessorBlock;
use crate::kernel::Kernel;
use crate::sched::SwitchOrigin;

/// Interrupt service routine, runs on the interrupted processor at the
/// vector's IRQL
pub type InterruptHandler = fn(&Kernel, Vector);

impl Kernel {
    /// Entry point of the trap entry code
    pub fn dispatch_interrupt(&self, vector: Vector) {
        let cpu = self.this_processor();
        let depth = cpu.enter_trap();
        if depth == 0 {
            self.finish_switch(cpu);
        }

        let interrupted = cpu.irql();
        self.deliver(cpu, vector);

        if depth == 0 && interrupted < Irql::DISPATCH && cpu.dispatch_pending() {
            self.reschedule(cpu, SwitchOrigin::Interrupt);
        }
        cpu.leave_trap();
    }

    /// Runs the handler of `vector` or latches it when masked
    pub(crate) fn deliver(&self, cpu: &ProcessorBlock, vector: Vector) {
        let previous = cpu.irql();
        if vector.irql() <= previous {
            cpu.latch(vector);
            cpu.stats.record_deferred();
            return;
        }

        self.set_irql(cpu, vector.irql());
        let handler = *cpu.vectors[vector.index()].read();
        match handler {
            Some(handler) => handler(self, vector),
            None => {
                cpu.stats.record_spurious();
                warn!("{}: spurious interrupt on vector {}", cpu.number(), vector.index());
            }
        }
        self.set_irql(cpu, previous);
        self.replay_pending(cpu, previous);
    }

    /// Delivers every latched vector above `level`, highest first
    pub(crate) fn replay_pending(&self, cpu: &ProcessorBlock, level: Irql) {
        while let Some(vector) = cpu.take_pending_above(level) {
            trace!("{}: replaying vector {}", cpu.number(), vector.index());
            cpu.enter_trap();
            self.deliver(cpu, vector);
            cpu.leave_trap();
        }
    }

    /// Installs `handler` for `vector` on `processor`
    ///
    /// Vector 0 runs at `PASSIVE`, which never preempts anything, so it
    /// cannot carry a handler.
    pub fn register_interrupt(
        &self,
        processor: ProcessorId,
        vector: Vector,
        handler: InterruptHandler,
    ) -> Result<()> {
        if vector.irql() == Irql::PASSIVE {
            return Err(Error::InvalidArgument("vector 0 is never delivered"));
        }
        let cpu = self.processor(processor)?;
        let mut slot = cpu.vectors[vector.index()].write();
        if slot.is_some() {
            return Err(Error::VectorInUse(vector));
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Removes the handler of `vector` on `processor`, returning it
    pub fn unregister_interrupt(
        &self,
        processor: ProcessorId,
        vector: Vector,
    ) -> Result<Option<InterruptHandler>> {
        let cpu = self.processor(processor)?;
        Ok(cpu.vectors[vector.index()].write().take())
    }

    /// Trap frame of the calling processor, for the trap entry glue
    ///
    /// # Safety
    ///
    /// The caller must be the trap entry path of this processor, with
    /// interrupts masked, and must not keep the reference across a call into
    /// the dispatcher.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn trap_frame(&self) -> &mut TrapFrame {
        // SAFETY: forwarded to the caller.
        unsafe { self.this_processor().trap_frame() }
    }
}

/// Clock vector
pub(crate) fn clock_handler(kernel: &Kernel, _vector: Vector) {
    kernel.clock_tick(kernel.this_processor());
}

/// Inter-processor interrupt vector
pub(crate) fn ipi_handler(kernel: &Kernel, _vector: Vector) {
    kernel.handle_ipi(kernel.this_processor());
}
