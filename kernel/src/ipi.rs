//! Inter-processor interrupts
//!
//! A broadcast stores `(routine, context, sender)` in the IPI slot of every
//! other online processor, raises the IPI line on each, then runs the routine
//! locally. Every execution, local or remote, bumps the sender's completion
//! counter if the broadcast is still the sender's latest one. Waiting for all processors is left to the caller, through
//! [`Kernel::wait_for_ipi`] or [`Kernel::ipi_completions`].
//!
//! Routines run at `IPI` level in interrupt context. They must not block,
//! sleep or yield.

use log::trace;
use strand_api::{Irql, ProcessorId, Result};

use crate::cpu::ProcessorBlock;
use crate::kernel::Kernel;

/// Function broadcast to every processor
pub type IpiRoutine = fn(usize);

/// Pending request in a processor's IPI slot
#[derive(Debug, Clone, Copy)]
pub struct IpiRequest {
    routine: IpiRoutine,
    context: usize,
    sender: ProcessorId,
    sequence: u32,
}

impl Kernel {
    /// Runs `routine(context)` once on every online processor
    ///
    /// Returns the calling processor, whose completion counter tracks the
    /// broadcast.
    pub fn send_ipi(&self, routine: IpiRoutine, context: usize) -> ProcessorId {
        let cpu = self.this_processor();
        let sender = cpu.number();
        let request = IpiRequest {
            routine,
            context,
            sender,
            sequence: cpu.begin_ipi(),
        };

        for target in self
            .processors()
            .iter()
            .filter(|target| target.number() != sender && target.is_online())
        {
            loop {
                let mut slot = target.ipi.lock(self);
                if slot.is_none() {
                    *slot = Some(request);
                    break;
                }
                drop(slot);
                core::hint::spin_loop();
            }
            self.platform().raise_ipi(target.number());
            trace!("{}: ipi -> {}", sender, target.number());
        }

        let previous = self.raise_irql(cpu.irql().max(Irql::IPI));
        routine(context);
        cpu.complete_ipi(request.sequence);
        self.lower_irql(previous);
        sender
    }

    /// Completions counted for the last broadcast of `sender`
    pub fn ipi_completions(&self, sender: ProcessorId) -> Result<u32> {
        Ok(self.processor(sender)?.ipi_completions())
    }

    /// Spins until every online processor has run the last broadcast of
    /// `sender`
    pub fn wait_for_ipi(&self, sender: ProcessorId) -> Result<()> {
        let cpu = self.processor(sender)?;
        while (cpu.ipi_completions() as usize) < self.online_processors() {
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// IPI vector work on the receiving processor
    pub(crate) fn handle_ipi(&self, cpu: &ProcessorBlock) {
        let request = cpu.ipi.lock(self).take();
        let Some(request) = request else {
            cpu.stats.record_spurious();
            return;
        };

        (request.routine)(request.context);
        let counted = self
            .processor(request.sender)
            .is_ok_and(|sender| sender.complete_ipi(request.sequence));
        if !counted {
            trace!(
                "{}: stale ipi #{} from {}",
                cpu.number(),
                request.sequence,
                request.sender
            );
        }
        cpu.stats.record_ipi();
        trace!("{}: ipi from {} done", cpu.number(), request.sender);
    }
}
