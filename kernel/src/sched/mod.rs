//! Per-processor priority scheduler
//!
//! Each processor schedules only its own threads, under its own list lock:
//!
//! 1. Finish the bookkeeping of the previous voluntary switch.
//! 2. Adopt threads other processors staged on the swap queue.
//! 3. Housekeeping over the full list: reap terminated threads and charge
//!    elapsed time against sleep countdowns, readying expired sleepers.
//! 4. Requeue the outgoing thread at the tail if it can still run here.
//! 5. Pick the ready thread with the highest effective priority (FIFO among
//!    equals), or the idle thread when nothing is ready.
//!
//! A pass triggered from the trap exit path moves registers between the trap
//! frame and the control blocks; every other pass goes through
//! [`Platform::switch_context`](strand_api::Platform::switch_context).

pub mod policy;

use log::{debug, trace};
use strand_api::{Irql, ThreadId, Ticks};

use crate::cpu::{ProcessorBlock, ProcessorLists};
use crate::kernel::Kernel;
use crate::thread::tcb::{ThreadControlBlock, ThreadFlags};

use self::policy::Candidate;

/// Where a scheduling pass was entered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwitchOrigin {
    /// Outermost exit of the interrupt dispatcher
    Interrupt,
    /// A thread giving up its processor
    Voluntary,
}

/// Outcome of a pass that needs a voluntary register switch
#[derive(Debug, Clone, Copy)]
struct Switch {
    from: ThreadId,
    to: ThreadId,
}

impl Kernel {
    /// Quantum length in timebase ticks
    pub(crate) fn quantum_ticks(&self) -> Ticks {
        u64::from(self.quantum_length()).saturating_mul(self.platform().ticks_per_ms())
    }

    /// Clears the running flag of the thread switched off last on `cpu`
    ///
    /// Any code executing on `cpu` proves that switch has completed.
    pub(crate) fn finish_switch(&self, cpu: &ProcessorBlock) {
        if let Some(previous) = cpu.take_previous() {
            self.thread(previous).clear(ThreadFlags::RUNNING);
        }
    }

    /// Clock vector work: request a dispatch once the quantum has run out
    pub(crate) fn clock_tick(&self, cpu: &ProcessorBlock) {
        cpu.stats.record_tick();
        if self.platform().now() >= cpu.quantum_end() {
            cpu.request_dispatch();
        }
    }

    /// Makes an idle processor dispatch on its next clock tick
    pub(crate) fn nudge(&self, cpu: &ProcessorBlock) {
        if cpu.is_idle() {
            cpu.set_quantum_end(0);
        }
    }

    /// Gives up the calling processor after `prepare` updated the current thread
    ///
    /// In interrupt context or at `DISPATCH` and above the switch is only
    /// requested; it happens when the processor drops back below `DISPATCH`.
    pub(crate) fn yield_current<F>(&self, prepare: F)
    where
        F: FnOnce(&ThreadControlBlock),
    {
        let state = self.platform().disable_interrupts();
        let cpu = self.this_processor();
        prepare(self.thread(cpu.current()));
        if cpu.in_interrupt() || cpu.irql() >= Irql::DISPATCH {
            cpu.request_dispatch();
        } else {
            self.reschedule(cpu, SwitchOrigin::Voluntary);
        }
        self.platform().restore_interrupts(state);
    }

    /// Runs a scheduling pass on `cpu` and performs the resulting switch
    ///
    /// Interrupts must be masked on the calling processor.
    pub(crate) fn reschedule(&self, cpu: &ProcessorBlock, origin: SwitchOrigin) {
        if !cpu.is_online() {
            return;
        }
        if !cpu.enter_scheduler() {
            cpu.request_dispatch();
            return;
        }
        cpu.take_dispatch_request();

        let entry = cpu.irql();
        if entry < Irql::DISPATCH {
            self.set_irql(cpu, Irql::DISPATCH);
        }
        let switch = self.scheduling_pass(cpu, origin);
        cpu.leave_scheduler();
        if entry < Irql::DISPATCH {
            self.set_irql(cpu, entry);
            self.replay_pending(cpu, entry);
        }

        if let Some(Switch { from, to }) = switch {
            let outgoing = self.thread(from);
            let incoming = self.thread(to);
            // SAFETY: both threads belong to this processor, interrupts are
            // masked and `from != to`, so nothing else touches either context.
            let (save, load) = unsafe { (outgoing.context_mut(), incoming.context_ref()) };
            self.platform().switch_context(save, load);
            // Back on `from`, possibly on another processor.
            self.finish_switch(self.this_processor());
        }
    }

    fn scheduling_pass(&self, cpu: &ProcessorBlock, origin: SwitchOrigin) -> Option<Switch> {
        self.finish_switch(cpu);

        let now = self.platform().now();
        let quantum = self.quantum_ticks();
        let current = cpu.current();
        let mut lists = cpu.lists.lock(self);

        self.adopt_staged(cpu, &mut lists, now);
        self.housekeeping(&mut lists, current, now);

        let outgoing = self.thread(current);
        if !outgoing.is_idle()
            && outgoing.processor() == cpu.number()
            && outgoing.is_eligible()
            && lists.ready.push_back(current)
        {
            outgoing.mark_ready(now);
        }

        let candidates = lists
            .ready
            .iter()
            .filter(|&id| id == current || !self.thread(id).is_running())
            .map(|id| self.candidate(id));
        let next = match policy::select(candidates, now, quantum) {
            Some(id) => {
                lists.ready.remove(id);
                id
            }
            None => {
                cpu.stats.record_idle();
                cpu.idle_thread()
            }
        };
        cpu.set_quantum_end(now.saturating_add(quantum));

        if next == current {
            return None;
        }

        let incoming = self.thread(next);
        incoming.set(ThreadFlags::RUNNING);
        cpu.set_current(next);
        cpu.stats.record_switch(origin == SwitchOrigin::Interrupt);
        trace!("{}: {} -> {} ({:?})", cpu.number(), current, next, origin);

        match origin {
            SwitchOrigin::Interrupt => {
                // SAFETY: we are on the exit path of the outermost trap of this
                // processor with interrupts masked; the frame and both contexts
                // are exclusively ours.
                unsafe {
                    let frame = cpu.trap_frame();
                    outgoing.context_mut().capture(frame);
                    incoming.context_ref().apply(frame);
                }
                outgoing.clear(ThreadFlags::RUNNING);
                None
            }
            SwitchOrigin::Voluntary => {
                cpu.set_previous(current);
                Some(Switch {
                    from: current,
                    to: next,
                })
            }
        }
    }

    fn candidate(&self, id: ThreadId) -> Candidate {
        let tcb = self.thread(id);
        Candidate {
            id,
            priority: tcb.priority(),
            boost: tcb.priority_boost(),
            max_boost: tcb.max_priority_boost(),
            ready_since: tcb.ready_since(),
        }
    }

    /// Moves threads staged by other processors into `cpu`'s lists
    fn adopt_staged(&self, cpu: &ProcessorBlock, lists: &mut ProcessorLists, now: Ticks) {
        let mut swap = cpu.swap.lock(self);
        while let Some(id) = swap.pop_front() {
            let tcb = self.thread(id);
            lists.full.push_back(id);
            if tcb.is_eligible() && lists.ready.push_back(id) {
                tcb.mark_ready(now);
            }
            debug!("{}: adopted {}", cpu.number(), id);
        }
    }

    fn housekeeping(&self, lists: &mut ProcessorLists, current: ThreadId, now: Ticks) {
        let mut cursor = lists.full.head();
        while let Some(id) = cursor {
            cursor = lists.full.next(id);
            let tcb = self.thread(id);

            if tcb.is_terminated() {
                if id != current && !tcb.is_running() {
                    lists.ready.remove(id);
                    lists.full.remove(id);
                    debug!("reaped {} (exit code {})", id, tcb.exit_code());
                }
                continue;
            }

            if tcb.is_sleeping() && tcb.charge_sleep(now) {
                tcb.clear(ThreadFlags::SLEEPING);
                if id != current && tcb.is_eligible() && lists.ready.push_back(id) {
                    tcb.mark_ready(now);
                }
            }
        }
    }
}
