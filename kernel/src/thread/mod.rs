//! Thread lifecycle
//!
//! Threads live in a fixed table of [`MAX_THREADS`] slots indexed by
//! [`ThreadId`]. The first slots hold the per-processor idle threads; the
//! rest are handed out by `create` and returned by `close`:
//!
//! ```text
//! create ──► ready ◄──► running ──► terminated ──► close
//!              ▲  ╲        │
//!              │   ╲───────┼──► suspended / sleeping
//!              └───────────┘
//! ```
//!
//! Every operation taking a [`ThreadHandle`] rejects handles to closed
//! threads with [`Error::InvalidHandle`].

pub mod list;
pub mod table;
pub mod tcb;

use log::{debug, warn};
use strand_api::{
    Context, CreateFlags, Error, Milliseconds, ProcessorId, Result, ThreadEntry, ThreadId,
    ThreadState, MAX_PRIORITY, MAX_SUSPEND_COUNT, MAX_THREADS, MIN_THREAD_PRIORITY,
};

use crate::cpu::{ProcessorBlock, ProcessorLists, SwapQueue};
use crate::kernel::Kernel;

use self::tcb::{ThreadControlBlock, ThreadFlags, ThreadParams};

pub use self::tcb::ThreadHandle;

impl Kernel {
    // ========================================================================
    // Creation and teardown
    // ========================================================================

    /// Creates a thread owned by the calling processor
    ///
    /// A `stack_size` of zero selects the configured default. With
    /// [`CreateFlags::SUSPENDED`] the thread starts with a suspend count of
    /// one and stays off the ready list until resumed.
    pub fn create(
        &self,
        entry: ThreadEntry,
        stack_size: usize,
        argument: usize,
        flags: CreateFlags,
    ) -> Result<ThreadHandle> {
        let owner = self.processor(self.platform().current_processor())?;

        let allocated = self.table().lock(self).allocate();
        let Some(id) = allocated else {
            warn!("create: all {} thread slots in use", MAX_THREADS);
            return Err(Error::TooManyThreads);
        };

        let size = if stack_size == 0 {
            self.config().default_stack_size
        } else {
            stack_size
        };
        let Some(stack) = self.platform().allocate_stack(size) else {
            self.table().lock(self).release(id);
            warn!("create: no memory for a {} byte stack", size);
            return Err(Error::OutOfMemory);
        };

        let context = Context::for_entry(
            entry as usize as u64,
            argument as u64,
            stack.top(),
            self.platform().thread_exit_trampoline(),
            self.platform().initial_msr(),
        );
        let suspended = flags.contains(CreateFlags::SUSPENDED);
        let tcb = self.thread(id);
        tcb.prepare(ThreadParams {
            context,
            processor: owner.number(),
            priority: self.config().default_priority,
            priority_boost: self.config().default_priority_boost,
            max_priority_boost: self.config().max_priority_boost,
            suspend_count: u8::from(suspended),
            stack: Some(stack),
            now: self.platform().now(),
        });
        tcb.set(ThreadFlags::VALID | ThreadFlags::HANDLE_OPEN);
        let handle = tcb.handle();

        {
            let mut lists = owner.lists.lock(self);
            lists.full.push_back(id);
            if !suspended {
                lists.ready.push_back(id);
                self.nudge(owner);
            }
        }

        debug!(
            "created {} on {} (stack {:#x}, {} bytes{})",
            id,
            owner.number(),
            stack.base,
            stack.size,
            if suspended { ", suspended" } else { "" }
        );
        Ok(handle)
    }

    /// Releases a terminated thread
    ///
    /// Waits until the thread has been switched off its processor, unlinks it
    /// from every list, frees its stack and returns its identifier to the
    /// free pool. The handle is invalid afterwards.
    pub fn close(&self, handle: ThreadHandle) -> Result<()> {
        let tcb = self.resolve(handle)?;
        if !tcb.is_terminated() {
            return Err(Error::NotTerminated);
        }
        if !tcb.clear(ThreadFlags::HANDLE_OPEN).contains(ThreadFlags::HANDLE_OPEN) {
            return Err(Error::InvalidHandle);
        }

        self.finish_switch(self.this_processor());
        while tcb.is_running() {
            core::hint::spin_loop();
        }

        let id = tcb.id();
        self.with_owner_lists(tcb, |lists, owner| {
            lists.ready.remove(id);
            lists.full.remove(id);
            let mut swap = owner.swap.lock(self);
            remove_staged(&mut swap, id);
        });

        let stack = tcb.take_stack();
        tcb.retire();
        self.table().lock(self).release(id);
        if let Some(stack) = stack {
            self.platform().free_stack(stack);
        }
        debug!("closed {}", id);
        Ok(())
    }

    /// Handle of the thread running on the calling processor
    pub fn get_current(&self) -> Result<ThreadHandle> {
        let cpu = self.this_processor();
        if cpu.in_interrupt() {
            return Err(Error::NotInThreadContext);
        }
        Ok(self.thread(cpu.current()).handle())
    }

    // ========================================================================
    // Migration
    // ========================================================================

    /// Moves a thread to `processor`
    ///
    /// The thread leaves its current processor's lists and is staged on the
    /// destination's swap queue; the destination adopts it on its next
    /// scheduling pass. A thread migrating itself gives up its processor.
    pub fn set_processor(&self, handle: ThreadHandle, processor: ProcessorId) -> Result<()> {
        let tcb = self.resolve(handle)?;
        let dest = self.processor(processor)?;
        if tcb.is_idle() {
            return Err(Error::InvalidState("idle threads are bound to their processor"));
        }
        let id = tcb.id();

        let source_id = loop {
            let source_id = tcb.processor();
            if source_id == processor {
                return Ok(());
            }
            let source = self.processor(source_id)?;
            let (low, high) = if source_id < processor {
                (source, dest)
            } else {
                (dest, source)
            };
            let mut low_lists = low.lists.lock(self);
            let mut high_lists = high.lists.lock(self);
            if tcb.processor() != source_id {
                continue;
            }
            if tcb.is_terminated() {
                return Err(Error::InvalidState("thread has terminated"));
            }

            let source_lists = if source_id < processor {
                &mut low_lists
            } else {
                &mut high_lists
            };
            source_lists.ready.remove(id);
            source_lists.full.remove(id);
            remove_staged(&mut source.swap.lock(self), id);

            let mut swap = dest.swap.lock(self);
            if swap.push_back(id).is_err() {
                return Err(Error::InvalidState("swap queue full"));
            }
            tcb.set_processor(processor);
            tcb.mark_ready(self.platform().now());
            break source_id;
        };

        self.nudge(dest);
        debug!("migrating {} from {} to {}", id, source_id, processor);

        if self.this_processor().current() == id {
            self.yield_current(|_| {});
        }
        Ok(())
    }

    // ========================================================================
    // Blocking operations of the calling thread
    // ========================================================================

    /// Terminates the calling thread with `code`
    ///
    /// The control block is kept until [`Kernel::close`]. On hardware this
    /// never returns.
    pub fn terminate(&self, code: u32) -> Result<()> {
        let cpu = self.this_processor();
        self.ensure_can_block(cpu)?;
        let current = self.thread(cpu.current());
        if current.is_idle() {
            return Err(Error::InvalidState("idle thread cannot terminate"));
        }

        debug!("{} terminating with code {}", current.id(), code);
        self.yield_current(|tcb| {
            tcb.set_exit_code(code);
            tcb.set(ThreadFlags::TERMINATED);
        });
        Ok(())
    }

    /// Sleeps for at least `ms` milliseconds, zero just yields
    ///
    /// Wake-up happens on the first scheduling pass after the countdown has
    /// run out, so the actual delay is rounded up to the quantum.
    pub fn sleep(&self, ms: Milliseconds) -> Result<()> {
        let cpu = self.this_processor();
        self.ensure_can_block(cpu)?;
        if ms == 0 {
            self.yield_current(|_| {});
            return Ok(());
        }
        if self.thread(cpu.current()).is_idle() {
            return Err(Error::InvalidState("idle thread cannot sleep"));
        }

        let ticks = u64::from(ms).saturating_mul(self.platform().ticks_per_ms());
        let now = self.platform().now();
        self.yield_current(|tcb| tcb.begin_sleep(ticks, now));
        Ok(())
    }

    // ========================================================================
    // Suspend / resume
    // ========================================================================

    /// Increments the suspend count, returns the count before the change
    ///
    /// Crossing from 0 to 1 takes the thread off the ready list; a thread
    /// suspending itself gives up its processor.
    pub fn suspend(&self, handle: ThreadHandle) -> Result<u8> {
        let tcb = self.resolve(handle)?;
        if tcb.is_idle() {
            return Err(Error::InvalidState("idle thread cannot be suspended"));
        }
        let id = tcb.id();

        let previous = self.with_owner_lists(tcb, |lists, _| {
            let count = tcb.suspend_count();
            if count == MAX_SUSPEND_COUNT {
                return Err(Error::SuspendLimit);
            }
            tcb.set_suspend_count(count + 1);
            if count == 0 {
                lists.ready.remove(id);
            }
            Ok(count)
        })?;

        if previous == 0 && self.this_processor().current() == id {
            self.yield_current(|_| {});
        }
        Ok(previous)
    }

    /// Decrements the suspend count, returns the count before the change
    ///
    /// Crossing from 1 to 0 puts the thread back at the tail of the ready
    /// list, unless it is sleeping or terminated.
    pub fn resume(&self, handle: ThreadHandle) -> Result<u8> {
        let tcb = self.resolve(handle)?;
        let id = tcb.id();

        self.with_owner_lists(tcb, |lists, owner| {
            let count = tcb.suspend_count();
            if count == 0 {
                return Err(Error::NotSuspended);
            }
            tcb.set_suspend_count(count - 1);
            if count == 1
                && tcb.is_eligible()
                && owner.current() != id
                && lists.full.contains(id)
                && lists.ready.push_back(id)
            {
                tcb.mark_ready(self.platform().now());
                self.nudge(owner);
            }
            Ok(count)
        })
    }

    // ========================================================================
    // Scheduling parameters
    // ========================================================================

    /// Sets the base priority, `1..=15`
    pub fn set_priority(&self, handle: ThreadHandle, priority: u8) -> Result<()> {
        let tcb = self.resolve(handle)?;
        if tcb.is_idle() || !(MIN_THREAD_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(Error::InvalidPriority(priority));
        }
        tcb.set_priority(priority);
        Ok(())
    }

    pub fn set_priority_boost(&self, handle: ThreadHandle, boost: u8) -> Result<()> {
        let tcb = self.resolve(handle)?;
        if boost > MAX_PRIORITY {
            return Err(Error::InvalidArgument("priority boost out of range"));
        }
        tcb.set_priority_boost(boost);
        Ok(())
    }

    /// Sets the cap applied to the thread's boost
    pub fn set_max_priority_boost(&self, handle: ThreadHandle, max: u8) -> Result<()> {
        let tcb = self.resolve(handle)?;
        if max > MAX_PRIORITY {
            return Err(Error::InvalidArgument("priority boost cap out of range"));
        }
        tcb.set_max_priority_boost(max);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn thread_state(&self, handle: ThreadHandle) -> Result<ThreadState> {
        let tcb = self.resolve(handle)?;
        Ok(tcb.state(tcb.is_running()))
    }

    pub fn priority(&self, handle: ThreadHandle) -> Result<u8> {
        Ok(self.resolve(handle)?.priority())
    }

    pub fn priority_boost(&self, handle: ThreadHandle) -> Result<u8> {
        Ok(self.resolve(handle)?.priority_boost())
    }

    pub fn max_priority_boost(&self, handle: ThreadHandle) -> Result<u8> {
        Ok(self.resolve(handle)?.max_priority_boost())
    }

    pub fn suspend_count(&self, handle: ThreadHandle) -> Result<u8> {
        Ok(self.resolve(handle)?.suspend_count())
    }

    /// Processor that owns the thread (or will adopt it)
    pub fn processor_of(&self, handle: ThreadHandle) -> Result<ProcessorId> {
        Ok(self.resolve(handle)?.processor())
    }

    /// Code passed to `terminate`
    pub fn exit_code(&self, handle: ThreadHandle) -> Result<u32> {
        let tcb = self.resolve(handle)?;
        if !tcb.is_terminated() {
            return Err(Error::NotTerminated);
        }
        Ok(tcb.exit_code())
    }

    /// Opaque word attached to the thread
    pub fn user_data(&self, handle: ThreadHandle) -> Result<usize> {
        Ok(self.resolve(handle)?.user_data())
    }

    pub fn set_user_data(&self, handle: ThreadHandle, value: usize) -> Result<()> {
        self.resolve(handle)?.set_user_data(value);
        Ok(())
    }

    /// Live threads, idle threads included
    pub fn thread_count(&self) -> usize {
        self.table().lock(self).live()
    }

    /// Thread currently executing on `processor`
    pub fn current_thread(&self, processor: ProcessorId) -> Result<ThreadId> {
        Ok(self.processor(processor)?.current())
    }

    /// Ready list of `processor`, head first
    pub fn ready_threads(
        &self,
        processor: ProcessorId,
    ) -> Result<heapless::Vec<ThreadId, MAX_THREADS>> {
        let cpu = self.processor(processor)?;
        let lists = cpu.lists.lock(self);
        Ok(lists.ready.iter().collect())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Runs `f` under the list lock of the processor that owns `tcb`
    ///
    /// Retries if the thread migrates between reading its owner and taking
    /// the lock.
    fn with_owner_lists<R, F>(&self, tcb: &ThreadControlBlock, f: F) -> R
    where
        F: FnOnce(&mut ProcessorLists, &ProcessorBlock) -> R,
    {
        loop {
            let owner = &self.processors()[tcb.processor().index()];
            let mut lists = owner.lists.lock(self);
            if tcb.processor() == owner.number() {
                return f(&mut *lists, owner);
            }
        }
    }
}

/// Drops `id` from a swap queue, keeping the order of the others
fn remove_staged(queue: &mut SwapQueue, id: ThreadId) {
    for _ in 0..queue.len() {
        if let Some(staged) = queue.pop_front() {
            if staged != id {
                let _ = queue.push_back(staged);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Deque;

    #[test]
    fn test_remove_staged_keeps_order() {
        let mut queue: SwapQueue = Deque::new();
        for id in [3, 8, 5, 9] {
            queue.push_back(ThreadId(id)).unwrap();
        }
        remove_staged(&mut queue, ThreadId(5));
        let left: heapless::Vec<u8, 4> = queue.iter().map(|id| id.0).collect();
        assert_eq!(left.as_slice(), &[3, 8, 9]);

        remove_staged(&mut queue, ThreadId(42));
        assert_eq!(queue.len(), 3);
    }
}
