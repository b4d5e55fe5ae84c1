//! Processor control blocks
//!
//! One [`ProcessorBlock`] per processor, created before any processor can take
//! interrupts and kept until shutdown. The block starts with a fixed header
//! that the trap entry code addresses directly:
//!
//! | offset | field                               |
//! |--------|-------------------------------------|
//! | 0x000  | trap frame (register save area)     |
//! | 0x240  | processor number                    |
//! | 0x241  | current IRQL                        |
//! | 0x242  | reserved                            |
//! | 0x244  | exception recursion depth           |
//!
//! Everything after the header is private to the scheduler core.

pub mod stats;

use core::cell::UnsafeCell;
use core::mem::offset_of;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use heapless::Deque;
use spin::RwLock;
use static_assertions::const_assert_eq;
use strand_api::{Irql, ProcessorId, ThreadId, Ticks, TrapFrame, Vector, MAX_THREADS, VECTOR_COUNT};

use crate::interrupt::InterruptHandler;
use crate::ipi::IpiRequest;
use crate::sync::IrqlSpinLock;
use crate::thread::list::ThreadList;

pub use self::stats::{ProcessorStats, StatsSnapshot};

const NO_THREAD: u16 = u16::MAX;

/// Thread lists owned by one processor
pub struct ProcessorLists {
    /// Every thread owned by the processor, idle thread excluded
    pub full: ThreadList,
    /// Threads eligible to run now, in arrival order
    pub ready: ThreadList,
}

impl ProcessorLists {
    pub const fn new() -> Self {
        Self {
            full: ThreadList::new(),
            ready: ThreadList::new(),
        }
    }
}

/// Migration staging queue
pub type SwapQueue = Deque<ThreadId, MAX_THREADS>;

/// Per-processor control block
#[repr(C)]
pub struct ProcessorBlock {
    trap: UnsafeCell<TrapFrame>,
    number: u8,
    irql: AtomicU8,
    _reserved: [u8; 2],
    exception_recursion: AtomicU32,

    current: AtomicU8,
    previous: AtomicU16,
    quantum_end: AtomicU64,
    online: AtomicBool,
    dispatch_pending: AtomicBool,
    in_scheduler: AtomicBool,
    pending_interrupts: AtomicU32,
    pub(crate) lists: IrqlSpinLock<ProcessorLists>,
    pub(crate) swap: IrqlSpinLock<SwapQueue>,
    pub(crate) vectors: [RwLock<Option<InterruptHandler>>; VECTOR_COUNT],
    pub(crate) ipi: IrqlSpinLock<Option<IpiRequest>>,
    /// Sequence of the last broadcast sent (high half) and its completions
    /// (low half)
    ipi_round: AtomicU64,
    pub(crate) stats: ProcessorStats,
}

const_assert_eq!(offset_of!(ProcessorBlock, trap), 0x000);
const_assert_eq!(offset_of!(ProcessorBlock, number), 0x240);
const_assert_eq!(offset_of!(ProcessorBlock, irql), 0x241);
const_assert_eq!(offset_of!(ProcessorBlock, exception_recursion), 0x244);
const_assert_eq!(offset_of!(ProcessorBlock, current), 0x248);

// SAFETY: the trap frame is only touched by its own processor, either by the
// trap entry code or by the scheduler with interrupts masked. All other
// fields are atomics or lock-protected.
unsafe impl Sync for ProcessorBlock {}

impl ProcessorBlock {
    /// Creates the block of processor `number`, whose idle thread is `idle`
    pub fn new(number: ProcessorId, idle: ThreadId) -> Self {
        Self {
            trap: UnsafeCell::new(TrapFrame::zeroed()),
            number: number.0,
            irql: AtomicU8::new(Irql::HIGH.0),
            _reserved: [0; 2],
            exception_recursion: AtomicU32::new(0),
            current: AtomicU8::new(idle.0),
            previous: AtomicU16::new(NO_THREAD),
            quantum_end: AtomicU64::new(0),
            online: AtomicBool::new(false),
            dispatch_pending: AtomicBool::new(false),
            in_scheduler: AtomicBool::new(false),
            pending_interrupts: AtomicU32::new(0),
            lists: IrqlSpinLock::new(ProcessorLists::new()),
            swap: IrqlSpinLock::new(Deque::new()),
            vectors: core::array::from_fn(|_| RwLock::new(None)),
            ipi: IrqlSpinLock::new(None),
            ipi_round: AtomicU64::new(0),
            stats: ProcessorStats::new(),
        }
    }

    #[inline]
    pub fn number(&self) -> ProcessorId {
        ProcessorId(self.number)
    }

    /// Idle thread of this processor
    #[inline]
    pub fn idle_thread(&self) -> ThreadId {
        ThreadId(self.number)
    }

    // ========================================================================
    // IRQL and nesting
    // ========================================================================

    #[inline]
    pub fn irql(&self) -> Irql {
        Irql(self.irql.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store_irql(&self, irql: Irql) {
        self.irql.store(irql.0, Ordering::Release);
    }

    /// Nesting depth of trap entries currently being handled
    #[inline]
    pub fn exception_recursion(&self) -> u32 {
        self.exception_recursion.load(Ordering::Acquire)
    }

    #[inline]
    pub fn in_interrupt(&self) -> bool {
        self.exception_recursion() > 0
    }

    /// Enters a trap, returns the depth before entry
    pub(crate) fn enter_trap(&self) -> u32 {
        self.exception_recursion.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn leave_trap(&self) {
        self.exception_recursion.fetch_sub(1, Ordering::AcqRel);
    }

    /// Register save area of the innermost trap
    ///
    /// # Safety
    ///
    /// Only the processor that owns this block may call this, and only while
    /// nothing else on it can touch the frame (interrupts masked or inside the
    /// trap handler).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn trap_frame(&self) -> &mut TrapFrame {
        // SAFETY: exclusivity is guaranteed by the caller.
        unsafe { &mut *self.trap.get() }
    }

    // ========================================================================
    // Interrupt latching
    // ========================================================================

    pub(crate) fn latch(&self, vector: Vector) {
        self.pending_interrupts.fetch_or(vector.bit(), Ordering::AcqRel);
    }

    /// Takes the highest latched vector above `level`
    pub(crate) fn take_pending_above(&self, level: Irql) -> Option<Vector> {
        let above = if level.0 as usize >= VECTOR_COUNT - 1 {
            0
        } else {
            u32::MAX << (level.0 + 1)
        };
        loop {
            let pending = self.pending_interrupts.load(Ordering::Acquire);
            let candidates = pending & above;
            if candidates == 0 {
                return None;
            }
            let index = 31 - candidates.leading_zeros() as u8;
            let bit = 1u32 << index;
            if self
                .pending_interrupts
                .compare_exchange_weak(pending, pending & !bit, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Vector::new(index);
            }
        }
    }

    /// Bitmask of latched vectors
    pub fn pending_interrupts(&self) -> u32 {
        self.pending_interrupts.load(Ordering::Acquire)
    }

    // ========================================================================
    // Scheduling state
    // ========================================================================

    #[inline]
    pub fn current(&self) -> ThreadId {
        ThreadId(self.current.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_current(&self, id: ThreadId) {
        self.current.store(id.0, Ordering::Release);
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.current() == self.idle_thread()
    }

    /// Records the thread being switched off, cleared by `take_previous`
    pub(crate) fn set_previous(&self, id: ThreadId) {
        self.previous.store(u16::from(id.0), Ordering::Release);
    }

    pub(crate) fn take_previous(&self) -> Option<ThreadId> {
        match self.previous.swap(NO_THREAD, Ordering::AcqRel) {
            NO_THREAD => None,
            id => Some(ThreadId(id as u8)),
        }
    }

    #[inline]
    pub fn quantum_end(&self) -> Ticks {
        self.quantum_end.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_quantum_end(&self, at: Ticks) {
        self.quantum_end.store(at, Ordering::Release);
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Sets the online flag, returns the previous value
    pub(crate) fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }

    pub(crate) fn request_dispatch(&self) {
        self.dispatch_pending.store(true, Ordering::Release);
    }

    pub(crate) fn take_dispatch_request(&self) -> bool {
        self.dispatch_pending.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn dispatch_pending(&self) -> bool {
        self.dispatch_pending.load(Ordering::Acquire)
    }

    /// Claims the scheduler for this processor, false if already claimed
    pub(crate) fn enter_scheduler(&self) -> bool {
        !self.in_scheduler.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn leave_scheduler(&self) {
        self.in_scheduler.store(false, Ordering::Release);
    }

    // ========================================================================
    // IPI completion
    // ========================================================================

    /// Completions of the last broadcast this processor sent
    pub fn ipi_completions(&self) -> u32 {
        self.ipi_round.load(Ordering::Acquire) as u32
    }

    /// Opens a new broadcast with zero completions and returns its sequence
    pub(crate) fn begin_ipi(&self) -> u32 {
        let previous = self
            .ipi_round
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |round| {
                let sequence = ((round >> 32) as u32).wrapping_add(1);
                Some((sequence as u64) << 32)
            })
            .unwrap_or_else(|round| round);
        ((previous >> 32) as u32).wrapping_add(1)
    }

    /// Counts one execution of broadcast `sequence`
    ///
    /// Completions of a broadcast that has since been superseded are dropped.
    pub(crate) fn complete_ipi(&self, sequence: u32) -> bool {
        self.ipi_round
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |round| {
                ((round >> 32) as u32 == sequence).then_some(round + 1)
            })
            .is_ok()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(offset_of!(ProcessorBlock, number), 0x240);
        assert_eq!(offset_of!(ProcessorBlock, irql), 0x241);
        assert_eq!(offset_of!(ProcessorBlock, _reserved), 0x242);
        assert_eq!(offset_of!(ProcessorBlock, exception_recursion), 0x244);
    }

    #[test]
    fn test_pending_latch_highest_first() {
        let block = ProcessorBlock::new(ProcessorId(0), ThreadId(0));
        block.latch(Vector::CLOCK);
        block.latch(Vector::IPI);
        block.latch(Vector::new(1).unwrap());

        assert_eq!(block.take_pending_above(Irql::DISPATCH), Some(Vector::IPI));
        assert_eq!(block.take_pending_above(Irql::DISPATCH), Some(Vector::CLOCK));
        assert_eq!(block.take_pending_above(Irql::DISPATCH), None);
        assert_eq!(block.take_pending_above(Irql::PASSIVE), Vector::new(1));
    }

    #[test]
    fn test_nothing_above_high() {
        let block = ProcessorBlock::new(ProcessorId(0), ThreadId(0));
        block.latch(Vector::new(31).unwrap());
        assert_eq!(block.take_pending_above(Irql::HIGH), None);
        assert_eq!(block.pending_interrupts(), 1 << 31);
    }

    #[test]
    fn test_previous_slot() {
        let block = ProcessorBlock::new(ProcessorId(2), ThreadId(2));
        assert_eq!(block.take_previous(), None);
        block.set_previous(ThreadId(255));
        assert_eq!(block.take_previous(), Some(ThreadId(255)));
        assert_eq!(block.take_previous(), None);
    }

    #[test]
    fn test_superseded_broadcast_does_not_count() {
        let block = ProcessorBlock::new(ProcessorId(0), ThreadId(0));
        let first = block.begin_ipi();
        assert!(block.complete_ipi(first));
        assert_eq!(block.ipi_completions(), 1);

        let second = block.begin_ipi();
        assert_ne!(first, second);
        assert_eq!(block.ipi_completions(), 0);
        assert!(!block.complete_ipi(first));
        assert_eq!(block.ipi_completions(), 0);
        assert!(block.complete_ipi(second));
        assert_eq!(block.ipi_completions(), 1);
    }
}
