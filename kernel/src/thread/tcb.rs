//! Thread control block

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use bitflags::bitflags;
use strand_api::{Context, ProcessorId, Stack, ThreadId, ThreadState, Ticks};

bitflags! {
    /// Status bits of a thread slot
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u8 {
        /// Slot holds a live thread
        const VALID = 1 << 0;
        /// The creator's handle has not been closed
        const HANDLE_OPEN = 1 << 1;
        /// Registers are loaded on (or being switched off) a processor
        const RUNNING = 1 << 2;
        /// Thread has terminated, waiting for close
        const TERMINATED = 1 << 3;
        /// Sleep countdown in progress
        const SLEEPING = 1 << 4;
        /// Per-processor idle thread
        const IDLE = 1 << 5;
    }
}

/// Reference to a thread returned by `create` and `get_current`
///
/// The generation makes handles to a closed thread detectable even after its
/// identifier has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    id: ThreadId,
    generation: u32,
}

impl ThreadHandle {
    pub(crate) const fn new(id: ThreadId, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Identifier of the referenced thread
    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Per-thread state
///
/// Scheduling fields are atomics so cross-processor readers never tear a
/// value; list membership and ready-list transitions are serialized by the
/// owning processor's list lock.
pub struct ThreadControlBlock {
    id: ThreadId,
    context: UnsafeCell<Context>,
    flags: AtomicU8,
    generation: AtomicU32,
    processor: AtomicU8,
    priority: AtomicU8,
    priority_boost: AtomicU8,
    max_priority_boost: AtomicU8,
    suspend_count: AtomicU8,
    sleep_remaining: AtomicI64,
    sleep_anchor: AtomicU64,
    ready_since: AtomicU64,
    exit_code: AtomicU32,
    user_data: AtomicUsize,
    stack_base: AtomicU64,
    stack_size: AtomicUsize,
}

// SAFETY: the register context is only accessed by the processor that owns
// the thread, with interrupts masked, while the thread is being switched.
// Everything else is atomic.
unsafe impl Sync for ThreadControlBlock {}

impl ThreadControlBlock {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            context: UnsafeCell::new(Context::zeroed()),
            flags: AtomicU8::new(0),
            generation: AtomicU32::new(0),
            processor: AtomicU8::new(0),
            priority: AtomicU8::new(0),
            priority_boost: AtomicU8::new(0),
            max_priority_boost: AtomicU8::new(0),
            suspend_count: AtomicU8::new(0),
            sleep_remaining: AtomicI64::new(0),
            sleep_anchor: AtomicU64::new(0),
            ready_since: AtomicU64::new(0),
            exit_code: AtomicU32::new(0),
            user_data: AtomicUsize::new(0),
            stack_base: AtomicU64::new(0),
            stack_size: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    // ========================================================================
    // Flags
    // ========================================================================

    #[inline]
    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn has(&self, flags: ThreadFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Sets `flags`, returns the previous flag set
    #[inline]
    pub fn set(&self, flags: ThreadFlags) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clears `flags`, returns the previous flag set
    #[inline]
    pub fn clear(&self, flags: ThreadFlags) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.flags.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.has(ThreadFlags::IDLE)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.has(ThreadFlags::RUNNING)
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.has(ThreadFlags::TERMINATED)
    }

    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.has(ThreadFlags::SLEEPING)
    }

    /// Suspend count zero, not sleeping, not terminated
    pub fn is_eligible(&self) -> bool {
        self.suspend_count() == 0
            && !self.flags().intersects(ThreadFlags::SLEEPING | ThreadFlags::TERMINATED)
    }

    /// Whether `handle` still refers to this thread
    pub fn matches(&self, handle: ThreadHandle) -> bool {
        handle.id == self.id
            && self.has(ThreadFlags::VALID | ThreadFlags::HANDLE_OPEN)
            && self.generation() == handle.generation
    }

    pub fn handle(&self) -> ThreadHandle {
        ThreadHandle::new(self.id, self.generation())
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    // ========================================================================
    // Scheduling metadata
    // ========================================================================

    #[inline]
    pub fn processor(&self) -> ProcessorId {
        ProcessorId(self.processor.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_processor(&self, processor: ProcessorId) {
        self.processor.store(processor.0, Ordering::Release);
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Release);
    }

    #[inline]
    pub fn priority_boost(&self) -> u8 {
        self.priority_boost.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_priority_boost(&self, boost: u8) {
        self.priority_boost.store(boost, Ordering::Release);
    }

    #[inline]
    pub fn max_priority_boost(&self) -> u8 {
        self.max_priority_boost.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_max_priority_boost(&self, max: u8) {
        self.max_priority_boost.store(max, Ordering::Release);
    }

    #[inline]
    pub fn suspend_count(&self) -> u8 {
        self.suspend_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_suspend_count(&self, count: u8) {
        self.suspend_count.store(count, Ordering::Release);
    }

    #[inline]
    pub fn ready_since(&self) -> Ticks {
        self.ready_since.load(Ordering::Acquire)
    }

    #[inline]
    pub fn mark_ready(&self, now: Ticks) {
        self.ready_since.store(now, Ordering::Release);
    }

    /// Starts a sleep countdown of `ticks` measured from `now`
    pub fn begin_sleep(&self, ticks: Ticks, now: Ticks) {
        let ticks = i64::try_from(ticks).unwrap_or(i64::MAX);
        self.sleep_remaining.store(ticks, Ordering::Release);
        self.sleep_anchor.store(now, Ordering::Release);
        self.set(ThreadFlags::SLEEPING);
    }

    /// Charges the time since the last charge against the countdown
    ///
    /// Returns true once the countdown has run out. A countdown forced to
    /// zero (or below) from elsewhere expires on the next charge.
    pub fn charge_sleep(&self, now: Ticks) -> bool {
        let anchor = self.sleep_anchor.swap(now, Ordering::AcqRel);
        let elapsed = i64::try_from(now.saturating_sub(anchor)).unwrap_or(i64::MAX);
        let remaining = self.sleep_remaining.fetch_sub(elapsed, Ordering::AcqRel) - elapsed;
        remaining <= 0
    }

    /// Ticks of sleep left
    pub fn sleep_remaining(&self) -> i64 {
        self.sleep_remaining.load(Ordering::Acquire)
    }

    #[inline]
    pub fn exit_code(&self) -> u32 {
        self.exit_code.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_exit_code(&self, code: u32) {
        self.exit_code.store(code, Ordering::Release);
    }

    #[inline]
    pub fn user_data(&self) -> usize {
        self.user_data.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_user_data(&self, value: usize) {
        self.user_data.store(value, Ordering::Release);
    }

    /// Stack owned by the thread, `None` for idle threads
    pub fn stack(&self) -> Option<Stack> {
        let size = self.stack_size.load(Ordering::Acquire);
        (size != 0).then(|| Stack {
            base: self.stack_base.load(Ordering::Acquire),
            size,
        })
    }

    /// Takes ownership of the stack, leaving the slot without one
    pub fn take_stack(&self) -> Option<Stack> {
        let size = self.stack_size.swap(0, Ordering::AcqRel);
        (size != 0).then(|| Stack {
            base: self.stack_base.swap(0, Ordering::AcqRel),
            size,
        })
    }

    // ========================================================================
    // Slot lifecycle
    // ========================================================================

    /// Prepares a free slot for a new thread
    ///
    /// The caller must own the slot's identifier; nothing else can observe
    /// the slot until it is marked valid.
    pub fn prepare(&self, params: ThreadParams) {
        self.flags.store(0, Ordering::Release);
        // SAFETY: the identifier was just allocated to the caller and the
        // slot is not linked anywhere yet.
        unsafe { *self.context.get() = params.context };
        self.set_processor(params.processor);
        self.set_priority(params.priority);
        self.set_priority_boost(params.priority_boost);
        self.set_max_priority_boost(params.max_priority_boost);
        self.set_suspend_count(params.suspend_count);
        self.sleep_remaining.store(0, Ordering::Release);
        self.mark_ready(params.now);
        self.set_exit_code(0);
        self.set_user_data(0);
        let (base, size) = params.stack.map_or((0, 0), |s| (s.base, s.size));
        self.stack_base.store(base, Ordering::Release);
        self.stack_size.store(size, Ordering::Release);
    }

    /// Retires the slot so outstanding handles stop matching
    pub fn retire(&self) {
        self.flags.store(0, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Raw access to the saved registers
    ///
    /// # Safety
    ///
    /// Only the owning processor may call this, with interrupts masked,
    /// while the thread is not executing.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn context_mut(&self) -> &mut Context {
        // SAFETY: exclusivity is guaranteed by the caller.
        unsafe { &mut *self.context.get() }
    }

    /// Shared access to the saved registers
    ///
    /// # Safety
    ///
    /// No `context_mut` borrow of the same thread may be alive.
    pub unsafe fn context_ref(&self) -> &Context {
        // SAFETY: guaranteed by the caller.
        unsafe { &*self.context.get() }
    }

    /// Copy of the saved registers
    pub fn context(&self) -> Context {
        // SAFETY: a racing switch can only be in progress on the owning
        // processor; readers elsewhere accept a snapshot.
        unsafe { *self.context.get() }
    }

    /// Derived scheduling state
    ///
    /// `current` is whether the thread is the current thread of its processor.
    pub fn state(&self, current: bool) -> ThreadState {
        let flags = self.flags();
        if flags.contains(ThreadFlags::TERMINATED) {
            ThreadState::Terminated
        } else if current {
            ThreadState::Running
        } else if self.suspend_count() > 0 {
            ThreadState::Suspended
        } else if flags.contains(ThreadFlags::SLEEPING) {
            ThreadState::Sleeping
        } else {
            ThreadState::Ready
        }
    }
}

/// Initial values for [`ThreadControlBlock::prepare`]
pub struct ThreadParams {
    pub context: Context,
    pub processor: ProcessorId,
    pub priority: u8,
    pub priority_boost: u8,
    pub max_priority_boost: u8,
    pub suspend_count: u8,
    pub stack: Option<Stack>,
    pub now: Ticks,
}
