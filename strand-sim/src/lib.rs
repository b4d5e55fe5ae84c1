//! Strand simulator - hosted platform for the scheduler core
//!
//! [`SimPlatform`] implements [`Platform`] on top of the host so the core can
//! be exercised by ordinary unit tests, integration tests and benchmarks:
//!
//! - **Processors**: each OS thread is bound to one simulated processor with
//!   [`bind_processor`]; unbound threads run as processor 0
//! - **Time**: a manual timebase advanced with [`SimPlatform::advance_ms`]
//! - **Interrupts**: enable state and hardware IRQL are recorded per processor;
//!   raised IPIs are counted until a test delivers them
//! - **Stacks**: synthetic address ranges, tracked so leaks are visible
//! - **Registers**: one register file per processor, moved by `switch_context`
//!
//! Interrupts are never delivered asynchronously. A test plays the role of
//! the trap entry code and calls the core's dispatcher itself.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::cell::Cell;

use spin::Mutex;
use strand_api::{
    Context, InterruptState, Irql, Platform, ProcessorId, Stack, Ticks, MAX_PROCESSORS,
};

/// Address returned as the thread exit trampoline
pub const EXIT_TRAMPOLINE: u64 = 0x8000_0040;

/// Machine state handed to new threads (external interrupts and FP enabled)
pub const INITIAL_MSR: u64 = 0x9000_0000_0000_a032;

/// Default timebase frequency in ticks per millisecond
pub const DEFAULT_TICKS_PER_MS: Ticks = 1_000;

const STACK_REGION_BASE: u64 = 0x1_0000_0000;

thread_local! {
    static BOUND_PROCESSOR: Cell<u8> = const { Cell::new(0) };
}

/// Binds the calling OS thread to a simulated processor
pub fn bind_processor(processor: ProcessorId) {
    BOUND_PROCESSOR.with(|bound| bound.set(processor.0));
}

/// Simulated processor the calling OS thread is bound to
pub fn bound_processor() -> ProcessorId {
    ProcessorId(BOUND_PROCESSOR.with(Cell::get))
}

struct SimProcessor {
    interrupts_enabled: AtomicBool,
    hardware_irql: AtomicU8,
    pending_ipis: AtomicU32,
    raised_ipis: AtomicU32,
    registers: Mutex<Context>,
}

impl SimProcessor {
    fn new() -> Self {
        Self {
            interrupts_enabled: AtomicBool::new(true),
            hardware_irql: AtomicU8::new(Irql::PASSIVE.0),
            pending_ipis: AtomicU32::new(0),
            raised_ipis: AtomicU32::new(0),
            registers: Mutex::new(Context::zeroed()),
        }
    }
}

/// Hosted implementation of [`Platform`]
pub struct SimPlatform {
    processors: Vec<SimProcessor>,
    clock: AtomicU64,
    ticks_per_ms: Ticks,
    next_stack: AtomicU64,
    live_stacks: Mutex<Vec<Stack>>,
    fail_allocations: AtomicBool,
    stacks_freed: AtomicU64,
    context_switches: AtomicU64,
}

impl SimPlatform {
    /// Creates a platform with `processors` processors
    pub fn new(processors: usize) -> Self {
        let count = processors.clamp(1, MAX_PROCESSORS);
        Self {
            processors: (0..count).map(|_| SimProcessor::new()).collect(),
            clock: AtomicU64::new(0),
            ticks_per_ms: DEFAULT_TICKS_PER_MS,
            next_stack: AtomicU64::new(STACK_REGION_BASE),
            live_stacks: Mutex::new(Vec::new()),
            fail_allocations: AtomicBool::new(false),
            stacks_freed: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
        }
    }

    /// Same platform with another timebase frequency
    pub fn with_ticks_per_ms(mut self, ticks_per_ms: Ticks) -> Self {
        self.ticks_per_ms = ticks_per_ms.max(1);
        self
    }

    /// Moves the platform to the heap for the lifetime of the process
    ///
    /// The scheduler core holds its platform as `&'static dyn Platform`.
    pub fn leak(self) -> &'static SimPlatform {
        Box::leak(Box::new(self))
    }

    fn processor(&self, id: ProcessorId) -> &SimProcessor {
        &self.processors[id.index()]
    }

    fn current(&self) -> &SimProcessor {
        self.processor(self.current_processor())
    }

    // ========================================================================
    // Test controls
    // ========================================================================

    /// Advances the timebase by `ms` milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance_ticks(ms * self.ticks_per_ms);
    }

    /// Advances the timebase by raw ticks
    pub fn advance_ticks(&self, ticks: Ticks) {
        self.clock.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Makes every following stack allocation fail (or succeed again)
    pub fn fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Consumes one raised IPI for `target`, returns whether there was one
    pub fn take_ipi(&self, target: ProcessorId) -> bool {
        self.processor(target)
            .pending_ipis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            })
            .is_ok()
    }

    /// Total IPIs raised on `target`
    pub fn ipis_raised(&self, target: ProcessorId) -> u32 {
        self.processor(target).raised_ipis.load(Ordering::Acquire)
    }

    /// Whether interrupts are enabled on `processor`
    pub fn interrupts_enabled(&self, processor: ProcessorId) -> bool {
        self.processor(processor)
            .interrupts_enabled
            .load(Ordering::Acquire)
    }

    /// Last level programmed into the interrupt controller of `processor`
    pub fn hardware_irql(&self, processor: ProcessorId) -> Irql {
        Irql(self.processor(processor).hardware_irql.load(Ordering::Acquire))
    }

    /// Register file currently loaded on `processor`
    pub fn registers(&self, processor: ProcessorId) -> Context {
        *self.processor(processor).registers.lock()
    }

    /// Stacks allocated and not yet freed
    pub fn live_stacks(&self) -> usize {
        self.live_stacks.lock().len()
    }

    /// Stacks returned through `free_stack`
    pub fn stacks_freed(&self) -> u64 {
        self.stacks_freed.load(Ordering::Acquire)
    }

    /// Number of `switch_context` calls
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Acquire)
    }
}

impl Platform for SimPlatform {
    fn processor_count(&self) -> usize {
        self.processors.len()
    }

    fn current_processor(&self) -> ProcessorId {
        bound_processor()
    }

    fn now(&self) -> Ticks {
        self.clock.load(Ordering::SeqCst)
    }

    fn ticks_per_ms(&self) -> Ticks {
        self.ticks_per_ms
    }

    fn disable_interrupts(&self) -> InterruptState {
        InterruptState(self.current().interrupts_enabled.swap(false, Ordering::AcqRel))
    }

    fn restore_interrupts(&self, state: InterruptState) {
        self.current()
            .interrupts_enabled
            .store(state.was_enabled(), Ordering::Release);
    }

    fn set_hardware_irql(&self, irql: Irql) {
        self.current().hardware_irql.store(irql.0, Ordering::Release);
    }

    fn raise_ipi(&self, target: ProcessorId) {
        let processor = self.processor(target);
        processor.raised_ipis.fetch_add(1, Ordering::AcqRel);
        processor.pending_ipis.fetch_add(1, Ordering::AcqRel);
    }

    fn allocate_stack(&self, size: usize) -> Option<Stack> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            log::debug!("sim: refusing stack allocation of {} bytes", size);
            return None;
        }
        let span = (size as u64 + 0xFFF) & !0xFFF;
        let base = self.next_stack.fetch_add(span + 0x1000, Ordering::AcqRel);
        let stack = Stack { base, size };
        self.live_stacks.lock().push(stack);
        Some(stack)
    }

    fn free_stack(&self, stack: Stack) {
        let mut live = self.live_stacks.lock();
        match live.iter().position(|s| *s == stack) {
            Some(index) => {
                live.swap_remove(index);
                self.stacks_freed.fetch_add(1, Ordering::AcqRel);
            }
            None => panic!("sim: freeing unknown stack {:#x}", stack.base),
        }
    }

    fn thread_exit_trampoline(&self) -> u64 {
        EXIT_TRAMPOLINE
    }

    fn initial_msr(&self) -> u64 {
        INITIAL_MSR
    }

    fn switch_context(&self, from: &mut Context, to: &Context) {
        let mut registers = self.current().registers.lock();
        *from = *registers;
        *registers = *to;
        self.context_switches.fetch_add(1, Ordering::AcqRel);
    }

    fn save_context(&self, ctx: &mut Context) {
        *ctx = *self.current().registers.lock();
    }

    fn load_context(&self, ctx: &Context) {
        *self.current().registers.lock() = *ctx;
    }

    fn wait_for_interrupt(&self) {
        std::thread::yield_now();
    }
}
