//! Core types used throughout the Strand scheduler core

use core::fmt;

/// Maximum number of threads that can be alive at the same time
pub const MAX_THREADS: usize = 256;

/// Maximum number of processors (hardware threads) the core manages
pub const MAX_PROCESSORS: usize = 6;

/// Number of interrupt vector slots per processor
pub const VECTOR_COUNT: usize = 32;

/// Priority reserved for the per-processor idle thread
pub const IDLE_PRIORITY: u8 = 0;

/// Lowest priority an ordinary thread may use
pub const MIN_THREAD_PRIORITY: u8 = 1;

/// Highest scheduling priority
pub const MAX_PRIORITY: u8 = 15;

/// Priority given to new threads
pub const DEFAULT_PRIORITY: u8 = 7;

/// Priority boost given to new threads
pub const DEFAULT_PRIORITY_BOOST: u8 = 5;

/// Upper bound applied to a thread's boost unless reconfigured
pub const DEFAULT_MAX_PRIORITY_BOOST: u8 = 8;

/// Suspend count at which further suspends are refused
pub const MAX_SUSPEND_COUNT: u8 = u8::MAX;

/// Default scheduling quantum in milliseconds
pub const DEFAULT_QUANTUM_MS: u32 = 20;

/// Stack size used when `create` is given a size of zero
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Time in milliseconds
pub type Milliseconds = u32;

/// Raw timebase ticks
pub type Ticks = u64;

/// Thread identifier, unique among live threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u8);

impl ThreadId {
    /// Slot index of this identifier
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Processor (hardware thread) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(pub u8);

impl ProcessorId {
    /// Index of this processor in the control block array
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Interrupt request level
///
/// While a processor runs at a given level only interrupt sources with a
/// strictly higher level are delivered to it. Levels are per processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Irql(pub u8);

impl Irql {
    /// Normal thread execution, everything can preempt
    pub const PASSIVE: Irql = Irql(0);
    /// Scheduler and spinlock level, blocks local rescheduling
    pub const DISPATCH: Irql = Irql(2);
    /// Level of the scheduler clock
    pub const CLOCK: Irql = Irql(26);
    /// Level of inter-processor interrupts
    pub const IPI: Irql = Irql(30);
    /// Everything masked
    pub const HIGH: Irql = Irql(31);
}

impl fmt::Display for Irql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Irql::PASSIVE => write!(f, "PASSIVE"),
            Irql::DISPATCH => write!(f, "DISPATCH"),
            Irql::CLOCK => write!(f, "CLOCK"),
            Irql::IPI => write!(f, "IPI"),
            Irql::HIGH => write!(f, "HIGH"),
            Irql(level) => write!(f, "IRQL{}", level),
        }
    }
}

/// Interrupt vector, an index into a processor's vector table
///
/// Vector `n` is delivered at IRQL `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vector(u8);

impl Vector {
    /// Scheduler clock
    pub const CLOCK: Vector = Vector(Irql::CLOCK.0);
    /// Inter-processor interrupt
    pub const IPI: Vector = Vector(Irql::IPI.0);

    /// Creates a vector, `None` if outside the table
    pub const fn new(index: u8) -> Option<Vector> {
        if (index as usize) < VECTOR_COUNT {
            Some(Vector(index))
        } else {
            None
        }
    }

    /// Table slot of this vector
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Level the handler runs at
    #[inline]
    pub const fn irql(self) -> Irql {
        Irql(self.0)
    }

    /// Bit of this vector in a pending-interrupt mask
    #[inline]
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

/// Scheduling state of a thread
///
/// Exactly one state holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Currently executing on its processor
    Running,
    /// On its processor's ready list (or staged for migration and eligible)
    Ready,
    /// Waiting for its sleep countdown to expire
    Sleeping,
    /// Suspend count above zero
    Suspended,
    /// Terminated, waiting for `close`
    Terminated,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::Running => "running",
            ThreadState::Ready => "ready",
            ThreadState::Sleeping => "sleeping",
            ThreadState::Suspended => "suspended",
            ThreadState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
