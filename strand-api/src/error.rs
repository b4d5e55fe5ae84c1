//! Error handling module for the Strand scheduler core

use core::fmt;

use crate::types::{ProcessorId, Vector};

/// Value returned by count-returning operations when they refuse to act
pub const SENTINEL: i32 = -1;

/// Common error type used throughout the scheduler core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// All thread identifiers are in use
    TooManyThreads,
    /// The platform could not allocate a stack
    OutOfMemory,
    /// Handle is stale, closed or was never valid
    InvalidHandle,
    /// Operation requires a terminated thread
    NotTerminated,
    /// Priority outside the range allowed for the thread
    InvalidPriority(u8),
    /// Processor outside the configured set
    InvalidProcessor(ProcessorId),
    /// Vector slot already owned by another handler
    VectorInUse(Vector),
    /// Suspend count already at its maximum
    SuspendLimit,
    /// Resume on a thread that is not suspended
    NotSuspended,
    /// Called from interrupt context where a thread context is required
    NotInThreadContext,
    /// Operation not allowed in the thread's or processor's current state
    InvalidState(&'static str),
    /// Invalid argument
    InvalidArgument(&'static str),
    /// Configuration rejected
    ConfigError(&'static str),
    /// A process-wide instance is already published
    AlreadyInitialized,
    /// No process-wide instance has been published
    NotInitialized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooManyThreads => write!(f, "Thread table exhausted"),
            Error::OutOfMemory => write!(f, "Stack allocation failed"),
            Error::InvalidHandle => write!(f, "Invalid thread handle"),
            Error::NotTerminated => write!(f, "Thread has not terminated"),
            Error::InvalidPriority(p) => write!(f, "Invalid priority: {}", p),
            Error::InvalidProcessor(id) => write!(f, "Invalid processor: {}", id),
            Error::VectorInUse(v) => write!(f, "Vector {} already has a handler", v.index()),
            Error::SuspendLimit => write!(f, "Suspend count saturated"),
            Error::NotSuspended => write!(f, "Thread is not suspended"),
            Error::NotInThreadContext => write!(f, "Not in thread context"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::AlreadyInitialized => write!(f, "Scheduler already initialized"),
            Error::NotInitialized => write!(f, "Scheduler not initialized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Conversion to the C-style "previous count or -1" return convention
pub trait SentinelExt {
    /// Previous count on success, [`SENTINEL`] on refusal
    fn or_sentinel(self) -> i32;
}

impl SentinelExt for Result<u8> {
    fn or_sentinel(self) -> i32 {
        match self {
            Ok(count) => i32::from(count),
            Err(_) => SENTINEL,
        }
    }
}
