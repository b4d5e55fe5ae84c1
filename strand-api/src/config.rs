//! Scheduler configuration

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::types::{
    DEFAULT_MAX_PRIORITY_BOOST, DEFAULT_PRIORITY, DEFAULT_PRIORITY_BOOST, DEFAULT_QUANTUM_MS,
    DEFAULT_STACK_SIZE, MAX_PRIORITY, MAX_PROCESSORS, MIN_THREAD_PRIORITY,
};

bitflags! {
    /// Options recognised by `create`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateFlags: u32 {
        /// Start with a suspend count of one instead of zero
        const SUSPENDED = 1 << 0;
    }
}

/// Process-wide scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Processors to manage; 0 means every processor the platform reports
    pub processors: usize,
    /// Scheduling quantum in milliseconds
    pub quantum_ms: u32,
    /// Priority of new threads
    pub default_priority: u8,
    /// Priority boost of new threads
    pub default_priority_boost: u8,
    /// Boost cap of new threads
    pub max_priority_boost: u8,
    /// Stack size used when `create` is asked for zero bytes
    pub default_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            processors: 0,
            quantum_ms: DEFAULT_QUANTUM_MS,
            default_priority: DEFAULT_PRIORITY,
            default_priority_boost: DEFAULT_PRIORITY_BOOST,
            max_priority_boost: DEFAULT_MAX_PRIORITY_BOOST,
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Same configuration limited to `processors` processors
    pub fn with_processors(mut self, processors: usize) -> Self {
        self.processors = processors;
        self
    }

    /// Same configuration with another quantum
    pub fn with_quantum_ms(mut self, quantum_ms: u32) -> Self {
        self.quantum_ms = quantum_ms;
        self
    }

    /// Processor count after resolving 0 against what the platform has
    pub fn resolved_processors(&self, available: usize) -> usize {
        let wanted = if self.processors == 0 { available } else { self.processors };
        wanted.min(available).min(MAX_PROCESSORS)
    }

    /// Checks the configuration against the platform's processor count
    pub fn validate(&self, available: usize) -> Result<()> {
        let result = self.check(available);
        #[cfg(feature = "log")]
        if let Err(err) = result {
            log::warn!("scheduler config rejected: {}", err);
        }
        result
    }

    fn check(&self, available: usize) -> Result<()> {
        if available == 0 {
            return Err(Error::ConfigError("platform reports no processors"));
        }
        if self.processors > available || self.processors > MAX_PROCESSORS {
            return Err(Error::ConfigError("more processors requested than available"));
        }
        if self.quantum_ms == 0 {
            return Err(Error::ConfigError("quantum must be at least one millisecond"));
        }
        if !(MIN_THREAD_PRIORITY..=MAX_PRIORITY).contains(&self.default_priority) {
            return Err(Error::ConfigError("default priority out of range"));
        }
        if self.max_priority_boost > MAX_PRIORITY {
            return Err(Error::ConfigError("priority boost cap out of range"));
        }
        if self.default_stack_size == 0 {
            return Err(Error::ConfigError("default stack size must be non-zero"));
        }
        Ok(())
    }
}
