//! Strand API - Core interfaces and types for the Strand scheduler core
//!
//! This crate holds everything that has to be agreed on between the scheduler
//! core, the low-level trap entry code and the board support layer:
//!
//! - **Types**: thread/processor identifiers, IRQL levels, interrupt vectors, limits
//! - **Context**: the byte-exact register snapshot and trap frame layouts
//! - **Config**: scheduler configuration and thread creation flags
//! - **Error**: the common error type and `Result` alias
//! - **Platform**: the hardware seam the core is written against
//!
//! # Usage
//!
//! ```rust
//! use strand_api::{CreateFlags, SchedulerConfig};
//!
//! let config = SchedulerConfig::default();
//! assert_eq!(config.quantum_ms, 20);
//! assert!(CreateFlags::SUSPENDED.contains(CreateFlags::SUSPENDED));
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod context;
pub mod error;
pub mod platform;
pub mod types;

// Re-export commonly used types
pub use crate::config::{CreateFlags, SchedulerConfig};
pub use crate::context::{Context, FpuSave, TrapFrame};
pub use crate::error::{Error, Result, SentinelExt};
pub use crate::platform::{InterruptState, Platform, Stack, ThreadEntry};
pub use crate::types::*;
