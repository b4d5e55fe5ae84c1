//! Register snapshot layouts shared with the trap entry code
//!
//! Both structures are read and written directly by hand-written entry code,
//! so field order and offsets are fixed and checked at compile time. All
//! fields are 8 bytes wide, which keeps `#[repr(C)]` free of implicit padding.

use core::mem::{offset_of, size_of};
use static_assertions::const_assert_eq;

/// General-purpose register holding the stack pointer
pub const STACK_POINTER_GPR: usize = 1;

/// General-purpose register carrying the first argument
pub const ARGUMENT_GPR: usize = 3;

/// Bytes left untouched above a new thread's initial stack pointer
pub const STACK_FRAME_RESERVE: u64 = 0x100;

/// Floating-point register bank
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpuSave {
    /// Floating-point registers
    pub fpr: [f64; 32],
    /// Floating-point status and control
    pub fpscr: f64,
}

impl FpuSave {
    /// An all-zero register bank
    pub const fn zeroed() -> Self {
        Self {
            fpr: [0.0; 32],
            fpscr: 0.0,
        }
    }
}

/// Complete register snapshot of a thread
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Context {
    /// Machine state
    pub msr: u64,
    /// Instruction address
    pub iar: u64,
    /// Link register
    pub lr: u64,
    /// Count register
    pub ctr: u64,
    /// General-purpose registers
    pub gpr: [u64; 32],
    /// Condition register
    pub cr: u64,
    /// Fixed-point exception register
    pub xer: u64,
    /// Floating-point bank
    pub fpu: FpuSave,
}

const_assert_eq!(offset_of!(Context, msr), 0x000);
const_assert_eq!(offset_of!(Context, iar), 0x008);
const_assert_eq!(offset_of!(Context, lr), 0x010);
const_assert_eq!(offset_of!(Context, ctr), 0x018);
const_assert_eq!(offset_of!(Context, gpr), 0x020);
const_assert_eq!(offset_of!(Context, cr), 0x120);
const_assert_eq!(offset_of!(Context, xer), 0x128);
const_assert_eq!(offset_of!(Context, fpu), 0x130);
const_assert_eq!(size_of::<FpuSave>(), 0x108);
const_assert_eq!(size_of::<Context>(), 0x238);

impl Context {
    /// An all-zero context
    pub const fn zeroed() -> Self {
        Self {
            msr: 0,
            iar: 0,
            lr: 0,
            ctr: 0,
            gpr: [0; 32],
            cr: 0,
            xer: 0,
            fpu: FpuSave::zeroed(),
        }
    }

    /// Builds the first context of a new thread
    ///
    /// Execution starts at `entry` with `argument` in the argument register.
    /// Returning from `entry` lands in `return_to`, which is expected to
    /// terminate the thread with the returned value.
    pub fn for_entry(entry: u64, argument: u64, stack_top: u64, return_to: u64, msr: u64) -> Self {
        let mut ctx = Self::zeroed();
        ctx.msr = msr;
        ctx.iar = entry;
        ctx.lr = return_to;
        ctx.gpr[STACK_POINTER_GPR] = stack_top.saturating_sub(STACK_FRAME_RESERVE) & !0xF;
        ctx.gpr[ARGUMENT_GPR] = argument;
        ctx
    }

    /// Initial stack pointer
    #[inline]
    pub fn stack_pointer(&self) -> u64 {
        self.gpr[STACK_POINTER_GPR]
    }

    /// Copies the interrupted register state out of a trap frame
    pub fn capture(&mut self, frame: &TrapFrame) {
        self.msr = frame.msr;
        self.iar = frame.iar;
        self.lr = frame.lr;
        self.ctr = frame.ctr;
        self.gpr = frame.gpr;
        self.cr = frame.cr;
        self.xer = frame.xer;
        self.fpu = frame.fpu;
    }

    /// Loads this context into a trap frame so the exit path resumes it
    pub fn apply(&self, frame: &mut TrapFrame) {
        frame.msr = self.msr;
        frame.iar = self.iar;
        frame.lr = self.lr;
        frame.ctr = self.ctr;
        frame.gpr = self.gpr;
        frame.cr = self.cr;
        frame.xer = self.xer;
        frame.fpu = self.fpu;
        frame.dar = 0;
    }
}

/// Register save area filled by the trap entry code
///
/// Lives at offset 0 of every processor control block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapFrame {
    /// General-purpose registers
    pub gpr: [u64; 32],
    /// Link register
    pub lr: u64,
    /// Count register
    pub ctr: u64,
    /// Condition register
    pub cr: u64,
    /// Fixed-point exception register
    pub xer: u64,
    /// Interrupted instruction address (SRR0)
    pub iar: u64,
    /// Interrupted machine state (SRR1)
    pub msr: u64,
    /// Faulting data address, valid for data storage exceptions
    pub dar: u64,
    /// Floating-point bank
    pub fpu: FpuSave,
}

const_assert_eq!(offset_of!(TrapFrame, gpr), 0x000);
const_assert_eq!(offset_of!(TrapFrame, lr), 0x100);
const_assert_eq!(offset_of!(TrapFrame, ctr), 0x108);
const_assert_eq!(offset_of!(TrapFrame, cr), 0x110);
const_assert_eq!(offset_of!(TrapFrame, xer), 0x118);
const_assert_eq!(offset_of!(TrapFrame, iar), 0x120);
const_assert_eq!(offset_of!(TrapFrame, msr), 0x128);
const_assert_eq!(offset_of!(TrapFrame, dar), 0x130);
const_assert_eq!(offset_of!(TrapFrame, fpu), 0x138);
const_assert_eq!(size_of::<TrapFrame>(), 0x240);

impl TrapFrame {
    /// An all-zero frame
    pub const fn zeroed() -> Self {
        Self {
            gpr: [0; 32],
            lr: 0,
            ctr: 0,
            cr: 0,
            xer: 0,
            iar: 0,
            msr: 0,
            dar: 0,
            fpu: FpuSave::zeroed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_context() {
        let ctx = Context::for_entry(0x8000_1000, 42, 0x9000_0000, 0x8000_0040, 0x8000);
        assert_eq!(ctx.iar, 0x8000_1000);
        assert_eq!(ctx.gpr[ARGUMENT_GPR], 42);
        assert_eq!(ctx.lr, 0x8000_0040);
        assert_eq!(ctx.msr, 0x8000);
        assert_eq!(ctx.stack_pointer(), 0x9000_0000 - STACK_FRAME_RESERVE);
        assert_eq!(ctx.stack_pointer() % 16, 0);
    }

    #[test]
    fn test_entry_context_aligns_odd_stack_top() {
        let ctx = Context::for_entry(0, 0, 0x1000_0007, 0, 0);
        assert_eq!(ctx.stack_pointer() % 16, 0);
        assert!(ctx.stack_pointer() < 0x1000_0007);
    }

    #[test]
    fn test_trap_frame_exchange() {
        let mut frame = TrapFrame::zeroed();
        frame.gpr[5] = 5;
        frame.iar = 0x1234;
        frame.dar = 0xdead;
        frame.fpu.fpscr = 1.5;

        let mut ctx = Context::zeroed();
        ctx.capture(&frame);
        assert_eq!(ctx.gpr[5], 5);
        assert_eq!(ctx.iar, 0x1234);
        assert_eq!(ctx.fpu.fpscr, 1.5);

        let mut other = TrapFrame::zeroed();
        other.dar = 0xbeef;
        ctx.apply(&mut other);
        assert_eq!(other.iar, 0x1234);
        assert_eq!(other.dar, 0, "fault address does not survive a thread switch");
    }
}
