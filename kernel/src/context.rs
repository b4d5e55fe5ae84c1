//! Explicit register snapshots
//!
//! Used outside the normal switch path, e.g. by exception handlers and
//! debuggers.

use strand_api::{Context, Error, Result};

use crate::kernel::Kernel;
use crate::thread::tcb::ThreadHandle;

impl Kernel {
    /// Copies the caller's registers into `ctx`
    pub fn dump_context(&self, ctx: &mut Context) {
        self.platform().save_context(ctx);
    }

    /// Loads `ctx` on the calling processor
    ///
    /// On hardware this resumes execution at `ctx.iar` and does not return.
    pub fn restore_context(&self, ctx: &Context) {
        self.platform().load_context(ctx);
    }

    /// Registers of the code interrupted by the innermost trap
    pub fn interrupted_context(&self) -> Result<Context> {
        let cpu = self.this_processor();
        if !cpu.in_interrupt() {
            return Err(Error::InvalidState("no trap in progress"));
        }
        let mut ctx = Context::zeroed();
        // SAFETY: we are inside a trap on this processor; the frame is only
        // rewritten by the outermost exit path, which has not run yet.
        ctx.capture(unsafe { cpu.trap_frame() });
        Ok(ctx)
    }

    /// Saved registers of a thread that is not currently executing
    pub fn thread_context(&self, handle: ThreadHandle) -> Result<Context> {
        let tcb = self.resolve(handle)?;
        if tcb.is_running() {
            return Err(Error::InvalidState("thread is running"));
        }
        Ok(tcb.context())
    }
}
