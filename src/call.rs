//! Remote function calls on a halted target
//!
//! A call hijacks the halted core: arguments go into r0-r3, `lr` points back
//! at the halted `pc` and `pc` at the callee. Completion is detected two
//! ways at once: a halt event hook flips a TCL flag, and a hardware
//! breakpoint at the return address makes sure the core halts there. Once
//! the flag is seen, r0 holds the result and every touched register, the
//! breakpoint and the hooks are put back.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use std::time::Duration;

use crate::error::{OcdError, Result};
use crate::openocd_client::{OpenocdClient, TargetState};
use crate::registers::{RegisterSnapshot, ARGUMENT_REGISTERS, LR, PC, SP};

/// r0-r3
pub const MAX_CALL_ARGS: usize = 4;

/// Low address bit selects Thumb mode on Cortex-M
pub const THUMB_BIT: u32 = 1;

/// TCL variable the halt hooks set on completion
pub const COMPLETION_FLAG: &str = "call_done";

pub const RESULT_REGISTER: &str = "r0";

const CALL_SAVED_REGISTERS: [&str; 7] = [PC, LR, SP, "r0", "r1", "r2", "r3"];

/// Held for a whole call. Event hooks are per target on the server, so two
/// calls from this process must never overlap, whichever connection they use.
static CALL_LOCK: Mutex<()> = Mutex::const_new(());

/// How far a call got, for teardown and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallPhase {
    Idle,
    Checked,
    Snapshotted,
    ArmedForCall,
    Dispatched,
    Polling,
    Restored,
}

#[derive(Debug)]
struct CallProgress {
    phase: CallPhase,
    hooks_touched: bool,
    breakpoint: Option<u32>,
}

impl CallProgress {
    fn new() -> Self {
        Self {
            phase: CallPhase::Idle,
            hooks_touched: false,
            breakpoint: None,
        }
    }

    fn advance(&mut self, phase: CallPhase) {
        debug!("Call phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

impl<S> OpenocdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Call the function at `address` with up to 4 word arguments and return r0.
    ///
    /// The target must be halted; it is left halted with its registers
    /// restored. Waits for at most the configured call timeout, or forever
    /// if none is configured.
    pub async fn call(&mut self, address: u32, args: &[u32]) -> Result<u32> {
        let timeout = self.call_timeout;
        self.call_with_timeout(address, args, timeout).await
    }

    /// [`call`](Self::call) with an explicit deadline.
    ///
    /// On expiry the target is halted, teardown runs, and
    /// [`OcdError::CallTimeout`] is returned. Where the core stopped is unknown.
    /// Any other failure after the core was resumed also halts it before
    /// teardown.
    pub async fn call_with_timeout(
        &mut self,
        address: u32,
        args: &[u32],
        timeout: Option<Duration>,
    ) -> Result<u32> {
        if args.len() > MAX_CALL_ARGS {
            return Err(OcdError::TooManyArguments(args.len()));
        }

        let _guard = CALL_LOCK.lock().await;
        let mut progress = CallProgress::new();

        let state = self.curstate().await?;
        if state != TargetState::Halted {
            return Err(OcdError::TargetNotHalted { state });
        }
        progress.advance(CallPhase::Checked);

        let target = address & !THUMB_BIT;
        info!("Calling 0x{:08x} with {} argument(s)", target, args.len());

        let snapshot = self.snapshot_registers(&CALL_SAVED_REGISTERS).await?;
        progress.advance(CallPhase::Snapshotted);

        let outcome = self.run_call(target, args, &snapshot, timeout, &mut progress).await;
        if let Err(e) = &outcome {
            warn!("Call to 0x{:08x} failed during {:?}: {}", target, progress.phase, e);
            if progress.phase >= CallPhase::Dispatched {
                self.ensure_halted().await;
            }
        }

        let teardown = self.teardown_call(&snapshot, &progress).await;
        progress.advance(CallPhase::Restored);

        match (outcome, teardown) {
            (Ok(value), Ok(())) => {
                info!("Call to 0x{:08x} returned 0x{:08x}", target, value);
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!("Teardown after failed call also failed: {}", teardown_err);
                Err(e)
            }
        }
    }

    async fn run_call(
        &mut self,
        target: u32,
        args: &[u32],
        snapshot: &RegisterSnapshot,
        timeout: Option<Duration>,
        progress: &mut CallProgress,
    ) -> Result<u32> {
        let return_pc = snapshot.require(PC)?;

        for (reg, &arg) in ARGUMENT_REGISTERS.iter().zip(args) {
            self.write_register(reg, arg).await?;
        }

        progress.hooks_touched = true;
        self.install_completion_hooks(COMPLETION_FLAG).await?;

        self.write_register(LR, return_pc | THUMB_BIT).await?;
        self.write_register(PC, target).await?;
        progress.breakpoint = Some(return_pc);
        self.set_breakpoint(return_pc).await?;
        progress.advance(CallPhase::ArmedForCall);

        self.resume().await?;
        progress.advance(CallPhase::Dispatched);

        progress.advance(CallPhase::Polling);
        self.wait_for_completion(timeout).await?;

        self.read_register(RESULT_REGISTER).await
    }

    /// Poll the completion flag until it reads 1 or `timeout` passes
    async fn wait_for_completion(&mut self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.read_completion_flag(COMPLETION_FLAG).await? {
                return Ok(());
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(OcdError::CallTimeout(timeout));
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stop a core that may still be running the callee. Registers can only
    /// be restored on a halted core. Failures are logged; teardown reports
    /// what could not be undone.
    async fn ensure_halted(&mut self) {
        match self.curstate().await {
            Ok(TargetState::Halted) => {}
            Ok(state) => {
                debug!("Core is {} after a failed call, halting", state);
                if let Err(e) = self.halt().await {
                    warn!("Halt after failed call failed: {}", e);
                }
            }
            Err(e) => warn!("Querying state after failed call failed: {}", e),
        }
    }

    /// Undo everything the call installed. Every step is attempted; the
    /// first failure is returned.
    async fn teardown_call(&mut self, snapshot: &RegisterSnapshot, progress: &CallProgress) -> Result<()> {
        let mut first_error = None;

        if progress.hooks_touched {
            if let Err(e) = self.remove_completion_hooks().await {
                warn!("Removing completion hooks failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(address) = progress.breakpoint {
            if let Err(e) = self.delete_breakpoint(address).await {
                warn!("Removing return breakpoint at 0x{:08x} failed: {}", address, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.restore_registers(snapshot).await {
            warn!("Restoring registers failed: {}", e);
            first_error.get_or_insert(e);
        }

        first_error.map_or(Ok(()), Err)
    }
}
