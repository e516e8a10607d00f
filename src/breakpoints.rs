//! Hardware breakpoints, identified by address only

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::Result;
use crate::openocd_client::OpenocdClient;

/// Thumb instruction width in bytes
pub const BREAKPOINT_LENGTH: u32 = 2;

impl<S> OpenocdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Install a hardware breakpoint. Setting two at one address is the caller's problem.
    pub async fn set_breakpoint(&mut self, address: u32) -> Result<()> {
        self.send(&format!("bp {:#x} {} hw", address, BREAKPOINT_LENGTH)).await?;
        debug!("Breakpoint set at 0x{:08x}", address);
        Ok(())
    }

    pub async fn delete_breakpoint(&mut self, address: u32) -> Result<()> {
        self.send(&format!("rbp {:#x}", address)).await?;
        debug!("Breakpoint removed at 0x{:08x}", address);
        Ok(())
    }
}
