//! CPU register access
//!
//! Registers are never cached: every read forces a fresh value from the
//! target and every write goes out immediately.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::decode::parse_register_line;
use crate::error::{OcdError, Result};
use crate::openocd_client::OpenocdClient;

pub const PC: &str = "pc";
pub const LR: &str = "lr";
pub const SP: &str = "sp";

/// Argument/result registers of the AAPCS calling convention
pub const ARGUMENT_REGISTERS: [&str; 4] = ["r0", "r1", "r2", "r3"];

/// Register values captured before a remote call, in capture order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisterSnapshot {
    entries: Vec<(String, u32)>,
}

impl RegisterSnapshot {
    pub fn get(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(reg, _)| reg == name)
            .map(|(_, value)| *value)
    }

    /// Like [`get`](Self::get), for registers the snapshot must contain
    pub fn require(&self, name: &str) -> Result<u32> {
        self.get(name).ok_or_else(|| {
            OcdError::InvalidArgument(format!("Register {} not in snapshot", name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> OpenocdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read a register, forcing OpenOCD to fetch it from the target
    pub async fn read_register(&mut self, name: &str) -> Result<u32> {
        let raw = self.send(&format!("reg {} force", name)).await?;
        parse_register_line(&raw)
    }

    pub async fn write_register(&mut self, name: &str, value: u32) -> Result<()> {
        self.send(&format!("reg {} {:#x}", name, value)).await?;
        Ok(())
    }

    /// Read each named register, in order
    pub async fn snapshot_registers(&mut self, names: &[&str]) -> Result<RegisterSnapshot> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            entries.push((name.to_string(), self.read_register(name).await?));
        }
        debug!("Register snapshot: {:?}", entries);
        Ok(RegisterSnapshot { entries })
    }

    /// Write every register in the snapshot back.
    ///
    /// All registers are attempted even if one fails; the first error is returned.
    pub async fn restore_registers(&mut self, snapshot: &RegisterSnapshot) -> Result<()> {
        let mut first_error = None;
        for (name, value) in snapshot.iter() {
            if let Err(e) = self.write_register(name, value).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
