//! Target memory access
//!
//! Single words go through `mdw`/`mww`. Ranges are staged through a TCL
//! array on the server with `mem2array`/`array2mem`.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use std::fmt;

use crate::decode::{encode_array_pairs, parse_array_values, parse_mdw_word};
use crate::error::{OcdError, Result};
use crate::openocd_client::OpenocdClient;
use crate::registers::SP;

/// Server-side array used for reads
const READ_ARRAY: &str = "output";
/// Server-side array used for writes
const WRITE_ARRAY: &str = "buffer";

/// Bit width of one memory unit in a bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WordWidth {
    W8,
    W16,
    W32,
}

impl WordWidth {
    pub fn bits(self) -> u32 {
        match self {
            WordWidth::W8 => 8,
            WordWidth::W16 => 16,
            WordWidth::W32 => 32,
        }
    }

    pub fn max_value(self) -> u32 {
        match self {
            WordWidth::W8 => u8::MAX as u32,
            WordWidth::W16 => u16::MAX as u32,
            WordWidth::W32 => u32::MAX,
        }
    }
}

impl TryFrom<u32> for WordWidth {
    type Error = OcdError;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(WordWidth::W8),
            16 => Ok(WordWidth::W16),
            32 => Ok(WordWidth::W32),
            other => Err(OcdError::InvalidArgument(format!(
                "Word width must be 8, 16 or 32 bits, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for WordWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl<S> OpenocdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read `count` units of `width` starting at `address`
    pub async fn read_memory(&mut self, width: WordWidth, address: u32, count: usize) -> Result<Vec<u32>> {
        self.send(&format!("array unset {}", READ_ARRAY)).await?;
        let staged = self
            .send(&format!("mem2array {} {} {:#x} {}", READ_ARRAY, width, address, count))
            .await?;

        let raw = self.send(&format!("array get {}", READ_ARRAY)).await?;
        let values = parse_array_values(&raw)?;

        if values.len() != count {
            return Err(OcdError::Parse(format!(
                "Expected {} words from 0x{:08x}, got {} ({})",
                count,
                address,
                values.len(),
                staged
            )));
        }

        debug!("Read {} x {}-bit words from 0x{:08x}", count, width, address);
        Ok(values)
    }

    /// Write the first `count` units of `data` starting at `address`
    pub async fn write_memory(&mut self, width: WordWidth, address: u32, count: usize, data: &[u32]) -> Result<()> {
        if count > data.len() {
            return Err(OcdError::InvalidArgument(format!(
                "Cannot write {} words from a {}-word buffer",
                count,
                data.len()
            )));
        }
        if let Some(&value) = data.iter().find(|&&v| v > width.max_value()) {
            return Err(OcdError::ArgumentRange {
                name: format!("{}-bit word", width),
                value: value.into(),
            });
        }

        self.send(&format!("array unset {}", WRITE_ARRAY)).await?;
        self.send(&format!("array set {} {{ {} }}", WRITE_ARRAY, encode_array_pairs(data)))
            .await?;
        self.send(&format!("array2mem {} {} {:#x} {}", WRITE_ARRAY, width, address, count))
            .await?;

        debug!("Wrote {} x {}-bit words to 0x{:08x}", count, width, address);
        Ok(())
    }

    /// Read one 32-bit word; `None` if OpenOCD printed no value
    pub async fn read_variable(&mut self, address: u32) -> Result<Option<u32>> {
        let raw = self.send(&format!("mdw {:#x}", address)).await?;
        parse_mdw_word(&raw)
    }

    pub async fn write_variable(&mut self, address: u32, value: u32) -> Result<()> {
        self.send(&format!("mww {:#x} {:#x}", address, value)).await?;
        Ok(())
    }

    /// Push a word onto the target stack
    pub async fn push(&mut self, value: u32) -> Result<()> {
        let sp = self.read_register(SP).await?.wrapping_sub(4);
        self.write_register(SP, sp).await?;
        self.write_variable(sp, value).await
    }

    /// Pop a word off the target stack
    pub async fn pop(&mut self) -> Result<Option<u32>> {
        let sp = self.read_register(SP).await?;
        let value = self.read_variable(sp).await?;
        self.write_register(SP, sp.wrapping_add(4)).await?;
        Ok(value)
    }
}
