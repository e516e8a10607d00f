//! Named firmware actions on top of the call engine
//!
//! Symbol names are resolved through a [`SymbolResolver`]; the call engine
//! itself only ever sees addresses.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::info;
use std::collections::HashMap;

use crate::error::{OcdError, Result};
use crate::openocd_client::OpenocdClient;

/// A resolved symbol: address plus its `nm` type letter (`T`, `t`, `D`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub address: u32,
    pub kind: char,
}

/// Name to address/type lookup, typically backed by a firmware image's symbols
pub trait SymbolResolver {
    fn lookup(&self, name: &str) -> Result<Symbol>;

    fn lookup_address(&self, name: &str) -> Result<u32> {
        self.lookup(name).map(|symbol| symbol.address)
    }

    fn lookup_type(&self, name: &str) -> Result<char> {
        self.lookup(name).map(|symbol| symbol.kind)
    }
}

/// In-memory symbol table
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, address: u32, kind: char) {
        self.symbols.insert(name.into(), Symbol { address, kind });
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl FromIterator<(String, Symbol)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (String, Symbol)>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

impl SymbolResolver for SymbolTable {
    fn lookup(&self, name: &str) -> Result<Symbol> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| OcdError::SymbolNotFound(name.to_string()))
    }
}

/// Whether to halt the target before a call and resume it after
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    pub halt_before: bool,
    pub resume_after: bool,
}

/// Firmware functions invoked by name, one remote call per action
pub struct FirmwareTarget<'a, R, S = TcpStream> {
    client: &'a mut OpenocdClient<S>,
    symbols: R,
    options: CallOptions,
}

impl<'a, R, S> FirmwareTarget<'a, R, S>
where
    R: SymbolResolver,
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: &'a mut OpenocdClient<S>, symbols: R, options: CallOptions) -> Self {
        Self { client, symbols, options }
    }

    /// Resolve `name` and call it with `args`
    pub async fn call_function(&mut self, name: &str, args: &[u32]) -> Result<u32> {
        let address = self.symbols.lookup_address(name)?;
        info!("Calling {} at 0x{:08x}", name, address);

        if self.options.halt_before {
            self.client.halt().await?;
        }
        let value = self.client.call(address, args).await?;
        if self.options.resume_after {
            self.client.resume().await?;
        }
        Ok(value)
    }

    /// Call a no-argument action, ignoring its result
    pub async fn toggle(&mut self, name: &str) -> Result<()> {
        self.call_function(name, &[]).await.map(|_| ())
    }

    /// Call a no-argument getter
    pub async fn get(&mut self, name: &str) -> Result<u32> {
        self.call_function(name, &[]).await
    }

    /// Call a boolean setter; `value` must be 0 or 1
    pub async fn set(&mut self, name: &str, value: u32) -> Result<()> {
        if value > 1 {
            return Err(OcdError::ArgumentRange {
                name: name.to_string(),
                value: value.into(),
            });
        }
        self.call_function(name, &[value]).await.map(|_| ())
    }
}
