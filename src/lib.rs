//! OpenOCD TCL RPC client
//!
//! Talks to OpenOCD's TCL server (port 6666) to read and write registers and
//! memory of a halted target, and to call functions on it: arguments are
//! marshalled into registers, completion is detected with halt event hooks
//! plus a return breakpoint, and all touched state is restored afterwards.

pub mod breakpoints;
pub mod call;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod memory;
pub mod openocd_client;
pub mod registers;
pub mod target;
pub mod transport;

pub use config::{Args, Config};
pub use error::{OcdError, Result};
pub use memory::WordWidth;
pub use openocd_client::{with_connection, OpenocdClient, TargetState};
pub use registers::RegisterSnapshot;
pub use target::{CallOptions, FirmwareTarget, SymbolResolver, SymbolTable};
