//! OpenOCD TCL socket client
//!
//! Owns the connection to OpenOCD's TCL server (default port 6666) and the
//! target-level commands: state query, halt, resume, reset and TCL variables.
//! Register, memory, breakpoint, event and call operations live in their own
//! modules as further `impl` blocks on [`OpenocdClient`].

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::Config;
use crate::error::{OcdError, Result};
use crate::transport::TclTransport;

/// Execution state reported by `<target> curstate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    Halted,
    Running,
    Reset,
    DebugRunning,
    Unknown(String),
}

impl TargetState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "halted" => TargetState::Halted,
            "running" => TargetState::Running,
            "reset" => TargetState::Reset,
            "debug-running" => TargetState::DebugRunning,
            other => TargetState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Halted => write!(f, "halted"),
            TargetState::Running => write!(f, "running"),
            TargetState::Reset => write!(f, "reset"),
            TargetState::DebugRunning => write!(f, "debug-running"),
            TargetState::Unknown(s) => write!(f, "unknown ({})", s),
        }
    }
}

/// OpenOCD TCL client connected to a running OpenOCD instance
pub struct OpenocdClient<S = TcpStream> {
    transport: TclTransport<S>,
    /// TCL expression naming the target, e.g. `$_TARGETNAME`
    target_name: String,
    pub(crate) poll_interval: Duration,
    pub(crate) call_timeout: Option<Duration>,
    closed: bool,
}

impl OpenocdClient<TcpStream> {
    /// Connect to the TCL server described by `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            OcdError::ConnectionFailed(format!("Failed to connect to OpenOCD TCL at {}: {}", addr, e))
        })?;

        info!("Connected to OpenOCD TCL at {}", addr);
        Ok(Self::from_stream(stream, config))
    }
}

impl<S> OpenocdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-open stream
    pub fn from_stream(stream: S, config: &Config) -> Self {
        Self {
            transport: TclTransport::new(stream, config.response_timeout()),
            target_name: config.target_name.clone(),
            poll_interval: config.poll_interval(),
            call_timeout: config.call_timeout(),
            closed: false,
        }
    }

    /// Send a raw TCL command and return its response
    pub async fn send(&mut self, command: &str) -> Result<String> {
        self.transport.send(command).await
    }

    /// True once a transport failure has made the connection unusable
    pub fn is_broken(&self) -> bool {
        self.transport.is_broken()
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Prefix a command with the target name
    pub(crate) fn target_command(&self, command: &str) -> String {
        format!("{} {}", self.target_name, command)
    }

    pub async fn curstate(&mut self) -> Result<TargetState> {
        let command = self.target_command("curstate");
        let raw = self.send(&command).await?;
        Ok(TargetState::parse(&raw))
    }

    pub async fn halt(&mut self) -> Result<()> {
        self.send("halt").await?;
        info!("Target halted");
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.send("resume").await?;
        info!("Target resumed");
        Ok(())
    }

    /// Reset the target, halting afterwards (`reset halt`) or not (`reset run`)
    pub async fn reset(&mut self, halt: bool) -> Result<()> {
        let cmd = if halt { "reset halt" } else { "reset run" };
        self.send(cmd).await?;
        info!("Target reset ({})", cmd);
        Ok(())
    }

    pub async fn set_tcl_variable(&mut self, name: &str, value: &str) -> Result<()> {
        self.send(&format!("set {} {}", name, value)).await?;
        Ok(())
    }

    pub async fn get_tcl_variable(&mut self, name: &str) -> Result<String> {
        self.send(&format!("set {}", name)).await
    }

    /// Send `exit` and close the socket.
    ///
    /// OpenOCD may drop the connection instead of answering `exit`; that is
    /// treated as a clean close. After a transport failure only the socket
    /// is closed.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;

        let exit = if self.transport.is_broken() {
            debug!("Skipping exit on a broken transport");
            Ok(())
        } else {
            match self.transport.send("exit").await {
                Ok(_) | Err(OcdError::ConnectionClosed) => Ok(()),
                Err(e) => Err(e),
            }
        };
        if let Err(e) = self.transport.shutdown().await {
            debug!("Socket shutdown after exit: {}", e);
        }

        debug!("OpenOCD connection closed");
        exit
    }
}

impl<S> Drop for OpenocdClient<S> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("OpenOCD connection dropped without sending exit");
        }
    }
}

/// Future returned by a closure run inside [`with_connection`]
pub type ClientFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + 'c>>;

/// Open a connection, run `f` on it, then always send `exit` and close.
///
/// An error from `f` takes precedence over an error while closing.
pub async fn with_connection<T, F>(config: &Config, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut OpenocdClient) -> ClientFuture<'c, T>,
{
    let mut client = OpenocdClient::connect(config).await?;
    let result = f(&mut client).await;
    let closed = client.close().await;

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Closing OpenOCD connection failed: {}", close_err);
            Err(e)
        }
    }
}
