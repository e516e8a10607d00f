//! TCL RPC framing
//!
//! Protocol: send command as UTF-8, terminated by 0x1a (SUB character).
//! Response: UTF-8 text terminated by 0x1a. The channel is strictly
//! request/response, one response per request.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use std::time::Duration;

use crate::error::{OcdError, Result};

/// TCL protocol terminator byte (ASCII SUB / Ctrl-Z)
pub const TCL_TERMINATOR: u8 = 0x1a;

const READ_CHUNK_SIZE: usize = 4096;

/// Request/response framing over any byte stream
pub struct TclTransport<S> {
    stream: S,
    response_timeout: Duration,
    /// Bytes received past the last terminator
    pending: Vec<u8>,
    /// Set after any I/O failure; request/response pairing is lost from then on
    broken: bool,
}

impl<S> TclTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, response_timeout: Duration) -> Self {
        Self {
            stream,
            response_timeout,
            pending: Vec::with_capacity(READ_CHUNK_SIZE),
            broken: false,
        }
    }

    /// Send a TCL command and read its response.
    ///
    /// The terminator is stripped and trailing whitespace trimmed from the
    /// returned text. No retries happen here: once a write, read or
    /// deadline fails, every later call returns [`OcdError::TransportBroken`].
    pub async fn send(&mut self, command: &str) -> Result<String> {
        if self.broken {
            return Err(OcdError::TransportBroken);
        }

        let result = self.exchange(command).await;
        if let Err(e) = &result {
            if e.is_transport() {
                warn!("OpenOCD transport failed on '{}': {}", command, e);
                self.broken = true;
            }
        }
        result
    }

    async fn exchange(&mut self, command: &str) -> Result<String> {
        debug!("OpenOCD TCL command: {}", command);

        let mut payload = command.as_bytes().to_vec();
        payload.push(TCL_TERMINATOR);

        self.stream.write_all(&payload).await.map_err(|e| {
            OcdError::CommandFailed(format!("Write failed: {}", e))
        })?;

        let response = self.read_response().await?;

        debug!("OpenOCD TCL response: {}", response);
        Ok(response)
    }

    /// Read chunks until a terminator shows up in the accumulated bytes
    async fn read_response(&mut self) -> Result<String> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let deadline = tokio::time::Instant::now() + self.response_timeout;

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == TCL_TERMINATOR) {
                let rest = self.pending.split_off(pos + 1);
                let mut frame = std::mem::replace(&mut self.pending, rest);
                frame.pop();

                let text = String::from_utf8(frame).map_err(|e| {
                    OcdError::Parse(format!("Invalid UTF-8 in response: {}", e))
                })?;
                return Ok(text.trim_end().to_string());
            }

            match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(OcdError::ConnectionClosed),
                Ok(Ok(n)) => self.pending.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(OcdError::CommandFailed(format!("Read failed: {}", e)));
                }
                Err(_) => return Err(OcdError::Timeout),
            }
        }
    }

    /// Close the write half of the underlying stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(|e| {
            OcdError::CommandFailed(format!("Shutdown failed: {}", e))
        })
    }

    /// True once a transport failure has made the channel unusable
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}
