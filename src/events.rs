//! Halt event hooks used as a completion signal.
//!
//! OpenOCD keeps event handlers per target, not per connection, so a hook
//! left installed fires on every later halt from any client.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{OcdError, Result};
use crate::openocd_client::OpenocdClient;

/// Target events that mark a halt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltEvent {
    Halted,
    DebugHalted,
}

impl HaltEvent {
    pub const ALL: [HaltEvent; 2] = [HaltEvent::Halted, HaltEvent::DebugHalted];

    pub fn as_str(self) -> &'static str {
        match self {
            HaltEvent::Halted => "halted",
            HaltEvent::DebugHalted => "debug-halted",
        }
    }
}

impl<S> OpenocdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Set `flag` to 0 and make both halt events set it to 1
    pub async fn install_completion_hooks(&mut self, flag: &str) -> Result<()> {
        self.set_tcl_variable(flag, "0").await?;
        for event in HaltEvent::ALL {
            self.configure_event(event, &format!("set {} 1", flag)).await?;
        }
        debug!("Completion hooks installed on flag {}", flag);
        Ok(())
    }

    /// Reset both halt events to an empty body.
    ///
    /// Both events are attempted even if the first fails.
    pub async fn remove_completion_hooks(&mut self) -> Result<()> {
        let mut first_error = None;
        for event in HaltEvent::ALL {
            if let Err(e) = self.configure_event(event, "").await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// True once a hook has set `flag` to 1
    pub async fn read_completion_flag(&mut self, flag: &str) -> Result<bool> {
        let raw = self.get_tcl_variable(flag).await?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(OcdError::Parse(format!("Unexpected value for {}: '{}'", flag, other))),
        }
    }

    async fn configure_event(&mut self, event: HaltEvent, body: &str) -> Result<()> {
        let command = self.target_command(&format!("configure -event {} {{ {} }}", event.as_str(), body));
        self.send(&command).await?;
        Ok(())
    }
}
