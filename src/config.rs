//! Configuration for the openocd-rpc client

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};

use crate::decode::parse_word;
use crate::error::{OcdError, Result};
use crate::memory::WordWidth;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "openocd-rpc")]
#[command(about = "Call functions and access registers/memory on a halted target via OpenOCD")]
#[command(version)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// OpenOCD TCL server host
    #[arg(long, env = "OPENOCD_HOST")]
    pub host: Option<String>,

    /// OpenOCD TCL server port
    #[arg(long, env = "OPENOCD_TCL_PORT")]
    pub port: Option<u16>,

    /// TCL expression naming the target
    #[arg(long)]
    pub target: Option<String>,

    /// Completion poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Give up on a remote call after this many milliseconds
    #[arg(long)]
    pub call_timeout_ms: Option<u64>,

    /// Per-response read timeout in milliseconds
    #[arg(long)]
    pub response_timeout_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path (defaults to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// One action per invocation; each runs inside its own connection
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the target execution state
    State,
    /// Halt the target
    Halt,
    /// Resume the target
    Resume,
    /// Reset the target (halts afterwards unless --run)
    Reset {
        #[arg(long)]
        run: bool,
    },
    /// Read a CPU register
    ReadReg { name: String },
    /// Write a CPU register
    WriteReg {
        name: String,
        #[arg(value_parser = parse_word_arg)]
        value: u32,
    },
    /// Read `count` words of `width` bits
    ReadMem {
        #[arg(long, default_value = "32", value_parser = parse_width_arg)]
        width: WordWidth,
        #[arg(value_parser = parse_word_arg)]
        address: u32,
        count: usize,
    },
    /// Write words of `width` bits
    WriteMem {
        #[arg(long, default_value = "32", value_parser = parse_width_arg)]
        width: WordWidth,
        #[arg(value_parser = parse_word_arg)]
        address: u32,
        #[arg(required = true, value_parser = parse_word_arg)]
        values: Vec<u32>,
    },
    /// Read one 32-bit word
    ReadVar {
        #[arg(value_parser = parse_word_arg)]
        address: u32,
    },
    /// Write one 32-bit word
    WriteVar {
        #[arg(value_parser = parse_word_arg)]
        address: u32,
        #[arg(value_parser = parse_word_arg)]
        value: u32,
    },
    /// Call the function at `address` with up to 4 word arguments
    Call {
        #[arg(value_parser = parse_word_arg)]
        address: u32,
        #[arg(value_parser = parse_word_arg)]
        args: Vec<u32>,
        /// Overrides --call-timeout-ms for this call
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send a raw TCL command
    Send { command: String },
}

fn parse_word_arg(s: &str) -> std::result::Result<u32, String> {
    parse_word(s).map_err(|e| e.to_string())
}

fn parse_width_arg(s: &str) -> std::result::Result<WordWidth, String> {
    let bits = s.parse::<u32>().map_err(|e| format!("Invalid width '{}': {}", s, e))?;
    WordWidth::try_from(bits).map_err(|e| e.to_string())
}

/// Runtime configuration (file + CLI overrides)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub target_name: String,
    pub response_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// `None` waits for a remote call indefinitely
    pub call_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6666,
            target_name: "$_TARGETNAME".to_string(),
            response_timeout_ms: 10_000,
            poll_interval_ms: 10,
            call_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| OcdError::InvalidConfig(format!("Failed to read config file: {}", e)))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| OcdError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load the file named by `--config`, apply CLI overrides, validate
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Config::load(args.config.as_ref())?;
        config.merge_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(target) = &args.target {
            self.target_name = target.clone();
        }
        if let Some(ms) = args.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = args.call_timeout_ms {
            self.call_timeout_ms = Some(ms);
        }
        if let Some(ms) = args.response_timeout_ms {
            self.response_timeout_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(OcdError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(OcdError::InvalidConfig("port must be non-zero".to_string()));
        }
        if self.target_name.trim().is_empty() {
            return Err(OcdError::InvalidConfig("target_name must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(OcdError::InvalidConfig("poll_interval_ms must be non-zero".to_string()));
        }
        if self.response_timeout_ms == 0 {
            return Err(OcdError::InvalidConfig("response_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OcdError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
