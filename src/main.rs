//! openocd-rpc command line entry point

use clap::Parser;
use serde::{Serialize, Serializer};
use tracing::{info, error, debug};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};
use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::Duration;

use openocd_rpc::config::Command;
use openocd_rpc::{with_connection, Args, Config, OpenocdClient, TargetState};

/// Result of one subcommand
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Output {
    #[serde(serialize_with = "serialize_done")]
    Done,
    State(TargetState),
    Word(u32),
    MaybeWord(Option<u32>),
    Words(Vec<u32>),
    Text(String),
}

fn serialize_done<S: Serializer>(serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("ok")
}

impl Output {
    fn render(&self) -> String {
        match self {
            Output::Done => "ok".to_string(),
            Output::State(state) => state.to_string(),
            Output::Word(value) => format!("0x{:08x}", value),
            Output::MaybeWord(Some(value)) => format!("0x{:08x}", value),
            Output::MaybeWord(None) => "<None>".to_string(),
            Output::Words(values) => values
                .iter()
                .map(|v| format!("0x{:08x}", v))
                .collect::<Vec<_>>()
                .join(" "),
            Output::Text(text) => text.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Starting openocd-rpc v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args).inspect_err(|e| {
        error!("Invalid configuration: {}", e);
    })?;

    let json = args.json;
    let command = args.command;
    let output = with_connection::<Output, _>(&config, move |ocd| {
        Box::pin(async move { run_command(ocd, command).await })
    })
    .await
    .inspect_err(|e| {
        error!("Command failed: {}", e);
    })?;

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", output.render());
    }
    Ok(())
}

async fn run_command(ocd: &mut OpenocdClient, command: Command) -> openocd_rpc::Result<Output> {
    let output = match command {
        Command::State => Output::State(ocd.curstate().await?),
        Command::Halt => {
            ocd.halt().await?;
            Output::Done
        }
        Command::Resume => {
            ocd.resume().await?;
            Output::Done
        }
        Command::Reset { run } => {
            ocd.reset(!run).await?;
            Output::Done
        }
        Command::ReadReg { name } => Output::Word(ocd.read_register(&name).await?),
        Command::WriteReg { name, value } => {
            ocd.write_register(&name, value).await?;
            Output::Done
        }
        Command::ReadMem { width, address, count } => {
            Output::Words(ocd.read_memory(width, address, count).await?)
        }
        Command::WriteMem { width, address, values } => {
            ocd.write_memory(width, address, values.len(), &values).await?;
            Output::Done
        }
        Command::ReadVar { address } => Output::MaybeWord(ocd.read_variable(address).await?),
        Command::WriteVar { address, value } => {
            ocd.write_variable(address, value).await?;
            Output::Done
        }
        Command::Call { address, args, timeout_ms } => {
            let value = match timeout_ms {
                Some(ms) => {
                    ocd.call_with_timeout(address, &args, Some(Duration::from_millis(ms)))
                        .await?
                }
                None => ocd.call(address, &args).await?,
            };
            Output::Word(value)
        }
        Command::Send { command } => Output::Text(ocd.send(&command).await?),
    };
    Ok(output)
}

/// Log to `--log-file` when given, else to stderr. `RUST_LOG` overrides
/// `--log-level`.
fn init_logging(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)?,
    };

    let writer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(args.log_file.is_none())
        .with_target(true)
        .init();

    match &args.log_file {
        Some(path) => debug!("Logging at {} to {}", args.log_level, path.display()),
        None => debug!("Logging at {} to stderr", args.log_level),
    }
    Ok(())
}
