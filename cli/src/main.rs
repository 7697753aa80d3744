mod output;

use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use cardloop::command::{FaultReport, MismatchReport};
use cardloop::pcsc::Context;
use cardloop::{catalog, session};
use cardloop::{CommandPlan, ErrorRecord, ReaderHandle, ReaderRegistry, ResultCode};
use cardloop::{SessionConfig, SessionEvent};
use clap::{ArgGroup, Args, Parser, Subcommand};
use dialoguer::Confirm;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::output::{print_event, print_record};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Core(#[from] cardloop::Error),

    #[error("Could not decode the payload: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not serialize the output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("The payload is empty")]
    EmptyPayload,

    #[error("Aborted by the user")]
    Aborted,

    #[error("The session ended before a card was provisioned")]
    Interrupted,

    #[error("{0}")]
    Fault(FaultReport),

    #[error(
        "The card returned {} after writing {}",
        hex::encode_upper(&.0.read_back),
        hex::encode_upper(&.0.written)
    )]
    Mismatch(MismatchReport),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Parser)]
#[command(name = "cardloop", version, about = "Monitor and provision contactless cards through PC/SC.")]
struct Cli {
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists the attached readers.
    Readers,

    /// Shows the result code catalog, or the record of a single code.
    Codes {
        /// The code, in 0x-prefixed hexadecimal or in decimal.
        #[arg(value_parser = parse_code)]
        code: Option<ResultCode>,

        #[arg(long)]
        json: bool,
    },

    /// Polls the status and the NDEF message of cards until interrupted.
    Monitor(MonitorArgs),

    /// Writes an NDEF message to the next card and reads it back.
    Provision(ProvisionArgs),
}

#[derive(Args)]
struct MonitorArgs {
    /// Monitors only this reader. Every attached reader is monitored if omitted.
    #[arg(short, long)]
    reader: Option<String>,

    /// Pause between two poll iterations, in milliseconds.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Attempts per status query or read.
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Prints events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
#[command(group(ArgGroup::new("payload").required(true).args(["hex", "file"])))]
struct ProvisionArgs {
    /// Uses this reader instead of the first one.
    #[arg(short, long)]
    reader: Option<String>,

    /// The NDEF message to write, in hexadecimal.
    #[arg(long)]
    hex: Option<String>,

    /// Reads the NDEF message to write from this file.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Attempts for both the write and the read-back.
    #[arg(long, default_value_t = 10)]
    attempts: u32,

    /// Skips the confirmation.
    #[arg(short, long)]
    yes: bool,

    /// Prints events as JSON lines.
    #[arg(long)]
    json: bool,
}

fn parse_code(value: &str) -> std::result::Result<ResultCode, ParseIntError> {
    let value = value.trim();
    let code = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => value.parse::<u32>()?,
    };

    Ok(ResultCode(code))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.subcommand {
        Command::Readers => {
            let ctx = Context::try_new()?;
            for name in ctx.enumerate()?.keys() {
                println!("{}", name);
            }
        }
        Command::Codes { code, json } => codes(code, json)?,
        Command::Monitor(args) => monitor(&Context::try_new()?, args).await?,
        Command::Provision(args) => provision(&Context::try_new()?, args).await?,
    }

    Ok(())
}

fn codes(code: Option<ResultCode>, json: bool) -> Result<()> {
    let records: Vec<ErrorRecord> = match code {
        Some(code) => vec![catalog::describe(code)],
        None => catalog::records().copied().collect(),
    };

    match json {
        true => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => records.iter().for_each(print_record),
    }

    Ok(())
}

async fn monitor(ctx: &Context, args: MonitorArgs) -> Result<()> {
    let readers = match &args.reader {
        Some(name) => vec![ctx.find(name)?],
        None => ctx.enumerate()?.into_values().collect(),
    };
    if readers.is_empty() {
        return Err(cardloop::Error::NoReaders.into());
    }

    let config = SessionConfig::default()
        .with_poll_interval(Duration::from_millis(args.interval_ms))
        .with_max_attempts(args.attempts);

    let mut sessions = Vec::new();
    for reader in readers {
        info!("Monitoring {}", reader.name());

        let (handle, mut events) = session::spawn(reader, CommandPlan::Monitor, config.clone());
        let name = handle.reader().to_owned();
        let json = args.json;
        let printer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&name, &event, json)?;
            }

            Ok::<_, Error>(())
        });

        sessions.push((handle, printer));
    }

    tokio::signal::ctrl_c().await?;
    info!("Stopping {} session(s)", sessions.len());

    for (handle, printer) in sessions {
        handle.shutdown().await?;
        printer.await.map_err(cardloop::Error::from)??;
    }

    Ok(())
}

async fn provision(ctx: &Context, args: ProvisionArgs) -> Result<()> {
    let payload = match (&args.hex, &args.file) {
        (Some(hex), _) => hex::decode(hex.trim())?,
        (None, Some(path)) => std::fs::read(path)?,
        (None, None) => Vec::new(),
    };
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }

    let reader = match &args.reader {
        Some(name) => ctx.find(name)?,
        None => ctx.first()?,
    };

    if !args.yes
        && !Confirm::new()
            .with_prompt(format!(
                "Overwrite the NDEF message of the next card on {} with {} byte(s)?",
                reader.name(),
                payload.len()
            ))
            .default(false)
            .interact()?
    {
        return Err(Error::Aborted);
    }

    let config = SessionConfig::default().with_provision_attempts(args.attempts);
    let (handle, mut events) = session::spawn(reader, CommandPlan::Provision { payload }, config);
    info!("Tap a card on {}", handle.reader());

    let outcome = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break Err(Error::Aborted),
        };

        let event = match event {
            Some(event) => event,
            None => break Err(Error::Interrupted),
        };
        print_event(handle.reader(), &event, args.json)?;

        match event {
            SessionEvent::Provisioned(_) => break Ok(()),
            SessionEvent::Faulted(report) => break Err(Error::Fault(report)),
            SessionEvent::Mismatch(report) => break Err(Error::Mismatch(report)),
            _ => {}
        }
    };

    handle.shutdown().await?;
    outcome
}
