// Crate-level lint configuration for pedantic clippy
#![allow(clippy::doc_markdown)] // Missing backticks - low priority
#![allow(clippy::uninlined_format_args)] // Named args are clearer
#![allow(clippy::option_if_let_else)] // Style preference

//! verilane command-line driver
//!
//! Verifies files with a configured backend, flushes backend caches and
//! inspects persisted execution traces without an editor attached.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use verilane_trace::StepType;

/// Output format of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "verilane")]
#[command(about = "Drive external verification backends and inspect their execution traces")]
struct Args {
    /// Settings file (JSON, camelCase keys)
    #[arg(long, global = true, env = "VERILANE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, env = "VERILANE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a file and print its diagnostics
    Verify {
        file: PathBuf,
        /// Backend to use, defaults to the first configured one
        #[arg(long, env = "VERILANE_BACKEND")]
        backend: Option<String>,
    },
    /// Drop the backend's cached verification results
    FlushCache {
        /// Only flush results for this file
        file: Option<PathBuf>,
        #[arg(long, env = "VERILANE_BACKEND")]
        backend: Option<String>,
    },
    /// Print the records of a persisted execution log
    Trace {
        log: PathBuf,
        /// Print decorations instead of the record outline
        #[arg(long)]
        decorations: bool,
    },
    /// Step through a persisted execution log
    Step {
        log: PathBuf,
        /// Client index to step from
        #[arg(long, default_value = "0")]
        from: usize,
        /// stay, next, back, in, out or continue
        #[arg(long, default_value = "next")]
        step: StepType,
        /// Walk the whole tree instead of the execution path
        #[arg(long)]
        advanced: bool,
    },
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    let settings = commands::load_settings(args.settings.as_deref())?;
    match args.command {
        Command::Verify { file, backend } => {
            let success =
                commands::verify::run_verify(settings, &file, backend.as_deref(), args.format)
                    .await?;
            if !success {
                std::process::exit(1);
            }
        }
        Command::FlushCache { file, backend } => {
            commands::verify::run_flush_cache(settings, file.as_deref(), backend.as_deref()).await?;
        }
        Command::Trace { log, decorations } => {
            commands::trace::run_trace(&log, decorations, settings.theme, args.format)?;
        }
        Command::Step {
            log,
            from,
            step,
            advanced,
        } => {
            commands::trace::run_step(&log, from, step, advanced, args.format)?;
        }
    }
    Ok(())
}
