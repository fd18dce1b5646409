mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{apply, init, inspect, ApplyArgs, InitArgs, InspectArgs};
use tracing_subscriber::EnvFilter;

/// Folio CLI - replay block mutations against a document
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log store activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a folio.config.json with the default settings
    Init(InitArgs),

    /// Run a JSON mutation script against a document
    Apply(ApplyArgs),

    /// Print the block tree stored in an update file
    Inspect(InspectArgs),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = std::env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|cwd| match cli.command {
            Command::Init(args) => init(args, &cwd),
            Command::Apply(args) => apply(args, &cwd),
            Command::Inspect(args) => inspect(args, &cwd),
        });

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
