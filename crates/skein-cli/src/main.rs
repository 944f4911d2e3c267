//! CLI frontend for the skein narrative engine.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "skein",
    about = "skein — a branching narrative script engine",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and report diagnostics
    Check {
        /// Script file to check
        file: PathBuf,
    },

    /// Print the compiled element table of a script
    Disasm {
        /// Script file to disassemble
        file: PathBuf,

        /// Emit machine-readable JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Play a script interactively in the terminal
    Play {
        /// Script file to play
        file: PathBuf,

        /// Label to start from instead of the top
        #[arg(short, long)]
        start: Option<String>,

        /// Seed for shuffle lists, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { file } => commands::check::run(&file),
        Commands::Disasm { file, json } => commands::disasm::run(&file, json),
        Commands::Play { file, start, seed } => {
            commands::play::run(&file, start.as_deref(), seed)
        }
    };

    if let Err(report) = result {
        eprintln!("{report:?}");
        process::exit(1);
    }
}
