mod common;
mod run_cores;
mod run_learn;

use crate::run_cores::*;
use crate::run_learn::*;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample records from a network and learn its parameters back
    Learn(LearnArgs),

    /// Time parameter learning across numbers of worker threads
    Cores(CoresArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Learn(args) => {
            run_learn(args.clone())?;
        }
        Commands::Cores(args) => {
            run_cores(args.clone())?;
        }
    }

    Ok(())
}
