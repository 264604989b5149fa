mod books;
mod cli;
mod config;
mod logging;
mod run;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    match cli.command {
        Command::Process(args) => run::run(args),
        Command::Prompts => run::print_prompts(),
    }
}
