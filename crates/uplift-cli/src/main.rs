mod cli;
mod config;
mod context;
mod continuation;
mod countdown;
mod dispatch;
mod error;
mod logging;
mod render;
mod workflow;

use clap::Parser;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();
    std::process::exit(dispatch::run_cli(cli));
}

#[cfg(test)]
mod tests;
