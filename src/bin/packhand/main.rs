//! packhand CLI - detect and build applications with ecosystem plugins

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("packhand=debug")
    } else {
        EnvFilter::new("packhand=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let output = cli.output();

    // Execute command
    match cli.command {
        Commands::Detect(args) => commands::detect::execute(args, &output),
        Commands::Build(args) => commands::build::execute(args, &output),
        Commands::Plugins => commands::plugins::execute(),
        Commands::Cache(args) => commands::cache::execute(args),
    }
}
