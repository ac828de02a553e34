//! sim161 - scripted console test harness for the sys161 simulator

use clap::Parser;
use sim161::commands::{self, Commands};
use sim161::common::logging;

#[derive(Parser)]
#[command(name = "sim161", about = "Scripted console test harness for sys161")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { .. } => logging::init_server(),
        _ => logging::init_cli(),
    }

    if let Err(e) = commands::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
