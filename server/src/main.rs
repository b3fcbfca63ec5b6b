use anyhow::Result;
use clap::{Parser, Subcommand};

use channelmixer::{apply, serve};

#[derive(Parser, Debug)]
#[command(name = "channelmixer", about = "Channel mixer node with live preview server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the preview HTTP server
    Serve(serve::ServeArgs),
    /// Mix an image file offline
    Mix(apply::MixArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve(args) => serve::run(args),
        Command::Mix(args) => apply::run(args),
    }
}
