use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod assemble;
mod decode;
mod record;

#[derive(Parser)]
#[command(name = "strobe", about = "High-speed camera capture and assembly")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a session from the built-in test pattern camera
    Record(record::RecordArgs),
    /// Assemble a persisted session into a video file
    Assemble(assemble::AssembleArgs),
    /// Reconstruct waterfall lines into still images
    Decode(decode::DecodeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Record(args) => args.run().await,
        Commands::Assemble(args) => args.run().await,
        Commands::Decode(args) => args.run(),
    }
}
