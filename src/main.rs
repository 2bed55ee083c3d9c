use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "intake")]
#[command(version, about = "AI-assisted patient intake orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP session server
    Serve {
        /// Port to serve on (overrides intake.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Permissive CORS for local frontend development
        #[arg(long)]
        dev: bool,
    },
    /// Conduct one interview interactively in the terminal
    Run {
        /// Resume an existing session id instead of minting a new one
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = cli
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Serve { port, dev } => cmd::serve::run(&project_dir, port, dev, cli.verbose).await,
        Commands::Run { session } => cmd::run::run(&project_dir, session, cli.verbose).await,
    }
}
