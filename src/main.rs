use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crewroom::server::{ServerConfig, start_server};

#[derive(Parser)]
#[command(name = "crewroom")]
#[command(version, about = "Collaborative workspace server coordinating AI agents")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database
    #[arg(long, default_value = "data/tables.db")]
    db_path: PathBuf,

    /// Directory holding per-project workspaces
    #[arg(long, default_value = "data/projects")]
    projects_root: PathBuf,

    /// Bind on all interfaces and allow permissive CORS
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    start_server(ServerConfig {
        port: cli.port,
        db_path: cli.db_path,
        projects_root: cli.projects_root,
        dev_mode: cli.dev,
    })
    .await
}
