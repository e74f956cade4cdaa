mod commands;
mod manifest;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grant")]
#[command(about = "Declarative management of AWS KMS grants", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory holding .grantflow/state.json
    #[arg(
        short = 'C',
        long = "project-dir",
        env = "GRANTFLOW_PROJECT_DIR",
        default_value = ".",
        global = true
    )]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a manifest without contacting AWS
    Validate {
        /// Manifest file
        #[arg(short, long, env = "GRANTFLOW_MANIFEST", default_value = manifest::DEFAULT_MANIFEST)]
        file: PathBuf,
    },
    /// Show what apply would change
    Plan {
        /// Manifest file
        #[arg(short, long, env = "GRANTFLOW_MANIFEST", default_value = manifest::DEFAULT_MANIFEST)]
        file: PathBuf,
        /// Refresh recorded grants from AWS first
        #[arg(short, long)]
        refresh: bool,
    },
    /// Create, replace and revoke grants to match the manifest
    Apply {
        /// Manifest file
        #[arg(short, long, env = "GRANTFLOW_MANIFEST", default_value = manifest::DEFAULT_MANIFEST)]
        file: PathBuf,
    },
    /// Refresh a recorded grant from AWS
    Read {
        /// Grant name in state
        name: String,
    },
    /// Revoke recorded grants
    Destroy {
        /// Grant name (all recorded grants if omitted)
        name: Option<String>,
    },
    /// Record an existing grant in state
    Import {
        /// Grant name to record it under
        name: String,
        /// `<key-id>:<grant-id>`
        id: String,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project_root = cli.project_dir;

    match cli.command {
        Commands::Version => {
            println!("grantflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate { file } => {
            commands::validate::handle(&project_root.join(file))?;
        }
        Commands::Plan { file, refresh } => {
            commands::plan::handle(&project_root, &project_root.join(file), refresh).await?;
        }
        Commands::Apply { file } => {
            commands::apply::handle(&project_root, &project_root.join(file)).await?;
        }
        Commands::Read { name } => {
            commands::read::handle(&project_root, &name).await?;
        }
        Commands::Destroy { name } => {
            commands::destroy::handle(&project_root, name.as_deref()).await?;
        }
        Commands::Import { name, id } => {
            commands::import::handle(&project_root, &name, &id).await?;
        }
    }

    Ok(())
}
