use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use linkref::{commands, watch};

#[derive(Parser)]
#[command(name = "linkref", about = "Incremental link validation for markdown", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every markdown file under the root once
    Check {
        /// Workspace root to scan
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate continuously, re-checking as files change
    Watch {
        /// Workspace root to scan
        #[arg(default_value = ".")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { json, root } => commands::check(&root, json).await,
        Commands::Watch { root } => watch::run(&root).await,
    };

    return match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    };
}
