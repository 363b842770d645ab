//! mfil - restore legacy game clients from their content mirrors

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "mfil")]
#[command(author, version = env!("MFIL_VERSION"))]
#[command(about = "Restore legacy game clients from their content mirrors")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a client build and install it (the default)
    Restore {
        /// Install directory (defaults to one named after the build)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Locale to restore, e.g. enUS (prompted when omitted)
        #[arg(long)]
        locale: Option<String>,
        /// Client OS flavour (prompted when omitted)
        #[arg(long, value_parser = ["Win", "OSX"])]
        os: Option<String>,
        /// Repack streamed archives without asking
        #[arg(long)]
        repack: bool,
    },
    /// List the known repository catalog
    Repos,
    /// Show the locales a repository's manifest offers
    Locales {
        /// Manifest filename or URL, e.g. wow-15595-1.mfil
        manifest: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Plain `mfil` drops straight into the restore wizard.
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Restore {
        dir: None,
        locale: None,
        os: None,
        repack: false,
    });

    match command {
        Commands::Restore {
            dir,
            locale,
            os,
            repack,
        } => cmd::restore::restore(dir, locale, os, repack).await,
        Commands::Repos => cmd::repos::repos(),
        Commands::Locales { manifest } => cmd::locales::locales(&manifest).await,
    }
}
