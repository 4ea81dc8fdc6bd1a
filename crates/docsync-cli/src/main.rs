//! docsync CLI
//!
//! Command-line host for docsync sessions: connects a session to a sync
//! server over WebSocket and persists the document blob to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use docsync_core::{version_vector, DocStore};

mod client;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "docsync")]
#[command(about = "Keep Automerge documents in sync with a remote peer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the sync server and keep the listed documents in sync
    Run {
        /// Document ids to subscribe to
        ids: Vec<String>,

        /// Sync server URL (overrides config)
        #[arg(long)]
        server: Option<String>,

        /// Path of the persisted document blob (overrides config)
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
    /// Print the persisted documents and their version vectors
    Show {
        /// Path of the persisted document blob (overrides config)
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run {
            ids,
            server,
            data_file,
        } => {
            let url = server.unwrap_or(config.server_url);
            let path = data_file.unwrap_or(config.data_file);
            client::run(&url, &path, ids).await
        }
        Commands::Show { data_file } => {
            let path = data_file.unwrap_or(config.data_file);
            show(&path)
        }
    }
}

fn show(data_file: &Path) -> Result<()> {
    let blob = match std::fs::read_to_string(data_file) {
        Ok(blob) => Some(blob),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read data file {:?}", data_file));
        }
    };

    let mut store = DocStore::load_all(blob.as_deref()).context("Failed to load document blob")?;
    if store.is_empty() {
        println!("No documents in {:?}", data_file);
        return Ok(());
    }

    let mut entries: Vec<(String, Vec<(String, u64)>)> = store
        .iter_mut()
        .map(|(id, doc)| {
            let mut vector: Vec<(String, u64)> = version_vector(doc).into_iter().collect();
            vector.sort();
            (id.clone(), vector)
        })
        .collect();
    entries.sort();

    for (id, vector) in entries {
        println!("{}", id);
        for (actor, counter) in vector {
            println!("  {} {}", actor, counter);
        }
    }
    Ok(())
}
