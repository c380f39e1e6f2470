use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fin_import::SignPolicy;
use fin_storage::tags_file;
use fin_suggest::TagSuggester;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod ingest;
mod web;

use config::{Backend, Config};
use web::TagPersistence;

#[derive(Parser)]
#[command(name = "fin", about = "Import bank exports and tag their transactions.")]
struct Cli {
    /// Configuration file; defaults to ./fin.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the configured sources and their tags over HTTP.
    Serve {
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Read one export file into the database.
    Import {
        /// Source name recorded with every entry.
        #[arg(long)]
        name: String,
        file: PathBuf,
        /// Negate every amount. Required for csv files.
        #[arg(long)]
        invert_sign: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Command::Serve { addr } => serve(config, addr).await,
        Command::Import {
            name,
            file,
            invert_sign,
        } => {
            let sign = invert_sign.map(SignPolicy::from_inverted);
            ingest::import(&config, &name, &file, sign).await
        }
    }
}

async fn serve(config: Config, addr: Option<SocketAddr>) -> Result<()> {
    let (entries, tags, persist) = match config.server.backend {
        Backend::Files => {
            let entries = ingest::read_sources(&config).await?;
            let tags = tags_file::load(&config.tags_path)
                .await
                .with_context(|| format!("loading {}", config.tags_path.display()))?;
            (entries, tags, TagPersistence::File(config.tags_path.clone()))
        }
        Backend::Database => {
            let (pool, entries, tags) = ingest::load_database(&config).await?;
            (entries, tags, TagPersistence::Database(pool))
        }
    };

    let state = Arc::new(web::AppState {
        entries,
        tags: Mutex::new(tags),
        persist,
        suggester: TagSuggester::default(),
    });
    let app = web::router(state, config.server.static_dir.as_deref());

    let addr = addr.unwrap_or(config.server.addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
