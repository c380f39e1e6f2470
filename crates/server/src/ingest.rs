use anyhow::{bail, Context, Result};
use fin_core::{Entry, TagStore};
use fin_import::{SignPolicy, SourceFormat};
use fin_storage::{db, DbPool};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

use crate::config::Config;

/// Reads every entry from an export file, picking the reader by extension.
/// Tabular files need an explicit sign policy; other formats ignore it.
pub async fn read_source(path: &Path, sign: Option<SignPolicy>) -> Result<Vec<Entry>> {
    let Some(format) = SourceFormat::from_path(path) else {
        bail!("{}: unknown source format", path.display());
    };
    let sign = match (format, sign) {
        (SourceFormat::Csv, None) => {
            bail!("{}: csv sources need an explicit sign policy", path.display())
        }
        (_, sign) => sign.unwrap_or(SignPolicy::AsReported),
    };

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut reader = fin_import::open(format, Cursor::new(data), sign)
        .with_context(|| format!("opening {}", path.display()))?;
    let entries = reader
        .read_all()
        .with_context(|| format!("parsing {}", path.display()))?;

    info!(
        path = %path.display(),
        entries = entries.len(),
        diagnostics = reader.diagnostics().len(),
        "read source"
    );
    Ok(entries)
}

/// Reads every configured source, in order.
pub async fn read_sources(config: &Config) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for source in &config.sources {
        entries.extend(read_source(&source.path, source.sign()).await?);
    }
    Ok(entries)
}

/// `fin import`: reads one file and stores its entries under `name`.
pub async fn import(config: &Config, name: &str, path: &Path, sign: Option<SignPolicy>) -> Result<()> {
    let entries = read_source(path, sign).await?;
    let pool = db::create_db(&config.database)
        .await
        .with_context(|| format!("opening {}", config.database.display()))?;
    let inserted = db::insert_entries(&pool, name, &entries).await?;
    info!(source = name, inserted, skipped = entries.len() as u64 - inserted, "import finished");
    pool.close().await;
    Ok(())
}

/// Opens the database and loads everything `fin import` stored, with the
/// tags kept in the `tag` table.
pub async fn load_database(config: &Config) -> Result<(DbPool, Vec<Entry>, TagStore)> {
    let pool = db::create_db(&config.database)
        .await
        .with_context(|| format!("opening {}", config.database.display()))?;
    let stored = db::all_entries(&pool).await?;

    let mut tags = TagStore::new();
    let mut entries = Vec::with_capacity(stored.len());
    for s in stored {
        if !s.tags.is_empty() {
            tags.insert(s.id, s.tags);
        }
        entries.push(s.entry);
    }
    info!(
        path = %config.database.display(),
        entries = entries.len(),
        tagged = tags.len(),
        "loaded database"
    );
    Ok((pool, entries, tags))
}
