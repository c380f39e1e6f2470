use chrono::NaiveDate;
use fin_core::{Cleared, Entry, TagSet};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StorageError;

pub type DbPool = Pool<Sqlite>;

/// An imported entry with the source it came from and its current tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: String,
    pub source: String,
    pub entry: Entry,
    pub tags: TagSet,
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            number TEXT NOT NULL,
            date TEXT NOT NULL,
            payee TEXT NOT NULL,
            address TEXT NOT NULL,
            amount INTEGER NOT NULL,
            cleared TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tag (
            entry_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (entry_id, tag)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn parse_cleared(id: &str, s: &str) -> Result<Cleared, StorageError> {
    match s {
        "not_cleared" => Ok(Cleared::NotCleared),
        "cleared" => Ok(Cleared::Cleared),
        "reconciled" => Ok(Cleared::Reconciled),
        other => Err(StorageError::CorruptRow {
            id: id.to_string(),
            reason: format!("unknown cleared status {other:?}"),
        }),
    }
}

/// Inserts entries under `source`, keyed by identity key. Entries already
/// present are left alone, so importing the same file twice is harmless.
/// Returns how many rows were new.
pub async fn insert_entries(
    pool: &DbPool,
    source: &str,
    entries: &[Entry],
) -> Result<u64, StorageError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for entry in entries {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO entry (id, source, number, date, payee, address, amount, cleared) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(entry.id())
        .bind(source)
        .bind(&entry.number)
        .bind(entry.date)
        .bind(&entry.payee)
        .bind(&entry.address)
        .bind(entry.amount)
        .bind(entry.cleared.to_string())
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;

    info!(source, offered = entries.len(), inserted, "stored entries");
    Ok(inserted)
}

/// Every stored entry with its tags, oldest first.
pub async fn all_entries(pool: &DbPool) -> Result<Vec<StoredEntry>, StorageError> {
    let rows = sqlx::query_as::<_, (String, String, String, NaiveDate, String, String, i64, String)>(
        "SELECT id, source, number, date, payee, address, amount, cleared FROM entry ORDER BY date, id"
    )
    .fetch_all(pool)
    .await?;

    let tag_rows = sqlx::query_as::<_, (String, String)>("SELECT entry_id, tag FROM tag")
        .fetch_all(pool)
        .await?;
    let mut tags: HashMap<String, TagSet> = HashMap::new();
    for (id, tag) in tag_rows {
        tags.entry(id).or_default().insert(tag);
    }

    rows.into_iter()
        .map(|r| {
            let cleared = parse_cleared(&r.0, &r.7)?;
            let tags = tags.remove(&r.0).unwrap_or_default();
            Ok(StoredEntry {
                entry: Entry {
                    number: r.2,
                    date: r.3,
                    amount: r.6,
                    payee: r.4,
                    address: r.5,
                    cleared,
                },
                id: r.0,
                source: r.1,
                tags,
            })
        })
        .collect()
}

/// Applies a tag update to every id in one transaction: `"-tag"` deletes,
/// a bare `"tag"` inserts, empty strings are skipped.
pub async fn update_tags<I, S>(pool: &DbPool, ids: &[I], updates: &[S]) -> Result<(), StorageError>
where
    I: AsRef<str>,
    S: AsRef<str>,
{
    let mut tx = pool.begin().await?;
    for id in ids {
        let id = id.as_ref();
        for update in updates {
            let update = update.as_ref();
            if update.is_empty() {
                continue;
            }
            match update.strip_prefix('-') {
                Some(tag) => {
                    sqlx::query("DELETE FROM tag WHERE entry_id = ? AND tag = ?")
                        .bind(id)
                        .bind(tag)
                        .execute(&mut *tx)
                        .await?;
                }
                None => {
                    sqlx::query("INSERT OR IGNORE INTO tag (entry_id, tag) VALUES (?, ?)")
                        .bind(id)
                        .bind(update)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
    }
    tx.commit().await?;
    debug!(ids = ids.len(), updates = updates.len(), "updated tags");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(day: u32, amount: i64, payee: &str) -> Entry {
        Entry::new(NaiveDate::from_ymd_opt(2024, 3, day).unwrap(), amount, payee)
    }

    async fn test_db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("fin.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let (_dir, pool) = test_db().await;
        let mut e = entry(2, -1250, "GROCER");
        e.number = "42".to_string();
        e.cleared = Cleared::Reconciled;
        let entries = vec![entry(5, 900, "REFUND"), e.clone()];

        assert_eq!(insert_entries(&pool, "checking", &entries).await.unwrap(), 2);

        let stored = all_entries(&pool).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].entry, e);
        assert_eq!(stored[0].id, e.id());
        assert_eq!(stored[0].source, "checking");
        assert!(stored[0].tags.is_empty());
        assert_eq!(stored[1].entry.payee, "REFUND");
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let (_dir, pool) = test_db().await;
        let entries = vec![entry(1, -100, "A"), entry(2, -200, "B")];
        insert_entries(&pool, "card", &entries).await.unwrap();
        assert_eq!(insert_entries(&pool, "card", &entries).await.unwrap(), 0);
        assert_eq!(all_entries(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tag_updates_follow_protocol() {
        let (_dir, pool) = test_db().await;
        let a = entry(1, -100, "A");
        let b = entry(2, -200, "B");
        insert_entries(&pool, "card", &[a.clone(), b.clone()]).await.unwrap();

        let ids = [a.id(), b.id()];
        update_tags(&pool, &ids, &["food", "coffee", ""]).await.unwrap();
        update_tags(&pool, &ids[..1], &["-coffee", "food"]).await.unwrap();

        let stored = all_entries(&pool).await.unwrap();
        let tags: Vec<Vec<String>> = stored
            .iter()
            .map(|s| s.tags.iter().cloned().collect())
            .collect();
        assert_eq!(tags, vec![vec!["food"], vec!["coffee", "food"]]);
    }

    #[tokio::test]
    async fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fin.db");
        {
            let pool = create_db(&path).await.unwrap();
            insert_entries(&pool, "s", &[entry(1, 1, "X")]).await.unwrap();
            pool.close().await;
        }
        let pool = create_db(&path).await.unwrap();
        assert_eq!(all_entries(&pool).await.unwrap().len(), 1);
    }
}
