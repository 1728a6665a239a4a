use crate::types::{Article, DigestError, Result};
use chrono::{Duration, NaiveDate};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS seen_articles (
        identifier TEXT PRIMARY KEY,
        first_seen_date TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_seen_articles_first_seen
        ON seen_articles (first_seen_date)
    "#,
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Durable ledger of article identifiers already processed by a run.
/// Dates are stored as ISO `YYYY-MM-DD` text so they order lexically.
pub struct ArticleCache {
    pool: SqlitePool,
}

impl ArticleCache {
    /// Open the cache at `path`, creating an empty database if none exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// Cache that lives only as long as the process; used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // An in-memory database is private to its connection, so keep exactly
        // one and never recycle it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        for migration in MIGRATIONS {
            sqlx::query(migration).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub async fn is_seen(&self, identifier: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM seen_articles WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn first_seen(&self, identifier: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT first_seen_date FROM seen_articles WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let raw: String = r.get("first_seen_date");
            NaiveDate::parse_from_str(&raw, DATE_FORMAT).ok()
        }))
    }

    /// Drop articles whose identifier is already in the ledger, preserving order.
    pub async fn retain_unseen(&self, articles: Vec<Article>) -> Result<Vec<Article>> {
        let total = articles.len();
        let mut fresh = Vec::with_capacity(total);
        for article in articles {
            if !self.is_seen(&article.identifier).await? {
                fresh.push(article);
            }
        }
        info!("{} of {} fetched articles are new", fresh.len(), total);
        Ok(fresh)
    }

    /// Mark identifiers as seen on `as_of`. Identifiers already present keep
    /// their original first-seen date. Returns how many rows were inserted.
    pub async fn record<I, S>(&self, identifiers: I, as_of: NaiveDate) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let date = as_of.format(DATE_FORMAT).to_string();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for identifier in identifiers {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO seen_articles (identifier, first_seen_date) VALUES (?, ?)",
            )
            .bind(identifier.as_ref())
            .bind(&date)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("Recorded {} new identifiers as of {}", inserted, date);
        Ok(inserted)
    }

    /// Remove entries first seen more than `retention_days` before `as_of`.
    /// An entry seen exactly `retention_days` ago is kept.
    pub async fn purge_expired(&self, retention_days: u32, as_of: NaiveDate) -> Result<u64> {
        let cutoff = as_of
            .checked_sub_signed(Duration::days(i64::from(retention_days)))
            .ok_or_else(|| {
                DigestError::config(format!("retention of {} days is out of range", retention_days))
            })?;
        let result = sqlx::query("DELETE FROM seen_articles WHERE first_seen_date < ?")
            .bind(cutoff.format(DATE_FORMAT).to_string())
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!("Purged {} cache entries first seen before {}", purged, cutoff);
        }
        Ok(purged)
    }

    pub async fn entry_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM seen_articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Flush and release the database. Call once at the end of a run.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
