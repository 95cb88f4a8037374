use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

/// Keys the assessment client persists in the local store.
pub mod keys {
    pub const CURRENT_ANSWERS: &str = "current_answers";
    pub const CURRENT_STAGE: &str = "current_stage";
    pub const BASIC_ANSWERS: &str = "basic_answers";
    pub const QUESTIONS_CONFIG: &str = "questions_config";
    pub const QUESTIONS_VERSION: &str = "questions_version";
    pub const EVALUATION_HISTORY: &str = "evaluation_history";
    pub const LATEST_RESULT: &str = "latest_result";
    pub const TOKEN: &str = "token";
    pub const USER_PROFILE: &str = "user_profile";
}

const UPSERT_SQL: &str = "INSERT INTO kv_entries (key, value, expires_at, updated_at)
     VALUES (?, ?, ?, CURRENT_TIMESTAMP)
     ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        expires_at = excluded.expires_at,
        updated_at = CURRENT_TIMESTAMP";

/// Typed key-value store over SQLite.
///
/// Values are JSON documents; expiry is enforced centrally on read, so
/// callers never see a stale entry.
#[derive(Clone)]
pub struct KvStore {
    pool: Pool<Sqlite>,
}

impl KvStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // An in-memory database exists per connection; the pool must not
        // fan out across several of them.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns `None` for absent keys and for expired entries; expired rows
    /// are deleted on read.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        if let Some(expires_at) = row.get::<Option<DateTime<Utc>>, _>(1) {
            if expires_at <= Utc::now() {
                sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
                return Ok(None);
            }
        }

        let raw = row.get::<String, _>(0);
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("stored value under '{key}' failed to decode"))?;
        Ok(Some(value))
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("value for '{key}' failed to serialize"))?;
        let expires_at = expiry_from_ttl(ttl)?;
        sqlx::query(UPSERT_SQL)
            .bind(key)
            .bind(raw)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes all entries in one transaction; readers observe either none or
    /// all of them.
    pub async fn set_many(&self, entries: &[(&str, serde_json::Value)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            let raw = serde_json::to_string(value)
                .with_context(|| format!("value for '{key}' failed to serialize"))?;
            sqlx::query(UPSERT_SQL)
                .bind(*key)
                .bind(raw)
                .bind(Option::<DateTime<Utc>>::None)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(*key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn expiry_from_ttl(ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
    let Some(ttl) = ttl else {
        return Ok(None);
    };
    let ttl = chrono::Duration::from_std(ttl).context("ttl out of range")?;
    Ok(Some(Utc::now() + ttl))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
