//! Reader-side state: which articles were opened, where each list was
//! scrolled to. Kept behind a small key-value interface so the storage can
//! be swapped; the feed pipeline never touches it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::RwLock;

use crate::error::Result;

const VISITED: &str = "visited";
const SCROLL: &str = "scroll";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
    /// Keys of `namespace` in ascending order.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (namespace, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM kv WHERE namespace = ? ORDER BY key",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}

#[derive(Clone)]
pub struct ReaderState {
    store: Arc<dyn KeyValueStore>,
}

impl ReaderState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record that the article at `link` was opened.
    pub async fn mark_visited(&self, link: &str) -> Result<()> {
        self.store
            .put(VISITED, link, &Utc::now().to_rfc3339())
            .await
    }

    pub async fn is_visited(&self, link: &str) -> Result<bool> {
        Ok(self.store.get(VISITED, link).await?.is_some())
    }

    pub async fn visited_links(&self) -> Result<HashSet<String>> {
        Ok(self.store.keys(VISITED).await?.into_iter().collect())
    }

    /// Saved position for `key`; an unreadable value counts as unsaved.
    pub async fn scroll_position(&self, key: &str) -> Result<Option<f64>> {
        let value = self.store.get(SCROLL, key).await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    pub async fn set_scroll_position(&self, key: &str, position: f64) -> Result<()> {
        self.store.put(SCROLL, key, &position.to_string()).await
    }
}
