//! Bot state storage.
//!
//! The host never inspects stored records; it only forwards a [`Storage`]
//! handle to the transport and to plugins. Records are JSON values keyed by
//! id inside a small fixed set of collections.
//!
//! - [`MemoryStorage`] is the default and lives for the process lifetime.
//! - [`SqliteStorage`] persists records in a single SQLite table.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

/// Record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Teams the bot has connected to.
    Teams,
    /// Users seen by the bot.
    Users,
    /// Channels seen by the bot.
    Channels,
}

impl Collection {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teams => "teams",
            Self::Users => "users",
            Self::Channels => "channels",
        }
    }
}

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record was not valid JSON.
    #[error("invalid record JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Keyed JSON record store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch one record.
    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError>;

    /// Insert or replace one record.
    async fn save(
        &self,
        collection: Collection,
        id: &str,
        record: serde_json::Value,
    ) -> Result<(), StorageError>;

    /// All records in a collection, ordered by id.
    async fn all(&self, collection: Collection) -> Result<Vec<serde_json::Value>, StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<Collection, BTreeMap<String, serde_json::Value>>>,
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .get(&collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn save(
        &self,
        collection: Collection,
        id: &str,
        record: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        records
            .entry(collection)
            .or_default()
            .insert(id.to_owned(), record);
        Ok(())
    }

    async fn all(&self, collection: Collection) -> Result<Vec<serde_json::Value>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .get(&collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

const CREATE_RECORDS: &str = "CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    data       TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (collection, id)
)";

/// SQLite-backed storage.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;
        let storage = Self::with_pool(pool).await?;
        info!(path = %path.display(), "sqlite storage opened");
        Ok(storage)
    }

    /// Wrap an existing pool, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn with_pool(db: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(CREATE_RECORDS).execute(&db).await?;
        Ok(Self { db })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM records WHERE collection = ?1 AND id = ?2")
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        row.map(|(data,)| serde_json::from_str(&data))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn save(
        &self,
        collection: Collection,
        id: &str,
        record: serde_json::Value,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO records (collection, id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id)
             DO UPDATE SET data = excluded.data, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(record.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn all(&self, collection: Collection) -> Result<Vec<serde_json::Value>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT data FROM records WHERE collection = ?1 ORDER BY id")
                .bind(collection.as_str())
                .fetch_all(&self.db)
                .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_str(&data).map_err(StorageError::from))
            .collect()
    }
}
