use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{query, Executor, Row, SqlitePool};
use thiserror::Error;

use crate::api::{Market, MarketId};

pub type Version = i64;

pub const MEMORY_CONN: &str = "sqlite::memory:";

/// Key the whole market book is stored under.
const BOOK_KEY: &str = "markets";

/// The persisted document. The book is read and written as one unit, and the
/// id counter travels with it so ids stay unique even after deletions or
/// partial rollbacks of the market list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketSet {
    pub next_id: MarketId,
    pub markets: Vec<Market>,
}

impl MarketSet {
    pub fn market(&self, id: MarketId) -> Option<&Market> {
        self.markets.iter().find(|market| market.id == id)
    }
    pub fn market_mut(&mut self, id: MarketId) -> Option<&mut Market> {
        self.markets.iter_mut().find(|market| market.id == id)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Market store unavailable: {0}")]
    Unavailable(String),
    #[error("Market book changed concurrently")]
    Conflict,
}

/// Versioned document store for the market book. Every write is a
/// compare-and-swap against the version the writer read, so two racing
/// read-modify-write cycles can never silently drop each other's changes.
#[async_trait]
pub trait MarketStore {
    /// The current book and its version, or an empty book at version 0 when
    /// nothing has been persisted yet. A store outage is an error, never an
    /// empty book.
    async fn load(&self) -> Result<(MarketSet, Version), StoreError>;
    /// Persists the book only if the stored version still equals `expected`.
    /// On a mismatch nothing is written and `Conflict` is returned.
    async fn save(&self, set: &MarketSet, expected: Version) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    connection: SqlitePool,
}

impl SqliteStore {
    pub async fn new(conn: Option<String>) -> Self {
        let url = conn.unwrap_or(MEMORY_CONN.to_string());
        // every pooled connection to :memory: would get its own empty database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let connection = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url.as_str())
            .await
            .unwrap();
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS market_books (\
                key TEXT PRIMARY KEY,\
                version INTEGER NOT NULL,\
                body TEXT NOT NULL\
                )",
            )
            .await
            .unwrap();
        Self { connection }
    }
}

#[async_trait]
impl MarketStore for SqliteStore {
    async fn load(&self) -> Result<(MarketSet, Version), StoreError> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT version, body FROM market_books WHERE key = ?").bind(BOOK_KEY),
            )
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        match row {
            Some(row) => {
                let version: Version = row.get("version");
                let body: String = row.get("body");
                let set = serde_json::from_str(body.as_str())
                    .map_err(|e| StoreError::Unavailable(format!("corrupt market book: {}", e)))?;
                Ok((set, version))
            }
            None => Ok((MarketSet::default(), 0)),
        }
    }

    async fn save(&self, set: &MarketSet, expected: Version) -> Result<(), StoreError> {
        let body = serde_json::to_string(set)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let result = if expected == 0 {
            self.connection
                .execute(
                    query(
                        "INSERT INTO market_books (key, version, body) \
                        VALUES (?, 1, ?) ON CONFLICT (key) DO NOTHING",
                    )
                    .bind(BOOK_KEY)
                    .bind(body),
                )
                .await
        } else {
            self.connection
                .execute(
                    query(
                        "UPDATE market_books SET version = version + 1, body = ? \
                        WHERE key = ? AND version = ?",
                    )
                    .bind(body)
                    .bind(BOOK_KEY)
                    .bind(expected),
                )
                .await
        };
        let result = result.map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }
}

/// In-memory store with the same compare-and-swap contract, shared across
/// clones. Can be flipped offline to exercise outage handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    book: Arc<Mutex<(MarketSet, Version)>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn load(&self) -> Result<(MarketSet, Version), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(self.book.lock().unwrap().clone())
    }

    async fn save(&self, set: &MarketSet, expected: Version) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let mut book = self.book.lock().unwrap();
        if book.1 != expected {
            return Err(StoreError::Conflict);
        }
        *book = (set.clone(), expected + 1);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;

    fn sample_market(id: MarketId) -> Market {
        Market {
            id,
            creator: "test".to_string(),
            target_price: 5_000_000,
            settlement_block: 850_144,
            yes_pool: 0,
            no_pool: 0,
            settled: false,
            winning_side: None,
            settlement_price: 0,
            description: "BTC >= $50,000 by block 850144".to_string(),
            created_at: Utc::now(),
        }
    }

    fn sample_set(markets: Vec<Market>) -> MarketSet {
        MarketSet {
            next_id: markets.len() as MarketId,
            markets,
        }
    }

    #[tokio::test]
    async fn empty_store_loads_empty_book() {
        let store = SqliteStore::new(None).await;
        let (set, version) = store.load().await.unwrap();
        assert_eq!(set, MarketSet::default());
        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn save_and_reload_round_trip() {
        let store = SqliteStore::new(None).await;
        let set = sample_set(vec![sample_market(0), sample_market(1)]);
        store.save(&set, 0).await.unwrap();
        let (loaded, version) = store.load().await.unwrap();
        assert_eq!(loaded, set);
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn versions_advance_by_one() {
        let store = SqliteStore::new(None).await;
        let mut set = sample_set(vec![sample_market(0)]);
        store.save(&set, 0).await.unwrap();
        set.markets.push(sample_market(1));
        set.next_id = 2;
        store.save(&set, 1).await.unwrap();
        let (loaded, version) = store.load().await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(loaded.markets.len(), 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = SqliteStore::new(None).await;
        let set = sample_set(vec![sample_market(0)]);
        store.save(&set, 0).await.unwrap();
        // a second writer that also read version 0
        assert_eq!(store.save(&set, 0).await, Err(StoreError::Conflict));
        // and one that read a version from the future
        assert_eq!(store.save(&set, 5).await, Err(StoreError::Conflict));
        let (loaded, version) = store.load().await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(loaded, set);
    }

    #[tokio::test]
    async fn memory_store_matches_the_contract() {
        let store = MemoryStore::default();
        let (set, version) = store.load().await.unwrap();
        assert_eq!(set, MarketSet::default());
        assert_eq!(version, 0);

        let set = sample_set(vec![sample_market(0)]);
        store.save(&set, 0).await.unwrap();
        assert_eq!(store.save(&set, 0).await, Err(StoreError::Conflict));
        let (loaded, version) = store.load().await.unwrap();
        assert_eq!(loaded, set);
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn offline_store_surfaces_errors() {
        let store = MemoryStore::default();
        store.set_offline(true);
        assert!(matches!(
            store.load().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.save(&MarketSet::default(), 0).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.load().await.is_ok());
    }
}
