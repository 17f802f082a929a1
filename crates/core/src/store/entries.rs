//! Entry CRUD for the SQLite store.

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::SqliteStore;
use super::{CacheEntry, CacheStore};
use crate::Error;

/// Entry count for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryStats {
    pub category: String,
    pub entries: u64,
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, category: &str, key: &str) -> Result<Option<CacheEntry>, Error> {
        let (category, key) = (category.to_string(), key.to_string());
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let result = conn.query_row(
                    "SELECT category, key, contents, created_at FROM entries WHERE category = ?1 AND key = ?2",
                    params![category, key],
                    |row| {
                        Ok(CacheEntry {
                            category: row.get(0)?,
                            key: row.get(1)?,
                            contents: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                );

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Upsert: entries are always overwritten wholesale.
    async fn put(&self, category: &str, key: &str, value: &str) -> Result<(), Error> {
        let (category, key, value) = (category.to_string(), key.to_string(), value.to_string());
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO entries (category, key, contents, created_at) VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(category, key) DO UPDATE SET
                        contents = excluded.contents,
                        created_at = excluded.created_at",
                    params![category, key, value, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn remove(&self, category: &str, key: &str) -> Result<(), Error> {
        let (category, key) = (category.to_string(), key.to_string());
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM entries WHERE category = ?1 AND key = ?2", params![category, key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn clear(&self, category: Option<&str>) -> Result<(), Error> {
        let category = category.map(str::to_string);
        let deleted = self
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let count = match &category {
                    Some(category) => conn.execute("DELETE FROM entries WHERE category = ?1", params![category])?,
                    None => conn.execute("DELETE FROM entries", [])?,
                };
                Ok(count)
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(deleted, "cleared cache entries");
        Ok(())
    }
}

impl SqliteStore {
    /// Number of entries in `category`, or in the whole store when `None`.
    pub async fn count(&self, category: Option<&str>) -> Result<u64, Error> {
        let category = category.map(str::to_string);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = match &category {
                    Some(category) => conn.query_row(
                        "SELECT COUNT(*) FROM entries WHERE category = ?1",
                        params![category],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?,
                };
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Entry counts per category, ordered by category name.
    pub async fn categories(&self) -> Result<Vec<CategoryStats>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CategoryStats>, Error> {
                let mut stmt =
                    conn.prepare("SELECT category, COUNT(*) FROM entries GROUP BY category ORDER BY category")?;
                let rows = stmt.query_map([], |row| {
                    Ok(CategoryStats { category: row.get(0)?, entries: row.get::<_, i64>(1)? as u64 })
                })?;
                let stats = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("default", "abc", "[]").await.unwrap();

        let entry = store.get("default", "abc").await.unwrap().unwrap();
        assert_eq!(entry.contents, "[]");
        assert_eq!(entry.category, "default");
        assert!(!entry.created_at.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.get("default", "nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("default", "abc", "[1]").await.unwrap();
        store.put("default", "abc", "[2]").await.unwrap();

        let entry = store.get("default", "abc").await.unwrap().unwrap();
        assert_eq!(entry.contents, "[2]");
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_categories_are_isolated() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("a", "k", "[1]").await.unwrap();
        store.put("b", "k", "[2]").await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap().unwrap().contents, "[1]");
        store.remove("a", "k").await.unwrap();
        assert!(store.get("a", "k").await.unwrap().is_none());
        assert!(store.get("b", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.remove("default", "nope").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_category_and_all() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("a", "1", "[]").await.unwrap();
        store.put("a", "2", "[]").await.unwrap();
        store.put("b", "1", "[]").await.unwrap();

        let stats = store.categories().await.unwrap();
        assert_eq!(stats, vec![
            CategoryStats { category: "a".into(), entries: 2 },
            CategoryStats { category: "b".into(), entries: 1 },
        ]);

        store.clear(Some("a")).await.unwrap();
        assert_eq!(store.count(Some("a")).await.unwrap(), 0);
        assert_eq!(store.count(Some("b")).await.unwrap(), 1);

        store.clear(None).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }
}
