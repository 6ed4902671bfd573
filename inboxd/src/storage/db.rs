use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;
use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use super::Storage;

/// SQLite-backed storage. Values are kept as JSON under a namespace so several
/// storages can share one database file.
pub struct SqliteStorage<V> {
    conn: Mutex<Connection>,
    namespace: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> SqliteStorage<V> {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                namespace TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            _value: PhantomData,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&conn)
    }
}

impl<V> Storage<V> for SqliteStorage<V>
where
    V: Serialize + DeserializeOwned,
{
    fn get(&self, key: &str) -> Result<Option<V>> {
        let raw: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                params![&self.namespace, key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query entry")
        })?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to decode stored value for {}", key))
        })
        .transpose()
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize value")?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO entries (namespace, key, value) VALUES (?1, ?2, ?3)
                ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value
                "#,
                params![&self.namespace, key, &json],
            )
            .context("Failed to upsert entry")?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<Option<V>> {
        let previous = self.get(key)?;
        if previous.is_some() {
            self.with_conn(|conn| {
                conn.execute(
                    "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
                    params![&self.namespace, key],
                )
                .context("Failed to delete entry")?;
                Ok(())
            })?;
        }
        Ok(previous)
    }

    fn values(&self) -> Result<Vec<V>> {
        let rows: Vec<(String, String)> = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, value FROM entries WHERE namespace = ?1")
                .context("Failed to prepare query")?;
            let rows = stmt
                .query_map([&self.namespace], |row| Ok((row.get(0)?, row.get(1)?)))
                .context("Failed to query entries")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to collect entries")?;
            Ok(rows)
        })?;

        // a single undecodable row must not hide the rest
        Ok(rows
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!("Skipping undecodable entry {}: {}", key, e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::types::{DiscoveryResult, DiscoveryResultFlag};

    fn test_result(uid: &str) -> DiscoveryResult {
        DiscoveryResult::builder(uid.parse().unwrap())
            .with_property("host", "10.0.0.1")
            .with_label("Test device")
            .with_ttl(60)
            .with_timestamp(Utc::now())
            .build()
    }

    #[test]
    fn test_put_and_get() {
        let db = SqliteStorage::<DiscoveryResult>::open(":memory:", "inbox").unwrap();
        let result = test_result("demo:dev:1");

        db.put("demo:dev:1", &result).unwrap();

        let retrieved = db.get("demo:dev:1").unwrap().unwrap();
        assert_eq!(retrieved, result);
        assert!(db.get("demo:dev:2").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let db = SqliteStorage::<DiscoveryResult>::open(":memory:", "inbox").unwrap();
        let mut result = test_result("demo:dev:1");
        db.put("demo:dev:1", &result).unwrap();

        result.flag = DiscoveryResultFlag::Ignored;
        db.put("demo:dev:1", &result).unwrap();

        assert_eq!(db.values().unwrap().len(), 1);
        assert_eq!(
            db.get("demo:dev:1").unwrap().unwrap().flag,
            DiscoveryResultFlag::Ignored
        );
    }

    #[test]
    fn test_remove_returns_previous() {
        let db = SqliteStorage::<DiscoveryResult>::open(":memory:", "inbox").unwrap();
        db.put("demo:dev:1", &test_result("demo:dev:1")).unwrap();

        assert!(db.remove("demo:dev:1").unwrap().is_some());
        assert!(db.remove("demo:dev:1").unwrap().is_none());
        assert!(db.values().unwrap().is_empty());
    }

    #[test]
    fn test_values_skip_garbage_rows() {
        let db = SqliteStorage::<DiscoveryResult>::open(":memory:", "inbox").unwrap();
        db.put("demo:dev:1", &test_result("demo:dev:1")).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entries (namespace, key, value) VALUES ('inbox', 'bad', 'not json')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.values().unwrap().len(), 1);
        assert!(db.get("bad").is_err());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let inbox = SqliteStorage::<DiscoveryResult>::open(&path, "inbox").unwrap();
        let other = SqliteStorage::<DiscoveryResult>::open(&path, "other").unwrap();

        inbox.put("demo:dev:1", &test_result("demo:dev:1")).unwrap();

        assert_eq!(inbox.values().unwrap().len(), 1);
        assert!(other.values().unwrap().is_empty());
    }
}
