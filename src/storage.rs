//! Key-value storage capability underneath the record store.
//!
//! Every `set` replaces one value in a single write, so a crash between two
//! calls never leaves a half-written value behind.

#[cfg(test)]
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::db::{get_connection, init_db};
use crate::error::{KakeiboError, Result};

pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// All stored keys, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Read-modify-write of one key as a single exclusive step: no other
    /// writer, in this process or another, can interleave between the read
    /// and the write. `f` returns the new value (`None` leaves the key
    /// untouched) and a result passed back to the caller.
    fn update<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(Option<String>) -> Result<(Option<String>, T)>;
}

impl<S: Storage + ?Sized> Storage for &S {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn list(&self) -> Result<Vec<String>> {
        (**self).list()
    }

    fn update<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(Option<String>) -> Result<(Option<String>, T)>,
    {
        (**self).update(key, f)
    }
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

const SELECT_VALUE: &str = "SELECT value FROM kv WHERE key = ?1";
const UPSERT_VALUE: &str = "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now')) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = get_connection(db_path)?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| KakeiboError::Storage("storage connection poisoned".to_string()))
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn.query_row(SELECT_VALUE, [key], |row| row.get(0)).optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(UPSERT_VALUE, rusqlite::params![key, value])
            .map_err(|e| KakeiboError::Storage(e.to_string()))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn update<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(Option<String>) -> Result<(Option<String>, T)>,
    {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so a second process blocks
        // (up to the busy timeout) instead of reading a value about to change.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx.query_row(SELECT_VALUE, [key], |row| row.get(0)).optional()?;
        let (next, out) = f(current)?;
        if let Some(value) = next {
            tx.execute(UPSERT_VALUE, rusqlite::params![key, value])
                .map_err(|e| KakeiboError::Storage(e.to_string()))?;
        }
        tx.commit().map_err(|e| KakeiboError::Storage(e.to_string()))?;
        Ok(out)
    }
}

/// In-process storage for tests. Writes can be switched off to simulate a
/// full or unavailable medium.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<BTreeMap<String, String>>,
    read_only: Mutex<bool>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.read_only.lock() {
            *flag = fail;
        }
    }

    fn values(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| KakeiboError::Storage("memory storage poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.lock().map(|f| *f).unwrap_or(true) {
            return Err(KakeiboError::Storage("storage quota exceeded".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.values()?.keys().cloned().collect())
    }

    fn update<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(Option<String>) -> Result<(Option<String>, T)>,
    {
        let mut values = self.values()?;
        let (next, out) = f(values.get(key).cloned())?;
        if let Some(value) = next {
            self.check_writable()?;
            values.insert(key.to_string(), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_set_get_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("test.db")).unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        storage.set("a", "1").unwrap();
        storage.set("a", "2").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_sqlite_list_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("test.db")).unwrap();
        storage.set("b", "x").unwrap();
        storage.set("a", "y").unwrap();
        assert_eq!(storage.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        SqliteStorage::open(&path).unwrap().set("k", "v").unwrap();
        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_sqlite_update_reads_then_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("test.db")).unwrap();
        storage.set("n", "1").unwrap();
        let seen = storage
            .update("n", |current| {
                let n: u32 = current.unwrap().parse().unwrap();
                Ok((Some((n + 1).to_string()), n))
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(storage.get("n").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_sqlite_update_error_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("test.db")).unwrap();
        storage.set("k", "old").unwrap();
        let result: Result<()> = storage.update("k", |_| Err(KakeiboError::InvalidInput("no".into())));
        assert!(result.is_err());
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_sqlite_update_is_exclusive_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        SqliteStorage::open(&path).unwrap().set("n", "0").unwrap();

        std::thread::scope(|s| {
            for _ in 0..2 {
                let path = path.clone();
                s.spawn(move || {
                    let storage = SqliteStorage::open(&path).unwrap();
                    for _ in 0..50 {
                        storage
                            .update("n", |current| {
                                let n: u32 = current.unwrap().parse().unwrap();
                                Ok((Some((n + 1).to_string()), ()))
                            })
                            .unwrap();
                    }
                });
            }
        });

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get("n").unwrap().as_deref(), Some("100"));
    }

    #[test]
    fn test_memory_fail_writes_keeps_old_value() {
        let storage = MemoryStorage::new();
        storage.set("k", "old").unwrap();
        storage.fail_writes(true);
        assert!(matches!(storage.set("k", "new"), Err(KakeiboError::Storage(_))));
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("old"));
        storage.fail_writes(false);
        storage.set("k", "new").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("new"));
    }
}
