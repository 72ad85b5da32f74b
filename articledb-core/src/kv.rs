//! Transactional bucket store.
//!
//! A single SQLite table holds every bucket. Rows are addressed by
//! `(bucket, scope, key)`; `scope` is the group name for per-group buckets
//! and empty for flat ones. BLOB comparison in SQLite is memcmp, so ordered
//! scans follow the byte order of the big-endian keys.

use crate::error::{ArticleDbError, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub mod buckets {
    pub const GROUP_NRT: &str = "group-nrt";
    pub const GROUP_RTP: &str = "group-rtp";
    pub const ARTICLE_OVERVIEW: &str = "article-overview";
    pub const ARTICLE_REDIRECT: &str = "article-redirect";
    pub const ARTICLE_HEAD: &str = "article-head";
    pub const ARTICLE_BODY: &str = "article-body";
    pub const ARTICLE_LOCATION: &str = "article-location";
    pub const MESSAGE_ID_INDEX: &str = "message-id-index";
    pub const MESSAGE_ID_BY_TIME: &str = "message-id-by-time";
}

/// Scope used by buckets that are not partitioned per group.
pub const FLAT: &[u8] = b"";

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returned by scan visitors to continue or end the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Continue,
    Stop,
}

#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl KvStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                bucket TEXT NOT NULL,
                scope BLOB NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, scope, key)
            ) WITHOUT ROWID",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout: DEFAULT_STORAGE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline applied by async callers to each transaction.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` inside a read transaction.
    pub fn view<T>(&self, f: impl FnOnce(&Txn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        f(&Txn { conn: &tx })
    }

    /// Runs `f` inside a write transaction; commits only if `f` succeeds.
    pub fn update<T>(&self, f: impl FnOnce(&Txn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&Txn { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    /// Atomic read-modify-write of a single key. `f` receives the current
    /// value and returns the value to store plus the caller's result.
    pub fn modify<T>(
        &self,
        bucket: &str,
        scope: &[u8],
        key: &[u8],
        f: impl FnOnce(Option<Vec<u8>>) -> Result<(Vec<u8>, T)>,
    ) -> Result<T> {
        self.update(|txn| {
            let current = txn.get(bucket, scope, key)?;
            let (next, out) = f(current)?;
            txn.put(bucket, scope, key, &next)?;
            Ok(out)
        })
    }
}

pub struct Txn<'a> {
    conn: &'a Connection,
}

impl Txn<'_> {
    pub fn get(&self, bucket: &str, scope: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .prepare_cached("SELECT value FROM kv WHERE bucket = ?1 AND scope = ?2 AND key = ?3")?
            .query_row(params![bucket, scope, key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, bucket: &str, scope: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO kv (bucket, scope, key, value) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![bucket, scope, key, value])?;
        Ok(())
    }

    pub fn contains(&self, bucket: &str, scope: &[u8], key: &[u8]) -> Result<bool> {
        Ok(self.get(bucket, scope, key)?.is_some())
    }

    /// Visits `(key, value)` pairs of one scope in key order, starting at the
    /// first key `>= from`.
    pub fn scan(
        &self,
        bucket: &str,
        scope: &[u8],
        from: &[u8],
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<Scan>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT key, value FROM kv
             WHERE bucket = ?1 AND scope = ?2 AND key >= ?3
             ORDER BY key",
        )?;
        let mut rows = stmt.query(params![bucket, scope, from])?;

        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            if visit(&key, &value)? == Scan::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// Runs blocking storage work off the async runtime, bounded by `limit`.
pub async fn run_blocking<T, F>(limit: Duration, what: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ArticleDbError::Internal(format!(
            "{} task failed: {}",
            what, join_error
        ))),
        Err(_) => Err(ArticleDbError::Timeout(format!(
            "{} exceeded {:?}",
            what, limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_commits_and_view_reads() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.update(|txn| txn.put(buckets::GROUP_NRT, FLAT, b"alt.test", b"v1"))
            .unwrap();

        let value = kv
            .view(|txn| txn.get(buckets::GROUP_NRT, FLAT, b"alt.test"))
            .unwrap();
        assert_eq!(value.as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let kv = KvStore::open_in_memory().unwrap();
        let result: Result<()> = kv.update(|txn| {
            txn.put(buckets::GROUP_NRT, FLAT, b"alt.test", b"v1")?;
            Err(ArticleDbError::Internal("abort".to_string()))
        });
        assert!(result.is_err());

        let exists = kv
            .view(|txn| txn.contains(buckets::GROUP_NRT, FLAT, b"alt.test"))
            .unwrap();
        assert!(!exists);
    }

    #[test]
    fn test_scan_is_ordered_and_scoped() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.update(|txn| {
            txn.put(buckets::ARTICLE_OVERVIEW, b"a.b", b"\x00\x03", b"3")?;
            txn.put(buckets::ARTICLE_OVERVIEW, b"a.b", b"\x00\x01", b"1")?;
            txn.put(buckets::ARTICLE_OVERVIEW, b"a.b", b"\x00\x02", b"2")?;
            txn.put(buckets::ARTICLE_OVERVIEW, b"other", b"\x00\x02", b"x")?;
            Ok(())
        })
        .unwrap();

        let mut seen = Vec::new();
        kv.view(|txn| {
            txn.scan(buckets::ARTICLE_OVERVIEW, b"a.b", b"\x00\x02", |_, value| {
                seen.push(value.to_vec());
                Ok(Scan::Continue)
            })
        })
        .unwrap();
        assert_eq!(seen, vec![b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_modify_sees_previous_value() {
        let kv = KvStore::open_in_memory().unwrap();
        for expected in 1u8..=3 {
            let out = kv
                .modify(buckets::GROUP_RTP, FLAT, b"g", |current| {
                    let next = current.map(|v| v[0] + 1).unwrap_or(1);
                    Ok((vec![next], next))
                })
                .unwrap();
            assert_eq!(out, expected);
        }
    }

    #[tokio::test]
    async fn test_run_blocking_times_out() {
        let result = run_blocking(Duration::from_millis(10), "sleepy", || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ArticleDbError::Timeout(_))));
    }
}
