use crate::blob::{Blob, BlobLocation, CompressionHint, DayId};
use crate::error::{ArticleDbError, Result};
use crate::kv::DEFAULT_STORAGE_TIMEOUT;
use lru::LruCache;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// One append-only log file for a single day bucket.
#[derive(Debug)]
pub struct DayFile {
    day: DayId,
    file: File,
    // Held by the single appender for the whole write and sync.
    append_lock: Mutex<()>,
    // Committed end of file, published after the data is synced.
    end: AtomicU64,
}

impl DayFile {
    fn open(path: &Path, day: DayId, create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .mode(0o600)
            .open(path)
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => {
                    ArticleDbError::NotFound(format!("day file {} does not exist", day))
                }
                _ => ArticleDbError::Io(error),
            })?;
        let end = file.metadata()?.len();

        Ok(Self {
            day,
            file,
            append_lock: Mutex::new(()),
            end: AtomicU64::new(end),
        })
    }

    pub fn day(&self) -> DayId {
        self.day
    }

    /// Appends a record at the current end of file and returns its offset.
    pub fn append(&self, record: &[u8]) -> Result<u64> {
        let _appender = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = self.end.load(Ordering::Acquire);
        self.file.write_all_at(record, offset)?;
        self.file.sync_data()?;
        self.end.store(offset + record.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Reads `length` bytes at `offset`. Only ranges below the committed end
    /// are readable; reads never wait for an append in progress.
    pub fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let committed = self.len();
        let end = offset.checked_add(length).ok_or_else(|| {
            ArticleDbError::InvalidRequest(format!(
                "range overflow: offset={} length={}",
                offset, length
            ))
        })?;
        if end > committed {
            return Err(ArticleDbError::NotFound(format!(
                "range {}..{} beyond end {} of day file {}",
                offset, end, committed, self.day
            )));
        }

        let mut buf = vec![0u8; length as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    pub fn len(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Handles held by the cache.
    pub cached: usize,
    /// Evicted handles whose close is deferred until their last user is gone.
    pub deferred: usize,
    /// Outstanding guards across both.
    pub in_use: usize,
}

struct CacheEntry {
    id: u64,
    file: Arc<DayFile>,
    users: usize,
}

struct CacheState {
    live: LruCache<DayId, CacheEntry>,
    deferred: HashMap<u64, CacheEntry>,
    next_id: u64,
}

impl CacheState {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            live: LruCache::new(capacity),
            deferred: HashMap::new(),
            next_id: 0,
        }
    }

    /// Caches `entry` as most recently used, retiring whatever falls out.
    fn insert(&mut self, day: DayId, entry: CacheEntry) {
        if let Some((evicted_day, evicted)) = self.live.push(day, entry) {
            self.retire(evicted_day, evicted);
        }
    }

    fn retire(&mut self, day: DayId, entry: CacheEntry) {
        if entry.users == 0 {
            tracing::debug!("Closing day file {}", day);
        } else {
            tracing::debug!(
                "Deferring close of day file {} with {} active users",
                day,
                entry.users
            );
            self.deferred.insert(entry.id, entry);
        }
    }
}

struct CacheShared {
    folder: PathBuf,
    state: Mutex<CacheState>,
}

impl CacheShared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, day: DayId, id: u64) {
        let mut state = self.lock();
        if let Some(entry) = state.live.peek_mut(&day).filter(|entry| entry.id == id) {
            entry.users = entry.users.saturating_sub(1);
            return;
        }

        let finished = match state.deferred.get_mut(&id) {
            Some(entry) => {
                entry.users = entry.users.saturating_sub(1);
                entry.users == 0
            }
            None => false,
        };
        if finished {
            state.deferred.remove(&id);
            tracing::debug!("Closing deferred day file {}", day);
        }
    }
}

/// Bounded LRU of open day files with per-handle use counts.
///
/// Every [`DayFileCache::acquire`] hands out a [`DayFileGuard`]; dropping the
/// guard releases the use. Eviction never closes a file that has
/// outstanding guards: the entry moves to a deferred set and is closed when
/// its last guard drops, or goes back to the cache if its day is requested
/// again before then.
#[derive(Clone)]
pub struct DayFileCache {
    shared: Arc<CacheShared>,
}

impl DayFileCache {
    pub fn new(folder: PathBuf, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            shared: Arc::new(CacheShared {
                folder,
                state: Mutex::new(CacheState::new(capacity)),
            }),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.shared.folder
    }

    fn file_path(&self, day: DayId) -> PathBuf {
        self.shared.folder.join(format!("{:08x}.day", day))
    }

    /// Looks up (or opens) the file for `day`. With `create == false` a
    /// missing file is reported as `NotFound`.
    pub fn acquire(&self, day: DayId, create: bool) -> Result<DayFileGuard> {
        let mut state = self.shared.lock();

        if let Some(entry) = state.live.get_mut(&day) {
            entry.users += 1;
            return Ok(DayFileGuard {
                cache: Arc::clone(&self.shared),
                id: entry.id,
                file: Arc::clone(&entry.file),
            });
        }

        // A handle still held after eviction is revived so that one day never
        // has two appenders.
        let held = state
            .deferred
            .iter()
            .find(|(_, entry)| entry.file.day() == day)
            .map(|(id, _)| *id);
        let revived = held.and_then(|id| state.deferred.remove(&id));

        let entry = match revived {
            Some(mut entry) => {
                entry.users += 1;
                tracing::debug!("Revived deferred day file {}", day);
                entry
            }
            None => {
                let file = Arc::new(DayFile::open(&self.file_path(day), day, create)?);
                let id = state.next_id;
                state.next_id += 1;
                tracing::debug!("Opened day file {} ({} cached)", day, state.live.len() + 1);
                CacheEntry { id, file, users: 1 }
            }
        };
        let guard = DayFileGuard {
            cache: Arc::clone(&self.shared),
            id: entry.id,
            file: Arc::clone(&entry.file),
        };
        state.insert(day, entry);

        Ok(guard)
    }

    /// Evicts every cached handle. Handles in use are closed once released.
    pub fn purge(&self) {
        let mut state = self.shared.lock();
        while let Some((day, entry)) = state.live.pop_lru() {
            state.retire(day, entry);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        let in_use = state
            .live
            .iter()
            .map(|(_, entry)| entry)
            .chain(state.deferred.values())
            .map(|entry| entry.users)
            .sum();
        CacheStats {
            cached: state.live.len(),
            deferred: state.deferred.len(),
            in_use,
        }
    }
}

/// A counted use of a cached day file; released on drop.
pub struct DayFileGuard {
    cache: Arc<CacheShared>,
    id: u64,
    file: Arc<DayFile>,
}

impl std::ops::Deref for DayFileGuard {
    type Target = DayFile;

    fn deref(&self) -> &DayFile {
        &self.file
    }
}

impl Drop for DayFileGuard {
    fn drop(&mut self) {
        self.cache.release(self.file.day(), self.id);
    }
}

/// Day-file storage for the local node. Every pointer it mints carries the
/// local node id.
#[derive(Clone)]
pub struct DayFileStore {
    node_id: Uuid,
    cache: DayFileCache,
    timeout: Duration,
}

impl DayFileStore {
    pub fn open(folder: PathBuf, node_id: Uuid, cache_capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(&folder)?;
        Ok(Self {
            node_id,
            cache: DayFileCache::new(folder, cache_capacity),
            timeout: DEFAULT_STORAGE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline applied by async callers to each file operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn cache(&self) -> &DayFileCache {
        &self.cache
    }

    /// Free space is not tracked for local day files.
    pub fn free_storage(&self) -> i64 {
        -1
    }

    /// Appends an inline blob to the file of `day` and returns its pointer.
    pub fn append(&self, day: DayId, blob: &Blob) -> Result<BlobLocation> {
        let record = blob.to_record()?;
        let file = self.cache.acquire(day, true)?;
        let offset = file.append(&record)?;

        tracing::debug!(
            "Appended blob to day file {} at offset {} ({} bytes)",
            day,
            offset,
            record.len()
        );

        Ok(BlobLocation {
            node: self.node_id,
            day,
            offset,
            length: record.len() as u64,
        })
    }

    /// Compresses per `hint` and appends. Pointers are already stored and
    /// come back unchanged.
    pub fn add_blob(&self, day: DayId, hint: CompressionHint, blob: Blob) -> Result<Blob> {
        let blob = hint.compress(blob);
        if !blob.is_inline() {
            return Ok(blob);
        }
        Ok(Blob::Location(self.append(day, &blob)?))
    }

    pub fn read(&self, location: &BlobLocation) -> Result<Blob> {
        if location.node != self.node_id {
            return Err(ArticleDbError::NotFound(format!(
                "blob belongs to node {}, not local node {}",
                location.node, self.node_id
            )));
        }

        let file = self.cache.acquire(location.day, false)?;
        let record = file.read_at(location.offset, location.length)?;
        drop(file);

        tracing::debug!(
            "Read blob from day file {} at offset {} ({} bytes)",
            location.day,
            location.offset,
            location.length
        );
        Blob::from_record(&record)
    }

    /// Reads a pointer; inline blobs are returned as they are.
    pub fn read_blob(&self, blob: Blob) -> Result<Blob> {
        match blob {
            Blob::Location(location) => self.read(&location),
            inline => Ok(inline),
        }
    }
}
