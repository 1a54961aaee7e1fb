//! Buffer Cache
//!
//! Caches byte ranges of successive immutable versions of some content.
//! Concurrent reads of a range nobody has fetched yet share one reader call,
//! and versions derived from one another share unchanged buffers.
//!
//! ## Core Concepts
//! - **Version map**: every version has an `ExtentBufferMap`. A version made
//!   by a predicated update starts as a copy of its predecessor's map.
//! - **Pending reads**: per version, the reads in flight keyed by start
//!   offset. A read finding a pending entry for its offset waits on it
//!   instead of issuing its own I/O.
//! - **Version fallback**: a reader may answer with a newer version than was
//!   asked for. Waiters then move to that version rather than fail.
//!
//! Structural changes happen under one coarse lock. Reader I/O runs on its
//! own thread with the lock released.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::extent::{CachedExtent, Extent, ExtentBuffer, ExtentBufferMap};
use crate::clock::now_ms;
use crate::error::CacheError;
use crate::identity::ObjectId;

/// Data for a range together with the version it belongs to.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub version: ObjectId,
    pub buffer: ExtentBuffer,
}

/// Fetches data the cache does not hold.
///
/// Called on a dedicated thread. May answer for a newer version than
/// `version` and with more or less than `extent`, but the answer must start
/// at `extent.start`.
pub trait ExtentReader: Send + Sync {
    fn read(&self, version: ObjectId, extent: Extent) -> Result<ReadResult, CacheError>;
}

impl<F> ExtentReader for F
where
    F: Fn(ObjectId, Extent) -> Result<ReadResult, CacheError> + Send + Sync,
{
    fn read(&self, version: ObjectId, extent: Extent) -> Result<ReadResult, CacheError> {
        self(version, extent)
    }
}

/// What a read-ahead found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAhead {
    /// The start of the range is already cached.
    Resident,
    /// A reader was started for the range.
    Issued,
    /// A read covering the start of the range is already in flight.
    AlreadyPending,
}

enum Resolution {
    Ready(ReadResult),
    Ahead(ReadAhead),
}

struct PendingRead {
    extent: Extent,
    resolved: Condvar,
    /// Set, under the cache lock, once the reader is done.
    outcome: Mutex<Option<Result<ReadResult, CacheError>>>,
}

impl PendingRead {
    fn new(extent: Extent) -> Arc<Self> {
        Arc::new(Self {
            extent,
            resolved: Condvar::new(),
            outcome: Mutex::new(None),
        })
    }
}

type SharedMap = Arc<Mutex<ExtentBufferMap>>;

struct VersionEntry {
    map: SharedMap,
    /// Insertion order, for keeping the newest version on flush.
    sequence: u64,
}

struct CacheState {
    versions: HashMap<ObjectId, VersionEntry>,
    pending: HashMap<ObjectId, BTreeMap<u64, Arc<PendingRead>>>,
    next_sequence: u64,
    cache_enabled: bool,
}

impl CacheState {
    fn map(&mut self, version: ObjectId) -> SharedMap {
        if let Some(entry) = self.versions.get(&version) {
            return entry.map.clone();
        }
        let map = SharedMap::default();
        self.insert_version(version, map.clone());
        map
    }

    fn insert_version(&mut self, version: ObjectId, map: SharedMap) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.versions.insert(version, VersionEntry { map, sequence });
    }

    /// An in-flight read whose range holds `offset`.
    ///
    /// Pending reads may nest, so the nearest start is not enough.
    fn pending_at(&self, version: &ObjectId, offset: u64) -> Option<Arc<PendingRead>> {
        self.pending
            .get(version)?
            .range(..=offset)
            .rev()
            .map(|(_, pending)| pending)
            .find(|pending| pending.extent.contains(offset))
            .cloned()
    }

    fn is_pending(&self, version: &ObjectId, pending: &Arc<PendingRead>) -> bool {
        self.pending
            .get(version)
            .and_then(|reads| reads.get(&pending.extent.start))
            .is_some_and(|current| Arc::ptr_eq(current, pending))
    }

    fn finish_pending(&mut self, version: &ObjectId, pending: &Arc<PendingRead>) {
        if !self.is_pending(version, pending) {
            return;
        }
        if let Some(reads) = self.pending.get_mut(version) {
            reads.remove(&pending.extent.start);
            if reads.is_empty() {
                self.pending.remove(version);
            }
        }
    }

    fn add_to_cache(&mut self, result: &ReadResult) {
        if !self.cache_enabled || result.buffer.is_vacuous() {
            return;
        }
        let map = self.map(result.version);
        map.lock()
            .replace_extents(CachedExtent::new(result.buffer.clone(), now_ms()));
    }
}

#[derive(Default)]
struct CacheStats {
    reads: AtomicU64,
    async_reads: AtomicU64,
    cached: AtomicU64,
    writes: AtomicU64,
    truncates: AtomicU64,
    attr_updates: AtomicU64,
    bytes_read: AtomicU64,
    bytes_cached: AtomicU64,
    bytes_written: AtomicU64,
}

impl CacheStats {
    const fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            async_reads: AtomicU64::new(0),
            cached: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            truncates: AtomicU64::new(0),
            attr_updates: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_cached: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            async_reads: self.async_reads.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            truncates: self.truncates.load(Ordering::Relaxed),
            attr_updates: self.attr_updates.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_cached: self.bytes_cached.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Totals over every cache in the process.
static AGGREGATE: CacheStats = CacheStats::new();

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub reads: u64,
    pub async_reads: u64,
    pub cached: u64,
    pub writes: u64,
    pub truncates: u64,
    pub attr_updates: u64,
    pub bytes_read: u64,
    pub bytes_cached: u64,
    pub bytes_written: u64,
}

pub struct BufferCache {
    state: Mutex<CacheState>,
    stats: CacheStats,
}

impl BufferCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CacheState {
                versions: HashMap::new(),
                pending: HashMap::new(),
                next_sequence: 0,
                cache_enabled: true,
            }),
            stats: CacheStats::new(),
        })
    }

    /// Applies `update` to this cache's counters and to the process totals.
    fn count(&self, update: impl Fn(&CacheStats)) {
        update(&self.stats);
        update(&AGGREGATE);
    }

    /// Reads `extent` of `version`, from the cache when possible.
    ///
    /// The result may belong to a newer version than `version` when the
    /// reader found one. It covers `extent` from its start, but may end
    /// early when only a prefix is cached or was read.
    pub fn read(
        self: &Arc<Self>,
        version: ObjectId,
        extent: Extent,
        reader: Arc<dyn ExtentReader>,
    ) -> Result<ReadResult, CacheError> {
        match self.resolve(version, extent, reader, true)? {
            Resolution::Ready(result) => Ok(result),
            Resolution::Ahead(ahead) => Err(CacheError::IllegalState(format!(
                "synchronous read resolved as read-ahead {:?}",
                ahead
            ))),
        }
    }

    /// Starts fetching `extent` of `version` unless it is cached or already
    /// being fetched. Never waits for I/O.
    pub fn read_ahead(
        self: &Arc<Self>,
        version: ObjectId,
        extent: Extent,
        reader: Arc<dyn ExtentReader>,
    ) -> Result<ReadAhead, CacheError> {
        match self.resolve(version, extent, reader, false)? {
            Resolution::Ahead(ahead) => Ok(ahead),
            Resolution::Ready(_) => Ok(ReadAhead::Resident),
        }
    }

    fn resolve(
        self: &Arc<Self>,
        mut version: ObjectId,
        extent: Extent,
        reader: Arc<dyn ExtentReader>,
        wait: bool,
    ) -> Result<Resolution, CacheError> {
        if extent.is_vacuous() {
            self.count(|stats| {
                stats.reads.fetch_add(1, Ordering::Relaxed);
            });
            let empty = ExtentBuffer::wrap(extent.start, Vec::new());
            return Ok(Resolution::Ready(ReadResult {
                version,
                buffer: empty,
            }));
        }

        let mut state = self.state.lock();
        loop {
            if let Some(resolution) = self.lookup(&mut state, version, &extent, wait) {
                return Ok(resolution);
            }

            let pending = match state.pending_at(&version, extent.start) {
                Some(pending) if !wait => {
                    self.count_async_read();
                    tracing::trace!("Read-ahead at {} already pending", pending.extent.start);
                    return Ok(Resolution::Ahead(ReadAhead::AlreadyPending));
                }
                Some(pending) => pending,
                None => {
                    let pending = PendingRead::new(extent);
                    state
                        .pending
                        .entry(version)
                        .or_default()
                        .insert(extent.start, pending.clone());
                    if let Err(e) = self.spawn_reader(version, pending.clone(), reader.clone()) {
                        state.finish_pending(&version, &pending);
                        return Err(e);
                    }
                    if !wait {
                        self.count_async_read();
                        return Ok(Resolution::Ahead(ReadAhead::Issued));
                    }
                    pending
                }
            };

            pending.resolved.wait(&mut state);

            // Woken early: the read is still in flight.
            if state.is_pending(&version, &pending) {
                continue;
            }
            let outcome = pending.outcome.lock().clone();
            match outcome {
                None => continue,
                Some(Err(e)) => return Err(e),
                Some(Ok(result)) if result.version == version => {
                    let trimmed = result.buffer.intersect(&extent);
                    let len = trimmed.len() as u64;
                    self.count(|stats| {
                        stats.reads.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_read.fetch_add(len, Ordering::Relaxed);
                    });
                    return Ok(Resolution::Ready(ReadResult {
                        version,
                        buffer: trimmed,
                    }));
                }
                Some(Ok(result)) => {
                    tracing::debug!(
                        "Read of {} found newer version {}",
                        version.short(),
                        result.version.short()
                    );
                    version = result.version;
                }
            }
        }
    }

    /// Serves the start of `extent` from the version's map, if it is there.
    fn lookup(
        &self,
        state: &mut CacheState,
        version: ObjectId,
        extent: &Extent,
        wait: bool,
    ) -> Option<Resolution> {
        let map = state.map(version);
        let map = map.lock();
        let entry = map.extent_at(extent.start)?;

        if !wait {
            self.count(|stats| {
                stats.reads.fetch_add(1, Ordering::Relaxed);
                stats.async_reads.fetch_add(1, Ordering::Relaxed);
                stats.cached.fetch_add(1, Ordering::Relaxed);
            });
            return Some(Resolution::Ahead(ReadAhead::Resident));
        }

        entry.policy.touch(now_ms());
        let view = entry.buffer.intersect(extent);
        let len = view.len() as u64;
        self.count(|stats| {
            stats.reads.fetch_add(1, Ordering::Relaxed);
            stats.cached.fetch_add(1, Ordering::Relaxed);
            stats.bytes_read.fetch_add(len, Ordering::Relaxed);
            stats.bytes_cached.fetch_add(len, Ordering::Relaxed);
        });
        Some(Resolution::Ready(ReadResult {
            version,
            buffer: view,
        }))
    }

    fn count_async_read(&self) {
        self.count(|stats| {
            stats.reads.fetch_add(1, Ordering::Relaxed);
            stats.async_reads.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Runs `reader` for `pending` on its own thread, then posts the result
    /// and wakes every waiter.
    fn spawn_reader(
        self: &Arc<Self>,
        version: ObjectId,
        pending: Arc<PendingRead>,
        reader: Arc<dyn ExtentReader>,
    ) -> Result<(), CacheError> {
        let cache = self.clone();
        std::thread::Builder::new()
            .name("pool-cache-reader".into())
            .spawn(move || {
                // A panicking reader still resolves its waiters.
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    reader.read(version, pending.extent)
                }))
                .unwrap_or_else(|_| {
                    Err(CacheError::ReadFailed(format!(
                        "reader panicked on [{}, {})",
                        pending.extent.start, pending.extent.end
                    )))
                });

                let mut state = cache.state.lock();
                match &outcome {
                    Ok(result) => state.add_to_cache(result),
                    Err(e) => tracing::debug!(
                        "Read of [{}, {}) failed: {}",
                        pending.extent.start,
                        pending.extent.end,
                        e
                    ),
                }
                *pending.outcome.lock() = Some(outcome);
                state.finish_pending(&version, &pending);
                pending.resolved.notify_all();
            })
            .map(|_| ())
            .map_err(|e| CacheError::ReadFailed(format!("cannot start reader: {}", e)))
    }

    /// True when the start of `extent`, or all of it if `entire`, is cached
    /// for `version`.
    pub fn is_cached(&self, version: ObjectId, extent: Extent, entire: bool) -> bool {
        let state = self.state.lock();
        let Some(entry) = state.versions.get(&version) else {
            return false;
        };
        let covered = entry.map.lock().intersect(&extent);
        if covered.start() != Some(extent.start) {
            return false;
        }
        !entire || (covered.is_contiguous() && covered.end() == Some(extent.end))
    }

    /// Records `written` as the difference between `old_version` and the
    /// newly created `new_version`.
    ///
    /// The bytes of `written` are kept, not copied.
    pub fn predicated_write(
        &self,
        old_version: ObjectId,
        new_version: ObjectId,
        written: ExtentBuffer,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        Self::ensure_new(&state, &new_version)?;

        let derived = match state.versions.get(&old_version) {
            Some(old) => old.map.lock().clone(),
            None => ExtentBufferMap::new(),
        };
        state.insert_version(new_version, Arc::new(Mutex::new(derived)));

        let len = written.len() as u64;
        state.add_to_cache(&ReadResult {
            version: new_version,
            buffer: written,
        });
        drop(state);

        self.count(|stats| {
            stats.writes.fetch_add(1, Ordering::Relaxed);
            stats.bytes_written.fetch_add(len, Ordering::Relaxed);
        });
        Ok(())
    }

    /// Creates `new_version` as `old_version` cut down to `new_length`.
    pub fn predicated_truncate(
        &self,
        old_version: ObjectId,
        new_version: ObjectId,
        new_length: u64,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        Self::ensure_new(&state, &new_version)?;

        let derived = match state.versions.get(&old_version) {
            Some(old) => old.map.lock().intersect(&Extent::new(0, new_length)),
            None => ExtentBufferMap::new(),
        };
        state.insert_version(new_version, Arc::new(Mutex::new(derived)));
        drop(state);

        self.count(|stats| {
            stats.truncates.fetch_add(1, Ordering::Relaxed);
        });
        Ok(())
    }

    /// Creates `new_version` with the same data as `old_version`. Both then
    /// use one map, so a read of either fills it for both.
    pub fn predicated_attribute_change(
        &self,
        old_version: ObjectId,
        new_version: ObjectId,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        Self::ensure_new(&state, &new_version)?;

        let shared = match state.versions.get(&old_version) {
            Some(old) if !old.map.lock().is_empty() => old.map.clone(),
            _ => SharedMap::default(),
        };
        state.insert_version(new_version, shared);
        drop(state);

        self.count(|stats| {
            stats.attr_updates.fetch_add(1, Ordering::Relaxed);
        });
        Ok(())
    }

    fn ensure_new(state: &CacheState, version: &ObjectId) -> Result<(), CacheError> {
        if state.versions.contains_key(version) {
            return Err(CacheError::IllegalState(format!(
                "buffer map for version {} already exists",
                version.short()
            )));
        }
        Ok(())
    }

    /// Drops every version's map, keeping the most recently created one if
    /// `retain_current` is set.
    ///
    /// Buffers already handed out stay valid.
    pub fn flush(&self, retain_current: bool) {
        let mut state = self.state.lock();
        let newest = state
            .versions
            .iter()
            .max_by_key(|(_, entry)| entry.sequence)
            .map(|(version, _)| *version);

        let before = state.versions.len();
        state
            .versions
            .retain(|version, _| retain_current && Some(*version) == newest);
        tracing::debug!(
            "Flushed {} of {} cached versions",
            before - state.versions.len(),
            before
        );
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.state.lock().cache_enabled
    }

    /// With caching off, reads still coalesce but results are not kept.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.state.lock().cache_enabled = enabled;
    }

    pub fn version_count(&self) -> usize {
        self.state.lock().versions.len()
    }

    /// The map cached for `version`.
    pub(crate) fn extent_map(&self, version: &ObjectId) -> Option<Arc<Mutex<ExtentBufferMap>>> {
        self.state
            .lock()
            .versions
            .get(version)
            .map(|entry| entry.map.clone())
    }

    /// Reference time of the buffer holding `offset` in `version`.
    pub fn reference_time(&self, version: &ObjectId, offset: u64) -> Option<u64> {
        let map = self.extent_map(version)?;
        let map = map.lock();
        map.extent_at(offset).map(|entry| entry.policy.reference_time())
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Totals over every cache in the process.
    pub fn aggregate_stats() -> CacheStatsSnapshot {
        AGGREGATE.snapshot()
    }
}
