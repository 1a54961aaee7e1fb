//! Blob backends.
//!
//! A byte-capacity-bounded key to blob map. A write that would exceed the
//! capacity is refused with `NoSpace` and leaves existing data untouched.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::identity::ObjectId;

pub trait BlobStore: Send + Sync {
    fn contains(&self, id: &ObjectId) -> bool;
    fn get(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, id: &ObjectId, bytes: Vec<u8>) -> Result<(), StoreError>;
    /// Returns whether anything was removed.
    fn remove(&self, id: &ObjectId) -> Result<bool, StoreError>;
    fn keys(&self) -> Vec<ObjectId>;
    fn size_of(&self, id: &ObjectId) -> Option<u64>;
    fn capacity_used(&self) -> u64;
    fn capacity(&self) -> u64;
}

fn check_space(
    id: &ObjectId,
    used: u64,
    replaced: u64,
    needed: u64,
    max: u64,
) -> Result<(), StoreError> {
    if used - replaced + needed > max {
        return Err(StoreError::NoSpace {
            object_id: *id,
            needed,
            used,
            max,
        });
    }
    Ok(())
}

struct MemoryInner {
    blobs: HashMap<ObjectId, Vec<u8>>,
    used: u64,
}

pub struct MemoryBlobStore {
    inner: Mutex<MemoryInner>,
    capacity: u64,
}

impl MemoryBlobStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                blobs: HashMap::new(),
                used: 0,
            }),
            capacity,
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn contains(&self, id: &ObjectId) -> bool {
        self.inner.lock().blobs.contains_key(id)
    }

    fn get(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().blobs.get(id).cloned())
    }

    fn put(&self, id: &ObjectId, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let replaced = inner.blobs.get(id).map_or(0, |b| b.len() as u64);
        let needed = bytes.len() as u64;
        check_space(id, inner.used, replaced, needed, self.capacity)?;

        inner.used = inner.used - replaced + needed;
        inner.blobs.insert(*id, bytes);
        Ok(())
    }

    fn remove(&self, id: &ObjectId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.blobs.remove(id) {
            Some(bytes) => {
                inner.used -= bytes.len() as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Vec<ObjectId> {
        self.inner.lock().blobs.keys().copied().collect()
    }

    fn size_of(&self, id: &ObjectId) -> Option<u64> {
        self.inner.lock().blobs.get(id).map(|b| b.len() as u64)
    }

    fn capacity_used(&self) -> u64 {
        self.inner.lock().used
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

struct FsIndex {
    sizes: HashMap<ObjectId, u64>,
    used: u64,
}

/// One file per object, named by the id in hex.
pub struct FsBlobStore {
    root: PathBuf,
    index: Mutex<FsIndex>,
    capacity: u64,
}

impl FsBlobStore {
    /// Opens (or creates) a store under `root`, rebuilding the capacity
    /// accounting from the files already present.
    pub fn open(root: impl AsRef<Path>, capacity: u64) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut sizes = HashMap::new();
        let mut used = 0;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| ObjectId::from_hex(n).ok()) else {
                continue;
            };
            let len = entry.metadata()?.len();
            used += len;
            sizes.insert(id, len);
        }

        tracing::info!(
            "Opened blob store at {} ({} objects, {} bytes)",
            root.display(),
            sizes.len(),
            used
        );

        Ok(Self {
            root,
            index: Mutex::new(FsIndex { sizes, used }),
            capacity,
        })
    }

    fn path_of(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.to_hex())
    }
}

impl BlobStore for FsBlobStore {
    fn contains(&self, id: &ObjectId) -> bool {
        self.index.lock().sizes.contains_key(id)
    }

    fn get(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
        if !self.contains(id) {
            return Ok(None);
        }
        match fs::read(self.path_of(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, id: &ObjectId, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut index = self.index.lock();
        let replaced = index.sizes.get(id).copied().unwrap_or(0);
        let needed = bytes.len() as u64;
        check_space(id, index.used, replaced, needed, self.capacity)?;

        let tmp = self.root.join(format!(".{}.tmp", id.to_hex()));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, self.path_of(id))?;

        index.used = index.used - replaced + needed;
        index.sizes.insert(*id, needed);
        Ok(())
    }

    fn remove(&self, id: &ObjectId) -> Result<bool, StoreError> {
        let mut index = self.index.lock();
        let Some(len) = index.sizes.remove(id) else {
            return Ok(false);
        };
        index.used -= len;

        match fs::remove_file(self.path_of(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Vec<ObjectId> {
        self.index.lock().sizes.keys().copied().collect()
    }

    fn size_of(&self, id: &ObjectId) -> Option<u64> {
        self.index.lock().sizes.get(id).copied()
    }

    fn capacity_used(&self) -> u64 {
        self.index.lock().used
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}
