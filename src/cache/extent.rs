//! Byte ranges, the buffers that hold them and sorted maps of buffers.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
}

impl Extent {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn with_len(start: u64, len: u64) -> Self {
        Self::new(start, start.saturating_add(len))
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_vacuous(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &Extent) -> Option<Extent> {
        self.overlaps(other)
            .then(|| Extent::new(self.start.max(other.start), self.end.min(other.end)))
    }
}

/// Bytes positioned at an offset of some content.
///
/// Clones and sub-views share the backing bytes.
#[derive(Clone)]
pub struct ExtentBuffer {
    start: u64,
    data: Arc<Vec<u8>>,
    window: Range<usize>,
}

impl ExtentBuffer {
    pub fn wrap(start: u64, data: Vec<u8>) -> Self {
        let window = 0..data.len();
        Self {
            start,
            data: Arc::new(data),
            window,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.start + self.window.len() as u64
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.start(), self.end())
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_vacuous(&self) -> bool {
        self.window.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.window.clone()]
    }

    /// A view of the part of this buffer inside `extent`. Empty, positioned
    /// at `extent.start`, when the two do not overlap.
    pub fn intersect(&self, extent: &Extent) -> ExtentBuffer {
        match self.extent().intersect(extent) {
            Some(common) => {
                let from = self.window.start + (common.start - self.start) as usize;
                let to = from + common.len() as usize;
                Self {
                    start: common.start,
                    data: self.data.clone(),
                    window: from..to,
                }
            }
            None => Self {
                start: extent.start,
                data: self.data.clone(),
                window: self.window.start..self.window.start,
            },
        }
    }

    /// True when both buffers are views of the same bytes.
    pub fn shares_data(&self, other: &ExtentBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for ExtentBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtentBuffer[{}, {})", self.start(), self.end())
    }
}

/// Replacement bookkeeping for one cached buffer.
///
/// The reference time never moves backwards.
#[derive(Debug)]
pub struct PolicyInfo {
    reference_time_ms: AtomicU64,
}

impl PolicyInfo {
    pub fn new(reference_time_ms: u64) -> Self {
        Self {
            reference_time_ms: AtomicU64::new(reference_time_ms),
        }
    }

    pub fn reference_time(&self) -> u64 {
        self.reference_time_ms.load(Ordering::Acquire)
    }

    pub fn touch(&self, now_ms: u64) {
        self.reference_time_ms.fetch_max(now_ms, Ordering::AcqRel);
    }
}

/// A buffer in a version's map together with its policy record.
///
/// Maps derived from one another share entries, and with them the record.
#[derive(Debug, Clone)]
pub struct CachedExtent {
    pub buffer: ExtentBuffer,
    pub policy: Arc<PolicyInfo>,
}

impl CachedExtent {
    pub fn new(buffer: ExtentBuffer, now_ms: u64) -> Self {
        Self {
            buffer,
            policy: Arc::new(PolicyInfo::new(now_ms)),
        }
    }

    /// The part inside `extent`. A trimmed fragment gets its own record
    /// carrying the original's reference time.
    fn trimmed(&self, extent: &Extent) -> CachedExtent {
        if extent.start <= self.buffer.start() && self.buffer.end() <= extent.end {
            return self.clone();
        }
        CachedExtent {
            buffer: self.buffer.intersect(extent),
            policy: Arc::new(PolicyInfo::new(self.policy.reference_time())),
        }
    }
}

/// Non-overlapping buffers keyed by start offset.
#[derive(Debug, Clone, Default)]
pub struct ExtentBufferMap {
    entries: BTreeMap<u64, CachedExtent>,
}

impl ExtentBufferMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CachedExtent> {
        self.entries.values()
    }

    pub fn start(&self) -> Option<u64> {
        self.entries.values().next().map(|entry| entry.buffer.start())
    }

    pub fn end(&self) -> Option<u64> {
        self.entries.values().next_back().map(|entry| entry.buffer.end())
    }

    /// The entry whose range holds `offset`.
    pub fn extent_at(&self, offset: u64) -> Option<&CachedExtent> {
        self.entries
            .range(..=offset)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.buffer.extent().contains(offset))
    }

    /// Entries at least partly inside `extent`, in offset order.
    pub fn overlapping(&self, extent: &Extent) -> Vec<&CachedExtent> {
        if extent.is_vacuous() {
            return Vec::new();
        }
        let first = self
            .extent_at(extent.start)
            .map(|entry| entry.buffer.start())
            .unwrap_or(extent.start);
        self.entries
            .range(first..extent.end)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.buffer.extent().overlaps(extent))
            .collect()
    }

    /// A new map holding the parts of this one inside `extent`.
    pub fn intersect(&self, extent: &Extent) -> ExtentBufferMap {
        let entries = self
            .overlapping(extent)
            .into_iter()
            .map(|entry| entry.trimmed(extent))
            .map(|entry| (entry.buffer.start(), entry))
            .collect();
        ExtentBufferMap { entries }
    }

    /// True when the entries leave no gap between the first and the last.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = None;
        for entry in self.entries.values() {
            if expected.is_some_and(|end| end != entry.buffer.start()) {
                return false;
            }
            expected = Some(entry.buffer.end());
        }
        true
    }

    /// Inserts `entry`, evicting whatever it overlaps. Parts of evicted
    /// buffers that stick out on either side stay as trimmed fragments.
    pub fn replace_extents(&mut self, entry: CachedExtent) {
        if entry.buffer.is_vacuous() {
            return;
        }
        let covered = entry.buffer.extent();
        let evicted: Vec<u64> = self
            .overlapping(&covered)
            .into_iter()
            .map(|old| old.buffer.start())
            .collect();

        for start in evicted {
            let Some(old) = self.entries.remove(&start) else {
                continue;
            };
            if old.buffer.start() < covered.start {
                let left = old.trimmed(&Extent::new(old.buffer.start(), covered.start));
                self.entries.insert(left.buffer.start(), left);
            }
            if covered.end < old.buffer.end() {
                let right = old.trimmed(&Extent::new(covered.end, old.buffer.end()));
                self.entries.insert(right.buffer.start(), right);
            }
        }

        self.entries.insert(covered.start, entry);
    }
}
