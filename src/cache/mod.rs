//! Buffer Cache Module
//!
//! Client-side cache of byte ranges read from versioned, immutable content.
//!
//! ## Core Concepts
//! - **Extents**: half-open byte ranges. An `ExtentBufferMap` holds
//!   non-overlapping buffers for one version, sorted by offset.
//! - **Coalescing**: one reader call per uncached range, however many
//!   threads ask for it at once.
//! - **Predicated updates**: a write, truncate or attribute change creates a
//!   new version from an old one without copying the unchanged bytes.

pub mod buffer_cache;
pub mod extent;

pub use buffer_cache::{BufferCache, CacheStatsSnapshot, ExtentReader, ReadAhead, ReadResult};
pub use extent::{CachedExtent, Extent, ExtentBuffer, ExtentBufferMap, PolicyInfo};
