//! The physical-reservation collaborator spec.md §1/§9 describes as an
//! opaque, externally-supplied callback: "given a size, alignment, and
//! optional start hint, produce a physically contiguous base address."
//!
//! The original kernel code reserves from `bootmem`/`memblock`
//! (`cma_region_alloc` in `original_source/mm/cma.c`), both boot-time
//! kernel allocators with no userspace analog, which is exactly why the
//! spec scopes this out as a collaborator rather than specifying it.
//! This crate gives that collaborator the same shape as the teacher's
//! own `Mapper` trait (`mapper.rs`) — pluggable, swappable reservation
//! backends — applied to a different boundary: standing in for "boot
//! reserved memory" with a real mapping a hosted test can exercise.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use crate::config::round_up;
use crate::error::{CmaError, Result};

/// Reserves physically (here: virtually) contiguous memory on behalf of
/// a region at bind time. Implementations need not honor `start_hint`;
/// userspace generally cannot choose a mapping's address outright, so a
/// hint of `0` or an unsatisfiable hint is not an error.
#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait Reserver: std::fmt::Debug + Sync {
    #[requires(size > 0)]
    #[requires(alignment == 0 || alignment.is_power_of_two(), "alignment must be zero or a power of two")]
    #[ensures(ret.is_ok() -> alignment == 0 || *ret.as_ref().unwrap() % alignment == 0, "reserved base respects the requested alignment")]
    fn reserve(&self, size: u64, alignment: u64) -> Result<u64>;
}

/// Reserves an anonymous private mapping sized generously enough to
/// carve an `alignment`-aligned `size`-byte region out of it, then
/// leaks the mapping for the process's lifetime — regions are meant to
/// live as long as the process, same as the teacher's `Mill`s.
#[derive(Debug, Default)]
pub struct DefaultReserver;

#[contract_trait]
impl Reserver for DefaultReserver {
    fn reserve(&self, size: u64, alignment: u64) -> Result<u64> {
        let alignment = alignment.max(1);
        let map_size = size
            .checked_add(alignment)
            .ok_or(CmaError::InvalidArgument("region too large to reserve"))?;

        let map = memmap2::MmapOptions::new()
            .len(map_size as usize)
            .map_anon()
            .map_err(|_| CmaError::OutOfMemory)?;

        let base = map.as_ptr() as u64;
        let aligned = round_up(base, alignment);
        std::mem::forget(map);
        Ok(aligned)
    }
}

/// Same as [`DefaultReserver`], but backed by a temporary file via
/// `tempfile`, mirroring the teacher's `FileBackedMapper`
/// (`file_backed_mapper.rs`). Useful for tests that want the reserved
/// range to be independently inspectable on disk.
#[derive(Debug, Default)]
pub struct FileBackedReserver;

#[contract_trait]
impl Reserver for FileBackedReserver {
    fn reserve(&self, size: u64, alignment: u64) -> Result<u64> {
        let alignment = alignment.max(1);
        let map_size = size
            .checked_add(alignment)
            .ok_or(CmaError::InvalidArgument("region too large to reserve"))?;

        let file = tempfile::tempfile().map_err(|_| CmaError::OutOfMemory)?;
        file.set_len(map_size).map_err(|_| CmaError::OutOfMemory)?;

        // SAFETY: the file is private to this process (an unlinked
        // temporary file) and not concurrently truncated elsewhere.
        let map = unsafe {
            memmap2::MmapOptions::new()
                .len(map_size as usize)
                .map_mut(&file)
        }
        .map_err(|_| CmaError::OutOfMemory)?;

        let base = map.as_ptr() as u64;
        let aligned = round_up(base, alignment);
        std::mem::forget(map);
        std::mem::forget(file);
        Ok(aligned)
    }
}
