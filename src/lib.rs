//! A contiguous memory allocator: carves aligned, physically contiguous
//! chunks out of a small number of boot-reserved regions, on behalf of
//! clients identified by a `(device, kind)` pair resolved through a
//! routing table to the regions allowed to serve them.
//!
//! Two textual grammars make up the stable configuration surface (see
//! [`config`]): a region list (name, size, optional start/alignment,
//! optional allocation strategy) and a routing table (glob patterns on
//! `device`/`kind` mapping to an ordered region-name list). A [`Cma`]
//! built from those two strings is the entry point for everything else:
//! [`Cma::alloc`], [`Cma::info`], [`Cma::retain`], and [`Cma::release`].
pub mod bestfit;
pub mod config;
pub mod error;
pub mod ioctl;
pub mod region;
mod registry;
pub mod reserver;
pub mod route;
pub mod strategy;

use config::{parse_regions, parse_routes};
use error::{CmaError, Result};
use region::RegionTable;
use registry::{ChunkRegistry, ReleaseOutcome};
use reserver::{DefaultReserver, Reserver};
use route::RoutingTable;

pub use error::CmaError as Error;
pub use ioctl::{handle_alloc, handle_release, CmaIoctlRequest, CMA_IOCTL_MAGIC};
pub use strategy::{register_strategy, Strategy};

/// Aggregate geometry for a named list of regions, as returned by
/// [`Cma::info`]. Unknown region names are silently skipped; an entirely
/// unknown list yields the zeroed/all-ones sentinel values the original
/// kernel code returns rather than an error (spec.md §11.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub count: usize,
    pub total_size: u64,
    pub lower_bound: u64,
    pub upper_bound: u64,
}

impl Default for RegionInfo {
    fn default() -> Self {
        RegionInfo {
            count: 0,
            total_size: 0,
            lower_bound: u64::MAX,
            upper_bound: 0,
        }
    }
}

/// A fully built allocator: a region table, a routing table resolving
/// clients to regions, and the chunk registry tracking every live
/// allocation across all regions.
///
/// Unlike the original kernel module (one `cma_regions`/
/// `cma_chunks_by_start` pair per running kernel), this is an ordinary
/// owned value: nothing stops a process from building more than one
/// `Cma`, which is friendlier to testing and to embedding in a larger
/// process. See DESIGN.md for the full rationale.
pub struct Cma {
    regions: RegionTable,
    routes: RoutingTable,
    chunks: ChunkRegistry,
}

impl Cma {
    /// Parses both grammars, reserves each region's backing memory via
    /// [`DefaultReserver`], binds each region's strategy, and returns a
    /// ready-to-use allocator.
    ///
    /// A malformed `region_str` or `route_str` fails the whole build
    /// (spec.md §4.A/§7); a region whose reservation or strategy binding
    /// fails is instead kept in the table, disabled, and logged
    /// (spec.md §4.C/§7, §11.6).
    pub fn build(region_str: &str, route_str: &str) -> Result<Cma> {
        Cma::build_with_reserver(region_str, route_str, &DefaultReserver)
    }

    /// Same as [`Cma::build`], but reserving region memory through a
    /// caller-supplied [`Reserver`] rather than the default one.
    pub fn build_with_reserver(
        region_str: &str,
        route_str: &str,
        reserver: &dyn Reserver,
    ) -> Result<Cma> {
        let region_configs = parse_regions(region_str)?;
        let route_rules = parse_routes(route_str)?;

        // A route rule naming a region absent from the region list is
        // not a build-time error: `alloc`/`info` simply skip unresolved
        // names at lookup time, same as `__cma_region_find` returning
        // NULL in the original.
        let regions = RegionTable::build(region_configs, reserver);
        let routes = RoutingTable::new(route_rules);

        Ok(Cma {
            regions,
            routes,
            chunks: ChunkRegistry::new(),
        })
    }

    /// Resolves `(device, kind)` to a region list, then tries each
    /// candidate region in order: regions that are unknown to the
    /// routing table's own bookkeeping, unbound, or whose (racily read)
    /// `free_space` is already less than `size` are skipped without
    /// taking their lock; the first region that actually carves a
    /// fitting, `alignment`-aligned chunk wins (spec.md §4.F).
    ///
    /// `alignment` of zero is treated as 1, then rounded up to the
    /// region's page size (spec.md §4.F/§11.4); any other non-power-of-two
    /// alignment is rejected.
    pub fn alloc(&self, device: &str, kind: &str, size: u64, alignment: u64) -> Result<u64> {
        if size == 0 {
            return Err(CmaError::InvalidArgument("size must be nonzero"));
        }
        if alignment != 0 && (alignment & (alignment - 1)) != 0 {
            return Err(CmaError::InvalidArgument("alignment must be a power of two"));
        }
        let alignment = config::round_up(alignment.max(1), config::PAGE_SIZE);

        let region_names = self.routes.resolve(device, kind)?;

        for region_name in region_names {
            let index = match self.regions.find_index(region_name) {
                Some(i) => i,
                None => continue,
            };
            let region = self.regions.get(index);

            if !region.is_bound() || region.free_space() < size {
                continue;
            }

            if let Some((start, carved_size)) = region.carve(size, alignment) {
                if let Err(e) = self.chunks.insert(start, carved_size, index) {
                    // A strategy handed back an address already indexed:
                    // undo the carve so the region's accounting stays
                    // consistent, then surface the error.
                    region.give_back(start, carved_size);
                    return Err(e);
                }
                log::debug!(
                    "alloc: device={:?} kind={:?} size={} region='{}' start=0x{:x}",
                    device,
                    kind,
                    size,
                    region.name,
                    start
                );
                return Ok(start);
            }
        }

        Err(CmaError::OutOfMemory)
    }

    /// Aggregates geometry over a comma-separated list of region names
    /// (spec.md §4.F, §11.3). Unknown names are skipped; an empty
    /// result is the all-ones/zero sentinel in [`RegionInfo::default`],
    /// not an error.
    pub fn info(&self, region_names: &str) -> RegionInfo {
        let mut info = RegionInfo::default();

        for name in region_names.split(',').filter(|n| !n.is_empty()) {
            let region = match self.regions.find(name) {
                Some(r) => r,
                None => continue,
            };

            info.count += 1;
            info.total_size += region.size;
            info.lower_bound = info.lower_bound.min(region.start);
            info.upper_bound = info.upper_bound.max(region.start + region.size);
        }

        info
    }

    /// Adds one reference to a live chunk identified by its start
    /// address.
    pub fn retain(&self, addr: u64) -> Result<()> {
        self.chunks.retain(addr)
    }

    /// Drops one reference to a chunk. Once the reference count reaches
    /// zero the chunk's space is returned to its owning region's
    /// strategy; the registry's own lock is always released before that
    /// call, so a region's mutex is never acquired while the registry's
    /// is held (spec.md §5's lock-ordering rule).
    pub fn release(&self, addr: u64) -> Result<()> {
        match self.chunks.release(addr)? {
            ReleaseOutcome::StillLive => Ok(()),
            ReleaseOutcome::Freed { size, region_index } => {
                let region = self.regions.get(region_index);
                region.give_back(addr, size);
                log::debug!("release: addr=0x{:x} size={} freed", addr, size);
                Ok(())
            }
        }
    }

    /// Looks up a live chunk's size without changing its refcount.
    pub fn chunk_size(&self, addr: u64) -> Option<u64> {
        self.chunks.lookup(addr).map(|(size, _)| size)
    }

    /// Tears down every bound region's strategy state. Panics (via the
    /// strategies' own debug assertions) if any chunk is still live;
    /// callers are expected to have released everything first, same
    /// contract as the original's module-unload path.
    pub fn teardown(self) {
        for region in self.regions.iter() {
            region.teardown();
        }
    }
}
