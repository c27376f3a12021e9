//! The Region Table (spec.md §4.C / §3's Region record).
//!
//! Grounded in `struct cma_region` (`original_source/include/linux/cma-int.h`)
//! for the field set and in the teacher's `Mill`/`Class` ownership style
//! (one `Mutex`-guarded struct per unit, collected into a fixed-size,
//! built-once-at-startup `Vec`) rather than a further `lazy_static!`
//! singleton: see DESIGN.md for why the table is owned by `Cma` instead
//! of living at process scope like the original's `cma_regions` array.
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::RegionConfig;
use crate::reserver::Reserver;
use crate::strategy::{get_strategy, Strategy};

#[derive(Default)]
struct RegionInner {
    private_data: Option<Box<dyn Any + Send>>,
    users: u32,
}

/// One bound (or failed-to-bind) region. Everything but `free_space`,
/// `users`, and `private_data` is immutable for the region's lifetime,
/// matching spec.md §3's "Region" invariants.
pub struct Region {
    pub name: String,
    /// Absolute base address. For a region whose physical reservation
    /// failed, this is the configured hint (possibly 0), not a real
    /// address — see spec.md §11.6 / DESIGN.md.
    pub start: u64,
    pub size: u64,
    pub alignment: u64,
    pub strategy_name: Option<String>,
    strategy: Option<&'static dyn Strategy>,
    free_space: AtomicU64,
    inner: Mutex<RegionInner>,
}

impl std::fmt::Debug for RegionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionInner")
            .field("users", &self.users)
            .field("has_private_data", &self.private_data.is_some())
            .finish()
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("strategy_name", &self.strategy_name)
            .field("bound", &self.strategy.is_some())
            .field("free_space", &self.free_space())
            .finish()
    }
}

impl Region {
    fn bind(cfg: RegionConfig, reserver: &dyn Reserver) -> Region {
        let start = match reserver.reserve(cfg.size, cfg.alignment) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!(
                    "region '{}': physical reservation failed ({}), region disabled",
                    cfg.name,
                    e
                );
                return Region {
                    name: cfg.name,
                    start: cfg.start,
                    size: cfg.size,
                    alignment: cfg.alignment,
                    strategy_name: cfg.strategy_name,
                    strategy: None,
                    free_space: AtomicU64::new(0),
                    inner: Mutex::new(RegionInner::default()),
                };
            }
        };

        let strategy = get_strategy(cfg.strategy_name.as_deref());
        let strategy = match strategy {
            Some(s) => s,
            None => {
                log::warn!(
                    "region '{}': unknown strategy {:?}, region disabled",
                    cfg.name,
                    cfg.strategy_name
                );
                return Region {
                    name: cfg.name,
                    start,
                    size: cfg.size,
                    alignment: cfg.alignment,
                    strategy_name: cfg.strategy_name,
                    strategy: None,
                    free_space: AtomicU64::new(0),
                    inner: Mutex::new(RegionInner::default()),
                };
            }
        };

        match strategy.init(start, cfg.size, cfg.strategy_params.as_deref()) {
            Ok(private) => Region {
                name: cfg.name,
                start,
                size: cfg.size,
                alignment: cfg.alignment,
                strategy_name: cfg.strategy_name,
                strategy: Some(strategy),
                free_space: AtomicU64::new(cfg.size),
                inner: Mutex::new(RegionInner {
                    private_data: Some(private),
                    users: 0,
                }),
            },
            Err(e) => {
                log::warn!(
                    "region '{}': strategy '{}' init failed ({}), region disabled",
                    cfg.name,
                    strategy.name(),
                    e
                );
                Region {
                    name: cfg.name,
                    start,
                    size: cfg.size,
                    alignment: cfg.alignment,
                    strategy_name: cfg.strategy_name,
                    strategy: None,
                    free_space: AtomicU64::new(0),
                    inner: Mutex::new(RegionInner::default()),
                }
            }
        }
    }

    /// Racy by design: used by the facade's pre-lock "is this region
    /// worth trying" skip test (spec.md §5). The authoritative update
    /// happens under `inner`'s lock in `carve`/`give_back`.
    pub fn free_space(&self) -> u64 {
        self.free_space.load(Ordering::Relaxed)
    }

    pub fn is_bound(&self) -> bool {
        self.strategy.is_some()
    }

    pub fn users(&self) -> u32 {
        self.inner.lock().unwrap().users
    }

    /// Attempts to carve `size` bytes aligned to `alignment` out of this
    /// region. Returns `None` if the region is unbound or has no
    /// fitting hole.
    pub(crate) fn carve(&self, size: u64, alignment: u64) -> Option<(u64, u64)> {
        let strategy = self.strategy?;
        let mut inner = self.inner.lock().unwrap();
        let private = inner.private_data.as_mut()?;
        let chunk = strategy.carve(private.as_mut(), size, alignment)?;
        inner.users += 1;
        self.free_space.fetch_sub(chunk.size, Ordering::Relaxed);
        Some((chunk.start, chunk.size))
    }

    /// Returns a chunk's space, decrementing the region's user count.
    pub(crate) fn give_back(&self, start: u64, size: u64) {
        let strategy = match self.strategy {
            Some(s) => s,
            None => {
                log::error!(
                    "region '{}': give_back on an unbound region (chunk 0x{:x})",
                    self.name,
                    start
                );
                return;
            }
        };

        let mut inner = self.inner.lock().unwrap();
        match inner.private_data.as_mut() {
            Some(private) => strategy.give_back(private.as_mut(), start, size),
            None => {
                log::error!(
                    "region '{}': give_back with no private state (chunk 0x{:x})",
                    self.name,
                    start
                );
                return;
            }
        }
        inner.users = inner.users.saturating_sub(1);
        self.free_space.fetch_add(size, Ordering::Relaxed);
    }

    /// Tears down a bound region's strategy state. Only meaningful once
    /// all of the region's chunks have been released; callers (`Cma`)
    /// are responsible for that invariant.
    pub(crate) fn teardown(&self) {
        if let Some(strategy) = self.strategy {
            let mut inner = self.inner.lock().unwrap();
            if let Some(private) = inner.private_data.take() {
                strategy.teardown(private);
            }
        }
    }
}

/// The ordered collection of regions a configuration resolves to.
/// Built once by `Cma::build` and never mutated afterward; region names
/// are matched by exact string equality (spec.md §11.2), never glob.
#[derive(Debug)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    pub(crate) fn build(configs: Vec<RegionConfig>, reserver: &dyn Reserver) -> RegionTable {
        let regions = configs
            .into_iter()
            .map(|cfg| Region::bind(cfg, reserver))
            .collect();
        RegionTable { regions }
    }

    pub fn find(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name == name)
    }

    pub fn get(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::parse_regions;
    use crate::reserver::DefaultReserver;

    #[test]
    fn binds_a_region_with_the_default_strategy() {
        let configs = parse_regions("reg1=64K").unwrap();
        let table = RegionTable::build(configs, &DefaultReserver);
        let region = table.find("reg1").expect("region should exist");
        assert!(region.is_bound());
        assert_eq!(region.free_space(), 64 * 1024);
        assert_eq!(region.users(), 0);
    }

    #[test]
    fn unknown_strategy_disables_the_region_but_keeps_it_in_the_table() {
        let configs = parse_regions("reg1=64K:no-such-strategy").unwrap();
        let table = RegionTable::build(configs, &DefaultReserver);
        let region = table.find("reg1").expect("region should still be listed");
        assert!(!region.is_bound());
        assert_eq!(region.free_space(), 0);
    }

    #[test]
    fn carve_and_give_back_round_trip_updates_free_space_and_users() {
        let configs = parse_regions("reg1=64K").unwrap();
        let table = RegionTable::build(configs, &DefaultReserver);
        let region = table.find("reg1").unwrap();

        let (start, size) = region.carve(4096, 1).expect("should carve");
        assert_eq!(size, 4096);
        assert_eq!(region.users(), 1);
        assert_eq!(region.free_space(), 64 * 1024 - 4096);

        region.give_back(start, size);
        assert_eq!(region.users(), 0);
        assert_eq!(region.free_space(), 64 * 1024);
    }

    #[test]
    fn find_is_exact_match_not_glob() {
        let configs = parse_regions("reg1=64K;reg12=64K").unwrap();
        let table = RegionTable::build(configs, &DefaultReserver);
        assert!(table.find("reg1").is_some());
        assert!(table.find("reg").is_none());
    }
}
