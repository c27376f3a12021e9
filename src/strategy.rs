//! The allocator plug-in surface (spec.md §4.B's "Strategy" concept) and
//! its named registry.
//!
//! Grounded in the teacher's `mapper.rs`: a `#[contract_trait]` trait plus
//! a `lazy_static! Mutex<Vec<(name, &'static dyn Trait)>>` registry keyed
//! by name, the same shape as `NAMED_MAPPERS` there (and `CLASSES` in
//! `class.rs`). `original_source/mm/cma-allocators.h` defines the
//! equivalent C vtable (`struct cma_allocator`).
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

use std::any::Any;
use std::sync::Mutex;

use crate::bestfit::BestFit;

/// A single carved-out chunk, in absolute region-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarvedChunk {
    pub start: u64,
    pub size: u64,
}

/// An allocation strategy for a single region's free space.
///
/// A strategy owns no region bounds of its own: `init` is handed the
/// region's absolute start/size once, and everything after that is
/// scoped to the opaque `private` state it returns. This mirrors how
/// `original_source/mm/cma-allocators.h`'s `struct cma_allocator`
/// vtable only ever receives `struct cma_region *` and never keeps its
/// own copy of the bounds.
#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait Strategy: std::fmt::Debug + Sync {
    /// Short registry name, e.g. `"bf"`.
    fn name(&self) -> &'static str;

    /// Builds this strategy's private state for a freshly reserved
    /// region spanning `[start, start + size)`. `params` is the
    /// strategy-specific text between the region grammar's optional
    /// `(...)`, unparsed.
    #[requires(size > 0)]
    fn init(
        &self,
        start: u64,
        size: u64,
        params: Option<&str>,
    ) -> std::result::Result<Box<dyn Any + Send>, &'static str>;

    /// Asserts the strategy's internal state is back to a single hole
    /// spanning the whole region (no live chunks) and releases it.
    /// Called only when the region's user count is zero.
    fn teardown(&self, private: Box<dyn Any + Send>);

    /// Finds and removes the best-fitting hole of at least `size` bytes
    /// whose `alignment`-aligned interior still fits, per spec.md §4.B.
    /// Returns `None` on failure (no hole fits); this is not logged as
    /// an error, out-of-memory is a routine outcome.
    #[requires(size > 0)]
    #[requires(alignment.is_power_of_two(), "alignment must be a power of two")]
    #[ensures(ret.is_some() -> ret.as_ref().unwrap().start % alignment == 0, "carved chunk respects the requested alignment")]
    #[ensures(ret.is_some() -> ret.as_ref().unwrap().size >= size, "carved chunk is at least the requested size")]
    fn carve(&self, private: &mut (dyn Any + Send), size: u64, alignment: u64) -> Option<CarvedChunk>;

    /// Returns a chunk's space to the free pool, coalescing with
    /// immediate neighbors.
    #[requires(size > 0)]
    fn give_back(&self, private: &mut (dyn Any + Send), start: u64, size: u64);
}

lazy_static::lazy_static! {
    static ref STRATEGIES: Mutex<Vec<(&'static str, &'static dyn Strategy)>> = {
        let mut registry: Vec<(&'static str, &'static dyn Strategy)> = Vec::new();
        // Registration order matters: an absent `strategy` name in the
        // region grammar resolves to the first-registered strategy here.
        registry.push(("bf", &BestFit as &'static dyn Strategy));
        Mutex::new(registry)
    };
}

/// Registers an additional named strategy. Intended for embedders that
/// want to plug in their own allocator; the built-in `"bf"` best-fit
/// strategy is always registered first.
pub fn register_strategy(name: &'static str, strategy: &'static dyn Strategy) {
    STRATEGIES.lock().unwrap().push((name, strategy));
}

/// Looks up a strategy by name, or returns the first-registered
/// strategy when `name` is `None` (spec.md §4.A, §11.1).
pub fn get_strategy(name: Option<&str>) -> Option<&'static dyn Strategy> {
    let strategies = STRATEGIES.lock().unwrap();
    match name {
        None => strategies.first().map(|&(_, s)| s),
        Some(name) => strategies
            .iter()
            .find(|&&(registered, _)| registered == name)
            .map(|&(_, s)| s),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bf_is_registered_and_is_the_default() {
        assert!(get_strategy(Some("bf")).is_some());
        assert_eq!(get_strategy(Some("bf")).unwrap().name(), "bf");
        assert_eq!(get_strategy(None).unwrap().name(), "bf");
    }

    #[test]
    fn unknown_name_is_not_found() {
        assert!(get_strategy(Some("no-such-strategy")).is_none());
    }

    /// A minimal additional strategy demonstrating that the plug-in
    /// surface (spec.md §9's "an additional strategy must satisfy")
    /// really is pluggable: one region-sized chunk, handed out once.
    #[derive(Debug, Default)]
    struct OneShot;

    #[contract_trait]
    impl Strategy for OneShot {
        fn name(&self) -> &'static str {
            "one-shot-test-strategy"
        }

        fn init(
            &self,
            start: u64,
            size: u64,
            _params: Option<&str>,
        ) -> std::result::Result<Box<dyn Any + Send>, &'static str> {
            Ok(Box::new(Some((start, size))))
        }

        fn teardown(&self, _private: Box<dyn Any + Send>) {}

        fn carve(&self, private: &mut (dyn Any + Send), size: u64, alignment: u64) -> Option<CarvedChunk> {
            let slot = private.downcast_mut::<Option<(u64, u64)>>().unwrap();
            let (start, hole_size) = (*slot)?;
            if size > hole_size || start % alignment != 0 {
                return None;
            }
            *slot = None;
            Some(CarvedChunk { start, size: hole_size })
        }

        fn give_back(&self, private: &mut (dyn Any + Send), start: u64, size: u64) {
            let slot = private.downcast_mut::<Option<(u64, u64)>>().unwrap();
            *slot = Some((start, size));
        }
    }

    #[test]
    fn a_custom_strategy_can_be_registered_and_looked_up_by_name() {
        static ONE_SHOT: OneShot = OneShot;
        register_strategy("one-shot-test-strategy", &ONE_SHOT);

        let found = get_strategy(Some("one-shot-test-strategy")).expect("should be registered");
        assert_eq!(found.name(), "one-shot-test-strategy");

        let mut private = found.init(0x1000, 4096, None).unwrap();
        let chunk = found
            .carve(private.as_mut(), 4096, 4096)
            .expect("should carve the whole region once");
        assert_eq!(chunk, CarvedChunk { start: 0x1000, size: 4096 });
        assert!(found.carve(private.as_mut(), 1, 1).is_none());

        found.give_back(private.as_mut(), chunk.start, chunk.size);
        assert!(found.carve(private.as_mut(), 4096, 4096).is_some());
    }
}
