//! The 32-bit identifier space (§3). Reserved ids are small constants; hubs occupy a
//! mid-range block and modules everything from [`ModuleBase`] upward.
//!
//! Unlike the qsim crate's [`Id<T>`] (a thread-local interned, type-tagged handle used to
//! de-duplicate string ids read from input files), Vistle ids are plain integers assigned by
//! the hub -- there is nothing to intern. We keep the qsim crate's newtype-plus-trait-impls
//! idiom (`Ord`/`Hash`/`Display` hand-derived from a single inner value) but drop the interning
//! store entirely.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

pub type Raw = i32;

pub const INVALID: Raw = 0;
pub const VISTLE: Raw = 1;
pub const CONFIG: Raw = 2;
pub const BROADCAST: Raw = 3;
pub const FOR_BROADCAST: Raw = 4;
pub const NEXT_HOP: Raw = 5;
pub const UI: Raw = 6;
pub const LOCAL_HUB: Raw = 7;
pub const LOCAL_MANAGER: Raw = 8;
pub const MASTER_HUB: Raw = 9;

/// First id of the hub range. Hubs are assigned `HUB_BASE..MODULE_BASE`.
pub const HUB_BASE: Raw = 10;
/// First id of the module range; every module id is `>= MODULE_BASE`.
pub const MODULE_BASE: Raw = 1_000;

/// A 32-bit identifier: a reserved constant, a hub id, or a module id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Id(Raw);

impl Id {
    pub const INVALID: Id = Id(INVALID);
    pub const VISTLE: Id = Id(VISTLE);
    pub const CONFIG: Id = Id(CONFIG);
    pub const BROADCAST: Id = Id(BROADCAST);
    pub const FOR_BROADCAST: Id = Id(FOR_BROADCAST);
    pub const NEXT_HOP: Id = Id(NEXT_HOP);
    pub const UI: Id = Id(UI);
    pub const LOCAL_HUB: Id = Id(LOCAL_HUB);
    pub const LOCAL_MANAGER: Id = Id(LOCAL_MANAGER);
    pub const MASTER_HUB: Id = Id(MASTER_HUB);

    pub const fn new(raw: Raw) -> Self {
        Id(raw)
    }

    pub const fn raw(self) -> Raw {
        self.0
    }

    pub fn is_hub(self) -> bool {
        (HUB_BASE..MODULE_BASE).contains(&self.0)
    }

    pub fn is_module(self) -> bool {
        self.0 >= MODULE_BASE
    }

    pub fn is_reserved(self) -> bool {
        (INVALID..HUB_BASE).contains(&self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl nohash_hasher::IsEnabled for Id {}

/// Hands out sequential ids within a reserved range. The hub owns one allocator for the hub
/// range and one for the module range; this core only consumes ids the hub assigns, but tests
/// need to mint fresh ones without a hub in the loop.
pub struct IdAllocator {
    next: AtomicI32,
}

impl IdAllocator {
    pub const fn starting_at(base: Raw) -> Self {
        IdAllocator {
            next: AtomicI32::new(base),
        }
    }

    pub fn allocate(&self) -> Id {
        Id(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn reset(&self, base: Raw) {
        self.next.store(base, Ordering::Relaxed);
    }
}

static MODULE_IDS: IdAllocator = IdAllocator::starting_at(MODULE_BASE);
static HUB_IDS: IdAllocator = IdAllocator::starting_at(HUB_BASE);

pub fn allocate_module_id() -> Id {
    MODULE_IDS.allocate()
}

pub fn allocate_hub_id() -> Id {
    HUB_IDS.allocate()
}

/// Resets the global module/hub allocators. Exposed under `test_utils` so integration tests
/// (and the `#[integration_test]` attribute macro) can start each test from a clean id space,
/// mirroring the qsim crate's `id::reset_store` used by its own test macro.
#[cfg(any(test, feature = "test_utils"))]
pub fn reset_allocators_for_test() {
    MODULE_IDS.reset(MODULE_BASE);
    HUB_IDS.reset(HUB_BASE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_are_ordered_and_distinct() {
        let reserved = [
            Id::INVALID,
            Id::VISTLE,
            Id::CONFIG,
            Id::BROADCAST,
            Id::FOR_BROADCAST,
            Id::NEXT_HOP,
            Id::UI,
            Id::LOCAL_HUB,
            Id::LOCAL_MANAGER,
            Id::MASTER_HUB,
        ];
        for w in reserved.windows(2) {
            assert!(w[0] < w[1]);
        }
        for id in reserved {
            assert!(id.is_reserved());
            assert!(!id.is_hub());
            assert!(!id.is_module());
        }
    }

    #[test]
    fn module_ids_allocate_sequentially_above_module_base() {
        reset_allocators_for_test();
        let a = allocate_module_id();
        let b = allocate_module_id();
        assert!(a.is_module());
        assert!(b.is_module());
        assert_eq!(b.raw(), a.raw() + 1);
    }

    #[test]
    fn hub_ids_stay_below_module_base() {
        reset_allocators_for_test();
        let hub = allocate_hub_id();
        assert!(hub.is_hub());
        assert!(hub.raw() < MODULE_BASE);
    }
}
