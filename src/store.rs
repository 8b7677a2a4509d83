//! The slot array and its addressing scheme.
//!
//! Storage is one contiguous allocation of [`Slot`]s. Each slot holds a key
//! and a value as separate `AtomicU32`s so that concurrent lanes can claim a
//! slot by compare-and-exchange on the key field alone, then publish the
//! value with a release store. Collisions resolve by linear probing: the
//! probe sequence for a key is `(h + i) mod capacity` for increasing `i`,
//! where `h` is a pure function of the key and the current capacity.

use core::hash::BuildHasher;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use std::collections::TryReserveError;

use foldhash::fast::FixedState;

/// Key value marking an empty slot.
///
/// `u32::MAX` is reserved and never a legal user key; insert batches
/// containing it skip those elements. Matches the all-ones fill commonly
/// used to memset GPU table storage.
pub const EMPTY_KEY: u32 = u32::MAX;

/// Value returned by lookups for keys that are not in the table.
///
/// Numerically equal to [`EMPTY_KEY`]; callers that store `u32::MAX` as a
/// value cannot distinguish it from a miss.
pub const NOT_FOUND: u32 = u32::MAX;

/// Fixed-seed hasher so the probe origin is a pure function of the key.
///
/// Insert and lookup must agree on the probe sequence across calls and
/// across resizes, so the usual per-instance random seeding is not an
/// option here.
const HASH_STATE: FixedState = FixedState::with_seed(0xD15E_A5E5_CAB1_E5);

/// Probe origin for `key` in a table of `capacity` slots.
#[inline(always)]
pub(crate) fn probe_origin(key: u32, capacity: usize) -> usize {
    (HASH_STATE.hash_one(key) % capacity as u64) as usize
}

/// One storage unit: a key and a value, independently atomic.
///
/// The key field is the synchronization point. A slot whose key is
/// [`EMPTY_KEY`] is empty and its value is meaningless; once a lane claims
/// the key by compare-and-exchange, the key never changes again for the
/// lifetime of the allocation (there is no delete).
pub(crate) struct Slot {
    key: AtomicU32,
    value: AtomicU32,
}

impl Slot {
    #[inline(always)]
    fn empty() -> Self {
        Slot {
            key: AtomicU32::new(EMPTY_KEY),
            value: AtomicU32::new(0),
        }
    }
}

/// Outcome of one lane's insert probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaneOutcome {
    /// The lane transitioned a slot from empty to holding its key. Exactly
    /// one lane per distinct key ever observes this.
    Claimed,
    /// The key was already present; only the value was overwritten.
    Updated,
    /// A full-table probe found neither an open nor a matching slot.
    Exhausted,
}

/// The contiguous slot array.
///
/// Exclusively owned by the table object and replaced wholesale on resize;
/// never partially swapped or aliased outside it.
pub(crate) struct Store {
    slots: Box<[Slot]>,
}

impl Store {
    /// Allocates `capacity` slots, all empty.
    ///
    /// Allocation is fallible: on failure the error propagates and nothing
    /// is touched, so a resize that cannot get memory leaves the old store
    /// intact.
    pub(crate) fn new(capacity: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, Slot::empty);
        Ok(Store {
            slots: slots.into_boxed_slice(),
        })
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// One insert lane: probe from the key's origin, claim the first empty
    /// slot or update the slot already holding the key.
    ///
    /// Safe to call from many lanes concurrently. The compare-and-exchange
    /// on the key field is the claim; a lane that loses the race to a
    /// duplicate of its own key falls through to the update path, so among
    /// concurrent duplicates the last value store wins.
    pub(crate) fn insert_lane(&self, key: u32, value: u32) -> LaneOutcome {
        let capacity = self.slots.len();
        let mut index = probe_origin(key, capacity);
        for _ in 0..capacity {
            let slot = &self.slots[index];
            match slot
                .key
                .compare_exchange(EMPTY_KEY, key, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    slot.value.store(value, Ordering::Release);
                    return LaneOutcome::Claimed;
                }
                Err(current) if current == key => {
                    slot.value.store(value, Ordering::Release);
                    return LaneOutcome::Updated;
                }
                Err(_) => {
                    index += 1;
                    if index == capacity {
                        index = 0;
                    }
                }
            }
        }
        LaneOutcome::Exhausted
    }

    /// One lookup lane: probe from the key's origin until a match, an empty
    /// slot, or a full-table scan.
    ///
    /// Read-only; keys never revert to empty, so an empty slot on the probe
    /// path proves the key is absent.
    pub(crate) fn lookup_lane(&self, key: u32) -> u32 {
        let capacity = self.slots.len();
        let mut index = probe_origin(key, capacity);
        for _ in 0..capacity {
            let slot = &self.slots[index];
            let current = slot.key.load(Ordering::Acquire);
            if current == EMPTY_KEY {
                return NOT_FOUND;
            }
            if current == key {
                return slot.value.load(Ordering::Acquire);
            }
            index += 1;
            if index == capacity {
                index = 0;
            }
        }
        NOT_FOUND
    }

    /// Places an entry during a rehash, under exclusive access.
    ///
    /// The caller guarantees the key is not yet present and that the store
    /// has a free slot (resize targets always leave headroom), so the probe
    /// stops at the first empty slot.
    pub(crate) fn rehash_entry(&mut self, key: u32, value: u32) {
        let capacity = self.slots.len();
        let mut index = probe_origin(key, capacity);
        for _ in 0..capacity {
            let slot = &mut self.slots[index];
            if *slot.key.get_mut() == EMPTY_KEY {
                *slot.key.get_mut() = key;
                *slot.value.get_mut() = value;
                return;
            }
            index += 1;
            if index == capacity {
                index = 0;
            }
        }
        unreachable!("rehash target store has a free slot by construction");
    }

    /// Iterates the live entries under exclusive access, for migration.
    pub(crate) fn live_entries(&mut self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots.iter_mut().filter_map(|slot| {
            let key = *slot.key.get_mut();
            if key == EMPTY_KEY {
                None
            } else {
                Some((key, *slot.value.get_mut()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_origin_is_pure_and_in_range() {
        for capacity in [1usize, 2, 7, 10, 1024, 100003] {
            for key in [0u32, 1, 42, 0xDEAD_BEEF, u32::MAX - 1] {
                let a = probe_origin(key, capacity);
                let b = probe_origin(key, capacity);
                assert_eq!(a, b);
                assert!(a < capacity);
            }
        }
    }

    #[test]
    fn claim_then_update() {
        let store = Store::new(8).unwrap();
        assert_eq!(store.insert_lane(5, 50), LaneOutcome::Claimed);
        assert_eq!(store.lookup_lane(5), 50);
        assert_eq!(store.insert_lane(5, 99), LaneOutcome::Updated);
        assert_eq!(store.lookup_lane(5), 99);
    }

    #[test]
    fn probe_wraps_around_the_array() {
        // Capacity 3 forces heavy collision; all three keys must land
        // somewhere and remain discoverable.
        let store = Store::new(3).unwrap();
        for key in [1u32, 2, 3] {
            assert_eq!(store.insert_lane(key, key * 10), LaneOutcome::Claimed);
        }
        for key in [1u32, 2, 3] {
            assert_eq!(store.lookup_lane(key), key * 10);
        }
    }

    #[test]
    fn exhausted_when_full() {
        let store = Store::new(2).unwrap();
        assert_eq!(store.insert_lane(1, 1), LaneOutcome::Claimed);
        assert_eq!(store.insert_lane(2, 2), LaneOutcome::Claimed);
        assert_eq!(store.insert_lane(3, 3), LaneOutcome::Exhausted);
        // The full-table miss path, with no empty slot to stop at.
        assert_eq!(store.lookup_lane(3), NOT_FOUND);
    }

    #[test]
    fn rehash_round_trips_live_entries() {
        let mut old = Store::new(4).unwrap();
        old.insert_lane(7, 70);
        old.insert_lane(8, 80);

        let mut new = Store::new(16).unwrap();
        let mut migrated = 0;
        for (key, value) in old.live_entries() {
            new.rehash_entry(key, value);
            migrated += 1;
        }
        assert_eq!(migrated, 2);
        assert_eq!(new.lookup_lane(7), 70);
        assert_eq!(new.lookup_lane(8), 80);
        assert_eq!(new.lookup_lane(9), NOT_FOUND);
    }
}
