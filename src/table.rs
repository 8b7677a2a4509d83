//! The batch table: public surface, insert/lookup engines, resizer.

use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use std::collections::TryReserveError;

use rayon::prelude::*;

use crate::store::EMPTY_KEY;
use crate::store::LaneOutcome;
use crate::store::Store;

/// Lower bound of the target load-factor band.
///
/// With no delete operation the table never shrinks on its own; occupancy
/// only drops below this bound when the caller asks for an oversized
/// capacity explicitly. The automatic growth policy targets the midpoint of
/// the band so that engine-triggered resizes always land inside it.
pub const MIN_LOAD_FACTOR: f64 = 0.5;

/// Upper bound of the target load-factor band.
///
/// An insert batch whose worst-case resulting occupancy would push the load
/// factor past this bound grows the table before any lane runs.
pub const MAX_LOAD_FACTOR: f64 = 0.8;

/// Largest occupancy `capacity` slots may hold, `capacity * MAX_LOAD_FACTOR`
/// in integer arithmetic.
#[inline(always)]
fn max_occupancy(capacity: usize) -> usize {
    ((capacity as u128 * 8) / 10) as usize
}

/// Smallest capacity that puts `occupancy` at the midpoint (0.65) of the
/// load-factor band.
#[inline(always)]
fn grow_target(occupancy: usize) -> usize {
    (occupancy as u128 * 100).div_ceil(65) as usize
}

/// Smallest capacity that can hold `occupancy` without exceeding
/// `MAX_LOAD_FACTOR`; the floor enforced on explicit reshape.
#[inline(always)]
fn reshape_floor(occupancy: usize) -> usize {
    (occupancy as u128 * 10).div_ceil(8) as usize
}

/// Errors surfaced by table construction and reshaping.
///
/// Capacity exhaustion during an insert batch is deliberately not here: it
/// is the recoverable `Ok(false)` return of [`BatchTable::insert_batch`],
/// after which the caller may [`BatchTable::reshape`] and retry.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A size argument was rejected before any work began.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Memory for the slot array could not be obtained. The table is left
    /// in its last-good state.
    #[error("table storage allocation failed: {0}")]
    AllocationFailure(#[from] TryReserveError),
}

/// A resizable `u32 → u32` table with batch-parallel insert and lookup.
///
/// Every element of a batch is serviced by its own rayon lane; all lanes of
/// one call run concurrently against the shared slot array, claiming slots
/// by atomic compare-and-exchange and resolving collisions with linear
/// probing. See the crate docs for the duplicate-key and sentinel caveats.
///
/// Mutating calls take `&mut self`, so a resize can never overlap an
/// in-flight batch on the same table; the borrow checker enforces the
/// one-call-one-turn discipline statically.
///
/// # Example
///
/// ```rust
/// use lane_hash::BatchTable;
/// use lane_hash::NOT_FOUND;
///
/// let mut table = BatchTable::with_capacity(10).unwrap();
/// assert!(table.insert_batch(&[1, 2, 3], &[10, 20, 30]).unwrap());
/// assert_eq!(table.occupancy(), 3);
/// assert_eq!(table.get_batch(&[1, 2, 3]), vec![10, 20, 30]);
/// assert_eq!(table.get_batch(&[99]), vec![NOT_FOUND]);
///
/// // Re-inserting an existing key updates in place.
/// assert!(table.insert_batch(&[1], &[99]).unwrap());
/// assert_eq!(table.occupancy(), 3);
/// assert_eq!(table.get_batch(&[1]), vec![99]);
/// ```
pub struct BatchTable {
    store: Store,
    occupancy: usize,
}

impl BatchTable {
    /// Creates a table with `initial_capacity` slots, all empty.
    ///
    /// # Errors
    ///
    /// [`TableError::InvalidArgument`] if `initial_capacity == 0`;
    /// [`TableError::AllocationFailure`] if the slot array cannot be
    /// allocated.
    pub fn with_capacity(initial_capacity: u32) -> Result<Self, TableError> {
        if initial_capacity == 0 {
            return Err(TableError::InvalidArgument(
                "initial capacity must be non-zero",
            ));
        }
        Ok(BatchTable {
            store: Store::new(initial_capacity as usize)?,
            occupancy: 0,
        })
    }

    /// Number of slots in the table.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Number of slots holding a live key.
    ///
    /// Incremented only by lanes that claim a previously empty slot;
    /// updates to existing keys leave it unchanged.
    #[inline(always)]
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// Current occupancy divided by capacity.
    #[inline(always)]
    pub fn load_factor(&self) -> f64 {
        self.occupancy as f64 / self.capacity() as f64
    }

    /// Inserts a batch of key/value pairs, one concurrent lane per pair.
    ///
    /// Pairs whose key already exists have their value overwritten without
    /// changing occupancy. Pairs whose key is the empty sentinel
    /// ([`crate::EMPTY_KEY`]) are skipped. If the worst-case resulting
    /// occupancy would push the load factor past [`MAX_LOAD_FACTOR`], the
    /// table grows before any lane runs.
    ///
    /// Returns `Ok(true)` if every non-sentinel pair was placed or updated,
    /// `Ok(false)` if some lane exhausted a full-table probe; in the
    /// `false` case the entries that did land stay in the table (no
    /// rollback) and the caller should [`Self::reshape`] and retry.
    ///
    /// If the same key appears more than once in one batch, the lanes race
    /// and the stored value is whichever lane writes last. Callers needing
    /// a deterministic winner must deduplicate first.
    ///
    /// # Errors
    ///
    /// [`TableError::InvalidArgument`] if `keys` and `values` differ in
    /// length; [`TableError::AllocationFailure`] if growth was needed and
    /// the new slot array could not be allocated (the table is unchanged).
    pub fn insert_batch(&mut self, keys: &[u32], values: &[u32]) -> Result<bool, TableError> {
        if keys.len() != values.len() {
            return Err(TableError::InvalidArgument(
                "keys and values must have equal length",
            ));
        }
        if keys.is_empty() {
            return Ok(true);
        }

        // Worst case every key is distinct and new; duplicates and updates
        // only make the projection pessimistic.
        self.grow_to_fit(self.occupancy + keys.len())?;

        let store = &self.store;
        let claimed = AtomicUsize::new(0);
        let exhausted = AtomicBool::new(false);
        keys.par_iter()
            .zip(values.par_iter())
            .for_each(|(&key, &value)| {
                if key == EMPTY_KEY {
                    return;
                }
                match store.insert_lane(key, value) {
                    LaneOutcome::Claimed => {
                        claimed.fetch_add(1, Ordering::Relaxed);
                    }
                    LaneOutcome::Updated => {}
                    LaneOutcome::Exhausted => {
                        exhausted.store(true, Ordering::Relaxed);
                    }
                }
            });

        self.occupancy += claimed.into_inner();
        Ok(!exhausted.into_inner())
    }

    /// Looks up a batch of keys, one concurrent lane per key.
    ///
    /// The returned vector has the same length as `keys`; misses yield
    /// [`crate::NOT_FOUND`]. The result reflects the table state as of the
    /// start of the call (the `&self` receiver means no insert or reshape
    /// can run concurrently on this table anyway).
    pub fn get_batch(&self, keys: &[u32]) -> Vec<u32> {
        let store = &self.store;
        keys.par_iter().map(|&key| store.lookup_lane(key)).collect()
    }

    /// Resizes the table to exactly `new_capacity` slots, rehashing every
    /// live entry into the new allocation.
    ///
    /// The old storage is released only after the new store is fully
    /// populated; on any error the table is untouched. This is also the
    /// only shrink path, since nothing deletes entries.
    ///
    /// # Errors
    ///
    /// [`TableError::InvalidArgument`] if `new_capacity` cannot hold the
    /// current occupancy at [`MAX_LOAD_FACTOR`];
    /// [`TableError::AllocationFailure`] if the new slot array cannot be
    /// allocated.
    pub fn reshape(&mut self, new_capacity: u32) -> Result<(), TableError> {
        if new_capacity == 0 || (new_capacity as usize) < reshape_floor(self.occupancy) {
            return Err(TableError::InvalidArgument(
                "new capacity too small for current occupancy at the maximum load factor",
            ));
        }
        self.rebuild(new_capacity as usize)
    }

    /// Grows the table if `projected` occupancy would exceed the band.
    fn grow_to_fit(&mut self, projected: usize) -> Result<(), TableError> {
        if projected <= max_occupancy(self.capacity()) {
            return Ok(());
        }
        self.rebuild(grow_target(projected))
    }

    /// Allocate-then-migrate-then-swap. Occupancy is recomputed from the
    /// migrated count, which must match what the old store held.
    fn rebuild(&mut self, new_capacity: usize) -> Result<(), TableError> {
        let mut next = Store::new(new_capacity)?;
        let mut migrated = 0;
        for (key, value) in self.store.live_entries() {
            next.rehash_entry(key, value);
            migrated += 1;
        }
        debug_assert_eq!(migrated, self.occupancy, "reshape dropped a live entry");
        self.store = next;
        self.occupancy = migrated;
        Ok(())
    }
}
