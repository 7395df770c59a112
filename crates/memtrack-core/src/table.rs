//! Fixed-capacity slot table.
//!
//! Slots are addressed by index and never grown. Acquisition is first-fit from
//! index 0 and lookup is a linear scan comparing handle identity, both bounded
//! by the capacity. `occupied` and `total_bytes` are maintained incrementally
//! and can be recomputed from a full scan at any time.

use crate::error::TrackError;
use crate::record::{AllocationRecord, Handle, Status};

#[derive(Debug)]
pub struct AllocationTable {
    slots: Box<[Option<AllocationRecord>]>,
    occupied: usize,
    total_bytes: usize,
}

impl AllocationTable {
    /// Create an empty table with `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            occupied: 0,
            total_bytes: 0,
        }
    }

    /// Clear every slot and zero both aggregates.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.occupied = 0;
        self.total_bytes = 0;
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupied >= self.slots.len()
    }

    /// Lowest-index free slot.
    #[must_use]
    pub fn find_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Index of the slot holding `handle`.
    #[must_use]
    pub fn find(&self, handle: Handle) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.address == handle))
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AllocationRecord> {
        self.slots.get(index)?.as_ref()
    }

    /// Populate a free slot and credit the aggregates.
    ///
    /// # Panics
    ///
    /// If `index` is out of range or the slot is occupied; both are tracker bugs.
    pub fn insert(&mut self, index: usize, record: AllocationRecord) {
        let slot = &mut self.slots[index];
        assert!(slot.is_none(), "slot {index} already occupied");
        self.occupied += 1;
        self.total_bytes += record.size;
        *slot = Some(record);
    }

    /// First step of releasing a slot: debit its size and count from the
    /// aggregates and mark it `Freed`. The slot stays populated until
    /// [`clear_slot`](Self::clear_slot). Returns the record's size.
    pub fn debit(&mut self, index: usize) -> Option<usize> {
        let record = self.slots.get_mut(index)?.as_mut()?;
        if record.status != Status::Allocated {
            return None;
        }
        record.status = Status::Freed;
        self.total_bytes -= record.size;
        self.occupied -= 1;
        Some(record.size)
    }

    /// Final step of releasing a slot: return it to the empty state.
    pub fn clear_slot(&mut self, index: usize) -> Option<AllocationRecord> {
        self.slots.get_mut(index)?.take()
    }

    /// Occupied slots in ascending index order.
    pub fn iter_occupied(&self) -> impl Iterator<Item = (usize, &AllocationRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|r| (index, r)))
    }

    /// `(occupied, total_bytes)` from a full scan.
    #[must_use]
    pub fn recompute(&self) -> (usize, usize) {
        self.iter_occupied()
            .fold((0, 0), |(count, bytes), (_, r)| (count + 1, bytes + r.size))
    }

    /// Check both incremental aggregates against a full scan.
    pub fn audit(&self) -> Result<(), TrackError> {
        let (count, bytes) = self.recompute();
        if count != self.occupied {
            return Err(TrackError::Inconsistent {
                field: "occupied_count",
                incremental: self.occupied,
                recomputed: count,
            });
        }
        if bytes != self.total_bytes {
            return Err(TrackError::Inconsistent {
                field: "total_bytes",
                incremental: self.total_bytes,
                recomputed: bytes,
            });
        }
        Ok(())
    }
}
