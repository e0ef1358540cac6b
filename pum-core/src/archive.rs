//! Archive: a fixed-capacity ring of records over byte-addressable
//! non-volatile memory.
//!
//! Capacity `N = floor(backing_len / ARCHIVE_SLOT_SIZE)`. Insertion always
//! overwrites whatever is at the write cursor, even a still-pending record —
//! the design's acknowledged data-loss-under-overload tradeoff.

use crate::error::ArchiveError;
use crate::record::{decode_slot, encode_slot, Record, Status, ARCHIVE_SLOT_SIZE};

/// Default archive size: ~4096 bytes / 21-byte slot ≈ 195 records — sized
/// to hold one working day of milkings without wrapping.
pub const DEFAULT_STORE_BYTES: usize = 4096;

/// Byte-addressable non-volatile backing. A production node backs this with
/// a flash partition or memory-mapped file; tests back it with a `Vec<u8>`.
pub trait RandomAccessStore: Send {
    fn len(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), ArchiveError>;
    fn write(&mut self, offset: usize, buf: &[u8]) -> Result<(), ArchiveError>;
    /// Commits any buffered writes to the physical medium (`EEPROM.commit()`
    /// in the original firmware). A `Vec<u8>`-backed store has nothing to
    /// flush.
    fn commit(&mut self) -> Result<(), ArchiveError> {
        Ok(())
    }
}

impl RandomAccessStore for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), ArchiveError> {
        let end = offset + buf.len();
        if end > Vec::len(self) {
            return Err(ArchiveError::OutOfRange(offset));
        }
        buf.copy_from_slice(&self[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, buf: &[u8]) -> Result<(), ArchiveError> {
        let end = offset + buf.len();
        if end > Vec::len(self) {
            return Err(ArchiveError::OutOfRange(offset));
        }
        self[offset..end].copy_from_slice(buf);
        Ok(())
    }
}

/// The record ring buffer. Single-writer (insertion), single-reader (drain):
/// both must run on the node's own tasks under that discipline, since this
/// type does no internal locking of its own.
pub struct Archive<S: RandomAccessStore> {
    store: S,
    capacity: usize,
    /// Write cursor, `w`. Not persisted across restarts; see DESIGN.md for
    /// why that's the accepted behavior.
    write_cursor: usize,
    overwritten_pending: u64,
}

impl<S: RandomAccessStore> Archive<S> {
    /// Builds an archive over `store`, sized to however many whole slots fit.
    pub fn new(store: S) -> Self {
        let capacity = store.len() / ARCHIVE_SLOT_SIZE;
        Self {
            store,
            capacity,
            write_cursor: 0,
            overwritten_pending: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count of insertions that clobbered a still-`Pending` slot — exposed
    /// for observability.
    pub fn overwritten_pending_count(&self) -> u64 {
        self.overwritten_pending
    }

    fn slot_offset(&self, index: usize) -> usize {
        index * ARCHIVE_SLOT_SIZE
    }

    fn read_slot(&self, index: usize) -> Result<Option<Record>, ArchiveError> {
        let mut buf = [0u8; ARCHIVE_SLOT_SIZE];
        self.store.read(self.slot_offset(index), &mut buf)?;
        Ok(decode_slot(&buf))
    }

    /// Stores `rec` at the write cursor, advances the cursor mod `capacity`,
    /// and commits. Cannot fail except for backing-store I/O.
    pub fn add(&mut self, rec: Record) -> Result<usize, ArchiveError> {
        if self.capacity == 0 {
            return Err(ArchiveError::OutOfRange(0));
        }
        let index = self.write_cursor;
        if let Ok(Some(existing)) = self.read_slot(index) {
            if existing.status == Status::Pending {
                self.overwritten_pending += 1;
            }
        }
        let slot = encode_slot(&rec);
        self.store.write(self.slot_offset(index), &slot)?;
        self.store.commit()?;
        self.write_cursor = (self.write_cursor + 1) % self.capacity;
        Ok(index)
    }

    /// Scans slots `0..capacity` in ascending order and returns the first
    /// whose status is `Pending`. O(capacity) by design.
    pub fn next_pending(&self) -> Result<Option<(usize, Record)>, ArchiveError> {
        for i in 0..self.capacity {
            if let Some(rec) = self.read_slot(i)? {
                if rec.status == Status::Pending {
                    return Ok(Some((i, rec)));
                }
            }
        }
        Ok(None)
    }

    /// Overwrites the status byte of `slot[index]` and commits. Idempotent:
    /// calling this twice with the same status leaves the slot unchanged
    /// after the first call.
    pub fn update_status(&mut self, index: usize, status: Status) -> Result<(), ArchiveError> {
        if index >= self.capacity {
            return Err(ArchiveError::OutOfRange(index));
        }
        let offset = self.slot_offset(index) + crate::record::RECORD_SIZE;
        self.store.write(offset, &[status as u8])?;
        self.store.commit()
    }

    /// Emits every syntactically valid slot, in index order. A
    /// zero-initialized, never-written slot is valid and will be emitted
    /// with `status = Pending`.
    pub fn dump_all(&self) -> Result<Vec<(usize, Record)>, ArchiveError> {
        let mut out = Vec::with_capacity(self.capacity);
        for i in 0..self.capacity {
            if let Some(rec) = self.read_slot(i)? {
                out.push((i, rec));
            }
        }
        Ok(out)
    }
}

/// Convenience constructor: a fresh in-memory archive of the default size.
pub fn in_memory_archive(store_bytes: usize) -> Archive<Vec<u8>> {
    Archive::new(vec![0u8; store_bytes])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(cow_id: u32) -> Record {
        Record::new(1, cow_id, 100, 2.0, 0.0)
    }

    #[test]
    fn add_then_next_pending_returns_it() {
        let mut archive = in_memory_archive(ARCHIVE_SLOT_SIZE * 4);
        let idx = archive.add(rec(1)).unwrap();
        let (found_idx, found) = archive.next_pending().unwrap().unwrap();
        assert_eq!(found_idx, idx);
        assert_eq!(found.cow_id, 1);
    }

    #[test]
    fn sent_slot_is_not_returned_again() {
        let mut archive = in_memory_archive(ARCHIVE_SLOT_SIZE * 4);
        let idx = archive.add(rec(1)).unwrap();
        archive.update_status(idx, Status::Sent).unwrap();
        assert!(archive.next_pending().unwrap().is_none());
    }

    #[test]
    fn update_status_is_idempotent() {
        let mut archive = in_memory_archive(ARCHIVE_SLOT_SIZE * 4);
        let idx = archive.add(rec(1)).unwrap();
        archive.update_status(idx, Status::Sent).unwrap();
        archive.update_status(idx, Status::Sent).unwrap();
        let dumped = archive.dump_all().unwrap();
        assert_eq!(dumped[idx].1.status, Status::Sent);
    }

    #[test]
    fn wraparound_overwrites_oldest_regardless_of_status() {
        // Scaled down from a production-sized archive for test speed.
        let capacity = 5;
        let mut archive = in_memory_archive(ARCHIVE_SLOT_SIZE * capacity);
        for n in 1..=(capacity as u32 + 1) {
            archive.add(rec(n)).unwrap();
        }
        let dumped = archive.dump_all().unwrap();
        let cow_ids: Vec<u32> = dumped.iter().map(|(_, r)| r.cow_id).collect();
        // record 1 (cow_id=1) was overwritten by record 6 (cow_id=6).
        assert!(!cow_ids.contains(&1));
        assert!(cow_ids.contains(&6));
    }

    #[test]
    fn overwriting_a_pending_slot_counts_the_loss() {
        let mut archive = in_memory_archive(ARCHIVE_SLOT_SIZE * 1);
        archive.add(rec(1)).unwrap();
        assert_eq!(archive.overwritten_pending_count(), 0);
        archive.add(rec(2)).unwrap(); // overwrites the still-pending slot 0
        assert_eq!(archive.overwritten_pending_count(), 1);
    }

    #[test]
    fn mqtt_drain_under_intermittent_loss() {
        // 3 pending records; broker unreachable for 2 intervals, reachable
        // on the 3rd, repeated.
        let mut archive = in_memory_archive(ARCHIVE_SLOT_SIZE * 8);
        for n in 1..=3 {
            archive.add(rec(n)).unwrap();
        }
        let mut published = 0;
        for interval in 1..=8 {
            let broker_up = interval % 3 == 0;
            if !broker_up {
                continue;
            }
            if let Some((idx, _)) = archive.next_pending().unwrap() {
                archive.update_status(idx, Status::Sent).unwrap();
                published += 1;
            }
        }
        assert_eq!(published, 3);
        assert!(archive.next_pending().unwrap().is_none());
    }
}
