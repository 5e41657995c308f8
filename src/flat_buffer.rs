//! Append-only flat buffer.
//!
//! Holds up to `buffer_capacity` live vectors, contiguously, so every slot
//! can be handed to a distance kernel without a copy. Brute-force search
//! uses a bounded max-heap of size `k` with early-exit pruning once the heap
//! is full and the candidate can't possibly improve it.

use crate::distance;
use crate::error::{OmenError, Result};
use crate::types::InternalIndex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Live,
    Migrated,
    Tombstoned,
}

struct Slot {
    internal_index: InternalIndex,
    state: SlotState,
    /// Set while a drain batch has claimed this slot but not yet confirmed
    /// migration; excludes it from being drained twice, but it is still
    /// fully searchable.
    in_flight: bool,
}

/// Append-only, brute-force-searchable region for not-yet-indexed vectors.
pub struct FlatBuffer {
    dimension: usize,
    capacity: usize,
    data: Vec<f32>,
    slots: Vec<Slot>,
}

impl FlatBuffer {
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            capacity,
            data: Vec::with_capacity(capacity * dimension),
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != SlotState::Tombstoned)
            .count()
    }

    pub fn unmigrated_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Live && !s.in_flight)
            .count()
    }

    /// Appends a vector, returning its slot index. Errors with `BufferFull`
    /// once `capacity` live vectors have been appended.
    pub fn append(&mut self, internal_index: InternalIndex, vec: &[f32]) -> Result<usize> {
        debug_assert_eq!(vec.len(), self.dimension);
        if self.slots.len() >= self.capacity {
            return Err(OmenError::BufferFull);
        }
        let slot = self.slots.len();
        self.data.extend_from_slice(vec);
        self.slots.push(Slot {
            internal_index,
            state: SlotState::Live,
            in_flight: false,
        });
        Ok(slot)
    }

    pub fn get(&self, slot: usize) -> &[f32] {
        let start = slot * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub fn internal_index(&self, slot: usize) -> InternalIndex {
        self.slots[slot].internal_index
    }

    pub fn mark_migrated(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.state = SlotState::Migrated;
        s.in_flight = false;
    }

    pub fn tombstone(&mut self, slot: usize) {
        self.slots[slot].state = SlotState::Tombstoned;
    }

    /// Returns up to `batch_size` not-yet-migrated slots in insertion order,
    /// marking them in-flight so concurrent drain calls don't double-claim
    /// them. The caller marks them migrated once the graph insert succeeds.
    pub fn drain_unmigrated(&mut self, batch_size: usize) -> Vec<(usize, InternalIndex, Vec<f32>)> {
        let mut out = Vec::with_capacity(batch_size.min(self.slots.len()));
        for slot in 0..self.slots.len() {
            if out.len() >= batch_size {
                break;
            }
            if self.slots[slot].state == SlotState::Live && !self.slots[slot].in_flight {
                self.slots[slot].in_flight = true;
                out.push((slot, self.slots[slot].internal_index, self.get(slot).to_vec()));
            }
        }
        out
    }

    /// Releases the in-flight claim without marking migrated (e.g. the
    /// background worker was cancelled mid-batch).
    pub fn release_in_flight(&mut self, slot: usize) {
        self.slots[slot].in_flight = false;
    }

    /// Every live, not-yet-migrated vector, without claiming it in-flight —
    /// used by snapshotting, which only reads the buffer's current contents.
    pub fn unmigrated_entries(&self) -> Vec<(InternalIndex, Vec<f32>)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::Live)
            .map(|(slot, s)| (s.internal_index, self.get(slot).to_vec()))
            .collect()
    }

    /// Brute-force top-k search with a bounded max-heap. Ties broken by
    /// lower internal index.
    pub fn search_topk(&self, query: &[f32], k: usize, filter_unindexed: bool) -> Vec<(InternalIndex, f32)> {
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k + 1);
        for (slot, s) in self.slots.iter().enumerate() {
            if s.state == SlotState::Tombstoned {
                continue;
            }
            if filter_unindexed && s.state != SlotState::Live {
                continue;
            }
            let dist = distance::l2_sq(query, self.get(slot));
            let entry = HeapEntry {
                dist,
                internal_index: s.internal_index,
            };
            if heap.len() < k {
                heap.push(entry);
            } else if let Some(worst) = heap.peek() {
                if entry < *worst {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }
        heap.into_sorted_vec().into_iter().map(|e| (e.internal_index, e.dist)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    dist: f32,
    internal_index: InternalIndex,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.internal_index == other.internal_index
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// Max-heap ordering by distance (farthest on top, so `peek`/`pop` evict
    /// the worst candidate first); ties broken by *higher* internal index on
    /// top so that, among equal distances, the lower internal index survives
    /// eviction.
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.internal_index.cmp(&other.internal_index))
    }
}
