//! Pass-local scratch memory.
//!
//! Passes often need short-lived per-instruction or per-block bookkeeping
//! ("already visited", "already paired"). Instead of every pass allocating its
//! own side tables, the graph owns a [`LocalArena`] of marker slots. A pass
//! takes a [`Marker`], sets and queries marks through the graph, and never
//! frees anything: the pass manager resets the arena after every pass, which
//! releases all marks at once and bumps the arena epoch. A marker kept past
//! that point is stale; queries through it answer "not marked" and attempts to
//! set marks through it fail.
//!
//! ```text
//! pass A ──new_marker()──► Marker{slot 0, epoch 3} ──mark/is_marked──┐
//!                                                                   │
//! PassManager::run_pass ── graph.local_mut().reset() ── epoch 4 ◄───┘
//!
//! pass B ──new_marker()──► Marker{slot 0, epoch 4}
//! ```

use crate::{utils::BitSet, Error, Result};

/// Hard upper bound on simultaneously live markers.
pub const MAX_MARKERS: u8 = 64;

/// Handle to one marker slot of the pass-local arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    slot: u8,
    epoch: u64,
}

impl Marker {
    /// Slot index.
    #[must_use]
    pub const fn slot(self) -> u8 {
        self.slot
    }

    /// Arena epoch the marker was allocated in.
    #[must_use]
    pub const fn epoch(self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, Default)]
struct MarkSlot {
    insts: BitSet,
    blocks: BitSet,
}

/// Marker storage owned by a graph and reset between passes.
#[derive(Debug, Clone)]
pub struct LocalArena {
    epoch: u64,
    limit: u8,
    in_use: u64,
    slots: Vec<MarkSlot>,
    resets: u64,
}

impl Default for LocalArena {
    fn default() -> Self {
        Self::new(MAX_MARKERS)
    }
}

impl LocalArena {
    /// Creates an empty arena allowing at most `limit` live markers (capped at 64).
    #[must_use]
    pub fn new(limit: u8) -> Self {
        LocalArena {
            epoch: 0,
            limit: limit.min(MAX_MARKERS),
            in_use: 0,
            slots: Vec::new(),
            resets: 0,
        }
    }

    /// Changes the marker limit. Takes effect for later allocations.
    pub fn set_limit(&mut self, limit: u8) {
        self.limit = limit.min(MAX_MARKERS);
    }

    /// Current epoch. Incremented by every [`LocalArena::reset`].
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of resets performed so far.
    #[must_use]
    pub const fn resets(&self) -> u64 {
        self.resets
    }

    /// Number of markers currently allocated.
    #[must_use]
    pub const fn live_markers(&self) -> u32 {
        self.in_use.count_ones()
    }

    /// Bytes currently held by mark storage.
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.slots
            .iter()
            .map(|s| s.insts.heap_bytes() + s.blocks.heap_bytes())
            .sum()
    }

    /// Allocates a fresh marker with no marks set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkerExhausted`] if every allowed slot is taken.
    pub fn new_marker(&mut self) -> Result<Marker> {
        let slot = (0..self.limit)
            .find(|&s| self.in_use & (1u64 << s) == 0)
            .ok_or(Error::MarkerExhausted)?;
        self.in_use |= 1u64 << slot;
        let idx = usize::from(slot);
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, MarkSlot::default);
        }
        self.slots[idx].insts.clear();
        self.slots[idx].blocks.clear();
        Ok(Marker {
            slot,
            epoch: self.epoch,
        })
    }

    /// Returns a marker's slot to the pool before the end of the pass.
    pub fn release_marker(&mut self, marker: Marker) {
        if self.is_live(marker) {
            self.in_use &= !(1u64 << marker.slot);
        }
    }

    /// Returns `true` if `marker` was allocated in the current epoch and not released.
    #[must_use]
    pub const fn is_live(&self, marker: Marker) -> bool {
        marker.epoch == self.epoch && self.in_use & (1u64 << marker.slot) != 0
    }

    pub(crate) fn set_inst(&mut self, marker: Marker, index: usize) -> Result<bool> {
        let slot = self.live_slot(marker)?;
        Ok(self.slots[slot].insts.insert(index))
    }

    pub(crate) fn clear_inst(&mut self, marker: Marker, index: usize) -> Result<bool> {
        let slot = self.live_slot(marker)?;
        Ok(self.slots[slot].insts.remove(index))
    }

    pub(crate) fn set_block(&mut self, marker: Marker, index: usize) -> Result<bool> {
        let slot = self.live_slot(marker)?;
        Ok(self.slots[slot].blocks.insert(index))
    }

    pub(crate) fn has_inst(&self, marker: Marker, index: usize) -> bool {
        self.is_live(marker) && self.slots[usize::from(marker.slot)].insts.contains(index)
    }

    pub(crate) fn has_block(&self, marker: Marker, index: usize) -> bool {
        self.is_live(marker) && self.slots[usize::from(marker.slot)].blocks.contains(index)
    }

    /// Releases every marker and all mark storage.
    ///
    /// Returns the number of bytes released.
    pub fn reset(&mut self) -> usize {
        let released = self.bytes_in_use();
        self.slots = Vec::new();
        self.in_use = 0;
        self.epoch += 1;
        self.resets += 1;
        released
    }

    fn live_slot(&self, marker: Marker) -> Result<usize> {
        if self.is_live(marker) {
            Ok(usize::from(marker.slot))
        } else {
            Err(Error::InvalidId(format!(
                "stale marker (slot {}, epoch {} vs {})",
                marker.slot, marker.epoch, self.epoch
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_allocation_and_release() {
        let mut arena = LocalArena::new(2);
        let a = arena.new_marker().unwrap();
        let b = arena.new_marker().unwrap();
        assert_ne!(a.slot(), b.slot());
        assert!(matches!(arena.new_marker(), Err(Error::MarkerExhausted)));
        arena.release_marker(a);
        assert!(arena.new_marker().is_ok());
    }

    #[test]
    fn test_marks_are_per_marker() {
        let mut arena = LocalArena::default();
        let a = arena.new_marker().unwrap();
        let b = arena.new_marker().unwrap();
        assert!(arena.set_inst(a, 5).unwrap());
        assert!(!arena.set_inst(a, 5).unwrap());
        assert!(arena.has_inst(a, 5));
        assert!(!arena.has_inst(b, 5));
        assert!(arena.set_block(b, 1).unwrap());
        assert!(arena.has_block(b, 1));
        assert!(!arena.has_block(a, 1));
    }

    #[test]
    fn test_reset_invalidates_markers() {
        let mut arena = LocalArena::default();
        let m = arena.new_marker().unwrap();
        arena.set_inst(m, 1000).unwrap();
        assert!(arena.bytes_in_use() > 0);

        let released = arena.reset();
        assert!(released > 0);
        assert_eq!(arena.bytes_in_use(), 0);
        assert_eq!(arena.live_markers(), 0);
        assert!(!arena.has_inst(m, 1000));
        assert!(arena.set_inst(m, 1).is_err());

        let fresh = arena.new_marker().unwrap();
        assert_eq!(fresh.slot(), m.slot());
        assert!(!arena.has_inst(fresh, 1000));
    }
}
