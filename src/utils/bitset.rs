//! A growable bit vector keyed by dense ids.
//!
//! Block and instruction ids are allocated densely from zero, so per-entity
//! sets (loop bodies, reachability sets, pass-local marks) are stored as bit
//! vectors rather than hash sets. The set grows on insertion; queries beyond
//! the current length simply answer "not present".
//!
//! # Example
//!
//! ```rust,ignore
//! use midend::utils::BitSet;
//!
//! let mut set = BitSet::new(8);
//! set.insert(3);
//! set.insert(100); // grows
//!
//! assert!(set.contains(100));
//! assert!(!set.contains(4000));
//! assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 100]);
//! ```

/// A growable bit vector.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
}

impl BitSet {
    /// Creates a new empty bit set with room for `capacity` bits.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    /// Returns the number of bits the set can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * 64
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at `index`, growing the set if needed.
    ///
    /// Returns `true` if the bit was not set before.
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % 64);
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Clears the bit at `index`. Returns `true` if it was set.
    pub fn remove(&mut self, index: usize) -> bool {
        let Some(word) = self.words.get_mut(index / 64) else {
            return false;
        };
        let mask = 1u64 << (index % 64);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Returns `true` if the bit at `index` is set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits, keeping the allocation.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Number of bytes held by the backing storage.
    #[must_use]
    pub fn heap_bytes(&self) -> usize {
        self.words.capacity() * std::mem::size_of::<u64>()
    }

    /// Adds every bit of `other` to this set. Returns `true` if this set changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (dst, &src) in self.words.iter_mut().zip(&other.words) {
            let merged = *dst | src;
            changed |= merged != *dst;
            *dst = merged;
        }
        changed
    }

    /// Iterates over the indices of all set bits in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::default();
        for idx in iter {
            set.insert(idx);
        }
        set
    }
}

/// Iterator over set bits of a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}
