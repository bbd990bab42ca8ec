//! Bounded, content-addressed cache of game data blocks
//!
//! Both ends of a connection keep one of these per direction. Slots are
//! assigned round-robin: the n-th block ever added lands in slot
//! `n % capacity`, overwriting whatever was there. Because the assignment
//! only depends on the order of `add` calls, a peer that applies the same
//! sequence of additions ends up with identical slot contents and can
//! resolve a slot index back to its payload.

use crate::DataBlock;

#[derive(Debug, Clone)]
pub struct GameDataCache {
    slots: Vec<Option<DataBlock>>,
    /// Total number of blocks ever added.
    insertions: u64,
}

impl GameDataCache {
    /// Creates an empty cache with `capacity` slots.
    ///
    /// A zero capacity is rounded up to a single slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            insertions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        (self.insertions as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.insertions == 0
    }

    /// Stores `block` in the next slot and returns that slot's index.
    ///
    /// When every slot is taken the oldest block is evicted.
    pub fn add(&mut self, block: DataBlock) -> usize {
        let index = self.next_index();
        self.slots[index] = Some(block);
        self.insertions += 1;
        index
    }

    /// Index of the most recently added block equal to `block`.
    pub fn index_of(&self, block: &DataBlock) -> Option<usize> {
        let capacity = self.capacity();
        let newest = self.next_index() + capacity - 1;

        (0..self.len())
            .map(|age| (newest - age) % capacity)
            .find(|&index| self.slots[index].as_ref() == Some(block))
    }

    pub fn get(&self, index: usize) -> Option<&DataBlock> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// The slot the next `add` will write to.
    pub fn next_index(&self) -> usize {
        (self.insertions % self.capacity() as u64) as usize
    }
}

impl Default for GameDataCache {
    fn default() -> Self {
        Self::new(crate::CACHE_CAPACITY)
    }
}
