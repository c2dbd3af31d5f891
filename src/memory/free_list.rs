//! Tag-keyed free list of cached device blocks
//!
//! A flat slot array with linear scans. Occupancy (`len`) is tracked apart
//! from capacity; when every slot is taken the array doubles.

use crate::memory::Tag;

/// Initial slot count of a new free list
pub const INITIAL_CAPACITY: usize = 30;

/// A cached block waiting for reuse
#[derive(Debug, Clone, PartialEq)]
pub struct FreeListEntry<H> {
    /// Block size in bytes as allocated from the driver
    pub size: usize,
    /// Role the block was released under
    pub tag: Tag,
    /// Driver handle
    pub handle: H,
}

/// Cache of released device blocks keyed by [`Tag`].
///
/// A slot is valid when it holds an entry. Invariants: `used` equals the
/// number of valid slots and no handle appears in two valid slots.
#[derive(Debug)]
pub struct FreeList<H> {
    slots: Vec<Option<FreeListEntry<H>>>,
    used: usize,
}

impl<H: Clone + PartialEq> Default for FreeList<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Clone + PartialEq> FreeList<H> {
    /// Create a free list with [`INITIAL_CAPACITY`] invalid slots
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        FreeList {
            slots: vec![None; capacity],
            used: 0,
        }
    }

    /// Number of valid entries
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of slots, valid or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total bytes held by valid entries
    pub fn cached_bytes(&self) -> usize {
        self.entries().map(|entry| entry.size).sum()
    }

    /// Iterate over valid entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = &FreeListEntry<H>> {
        self.slots.iter().flatten()
    }

    /// Cache `handle` under `tag`.
    ///
    /// Takes the first invalid slot, doubling the slot array if there is none.
    ///
    /// # Panics
    ///
    /// If `handle` is already cached; that means a block was freed twice.
    pub fn insert(&mut self, size: usize, handle: H, tag: Tag) {
        assert!(
            !self.entries().any(|entry| entry.handle == handle),
            "free list already holds this handle (double free under tag '{}')",
            tag
        );

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                let old_capacity = self.slots.len();
                let new_capacity = (old_capacity * 2).max(1);
                self.slots.resize(new_capacity, None);
                tracing::trace!(
                    "FreeList::insert: grew from {} to {} slots",
                    old_capacity,
                    new_capacity
                );
                old_capacity
            }
        };

        self.slots[slot] = Some(FreeListEntry { size, tag, handle });
        self.used += 1;
    }

    /// Take the cached block stored under `tag`, if any
    pub fn find(&mut self, tag: Tag) -> Option<(usize, H)> {
        let slot = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.tag == tag))?;
        self.take(slot)
    }

    /// Take any one cached block (eviction victim)
    pub fn find_first(&mut self) -> Option<(usize, H)> {
        let slot = self.slots.iter().position(Option::is_some)?;
        self.take(slot)
    }

    fn take(&mut self, slot: usize) -> Option<(usize, H)> {
        let entry = self.slots[slot].take()?;
        self.used -= 1;
        Some((entry.size, entry.handle))
    }

    /// Move valid entries to the front and shrink capacity to exactly `len()`.
    ///
    /// # Panics
    ///
    /// If the number of valid entries disagrees with the occupancy counter.
    pub fn pack(&mut self) {
        let before = self.slots.len();
        self.slots.retain(Option::is_some);
        assert_eq!(
            self.slots.len(),
            self.used,
            "free list corrupted: {} valid entries but used = {}",
            self.slots.len(),
            self.used
        );
        self.slots.shrink_to_fit();
        tracing::trace!("FreeList::pack: {} -> {} slots", before, self.slots.len());
    }

    /// Tear the list down.
    ///
    /// # Panics
    ///
    /// If blocks are still cached; they must be released to the driver first.
    pub fn destroy(self) {
        assert_eq!(
            self.used, 0,
            "destroying a free list that still caches {} blocks",
            self.used
        );
    }

    /// Check both invariants: occupancy matches valid slots, handles are unique
    pub fn is_consistent(&self) -> bool {
        let valid: Vec<&FreeListEntry<H>> = self.entries().collect();
        let unique = valid
            .iter()
            .enumerate()
            .all(|(i, a)| valid[i + 1..].iter().all(|b| a.handle != b.handle));
        valid.len() == self.used && unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: Tag = Tag::new("a");
    const B: Tag = Tag::new("b");

    #[test]
    fn test_new_list_is_empty() {
        let list: FreeList<u32> = FreeList::new();
        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert_eq!(list.capacity(), INITIAL_CAPACITY);
    }

    #[test]
    fn test_find_by_tag() {
        let mut list = FreeList::new();
        list.insert(64, 1u32, A);
        list.insert(128, 2u32, B);

        assert_eq!(list.find(B), Some((128, 2)));
        assert_eq!(list.len(), 1);
        assert_eq!(list.find(B), None);
        assert_eq!(list.find(A), Some((64, 1)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_find_first_takes_any_entry() {
        let mut list = FreeList::new();
        list.insert(8, 7u32, A);
        assert_eq!(list.find_first(), Some((8, 7)));
        assert_eq!(list.find_first(), None);
    }

    #[test]
    fn test_insert_doubles_capacity_when_full() {
        let mut list = FreeList::with_capacity(2);
        list.insert(8, 1u32, A);
        list.insert(8, 2u32, A);
        assert_eq!(list.capacity(), 2);
        list.insert(8, 3u32, B);
        assert_eq!(list.capacity(), 4);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_insert_reuses_invalid_slot() {
        let mut list = FreeList::with_capacity(2);
        list.insert(8, 1u32, A);
        list.insert(8, 2u32, B);
        list.find(A);
        list.insert(8, 3u32, A);
        assert_eq!(list.capacity(), 2);
    }

    #[test]
    fn test_pack_shrinks_to_used() {
        let mut list = FreeList::new();
        list.insert(8, 1u32, A);
        list.insert(16, 2u32, B);
        list.insert(32, 3u32, A);
        list.find(B);
        list.pack();

        assert_eq!(list.capacity(), 2);
        assert_eq!(list.cached_bytes(), 40);
        assert!(list.is_consistent());

        // a packed list still grows
        list.insert(8, 4u32, B);
        assert_eq!(list.capacity(), 4);
    }

    #[test]
    fn test_pack_empty_list_then_insert() {
        let mut list: FreeList<u32> = FreeList::new();
        list.pack();
        assert_eq!(list.capacity(), 0);
        list.insert(8, 1, A);
        assert_eq!(list.capacity(), 1);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_duplicate_handle_panics() {
        let mut list = FreeList::new();
        list.insert(8, 1u32, A);
        list.insert(8, 1u32, B);
    }

    #[test]
    #[should_panic(expected = "still caches")]
    fn test_destroy_non_empty_panics() {
        let mut list = FreeList::new();
        list.insert(8, 1u32, A);
        list.destroy();
    }

    #[test]
    fn test_destroy_empty_is_fine() {
        let mut list = FreeList::new();
        list.insert(8, 1u32, A);
        list.find_first();
        list.destroy();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize, u8),
        Find(u8),
        FindFirst,
        Pack,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..4096, 0u8..4).prop_map(|(size, tag)| Op::Insert(size, tag)),
            (0u8..4).prop_map(Op::Find),
            Just(Op::FindFirst),
            Just(Op::Pack),
        ]
    }

    const TAGS: [Tag; 4] = [Tag::new("t0"), Tag::new("t1"), Tag::new("t2"), Tag::new("t3")];

    proptest! {
        #[test]
        fn prop_free_list_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let mut list = FreeList::with_capacity(3);
            let mut next_handle = 0u64;
            let mut model_len = 0usize;

            for op in ops {
                match op {
                    Op::Insert(size, tag) => {
                        list.insert(size, next_handle, TAGS[tag as usize]);
                        next_handle += 1;
                        model_len += 1;
                    }
                    Op::Find(tag) => {
                        if list.find(TAGS[tag as usize]).is_some() {
                            model_len -= 1;
                        }
                    }
                    Op::FindFirst => {
                        if list.find_first().is_some() {
                            model_len -= 1;
                        }
                    }
                    Op::Pack => list.pack(),
                }
                prop_assert!(list.is_consistent());
                prop_assert_eq!(list.len(), model_len);
                prop_assert!(list.len() <= list.capacity());
            }
        }
    }
}
