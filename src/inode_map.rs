// src/inode_map.rs
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use crate::error::{LfsError, Result};
use crate::layout::ROOT_INO;

// -----------------------------------------------------------------------------
// Inode map: id -> latest serialized record
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InodeMap {
    entries: RwLock<HashMap<u32, Vec<u8>>>,
}

impl InodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the map from records read at mount.
    pub fn from_records(records: impl IntoIterator<Item = (u32, Vec<u8>)>) -> Self {
        Self {
            entries: RwLock::new(records.into_iter().collect()),
        }
    }

    /// Replaces the entry for `id`. Last call to complete wins.
    pub fn update(&self, id: u32, record: Vec<u8>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, record);
    }

    pub fn lookup(&self, id: u32) -> Result<Vec<u8>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(LfsError::NotFound(id))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of every entry, ordered by id.
    pub fn snapshot(&self) -> Vec<(u32, Vec<u8>)> {
        let mut all: Vec<(u32, Vec<u8>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn max_id(&self) -> Option<u32> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .max()
    }
}

// -----------------------------------------------------------------------------
// Inode id pool
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct InodeIdPool {
    next: Mutex<u32>,
}

impl InodeIdPool {
    /// Pool for a fresh image: the first id handed out follows the root.
    pub fn fresh() -> Self {
        Self::starting_at(ROOT_INO + 1)
    }

    /// Resumes a pool persisted at `next`; never hands out the root id.
    pub fn starting_at(next: u32) -> Self {
        Self {
            next: Mutex::new(next.max(ROOT_INO + 1)),
        }
    }

    pub fn allocate(&self) -> Result<u32> {
        self.allocate_with(|_| Ok(()))
    }

    /// Hands out the next id only if `admit` accepts it. A refused id is
    /// offered again by the next call.
    pub fn allocate_with(&self, admit: impl FnOnce(u32) -> Result<()>) -> Result<u32> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        let after = id
            .checked_add(1)
            .ok_or(LfsError::NoSpace("inode ids exhausted"))?;
        admit(id)?;
        *next = after;
        Ok(id)
    }

    /// Id the next `allocate` will return.
    pub fn peek(&self) -> u32 {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn lookup_of_unknown_id_is_not_found() {
        let map = InodeMap::new();
        map.update(2, vec![1, 2, 3]);
        assert_eq!(map.lookup(2).unwrap(), vec![1, 2, 3]);
        assert!(matches!(map.lookup(3), Err(LfsError::NotFound(3))));
    }

    #[test]
    fn update_replaces_previous_record() {
        let map = InodeMap::new();
        map.update(5, vec![0]);
        map.update(5, vec![9, 9]);
        assert_eq!(map.lookup(5).unwrap(), vec![9, 9]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let map = InodeMap::from_records(vec![(7, vec![7]), (1, vec![1]), (3, vec![3])]);
        let ids: Vec<u32> = map.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3, 7]);
        assert_eq!(map.max_id(), Some(7));
    }

    #[test]
    fn concurrent_updates_to_distinct_ids_all_land() {
        let map = Arc::new(InodeMap::new());
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..100u32 {
                        map.update(t * 100 + i, vec![t as u8]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 800);
        assert_eq!(map.lookup(799).unwrap(), vec![7]);
    }

    #[test]
    fn pool_skips_root_and_counts_up() {
        let pool = InodeIdPool::fresh();
        assert_eq!(pool.allocate().unwrap(), 2);
        assert_eq!(pool.allocate().unwrap(), 3);
        assert_eq!(pool.peek(), 4);

        assert_eq!(InodeIdPool::starting_at(0).peek(), 2);
    }

    #[test]
    fn refused_id_is_offered_again() {
        let pool = InodeIdPool::fresh();
        let err = pool
            .allocate_with(|_| Err(LfsError::NoSpace("full")))
            .unwrap_err();
        assert!(matches!(err, LfsError::NoSpace("full")));
        let mut offered = None;
        let id = pool
            .allocate_with(|id| {
                offered = Some(id);
                Ok(())
            })
            .unwrap();
        assert_eq!((id, offered), (2, Some(2)));
    }

    #[test]
    fn pool_reports_exhaustion() {
        let pool = InodeIdPool::starting_at(u32::MAX);
        assert!(matches!(pool.allocate(), Err(LfsError::NoSpace(_))));
    }

    #[test]
    fn concurrent_allocation_is_gapless_and_unique() {
        let pool = Arc::new(InodeIdPool::fresh());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || (0..50).map(|_| pool.allocate().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let ids: HashSet<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 800);
        assert_eq!(ids, (2..802).collect());
    }
}
