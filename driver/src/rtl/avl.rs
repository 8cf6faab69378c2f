//! AVL Generic Table
//!
//! Ordered table in the style of NT's `RTL_AVL_TABLE`, used for the
//! per-volume file lookup indices.
//!
//! # Properties
//!
//! - O(log n) insert, delete, lookup
//! - Heights of subtrees differ by at most 1
//! - Automatic rebalancing on insert/delete
//!
//! # Caller-Supplied Element Storage
//!
//! NT file systems hand the table a pre-allocated element through the
//! table's allocate routine so that insertion cannot fail for lack of
//! memory while locks are held. The same contract holds here: every
//! insertion consumes an [`ElementStorage`] allocated by the caller ahead
//! of time, and every deletion hands that storage back. The table itself
//! never allocates or frees.
//!
//! Lookups that do not compare against a stored key, such as "first entry
//! in a subtree", go through [`AvlTable::seek_by`], which takes a probe
//! closure instead of a key.

use alloc::boxed::Box;
use core::cmp::Ordering;

/// Key comparison routine
pub type AvlCompare<K> = fn(&K, &K) -> Ordering;

type Link<K, V> = Option<Box<AvlElement<K, V>>>;

/// Table element
///
/// Equivalent to the RTL_BALANCED_LINKS header plus user data.
pub struct AvlElement<K, V> {
    key: K,
    value: Option<V>,
    height: u8,
    left: Link<K, V>,
    right: Link<K, V>,
}

impl<K, V> AvlElement<K, V> {
    #[inline]
    fn height(link: &Link<K, V>) -> i32 {
        link.as_ref().map_or(0, |e| e.height as i32)
    }

    fn update_height(&mut self) {
        let height = 1 + core::cmp::max(Self::height(&self.left), Self::height(&self.right));
        self.height = height as u8;
    }

    /// Left height minus right height
    fn balance(&self) -> i32 {
        Self::height(&self.left) - Self::height(&self.right)
    }
}

/// Pre-allocated storage for one table element
pub struct ElementStorage<K, V>(Box<AvlElement<K, V>>);

impl<K: Default, V> ElementStorage<K, V> {
    /// Allocate storage for one element
    pub fn new() -> Self {
        Self(Box::new(AvlElement {
            key: K::default(),
            value: None,
            height: 1,
            left: None,
            right: None,
        }))
    }
}

impl<K: Default, V> Default for ElementStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ElementStorage<K, V> {
    /// Key last stored in this element
    pub fn key(&self) -> &K {
        &self.0.key
    }
}

/// AVL table
pub struct AvlTable<K, V> {
    root: Link<K, V>,
    count: usize,
    compare: AvlCompare<K>,
}

impl<K, V> AvlTable<K, V> {
    /// Create an empty table
    pub const fn new(compare: AvlCompare<K>) -> Self {
        Self {
            root: None,
            count: 0,
            compare,
        }
    }

    /// Check if table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of elements (RtlNumberGenericTableElementsAvl)
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Comparison routine
    #[inline]
    pub fn compare_routine(&self) -> AvlCompare<K> {
        self.compare
    }

    /// Insert an element (RtlInsertElementGenericTableAvl)
    ///
    /// On success the storage becomes part of the table. If an element with
    /// an equal key exists the table is unchanged and the value and storage
    /// are returned to the caller.
    pub fn insert(
        &mut self,
        key: K,
        value: V,
        storage: ElementStorage<K, V>,
    ) -> Result<(), (V, ElementStorage<K, V>)> {
        let mut element = storage.0;
        element.key = key;
        element.value = None;
        element.height = 1;
        element.left = None;
        element.right = None;

        match Self::insert_node(&mut self.root, element, value, self.compare) {
            Ok(()) => {
                self.count += 1;
                Ok(())
            }
            Err((element, value)) => Err((value, ElementStorage(element))),
        }
    }

    fn insert_node(
        link: &mut Link<K, V>,
        mut element: Box<AvlElement<K, V>>,
        value: V,
        compare: AvlCompare<K>,
    ) -> Result<(), (Box<AvlElement<K, V>>, V)> {
        let current = match link.as_mut() {
            Some(current) => current,
            None => {
                element.value = Some(value);
                *link = Some(element);
                return Ok(());
            }
        };

        let result = match compare(&element.key, &current.key) {
            Ordering::Less => Self::insert_node(&mut current.left, element, value, compare),
            Ordering::Greater => Self::insert_node(&mut current.right, element, value, compare),
            Ordering::Equal => return Err((element, value)),
        };

        if result.is_ok() {
            Self::rebalance(link);
        }
        result
    }

    /// Find an element by key (RtlLookupElementGenericTableAvl)
    pub fn lookup(&self, key: &K) -> Option<&V> {
        let compare = self.compare;
        self.lookup_by(|k| compare(k, key))
    }

    /// Find the element a probe reports `Equal` for
    ///
    /// `probe(key)` orders a stored key relative to the one sought and must
    /// agree with the table's comparison routine.
    pub fn lookup_by<F>(&self, probe: F) -> Option<&V>
    where
        F: Fn(&K) -> Ordering,
    {
        let mut node = self.root.as_deref();

        while let Some(current) = node {
            match probe(&current.key) {
                Ordering::Greater => node = current.left.as_deref(),
                Ordering::Less => node = current.right.as_deref(),
                Ordering::Equal => return current.value.as_ref(),
            }
        }

        None
    }

    /// Delete an element (RtlDeleteElementGenericTableAvl)
    ///
    /// Returns the value and its element storage, or None if no element
    /// has an equal key.
    pub fn delete(&mut self, key: &K) -> Option<(V, ElementStorage<K, V>)> {
        let compare = self.compare;
        self.delete_by(|k| compare(k, key))
    }

    /// Delete the element a probe reports `Equal` for
    ///
    /// The probe follows the same convention as [`AvlTable::lookup_by`].
    pub fn delete_by<F>(&mut self, probe: F) -> Option<(V, ElementStorage<K, V>)>
    where
        F: Fn(&K) -> Ordering,
    {
        let mut element = Self::delete_node(&mut self.root, &probe)?;
        self.count -= 1;

        element.height = 1;
        let value = element.value.take()?;
        Some((value, ElementStorage(element)))
    }

    fn delete_node<F>(link: &mut Link<K, V>, probe: &F) -> Option<Box<AvlElement<K, V>>>
    where
        F: Fn(&K) -> Ordering,
    {
        let current = link.as_mut()?;

        let removed = match probe(&current.key) {
            Ordering::Greater => Self::delete_node(&mut current.left, probe),
            Ordering::Less => Self::delete_node(&mut current.right, probe),
            Ordering::Equal => {
                let mut element = link.take()?;
                match (element.left.take(), element.right.take()) {
                    (None, None) => {}
                    (Some(left), None) => *link = Some(left),
                    (None, Some(right)) => *link = Some(right),
                    (Some(left), Some(right)) => {
                        let mut right = Some(right);
                        if let Some(mut successor) = Self::take_min(&mut right) {
                            successor.left = Some(left);
                            successor.right = right;
                            *link = Some(successor);
                        }
                    }
                }
                Some(element)
            }
        };

        if removed.is_some() {
            Self::rebalance(link);
        }
        removed
    }

    /// Detach the leftmost element of a subtree
    fn take_min(link: &mut Link<K, V>) -> Option<Box<AvlElement<K, V>>> {
        let has_left = link.as_ref()?.left.is_some();

        if has_left {
            let current = link.as_mut()?;
            let min = Self::take_min(&mut current.left);
            Self::rebalance(link);
            min
        } else {
            let mut element = link.take()?;
            *link = element.right.take();
            Some(element)
        }
    }

    fn rebalance(link: &mut Link<K, V>) {
        let rotation = match link.as_mut() {
            Some(node) => {
                node.update_height();
                let balance = node.balance();

                if balance > 1 {
                    if node.left.as_ref().map_or(0, |l| l.balance()) < 0 {
                        Self::rotate_left(&mut node.left);
                    }
                    Some(Ordering::Greater)
                } else if balance < -1 {
                    if node.right.as_ref().map_or(0, |r| r.balance()) > 0 {
                        Self::rotate_right(&mut node.right);
                    }
                    Some(Ordering::Less)
                } else {
                    None
                }
            }
            None => None,
        };

        match rotation {
            Some(Ordering::Greater) => Self::rotate_right(link),
            Some(Ordering::Less) => Self::rotate_left(link),
            _ => {}
        }
    }

    fn rotate_left(link: &mut Link<K, V>) {
        if let Some(mut node) = link.take() {
            match node.right.take() {
                Some(mut pivot) => {
                    node.right = pivot.left.take();
                    node.update_height();
                    pivot.left = Some(node);
                    pivot.update_height();
                    *link = Some(pivot);
                }
                None => *link = Some(node),
            }
        }
    }

    fn rotate_right(link: &mut Link<K, V>) {
        if let Some(mut node) = link.take() {
            match node.left.take() {
                Some(mut pivot) => {
                    node.left = pivot.right.take();
                    node.update_height();
                    pivot.right = Some(node);
                    pivot.update_height();
                    *link = Some(pivot);
                }
                None => *link = Some(node),
            }
        }
    }

    /// First element not ordered before the probe
    ///
    /// `probe(key)` orders a stored key relative to the position sought.
    /// With `inclusive` the first key probing `Equal` or `Greater` is
    /// returned, otherwise the first probing `Greater`.
    pub fn seek_by<F>(&self, probe: F, inclusive: bool) -> Option<(&K, &V)>
    where
        F: Fn(&K) -> Ordering,
    {
        let mut candidate = None;
        let mut node = self.root.as_deref();

        while let Some(current) = node {
            let ordering = probe(&current.key);
            if ordering == Ordering::Greater || (inclusive && ordering == Ordering::Equal) {
                candidate = Some(current);
                node = current.left.as_deref();
            } else {
                node = current.right.as_deref();
            }
        }

        candidate.and_then(|e| e.value.as_ref().map(|v| (&e.key, v)))
    }

    /// First element with key `>= key` (or `> key` if not inclusive)
    pub fn seek(&self, key: &K, inclusive: bool) -> Option<(&K, &V)> {
        let compare = self.compare;
        self.seek_by(|k| compare(k, key), inclusive)
    }

    /// First element in key order
    pub fn first(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_deref()?;
        while let Some(left) = node.left.as_deref() {
            node = left;
        }
        node.value.as_ref().map(|v| (&node.key, v))
    }

    /// Iterate in key order (RtlEnumerateGenericTableAvl)
    ///
    /// Each step re-seeks from the previous key, so iteration does not
    /// allocate.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            table: self,
            next: self.first(),
        }
    }

    /// Move all elements out, leaving this table empty
    pub fn take(&mut self) -> Self {
        Self {
            root: self.root.take(),
            count: core::mem::replace(&mut self.count, 0),
            compare: self.compare,
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) -> usize {
        fn walk<K, V>(link: &Link<K, V>, compare: AvlCompare<K>, count: &mut usize) -> i32 {
            match link {
                None => 0,
                Some(e) => {
                    *count += 1;
                    if let Some(l) = &e.left {
                        assert_eq!(compare(&l.key, &e.key), Ordering::Less);
                    }
                    if let Some(r) = &e.right {
                        assert_eq!(compare(&r.key, &e.key), Ordering::Greater);
                    }
                    let lh = walk(&e.left, compare, count);
                    let rh = walk(&e.right, compare, count);
                    assert!((lh - rh).abs() <= 1, "unbalanced subtree");
                    assert_eq!(e.height as i32, 1 + lh.max(rh));
                    1 + lh.max(rh)
                }
            }
        }

        let mut count = 0;
        walk(&self.root, self.compare, &mut count);
        assert_eq!(count, self.count);
        count
    }
}

/// In-order iterator over an [`AvlTable`]
pub struct Iter<'a, K, V> {
    table: &'a AvlTable<K, V>,
    next: Option<(&'a K, &'a V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.table.seek(current.0, false);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn compare_u64(a: &u64, b: &u64) -> Ordering {
        a.cmp(b)
    }

    fn table_with(keys: &[u64]) -> AvlTable<u64, u64> {
        let mut table = AvlTable::new(compare_u64);
        for &key in keys {
            assert!(table.insert(key, key * 10, ElementStorage::new()).is_ok());
        }
        table
    }

    #[test]
    fn test_basic_insert_lookup() {
        let table = table_with(&[50, 30, 70, 20, 40, 60, 80]);
        assert_eq!(table.count(), 7);
        assert_eq!(table.lookup(&40), Some(&400));
        assert_eq!(table.lookup(&45), None);
        table.check_invariants();
    }

    #[test]
    fn test_duplicate_returns_storage() {
        let mut table = table_with(&[1, 2, 3]);
        match table.insert(2, 99, ElementStorage::new()) {
            Err((value, storage)) => {
                assert_eq!(value, 99);
                assert_eq!(*storage.key(), 2);
            }
            Ok(()) => panic!("duplicate key inserted"),
        }
        assert_eq!(table.lookup(&2), Some(&20));
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn test_iteration() {
        let table = table_with(&[5, 3, 8, 1, 4, 7, 9, 2, 6]);
        let keys: Vec<u64> = table.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequential_insert_stays_balanced() {
        let keys: Vec<u64> = (0..1000).collect();
        let table = table_with(&keys);
        assert_eq!(table.check_invariants(), 1000);
        assert!(table.root.as_ref().map_or(0, |r| r.height) <= 15);
    }

    #[test]
    fn test_delete() {
        let mut table = table_with(&[50, 30, 70, 20, 40, 60, 80, 35, 45]);

        let (value, storage) = table.delete(&30).unwrap();
        assert_eq!(value, 300);
        assert_eq!(*storage.key(), 30);
        assert!(table.delete(&30).is_none());
        table.check_invariants();

        // Root with two children
        assert!(table.delete(&50).is_some());
        table.check_invariants();

        let keys: Vec<u64> = table.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, [20, 35, 40, 45, 60, 70, 80]);

        // Storage can be reused for a new element
        let (_, storage) = table.delete(&80).unwrap();
        assert!(table.insert(81, 810, storage).is_ok());
        assert_eq!(table.lookup(&81), Some(&810));
        table.check_invariants();
    }

    #[test]
    fn test_delete_everything_in_mixed_order() {
        let keys: Vec<u64> = (0..200).map(|i| (i * 37) % 200).collect();
        let mut table = table_with(&keys);

        for (n, i) in (0..200u64).rev().enumerate() {
            let key = (i * 53) % 200;
            assert!(table.delete(&key).is_some());
            if n % 17 == 0 {
                table.check_invariants();
            }
        }
        assert!(table.is_empty());
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_seek() {
        let table = table_with(&[10, 20, 30]);
        assert_eq!(table.seek(&20, true).map(|(k, _)| *k), Some(20));
        assert_eq!(table.seek(&20, false).map(|(k, _)| *k), Some(30));
        assert_eq!(table.seek(&15, false).map(|(k, _)| *k), Some(20));
        assert_eq!(table.seek(&30, false), None);
        assert_eq!(table.seek_by(|k| k.cmp(&0), true).map(|(k, _)| *k), Some(10));
    }

    #[test]
    fn test_probe_lookup_and_delete() {
        let mut table = table_with(&[10, 20, 30]);
        assert_eq!(table.lookup_by(|k| k.cmp(&20)), Some(&200));
        assert_eq!(table.lookup_by(|k| k.cmp(&25)), None);

        let (value, _) = table.delete_by(|k| k.cmp(&30)).unwrap();
        assert_eq!(value, 300);
        assert!(table.delete_by(|k| k.cmp(&30)).is_none());
        table.check_invariants();
    }

    #[test]
    fn test_take() {
        let mut table = table_with(&[1, 2, 3]);
        let taken = table.take();
        assert!(table.is_empty());
        assert_eq!(taken.count(), 3);
        assert_eq!(taken.lookup(&2), Some(&20));
    }
}
