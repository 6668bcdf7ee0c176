//! Object: insertion-ordered, hash-indexed map from text keys to values.

use crate::digest::digest;
use crate::error::{infallible, CapacityError, InsertError};
use crate::guard::{UndoConstruct, UndoInsert};
use crate::storage::Storage;
use crate::table::{KeyValuePair, Table, MAX_SIZE};
use core::convert::Infallible;
use core::iter::FusedIterator;
use core::{cmp, fmt, mem, ops, slice};

/// A JSON object: unique text keys mapped to values, iterated in the order
/// the keys were first inserted.
///
/// Entries live in one block allocated from the object's `Storage`, in
/// insertion order, followed by the chain heads of a hash index over them.
/// Any call that grows the capacity moves every entry; the borrow checker
/// already rules out holding entry references across such a call.
pub struct Object<V> {
    pub(crate) table: Table<V>,
    storage: Storage,
}

impl<V> Object<V> {
    /// An empty object using the global allocator. Does not allocate.
    pub fn new() -> Self {
        Self::new_in(Storage::default())
    }

    /// An empty object bound to `storage`. Does not allocate.
    pub fn new_in(storage: Storage) -> Self {
        Self {
            table: Table::new(),
            storage,
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, InsertError> {
        Self::with_capacity_in(capacity, Storage::default())
    }

    pub fn with_capacity_in(capacity: usize, storage: Storage) -> Result<Self, InsertError> {
        let mut object = Self::new_in(storage);
        object.reserve(capacity)?;
        Ok(object)
    }

    /// Build an object from `(key, value)` pairs in a single pass, reserving
    /// `min_capacity` up front. Later duplicates of a key are dropped.
    ///
    /// On failure everything built so far is freed before returning.
    pub fn from_range_in<I, K>(
        iter: I,
        min_capacity: usize,
        storage: Storage,
    ) -> Result<Self, InsertError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Box<str>>,
    {
        Self::try_from_range_in(iter.into_iter().map(Ok), min_capacity, storage)
    }

    /// Like `from_range_in`, for inputs whose items may fail to build.
    pub fn try_from_range_in<I, K, E>(
        iter: I,
        min_capacity: usize,
        storage: Storage,
    ) -> Result<Self, InsertError<E>>
    where
        I: IntoIterator<Item = Result<(K, V), E>>,
        K: Into<Box<str>>,
    {
        let mut undo = UndoConstruct::new(Self::new_in(storage));
        undo.object()
            .insert_range_impl(iter.into_iter(), min_capacity, None)?;
        Ok(undo.commit())
    }

    /// The storage every allocation of this object goes through.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Entries the object can hold before it has to grow.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Length of the chain-head array; zero until the first allocation.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.table.buckets()
    }

    #[inline]
    pub const fn max_size() -> usize {
        MAX_SIZE
    }

    /// Make room for at least `capacity` entries. No-op when the capacity is
    /// already large enough.
    pub fn reserve(&mut self, capacity: usize) -> Result<(), InsertError> {
        let len = self.len();
        self.reserve_for(capacity, len)?;
        Ok(())
    }

    /// Grow to hold `capacity` entries when needed. `constructed` is the
    /// number of slots holding entries, which exceeds `len` while an
    /// insertion batch is open.
    pub(crate) fn reserve_for(
        &mut self,
        capacity: usize,
        constructed: usize,
    ) -> Result<(), CapacityError> {
        if capacity <= self.capacity() {
            return Ok(());
        }
        let capacity = self.growth(capacity)?;
        self.rehash(capacity, constructed)
    }

    // Grow by half again, or straight to the request if that is larger.
    fn growth(&self, new_size: usize) -> Result<usize, CapacityError> {
        if new_size > MAX_SIZE {
            return Err(CapacityError::TooLarge {
                requested: new_size,
            });
        }
        let old = self.capacity();
        if old > MAX_SIZE - old / 2 {
            return Ok(new_size);
        }
        Ok(cmp::max(old + old / 2, new_size))
    }

    fn rehash(&mut self, capacity: usize, constructed: usize) -> Result<(), CapacityError> {
        debug_assert!(capacity > self.capacity() && constructed <= capacity);
        let mut table = Table::allocate(capacity, &self.storage)?;
        // SAFETY: `table` is fresh and large enough; after relocation the old
        // block holds only moved-from bytes and is freed without drops.
        unsafe {
            self.table.relocate(&mut table, constructed);
            let mut old = mem::replace(&mut self.table, table);
            old.release(&self.storage);
        }
        Ok(())
    }

    /// Drop all entries and free the block, leaving an empty object.
    pub(crate) fn release(&mut self) {
        // SAFETY: the block was allocated through `self.storage`.
        unsafe { self.table.destroy(&self.storage) };
    }

    // The lookup primitive: the matching slot, if any, and the digest so an
    // insertion that follows need not hash again.
    #[inline]
    fn find_impl(&self, key: &str) -> (Option<usize>, usize) {
        let hash = digest(key);
        (self.table.find(key, hash), hash)
    }

    #[inline]
    fn entry_at(&mut self, i: usize) -> &mut KeyValuePair<V> {
        &mut self.table.entries_mut()[i]
    }

    #[inline]
    fn member_at(&mut self, i: usize) -> MemberMut<'_, V> {
        let (key, value) = self.entry_at(i).parts_mut();
        MemberMut {
            index: i,
            key,
            value,
        }
    }

    // Construct, link and publish one entry. Capacity must already be
    // reserved and the key absent.
    fn push_new(&mut self, hash: usize, key: Box<str>, value: V) -> MemberMut<'_, V> {
        let len = self.len();
        debug_assert!(len < self.capacity());
        // SAFETY: slot `len` is reserved and unconstructed; the caller has
        // checked the key is absent.
        unsafe {
            self.table
                .construct(len, hash, KeyValuePair::new(key, value))
        };
        self.table.grow(1);
        self.member_at(len)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let (found, _) = self.find_impl(key);
        found.map(|i| self.table.entries()[i].value())
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        match self.find_impl(key) {
            (Some(i), _) => Some(self.entry_at(i).value_mut()),
            (None, _) => None,
        }
    }

    pub fn get_key_value(&self, key: &str) -> Option<(&str, &V)> {
        let (found, _) = self.find_impl(key);
        found.map(|i| {
            let e = &self.table.entries()[i];
            (e.key(), e.value())
        })
    }

    /// Position of `key` in iteration order.
    pub fn get_index_of(&self, key: &str) -> Option<usize> {
        self.find_impl(key).0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find_impl(key).0.is_some()
    }

    /// 1 if `key` is present, otherwise 0.
    pub fn count(&self, key: &str) -> usize {
        usize::from(self.contains_key(key))
    }

    /// Insert `pair` unless its key is already present.
    ///
    /// Room for one more entry is reserved and the candidate entry built
    /// before the lookup, so the capacity may grow even when the key turns
    /// out to be present; in that case the candidate is dropped and the
    /// existing entry returned with `false`.
    pub fn insert<K>(&mut self, pair: (K, V)) -> Result<(MemberMut<'_, V>, bool), InsertError>
    where
        K: Into<Box<str>>,
    {
        let len = self.len();
        self.reserve_for(len + 1, len)?;
        let (key, value) = pair;
        let candidate = KeyValuePair::new(key.into(), value);
        let (found, hash) = self.find_impl(candidate.key());
        if let Some(i) = found {
            drop(candidate);
            return Ok((self.member_at(i), false));
        }
        let (key, value) = candidate.into_parts();
        Ok((self.push_new(hash, key, value), true))
    }

    /// Insert `key`, or overwrite its value in place when present. An
    /// overwritten entry keeps its position.
    pub fn insert_or_assign<K>(
        &mut self,
        key: K,
        value: V,
    ) -> Result<(MemberMut<'_, V>, bool), InsertError>
    where
        K: AsRef<str> + Into<Box<str>>,
    {
        let (found, hash) = self.find_impl(key.as_ref());
        if let Some(i) = found {
            self.entry_at(i).set_value(value);
            return Ok((self.member_at(i), false));
        }
        let len = self.len();
        self.reserve_for(len + 1, len)?;
        Ok((self.push_new(hash, key.into(), value), true))
    }

    /// Insert `key` with the value built by `make`, unless present. `make`
    /// only runs when the key is absent.
    pub fn emplace<K, F>(
        &mut self,
        key: K,
        make: F,
    ) -> Result<(MemberMut<'_, V>, bool), InsertError>
    where
        K: AsRef<str> + Into<Box<str>>,
        F: FnOnce() -> V,
    {
        self.try_emplace(key, || Ok::<V, Infallible>(make()))
    }

    /// `emplace` with a fallible value constructor. A failing `make` leaves
    /// the contents untouched (the capacity may already have grown).
    pub fn try_emplace<K, F, E>(
        &mut self,
        key: K,
        make: F,
    ) -> Result<(MemberMut<'_, V>, bool), InsertError<E>>
    where
        K: AsRef<str> + Into<Box<str>>,
        F: FnOnce() -> Result<V, E>,
    {
        let (found, hash) = self.find_impl(key.as_ref());
        if let Some(i) = found {
            return Ok((self.member_at(i), false));
        }
        let len = self.len();
        self.reserve_for(len + 1, len)?;
        let value = make().map_err(InsertError::Payload)?;
        Ok((self.push_new(hash, key.into(), value), true))
    }

    /// The value for `key`, inserting `V::default()` first when absent.
    pub fn get_or_insert_default<K>(&mut self, key: K) -> Result<&mut V, InsertError>
    where
        K: AsRef<str> + Into<Box<str>>,
        V: Default,
    {
        let (member, _) = self.emplace(key, V::default)?;
        Ok(member.into_value_mut())
    }

    /// Remove `key`, moving the last entry into its position.
    pub fn swap_remove(&mut self, key: &str) -> Option<V> {
        self.swap_remove_entry(key).map(|(_, v)| v)
    }

    pub fn swap_remove_entry(&mut self, key: &str) -> Option<(Box<str>, V)> {
        let (found, hash) = self.find_impl(key);
        let i = found?;
        Some(self.table.swap_remove(i, hash).into_parts())
    }

    /// Drop every entry. The capacity is kept.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Exchange contents and storage with `other` in constant time.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Insert pairs in a single pass. A key already present, or seen earlier
    /// in `iter`, keeps its first value; later duplicates are dropped.
    ///
    /// All-or-nothing: on failure none of the new keys are visible.
    pub fn insert_range<I, K>(&mut self, iter: I) -> Result<(), InsertError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Box<str>>,
    {
        self.insert_range_impl(iter.into_iter().map(Ok), 0, None)
    }

    /// Insert pairs from an input of known length. Fails with `TooLarge`
    /// before building anything when the result could exceed `max_size`,
    /// and reserves once for the whole batch.
    pub fn insert_exact<I, K>(&mut self, iter: I) -> Result<(), InsertError>
    where
        I: IntoIterator<Item = (K, V)>,
        I::IntoIter: ExactSizeIterator,
        K: Into<Box<str>>,
    {
        let iter = iter.into_iter();
        let n = iter.len();
        self.insert_range_impl(iter.map(Ok), 0, Some(n))
    }

    /// `insert_range` for inputs whose items may fail to build. The first
    /// `Err` rolls the whole batch back and is returned as `Payload`.
    pub fn try_insert_range<I, K, E>(&mut self, iter: I) -> Result<(), InsertError<E>>
    where
        I: IntoIterator<Item = Result<(K, V), E>>,
        K: Into<Box<str>>,
    {
        self.insert_range_impl(iter.into_iter(), 0, None)
    }

    /// `insert_exact` for inputs whose items may fail to build.
    pub fn try_insert_exact<I, K, E>(&mut self, iter: I) -> Result<(), InsertError<E>>
    where
        I: IntoIterator<Item = Result<(K, V), E>>,
        I::IntoIter: ExactSizeIterator,
        K: Into<Box<str>>,
    {
        let iter = iter.into_iter();
        let n = iter.len();
        self.insert_range_impl(iter, 0, Some(n))
    }

    fn insert_range_impl<I, K, E>(
        &mut self,
        iter: I,
        min_capacity: usize,
        known: Option<usize>,
    ) -> Result<(), InsertError<E>>
    where
        I: Iterator<Item = Result<(K, V), E>>,
        K: Into<Box<str>>,
    {
        let len = self.len();
        let min_capacity = match known {
            Some(n) => {
                if n > MAX_SIZE - len {
                    return Err(InsertError::TooLarge {
                        requested: len.saturating_add(n),
                    });
                }
                cmp::max(min_capacity, len + n)
            }
            None => min_capacity,
        };
        self.reserve_for(min_capacity, len)?;
        let mut undo = UndoInsert::new(self);
        for item in iter {
            let (key, value) = item.map_err(InsertError::Payload)?;
            undo.push(key.into(), value)?;
        }
        undo.commit();
        Ok(())
    }

    /// Deep copy into `storage`.
    pub fn try_clone_in(&self, storage: Storage) -> Result<Self, InsertError>
    where
        V: Clone,
    {
        let mut undo = UndoConstruct::new(Self::new_in(storage));
        undo.object()
            .insert_exact(self.iter().map(|(k, v)| (k, v.clone())))?;
        Ok(undo.commit())
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: self.table.entries().iter(),
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            inner: self.table.entries_mut().iter_mut(),
        }
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn values_mut(
        &mut self,
    ) -> impl DoubleEndedIterator<Item = &mut V> + ExactSizeIterator + '_ {
        self.iter_mut().map(|(_, v)| v)
    }
}

impl<V> Drop for Object<V> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<V> Default for Object<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Clone for Object<V> {
    fn clone(&self) -> Self {
        infallible(self.try_clone_in(self.storage.clone()))
    }
}

impl<V: fmt::Debug> fmt::Debug for Object<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Same size, and every key maps to an equal value in both. Order is
/// ignored.
impl<V: PartialEq> PartialEq for Object<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<V: Eq> Eq for Object<V> {}

impl<V> ops::Index<&str> for Object<V> {
    type Output = V;

    fn index(&self, key: &str) -> &V {
        match self.get(key) {
            Some(v) => v,
            None => panic!("key {:?} not present in object", key),
        }
    }
}

impl<K: Into<Box<str>>, V> Extend<(K, V)> for Object<V> {
    /// First value wins, as with `insert_range`.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        infallible(self.insert_range(iter));
    }
}

impl<K: Into<Box<str>>, V> FromIterator<(K, V)> for Object<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        infallible(Self::from_range_in(iter, 0, Storage::default()))
    }
}

impl<'a, V> IntoIterator for &'a Object<V> {
    type Item = (&'a str, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}

impl<'a, V> IntoIterator for &'a mut Object<V> {
    type Item = (&'a str, &'a mut V);
    type IntoIter = IterMut<'a, V>;

    fn into_iter(self) -> IterMut<'a, V> {
        self.iter_mut()
    }
}

/// The member an insertion call found or created.
///
/// The key is read-only; only the value can be changed through it, so the
/// object's index stays intact whatever the caller does with this handle.
///
/// ```compile_fail
/// // The stored pair and its chain link are not reachable from outside.
/// use json_object::KeyValuePair;
/// ```
pub struct MemberMut<'a, V> {
    index: usize,
    key: &'a str,
    value: &'a mut V,
}

impl<'a, V> MemberMut<'a, V> {
    /// Position in iteration order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> &'a str {
        self.key
    }

    pub fn value(&self) -> &V {
        &*self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut *self.value
    }

    pub fn into_value_mut(self) -> &'a mut V {
        self.value
    }
}

impl<'a, V: fmt::Debug> fmt::Debug for MemberMut<'a, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberMut")
            .field("index", &self.index)
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

/// Entries in insertion order.
pub struct Iter<'a, V> {
    inner: slice::Iter<'a, KeyValuePair<V>>,
}

impl<'a, V> Clone for Iter<'a, V> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|e| (e.key(), e.value()))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, V> DoubleEndedIterator for Iter<'a, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|e| (e.key(), e.value()))
    }
}

impl<'a, V> ExactSizeIterator for Iter<'a, V> {}
impl<'a, V> FusedIterator for Iter<'a, V> {}

/// Entries in insertion order, values mutable.
pub struct IterMut<'a, V> {
    inner: slice::IterMut<'a, KeyValuePair<V>>,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = (&'a str, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(KeyValuePair::parts_mut)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, V> DoubleEndedIterator for IterMut<'a, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(KeyValuePair::parts_mut)
    }
}

impl<'a, V> ExactSizeIterator for IterMut<'a, V> {}
impl<'a, V> FusedIterator for IterMut<'a, V> {}
