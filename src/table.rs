//! Table: the single allocation behind an `Object`.
//!
//! One block holds, back to back:
//!
//! ```text
//! [ Header | KeyValuePair<V> x capacity | u32 x buckets ]
//! ```
//!
//! Entries sit in insertion order. Each bucket head and each entry's `next`
//! field is an index into the entry array (`NIL` terminates a chain), so a
//! relocation only has to recompute links, never patch addresses.
//!
//! Slots in `[0, size)` are live. Slots in `[size, capacity)` are reserved;
//! an insertion batch constructs and links entries there before `grow`
//! makes them visible. Chains may therefore reference slots past `size`
//! while a batch is open, and every such slot is constructed.

use crate::digest::digest;
use crate::error::CapacityError;
use crate::storage::Storage;
use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::{mem, slice};

/// Chain terminator.
pub(crate) const NIL: u32 = u32::MAX;

/// Largest number of entries an object can hold. Keeps every index below
/// `NIL`.
pub const MAX_SIZE: usize = 0x7fff_fffe;

// Bucket counts, each the largest prime below a power of two.
const BUCKET_SIZES: [usize; 30] = [
    3, 7, 13, 31, 61, 127, 251, 509, 1021, 2039, 4093, 8191, 16381, 32749, 65521, 131071, 262139,
    524287, 1048573, 2097143, 4194301, 8388593, 16777213, 33554393, 67108859, 134217689,
    268435399, 536870909, 1073741789, 2147483647,
];

/// Number of chain heads for a table of `capacity` entries.
pub(crate) fn bucket_count(capacity: usize) -> usize {
    let mut buckets = BUCKET_SIZES[BUCKET_SIZES.len() - 1];
    for &b in BUCKET_SIZES.iter() {
        if b >= capacity {
            buckets = b;
            break;
        }
    }
    buckets
}

/// One object member: key, value and the intrusive chain link.
pub(crate) struct KeyValuePair<V> {
    key: Box<str>,
    value: V,
    next: u32,
}

impl<V> KeyValuePair<V> {
    pub(crate) fn new(key: Box<str>, value: V) -> Self {
        Self {
            key,
            value,
            next: NIL,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub(crate) fn set_value(&mut self, value: V) {
        self.value = value;
    }

    pub(crate) fn parts_mut(&mut self) -> (&str, &mut V) {
        (&self.key, &mut self.value)
    }

    pub fn into_parts(self) -> (Box<str>, V) {
        (self.key, self.value)
    }
}

impl<V: fmt::Debug> fmt::Debug for KeyValuePair<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyValuePair")
            .field(&self.key)
            .field(&self.value)
            .finish()
    }
}

#[repr(C)]
struct Header {
    size: usize,
    capacity: usize,
    buckets: usize,
}

pub(crate) struct Table<V> {
    // `None` is the empty table: no block, zero capacity.
    tab: Option<NonNull<Header>>,
    _pd: PhantomData<KeyValuePair<V>>,
}

// SAFETY: the table exclusively owns its block and the entries in it.
unsafe impl<V: Send> Send for Table<V> {}
unsafe impl<V: Sync> Sync for Table<V> {}

impl<V> Table<V> {
    // Header rounded up to the entry alignment. `align_of` is a power of
    // two, so the mask trick is exact.
    const ENTRY_OFFSET: usize = {
        let align = mem::align_of::<KeyValuePair<V>>();
        (mem::size_of::<Header>() + align - 1) & !(align - 1)
    };

    pub(crate) const fn new() -> Self {
        Self {
            tab: None,
            _pd: PhantomData,
        }
    }

    fn layout(capacity: usize, buckets: usize) -> Option<Layout> {
        let (layout, entries) = Layout::new::<Header>()
            .extend(Layout::array::<KeyValuePair<V>>(capacity).ok()?)
            .ok()?;
        debug_assert_eq!(entries, Self::ENTRY_OFFSET);
        let (layout, heads) = layout.extend(Layout::array::<u32>(buckets).ok()?).ok()?;
        // Entries contain a u32, so the bucket array needs no padding.
        debug_assert_eq!(
            heads,
            entries + capacity * mem::size_of::<KeyValuePair<V>>()
        );
        Some(layout.pad_to_align())
    }

    /// Allocate an empty table able to hold `capacity` entries.
    pub(crate) fn allocate(capacity: usize, storage: &Storage) -> Result<Self, CapacityError> {
        debug_assert!(capacity > 0 && capacity <= MAX_SIZE);
        let buckets = bucket_count(capacity);
        let layout = Self::layout(capacity, buckets).ok_or(CapacityError::TooLarge {
            requested: capacity,
        })?;
        let tab = storage
            .allocate(layout)
            .map_err(CapacityError::OutOfMemory)?
            .cast::<Header>();
        // SAFETY: the block is fresh and large enough for the header plus
        // both arrays; all-ones bytes make every head `NIL`.
        unsafe {
            tab.as_ptr().write(Header {
                size: 0,
                capacity,
                buckets,
            });
        }
        let table = Self {
            tab: Some(tab),
            _pd: PhantomData,
        };
        unsafe { ptr::write_bytes(table.bucket_begin(), 0xff, buckets) };
        Ok(table)
    }

    #[inline]
    fn header(&self) -> Option<&Header> {
        // SAFETY: a present header is initialized for as long as we own it.
        self.tab.as_ref().map(|h| unsafe { h.as_ref() })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.header().map_or(0, |h| h.size)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.header().map_or(0, |h| h.capacity)
    }

    #[inline]
    pub(crate) fn buckets(&self) -> usize {
        self.header().map_or(0, |h| h.buckets)
    }

    #[inline]
    fn set_len(&mut self, size: usize) {
        match self.tab {
            Some(mut h) => {
                // SAFETY: see `header`; `&mut self` makes the access unique.
                let h = unsafe { h.as_mut() };
                debug_assert!(size <= h.capacity);
                h.size = size;
            }
            None => debug_assert_eq!(size, 0),
        }
    }

    #[inline]
    fn begin(&self) -> *mut KeyValuePair<V> {
        match self.tab {
            // SAFETY: ENTRY_OFFSET lies within the block (see `layout`).
            Some(tab) => unsafe { tab.as_ptr().cast::<u8>().add(Self::ENTRY_OFFSET).cast() },
            None => NonNull::dangling().as_ptr(),
        }
    }

    #[inline]
    fn bucket_begin(&self) -> *mut u32 {
        // SAFETY: the bucket array starts right after `capacity` entries.
        unsafe { self.begin().add(self.capacity()).cast() }
    }

    /// Live entries in insertion order.
    #[inline]
    pub(crate) fn entries(&self) -> &[KeyValuePair<V>] {
        // SAFETY: `[0, size)` is constructed; an empty table yields a
        // dangling, aligned pointer with length zero.
        unsafe { slice::from_raw_parts(self.begin(), self.len()) }
    }

    #[inline]
    pub(crate) fn entries_mut(&mut self) -> &mut [KeyValuePair<V>] {
        unsafe { slice::from_raw_parts_mut(self.begin(), self.len()) }
    }

    /// # Safety
    /// Slot `i` must be constructed (live or part of an open batch).
    #[inline]
    pub(crate) unsafe fn slot(&self, i: usize) -> &KeyValuePair<V> {
        debug_assert!(i < self.capacity());
        &*self.begin().add(i)
    }

    /// # Safety
    /// Same as `slot`.
    #[inline]
    unsafe fn slot_mut(&mut self, i: usize) -> &mut KeyValuePair<V> {
        debug_assert!(i < self.capacity());
        &mut *self.begin().add(i)
    }

    #[inline]
    fn head(&self, hash: usize) -> u32 {
        match self.buckets() {
            0 => NIL,
            // SAFETY: index is below `buckets`.
            n => unsafe { *self.bucket_begin().add(hash % n) },
        }
    }

    /// The chain head for `hash`. The table must be allocated.
    #[inline]
    pub(crate) fn bucket_mut(&mut self, hash: usize) -> &mut u32 {
        let n = self.buckets();
        debug_assert!(n > 0);
        // SAFETY: index is below `buckets`.
        unsafe { &mut *self.bucket_begin().add(hash % n) }
    }

    /// Walk the chain for `hash` looking for `key`.
    pub(crate) fn find(&self, key: &str, hash: usize) -> Option<usize> {
        let mut i = self.head(hash);
        while i != NIL {
            // SAFETY: chains only reference constructed slots.
            let e = unsafe { self.slot(i as usize) };
            if &*e.key == key {
                return Some(i as usize);
            }
            i = e.next;
        }
        None
    }

    /// Push constructed slot `i` onto the front of the chain for `hash`.
    ///
    /// # Safety
    /// Slot `i` must be constructed and not already linked.
    #[inline]
    unsafe fn link(&mut self, i: usize, hash: usize) {
        let next = mem::replace(self.bucket_mut(hash), i as u32);
        self.slot_mut(i).next = next;
    }

    /// Unlink slot `i` from the chain for `hash`.
    ///
    /// # Safety
    /// Slot `i` must be linked into that chain.
    pub(crate) unsafe fn remove_from_chain(&mut self, hash: usize, i: usize) {
        let target = i as u32;
        let next = self.slot(i).next;
        let head = self.bucket_mut(hash);
        if *head == target {
            *head = next;
            return;
        }
        let mut prev = *head;
        loop {
            debug_assert!(prev != NIL, "entry missing from its chain");
            let p = self.slot_mut(prev as usize);
            if p.next == target {
                p.next = next;
                return;
            }
            prev = p.next;
        }
    }

    /// Write `pair` into slot `i` and link it. Does not change `len`.
    ///
    /// # Safety
    /// `i` must be the first unconstructed slot, below `capacity`, and the
    /// key must not be present in any chain.
    pub(crate) unsafe fn construct(&mut self, i: usize, hash: usize, pair: KeyValuePair<V>) {
        debug_assert!(i < self.capacity());
        self.begin().add(i).write(pair);
        self.link(i, hash);
    }

    /// Drop the entries in slots `[first, last)` in place.
    ///
    /// # Safety
    /// Those slots must be constructed, unlinked, and outside `[0, len)`.
    pub(crate) unsafe fn destroy_range(&mut self, first: usize, last: usize) {
        debug_assert!(first >= self.len() && first <= last);
        let p = ptr::slice_from_raw_parts_mut(self.begin().add(first), last - first);
        ptr::drop_in_place(p);
    }

    /// Make `n` more constructed-and-linked entries visible.
    #[inline]
    pub(crate) fn grow(&mut self, n: usize) {
        let size = self.len() + n;
        self.set_len(size);
    }

    /// Move the first `constructed` slots into `dest` and rebuild every chain
    /// there. `dest` takes over the visible size.
    ///
    /// # Safety
    /// `dest` must be freshly allocated with room for `constructed` entries.
    /// Afterwards the entries belong to `dest`; `self` may only be released.
    pub(crate) unsafe fn relocate(&mut self, dest: &mut Table<V>, constructed: usize) {
        debug_assert!(dest.len() == 0 && constructed <= dest.capacity());
        debug_assert!(self.len() <= constructed);
        ptr::copy_nonoverlapping(self.begin(), dest.begin(), constructed);
        for i in 0..constructed {
            let hash = digest(&dest.slot(i).key);
            dest.link(i, hash);
        }
        dest.set_len(self.len());
    }

    /// Free the block without touching the entries.
    ///
    /// # Safety
    /// `storage` must be the handle the block came from, and the entries
    /// must already be dropped or moved out.
    pub(crate) unsafe fn release(&mut self, storage: &Storage) {
        if let Some(tab) = self.tab.take() {
            let h = tab.as_ref();
            // SAFETY: the same layout was computed successfully when the
            // block was allocated.
            let layout = Self::layout(h.capacity, h.buckets).unwrap_unchecked();
            storage.deallocate(tab.cast(), layout);
        }
    }

    /// Drop every live entry and free the block.
    ///
    /// # Safety
    /// `storage` must be the handle the block came from.
    pub(crate) unsafe fn destroy(&mut self, storage: &Storage) {
        // Frees the block on scope exit, unwinding from a value's drop
        // included.
        struct Release<'a, V> {
            table: &'a mut Table<V>,
            storage: &'a Storage,
        }

        impl<V> Drop for Release<'_, V> {
            fn drop(&mut self) {
                // SAFETY: the entries are dropped (or abandoned by a
                // panicking drop) by the time this runs.
                unsafe { self.table.release(self.storage) }
            }
        }

        let len = self.len();
        let live = ptr::slice_from_raw_parts_mut(self.begin(), len);
        self.set_len(0);
        let _release = Release {
            table: self,
            storage,
        };
        ptr::drop_in_place(live);
    }

    /// Drop every live entry and reset the chains, keeping the block.
    pub(crate) fn clear(&mut self) {
        let len = self.len();
        if len == 0 {
            return;
        }
        let live = ptr::slice_from_raw_parts_mut(self.begin(), len);
        self.set_len(0);
        // SAFETY: the chains are reset before any entry drop can run, so a
        // panicking drop leaves an empty, consistent table behind.
        unsafe {
            ptr::write_bytes(self.bucket_begin(), 0xff, self.buckets());
            ptr::drop_in_place(live);
        }
    }

    /// Remove live entry `i` (hashing to `hash`) by moving the last entry
    /// into its slot.
    pub(crate) fn swap_remove(&mut self, i: usize, hash: usize) -> KeyValuePair<V> {
        let last = self.len() - 1;
        debug_assert!(i <= last);
        // SAFETY: `i` and `last` are live and linked. `i` is unlinked before
        // it is read out, and `last` is unlinked before it is copied over
        // the hole, so no chain ever names a moved-from slot.
        unsafe {
            self.remove_from_chain(hash, i);
            let removed = ptr::read(self.begin().add(i));
            if i != last {
                let moved = digest(&self.slot(last).key);
                self.remove_from_chain(moved, last);
                ptr::copy_nonoverlapping(self.begin().add(last), self.begin().add(i), 1);
                self.link(i, moved);
            }
            self.set_len(last);
            removed
        }
    }

    /// Panic unless every chain is well formed (test builds only).
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        use std::collections::BTreeSet;

        let len = self.len();
        assert!(len <= self.capacity());
        if self.tab.is_none() {
            return;
        }
        assert!(self.buckets() >= self.capacity());
        let mut seen = vec![false; len];
        for b in 0..self.buckets() {
            // SAFETY: `b` is below `buckets`.
            let mut i = unsafe { *self.bucket_begin().add(b) };
            while i != NIL {
                let at = i as usize;
                assert!(at < len, "chain names slot {} beyond size {}", at, len);
                assert!(!seen[at], "slot {} linked twice", at);
                seen[at] = true;
                let e = unsafe { self.slot(at) };
                assert_eq!(digest(&e.key) % self.buckets(), b, "slot {} in wrong bucket", at);
                i = e.next;
            }
        }
        assert!(seen.iter().all(|&s| s), "live entry unreachable from its chain");
        let keys: BTreeSet<&str> = self.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys.len(), len, "duplicate keys");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BoundedResource;
    use std::sync::Arc;

    fn pair(k: &str, v: i32) -> KeyValuePair<i32> {
        KeyValuePair::new(k.into(), v)
    }

    /// Bucket count never decreases with capacity and covers it.
    #[test]
    fn bucket_count_is_monotonic() {
        let mut prev = 0;
        for cap in 1..5000 {
            let b = bucket_count(cap);
            assert!(b >= cap);
            assert!(b >= prev);
            prev = b;
        }
        assert!(bucket_count(MAX_SIZE) >= MAX_SIZE);
    }

    #[test]
    fn empty_table_has_nothing() {
        let t: Table<i32> = Table::new();
        assert_eq!(t.len(), 0);
        assert_eq!(t.capacity(), 0);
        assert_eq!(t.buckets(), 0);
        assert!(t.entries().is_empty());
        assert_eq!(t.find("a", digest("a")), None);
    }

    #[test]
    fn fresh_table_has_nil_heads() {
        let storage = Storage::default();
        let mut t: Table<i32> = Table::allocate(10, &storage).unwrap();
        assert_eq!(t.capacity(), 10);
        assert_eq!(t.buckets(), 13);
        for b in 0..t.buckets() {
            assert_eq!(*t.bucket_mut(b), NIL);
        }
        unsafe { t.destroy(&storage) };
    }

    /// Constructed entries are findable before `grow` but not visible.
    #[test]
    fn construct_then_grow() {
        let storage = Storage::default();
        let mut t: Table<i32> = Table::allocate(4, &storage).unwrap();
        unsafe {
            t.construct(0, digest("a"), pair("a", 1));
            t.construct(1, digest("b"), pair("b", 2));
        }
        assert_eq!(t.len(), 0);
        assert_eq!(t.find("b", digest("b")), Some(1));
        t.grow(2);
        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.entries()[0].key(), "a");
        t.assert_consistent();
        unsafe { t.destroy(&storage) };
    }

    /// Unlinking from the front, middle and back of one shared chain keeps
    /// the rest of it reachable.
    #[test]
    fn remove_from_shared_chain() {
        let storage = Storage::default();
        let mut t: Table<i32> = Table::allocate(3, &storage).unwrap();
        let keys = ["a", "b", "c"];
        for (i, k) in keys.iter().enumerate() {
            unsafe { t.construct(i, 0, pair(k, i as i32)) };
        }
        unsafe { t.remove_from_chain(0, 1) };
        assert_eq!(t.find("b", 0), None);
        assert_eq!(t.find("a", 0), Some(0));
        assert_eq!(t.find("c", 0), Some(2));
        unsafe { t.remove_from_chain(0, 2) };
        unsafe { t.remove_from_chain(0, 0) };
        assert_eq!(*t.bucket_mut(0), NIL);
        unsafe {
            t.destroy_range(0, 3);
            t.release(&storage);
        }
    }

    #[test]
    fn relocate_preserves_order_and_rebuilds_chains() {
        let storage = Storage::default();
        let mut small: Table<i32> = Table::allocate(3, &storage).unwrap();
        for (i, k) in ["x", "y", "z"].iter().enumerate() {
            let h = digest(k);
            unsafe { small.construct(i, h, pair(k, i as i32)) };
        }
        small.grow(3);
        let mut big: Table<i32> = Table::allocate(40, &storage).unwrap();
        unsafe {
            small.relocate(&mut big, 3);
            small.release(&storage);
        }
        assert_eq!(big.buckets(), 61);
        let keys: Vec<&str> = big.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys, ["x", "y", "z"]);
        big.assert_consistent();
        unsafe { big.destroy(&storage) };
    }

    #[test]
    fn swap_remove_relinks_moved_entry() {
        let storage = Storage::default();
        let mut t: Table<i32> = Table::allocate(4, &storage).unwrap();
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            unsafe { t.construct(i, digest(k), pair(k, i as i32)) };
        }
        t.grow(4);
        let removed = t.swap_remove(1, digest("b"));
        assert_eq!(removed.key(), "b");
        let keys: Vec<&str> = t.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys, ["a", "d", "c"]);
        assert_eq!(t.find("d", digest("d")), Some(1));
        t.assert_consistent();
        unsafe { t.destroy(&storage) };
    }

    #[test]
    fn clear_keeps_block() {
        let storage = Storage::default();
        let mut t: Table<String> = Table::allocate(2, &storage).unwrap();
        unsafe { t.construct(0, digest("k"), KeyValuePair::new("k".into(), "v".into())) };
        t.grow(1);
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.capacity(), 2);
        assert_eq!(t.find("k", digest("k")), None);
        t.assert_consistent();
        unsafe { t.destroy(&storage) };
    }

    /// Allocation goes through the bound storage and is returned on release.
    #[test]
    fn block_is_charged_to_storage() {
        let resource = Arc::new(BoundedResource::unbounded());
        let storage = Storage::from_arc(resource.clone());
        let mut t: Table<u64> = Table::allocate(16, &storage).unwrap();
        assert_eq!(resource.live_blocks(), 1);
        assert!(resource.in_use() >= 16 * mem::size_of::<KeyValuePair<u64>>());
        unsafe { t.destroy(&storage) };
        assert_eq!(resource.in_use(), 0);
        assert_eq!(resource.live_blocks(), 0);
    }

    #[test]
    fn refused_allocation_reports_layout() {
        let storage = Storage::new(BoundedResource::new(8));
        match Table::<i32>::allocate(4, &storage) {
            Err(CapacityError::OutOfMemory(e)) => assert!(e.layout().size() > 8),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("allocation should have been refused"),
        }
    }
}
