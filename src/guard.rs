//! Undo guards for multi-step mutations.
//!
//! Each guard is armed on creation and disarmed by `commit`. Dropping an
//! armed guard, on an early `?` return or while unwinding from a panic in
//! user code, rolls the object back to its state before the guard existed.

use crate::digest::digest;
use crate::error::CapacityError;
use crate::object::Object;
use crate::table::KeyValuePair;
use core::mem;

/// Owns an object under construction; uncommitted, it tears the object's
/// table down.
pub(crate) struct UndoConstruct<V> {
    object: Object<V>,
    commit: bool,
}

impl<V> UndoConstruct<V> {
    pub(crate) fn new(object: Object<V>) -> Self {
        Self {
            object,
            commit: false,
        }
    }

    pub(crate) fn object(&mut self) -> &mut Object<V> {
        &mut self.object
    }

    /// Hand the finished object to the caller.
    pub(crate) fn commit(mut self) -> Object<V> {
        self.commit = true;
        let storage = self.object.storage().clone();
        mem::replace(&mut self.object, Object::new_in(storage))
    }
}

impl<V> Drop for UndoConstruct<V> {
    fn drop(&mut self) {
        if !self.commit {
            self.object.release();
        }
    }
}

/// A batch of insertions into an initialized object.
///
/// New entries are constructed in the reserved slots `[first, last)` and
/// linked into their chains, but stay invisible until `commit` advances the
/// size by `last - first` in one step. Rollback unlinks and drops them.
pub(crate) struct UndoInsert<'a, V> {
    object: &'a mut Object<V>,
    first: usize,
    last: usize,
    commit: bool,
}

impl<'a, V> UndoInsert<'a, V> {
    pub(crate) fn new(object: &'a mut Object<V>) -> Self {
        let first = object.len();
        Self {
            object,
            first,
            last: first,
            commit: false,
        }
    }

    /// Add one candidate to the batch. An equal key already in the object,
    /// or earlier in this batch, wins and the candidate is dropped.
    ///
    /// Returns whether the candidate was kept.
    pub(crate) fn push(&mut self, key: Box<str>, value: V) -> Result<bool, CapacityError> {
        self.object.reserve_for(self.last + 1, self.last)?;
        let pair = KeyValuePair::new(key, value);
        let hash = digest(pair.key());
        if self.object.table.find(pair.key(), hash).is_some() {
            drop(pair);
            return Ok(false);
        }
        // SAFETY: reserve_for guarantees `last < capacity`; slot `last` is
        // the first one past the batch and the key is in no chain.
        unsafe { self.object.table.construct(self.last, hash, pair) };
        self.last += 1;
        Ok(true)
    }

    /// Entries constructed so far in this batch.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.last - self.first
    }

    pub(crate) fn commit(mut self) {
        self.commit = true;
    }
}

impl<'a, V> Drop for UndoInsert<'a, V> {
    fn drop(&mut self) {
        let table = &mut self.object.table;
        if self.commit {
            table.grow(self.last - self.first);
            return;
        }
        // SAFETY: `[first, last)` were constructed and linked by `push` and
        // are not yet visible. Unlink everything before dropping anything so
        // a panicking drop cannot leave a chain naming a dead slot.
        unsafe {
            for i in (self.first..self.last).rev() {
                let hash = digest(table.slot(i).key());
                table.remove_from_chain(hash, i);
            }
            table.destroy_range(self.first, self.last);
        }
    }
}
