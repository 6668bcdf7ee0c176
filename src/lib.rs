//! json-object: the object container of a JSON document model. Unique
//! text keys map to values, iteration follows first-insertion order, and
//! every mutation either completes or leaves the object as it was.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one allocation per object, O(1) average lookup, insertion order
//!   for free, and all-or-nothing batch insertion.
//! - Layers:
//!   - `Table<V>`: the raw block. A header, the entry array in insertion
//!     order, then the bucket heads of a chained hash index. Chains are
//!     `u32` slot indices threaded through the entries themselves.
//!   - Undo guards (`guard`): RAII rollback for construction and for
//!     insertion batches. Early `?` returns and unwinding both take the
//!     rollback path.
//!   - `Object<V>`: public API. Capacity policy, lookup, the insertion
//!     family, removal and iteration.
//! - `Storage`: the memory-resource handle an object allocates through,
//!   bound for the object's lifetime.
//!
//! Constraints
//! - At most `MAX_SIZE` entries, which keeps every slot index below the
//!   chain terminator.
//! - Keys are compared bytewise; the digest is FNV-1a at pointer width.
//! - Growth moves every entry. Entry references cannot outlive a `&mut`
//!   call, so the borrow checker enforces the invalidation rule.
//!
//! Insertion batches
//! - Candidates are constructed in reserved slots past `len` and linked
//!   into their chains as they arrive, so later duplicates in the same
//!   batch find earlier ones. The size only advances at commit.
//! - Growing in the middle of a batch relocates the pending slots along
//!   with the live ones.
//! - Rollback unlinks every pending slot, then drops them.
//!
//! Failure semantics
//! - `InsertError::TooLarge` and `InsertError::OutOfMemory` come from the
//!   capacity layer; `InsertError::Payload` carries a caller's value
//!   construction error. All three leave contents, order and size as they
//!   were. Only the capacity may have grown.
//! - Trait impls that cannot return errors (`Clone`, `Extend`,
//!   `FromIterator`) treat allocation failure like `Vec` does.
//!
//! Notes and non-goals
//! - No order-preserving removal; `swap_remove` is the only erase.
//! - Keys live in the global allocator; only the table block goes through
//!   `Storage`.

pub mod digest;
mod error;
mod guard;
mod object;
mod object_proptest;
#[cfg(feature = "serde")]
mod serde_impls;
mod storage;
mod table;

// Public surface
pub use error::InsertError;
pub use object::{Iter, IterMut, MemberMut, Object};
pub use storage::{AllocError, BoundedResource, DefaultResource, MemoryResource, Storage};
pub use table::MAX_SIZE;
