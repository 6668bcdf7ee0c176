//! Storage: the memory-resource capability an `Object` allocates through.
//!
//! An `Object` binds one `Storage` handle for its whole lifetime. Every table
//! block is allocated and freed through that handle; entries never migrate
//! between handles. Cloning a `Storage` shares the underlying resource.

use core::alloc::Layout;
use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc;
use std::sync::Arc;

/// The resource could not satisfy an allocation request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The request that failed.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory allocation of {} bytes failed",
            self.layout.size()
        )
    }
}

impl std::error::Error for AllocError {}

/// A source of raw memory.
///
/// Implementations must be usable from any thread; an `Object` itself is
/// never mutated concurrently, but shared objects may be read from several
/// threads at once.
pub trait MemoryResource: Send + Sync {
    /// Allocate a block for `layout`. `layout.size()` is never zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Return a block to the resource.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this resource with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Whether memory from `other` may be freed through `self`.
    ///
    /// Identity is already checked by `Storage`; override this only for
    /// resources that share a backing pool across instances.
    fn is_equal(&self, _other: &dyn MemoryResource) -> bool {
        false
    }
}

/// The global allocator.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultResource;

impl MemoryResource for DefaultResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() > 0);
        // SAFETY: callers never request zero-sized blocks.
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout)
    }
}

/// A resource with a byte budget on top of the global allocator.
///
/// Requests that would push the bytes in use past the limit fail with
/// `AllocError`. The live byte and block counts make it usable as a leak
/// detector: both return to zero once every object using it is dropped.
#[derive(Debug)]
pub struct BoundedResource {
    limit: AtomicUsize,
    in_use: AtomicUsize,
    live: AtomicUsize,
}

impl BoundedResource {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            in_use: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// A resource that never refuses a request.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Change the budget. Blocks already handed out are unaffected.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Bytes currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Blocks currently allocated.
    pub fn live_blocks(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl MemoryResource for BoundedResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let size = layout.size();
        let limit = self.limit();
        self.in_use
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(size).filter(|&n| n <= limit)
            })
            .map_err(|_| AllocError::new(layout))?;
        match DefaultResource.allocate(layout) {
            Ok(ptr) => {
                self.live.fetch_add(1, Ordering::Relaxed);
                Ok(ptr)
            }
            Err(e) => {
                self.in_use.fetch_sub(size, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        DefaultResource.deallocate(ptr, layout);
        self.in_use.fetch_sub(layout.size(), Ordering::Relaxed);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared handle to a memory resource. The default handle uses the global
/// allocator.
#[derive(Clone, Default)]
pub struct Storage {
    resource: Option<Arc<dyn MemoryResource>>,
}

impl Storage {
    pub fn new<R: MemoryResource + 'static>(resource: R) -> Self {
        Self::from_arc(Arc::new(resource))
    }

    /// Share an existing resource, keeping the caller's handle to it.
    pub fn from_arc<R: MemoryResource + 'static>(resource: Arc<R>) -> Self {
        Self {
            resource: Some(resource),
        }
    }

    /// True for the global-allocator handle.
    pub fn is_default(&self) -> bool {
        self.resource.is_none()
    }

    /// Whether blocks allocated through `self` may be freed through `other`.
    pub fn is_equal(&self, other: &Storage) -> bool {
        match (&self.resource, &other.resource) {
            (None, None) => true,
            (Some(a), Some(b)) => ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)) || a.is_equal(&**b),
            _ => false,
        }
    }

    pub(crate) fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        match &self.resource {
            Some(r) => r.allocate(layout),
            None => DefaultResource.allocate(layout),
        }
    }

    /// # Safety
    /// Same contract as `MemoryResource::deallocate`.
    pub(crate) unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        match &self.resource {
            Some(r) => r.deallocate(ptr, layout),
            None => DefaultResource.deallocate(ptr, layout),
        }
    }
}

impl PartialEq for Storage {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for Storage {}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            None => f.write_str("Storage(default)"),
            Some(r) => write!(f, "Storage({:p})", Arc::as_ptr(r)),
        }
    }
}
