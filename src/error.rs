//! Failure kinds surfaced by mutating operations.

use crate::storage::AllocError;
use crate::table::MAX_SIZE;
use core::convert::Infallible;
use core::fmt;

/// Why an insertion, reservation or construction did not happen.
///
/// `E` is the payload construction error of fallible inputs; operations
/// whose inputs cannot fail use the `Infallible` default. Whatever the
/// variant, the object is left exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertError<E = Infallible> {
    /// The resulting size would exceed `Object::max_size()`.
    TooLarge { requested: usize },
    /// The storage refused the table allocation.
    OutOfMemory(AllocError),
    /// Building a value for a new entry failed.
    Payload(E),
}

impl<E: fmt::Display> fmt::Display for InsertError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::TooLarge { requested } => write!(
                f,
                "object of {} elements exceeds the maximum of {}",
                requested, MAX_SIZE
            ),
            InsertError::OutOfMemory(e) => fmt::Display::fmt(e, f),
            InsertError::Payload(e) => write!(f, "value construction failed: {}", e),
        }
    }
}

impl<E> std::error::Error for InsertError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InsertError::TooLarge { .. } => None,
            InsertError::OutOfMemory(e) => Some(e),
            InsertError::Payload(e) => Some(e),
        }
    }
}

/// Failures of the capacity layer; these never carry a payload error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityError {
    TooLarge { requested: usize },
    OutOfMemory(AllocError),
}

impl<E> From<CapacityError> for InsertError<E> {
    fn from(e: CapacityError) -> Self {
        match e {
            CapacityError::TooLarge { requested } => InsertError::TooLarge { requested },
            CapacityError::OutOfMemory(e) => InsertError::OutOfMemory(e),
        }
    }
}

/// Unwrap the result of an operation behind an infallible trait method.
///
/// Mirrors `Vec`: allocation failure goes to the global handler and the size
/// limit panics.
pub(crate) fn infallible<T>(result: Result<T, InsertError>) -> T {
    match result {
        Ok(t) => t,
        Err(InsertError::OutOfMemory(e)) => std::alloc::handle_alloc_error(e.layout()),
        Err(InsertError::TooLarge { requested }) => {
            panic!("object of {} elements exceeds the maximum of {}", requested, MAX_SIZE)
        }
        Err(InsertError::Payload(never)) => match never {},
    }
}
