//! Error values returned by datastore operations
//!
//! Every failure maps onto a stable negative integer through
//! [`DatastoreError::code`], so firmware-facing glue can keep passing plain
//! status codes around.

use thiserror::Error;

/// errno values used for the integer mapping
mod errno {
    pub const ESRCH: i32 = 3;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const ERANGE: i32 = 34;
    pub const ENOMSG: i32 = 42;
    pub const EBADMSG: i32 = 74;
    pub const ENOBUFS: i32 = 105;
    pub const ESHUTDOWN: i32 = 108;
}

/// Failure reported by a subscriber callback
///
/// Codes are always negative. A callback that only wants to say "something
/// went wrong" should use [`CallbackError::io`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("subscriber callback failed with code {0}")]
pub struct CallbackError(i32);

impl CallbackError {
    /// Wrap a callback status code. Non-negative codes are not failures, and
    /// are folded into the generic I/O failure.
    pub fn new(code: i32) -> Self {
        if code < 0 {
            CallbackError(code)
        } else {
            CallbackError::io()
        }
    }

    /// The generic callback failure
    pub fn io() -> Self {
        CallbackError(-errno::EIO)
    }

    /// The subscriber could not keep up and refused the payload
    pub fn would_block() -> Self {
        CallbackError(-errno::EAGAIN)
    }

    /// The consumer behind the subscriber has gone away
    pub fn closed() -> Self {
        CallbackError(-errno::ESHUTDOWN)
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreError {
    #[error("Invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("Datapoint range {start}+{count} is outside of 0..{total}")]
    InvalidRange {
        start: usize,
        count: usize,
        total: usize,
    },
    #[error("Subscription not found")]
    NotFound,
    #[error("Subscription registry is full ({capacity} entries)")]
    Full { capacity: usize },
    #[error("No payload buffer available before the allocation timeout")]
    PoolExhausted,
    #[error(transparent)]
    Callback(#[from] CallbackError),
    #[error("Unable to allocate memory for the subscription registries")]
    OutOfMemory,
    #[error("Payload could not be decoded")]
    Decode,
    #[error("The datastore service did not answer in time")]
    Timeout,
    #[error("The datastore service request queue is full")]
    QueueFull,
    #[error("The datastore service is stopping or has stopped")]
    ServiceClosed,
}

impl DatastoreError {
    /// The negative status code for this error
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArg(_) => -errno::EINVAL,
            Self::InvalidRange { .. } => -errno::ERANGE,
            Self::NotFound => -errno::ESRCH,
            Self::Full { .. } => -errno::ENOBUFS,
            Self::PoolExhausted => -errno::ENOSPC,
            Self::Callback(err) => err.code(),
            Self::OutOfMemory => -errno::ENOMEM,
            Self::Decode => -errno::EBADMSG,
            Self::Timeout => -errno::EAGAIN,
            Self::QueueFull => -errno::ENOMSG,
            Self::ServiceClosed => -errno::ESHUTDOWN,
        }
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for DatastoreError {
    fn from(_: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        DatastoreError::Decode
    }
}

/// Collapse a datastore result into the integer status convention
pub fn status_code(result: &Result<(), DatastoreError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}
