//! Standard error type shared by every `evl` service.

/// Standard result type. Success (`Ok`) stands for the `NORMAL` outcome.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failure codes the services report.
///
/// Every public operation on the per-thread services returns one of these;
/// nothing is thrown across the boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An entry for the given key (descriptor, timer identity, message
    /// number, mailbox) is already present.
    #[error("already exists")]
    AlreadyExists,
    /// No entry for the given key.
    #[error("not found")]
    NotFound,
    /// An argument was rejected before reaching the kernel, e.g. an empty
    /// readiness mask.
    #[error("invalid argument")]
    InvalidArg,
    /// The operation was invoked from a thread that does not own the
    /// instance. Per-thread services are a correctness boundary, not a
    /// hint; nothing is mutated when this is returned.
    #[error("not owned by the calling thread")]
    WrongThread,
    /// A kernel primitive failed underneath the service. The service stays
    /// usable; the caller may retry once the underlying condition clears.
    #[error("internal fault: {0}")]
    Internal(String),
}

impl From<evl_core::Error> for Error {
    fn from(err: evl_core::Error) -> Error {
        Error::Internal(err.to_string())
    }
}
