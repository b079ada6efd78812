//! Standard error type for the core wrappers.

use std::io;

/// Core result type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised by one of the kernel primitive wrappers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A system call failed. Carries the OS error so callers can inspect the
    /// errno value (`raw_os_error`).
    #[error("{fn_name} failed: {source}")]
    Syscall {
        fn_name: &'static str,
        #[source]
        source: io::Error,
    },
    /// An argument could not be passed down to the kernel as given.
    #[error("{0}")]
    InvalidInput(String),
}

impl Error {
    /// Captures `errno` for a just-failed call to `fn_name`.
    pub(crate) fn last_os(fn_name: &'static str) -> Error {
        Error::Syscall {
            fn_name,
            source: io::Error::last_os_error(),
        }
    }

    /// Returns the raw OS error code for `Syscall` variants.
    pub fn raw_os_error(&self) -> Option<i32> {
        match *self {
            Error::Syscall { ref source, .. } => source.raw_os_error(),
            Error::InvalidInput(_) => None,
        }
    }
}
