use std::fmt;

/// Reason an advisory lock could not be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    InUse,        // Held by another process
    Unsupported,  // Filesystem doesn't do locking
    FdLimit,      // Out of file descriptors
    Unknown,
}

impl fmt::Display for LockFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            LockFailure::InUse => "already locked",
            LockFailure::Unsupported => "locking not supported",
            LockFailure::FdLimit => "file descriptor limit reached",
            LockFailure::Unknown => "unknown failure",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structural or encoding invariant violated on disk
    DatabaseCorrupt,
    /// Missing file, bad block size, no valid revision
    DatabaseOpening,
    /// Read/write syscall failure
    Database,
    DatabaseLock(LockFailure),
    /// Value doesn't fit its encoded field
    Range,
    InvalidArgument,
    InvalidOperation,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn corrupt(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::DatabaseCorrupt, context.into())
    }

    pub fn opening(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::DatabaseOpening, context.into())
    }

    pub fn range(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Range, context.into())
    }

    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, context.into())
    }

    pub fn invalid_operation(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidOperation, context.into())
    }

    pub fn is_corrupt(&self) -> bool {
        self.kind == ErrorKind::DatabaseCorrupt
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Database,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::DatabaseCorrupt,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
