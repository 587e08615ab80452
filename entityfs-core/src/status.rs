//! Surface-independent error kinds (`spec.md` §7). Every subsystem error
//! enum implements `StatusKindExt::kind` so the composer and the FUSE
//! adapter can map to kernel error codes without matching on every
//! concrete variant.

/// A surface-independent error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Entity, file, or namespace absent.
    NotFound,
    /// Bad filename, bad query, missing required field.
    InvalidArgument,
    /// Revision conflict, type conflict (file vs directory), already-exists.
    FailedPrecondition,
    /// Sharding-key missing, SQLite error, checksum computation error.
    Internal,
    /// Unrecognized query clause or request variant.
    Unimplemented,
    /// Caller cancelled the in-flight operation.
    Cancelled,
    /// The operation's deadline elapsed before it completed.
    DeadlineExceeded,
}

/// Implemented by every subsystem error enum so callers can classify an
/// error without depending on that subsystem's concrete error type.
pub trait StatusKindExt {
    fn kind(&self) -> StatusKind;
}

impl StatusKind {
    /// Map to a raw `libc` errno value, per `spec.md` §4.7 / §7:
    /// NotFound -> ENOENT, Cancelled -> EINTR, everything else -> EIO.
    pub fn to_errno(self) -> i32 {
        match self {
            StatusKind::NotFound => libc::ENOENT,
            StatusKind::Cancelled => libc::EINTR,
            StatusKind::InvalidArgument
            | StatusKind::FailedPrecondition
            | StatusKind::Internal
            | StatusKind::Unimplemented
            | StatusKind::DeadlineExceeded => libc::EIO,
        }
    }
}
