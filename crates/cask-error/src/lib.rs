//! The error taxonomy (§7) shared by the VFS and pager crates.

use std::fmt;

pub type Result<T> = std::result::Result<T, CaskError>;

/// Status codes the pager and its OS interface can surface.
///
/// `Ok` is not a variant here; it is `Result::Ok`. Everything else in
/// this enum is something the caller must react to: retry (`Busy`),
/// roll back (`Corrupt`, `Full`), or treat as a programming error
/// (`Misuse`).
#[derive(Debug, thiserror::Error)]
pub enum CaskError {
    /// A generic error surfaced from the SQL layer above the pager; the
    /// pager itself never constructs this variant but higher layers
    /// share this taxonomy.
    #[error("{0}")]
    Error(String),

    /// A lock could not be acquired right now; the busy handler gets a
    /// chance to ask for a retry.
    #[error("database is locked (busy)")]
    Busy,

    /// Another connection holds a lock that conflicts with the
    /// requested operation, and no retry is appropriate.
    #[error("database table is locked")]
    Locked,

    /// A fallible allocation failed.
    #[error("out of memory")]
    NoMem,

    /// A write was attempted against a read-only pager.
    #[error("attempt to write a readonly database")]
    ReadOnly,

    /// An I/O error from the OS interface.
    #[error("disk I/O error: {0}")]
    IoErr(#[from] std::io::Error),

    /// The database or journal image is malformed.
    #[error("database disk image is malformed: {0}")]
    Corrupt(String),

    /// The disk (or a configured size limit) is full.
    #[error("database or disk is full")]
    Full,

    /// The database file could not be opened.
    #[error("unable to open database file: {0}")]
    CantOpen(String),

    /// A locking-protocol invariant was violated (e.g. a lock was
    /// dropped and re-acquired by someone else between steps).
    #[error("locking protocol error")]
    Protocol,

    /// The caller used the API incorrectly (reentrancy, a value out of
    /// the valid range, a call in the wrong state).
    #[error("bad parameter or API misuse: {0}")]
    Misuse(String),

    /// A value (page number, master-journal length, ...) did not fit
    /// the range the format requires.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    /// An internal invariant was violated; always a bug, never a user
    /// input problem.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CaskError {
    /// Build an [`CaskError::Internal`] from anything `Display`-able.
    pub fn internal(msg: impl fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }

    /// Build an [`CaskError::Misuse`] from anything `Display`-able.
    pub fn misuse(msg: impl fmt::Display) -> Self {
        Self::Misuse(msg.to_string())
    }

    /// Build an [`CaskError::Corrupt`] from anything `Display`-able.
    pub fn corrupt(msg: impl fmt::Display) -> Self {
        Self::Corrupt(msg.to_string())
    }

    /// Whether this error should poison the pager until the next
    /// `open` (§7: "Fatal / sticky").
    #[must_use]
    pub const fn is_sticky(&self) -> bool {
        matches!(self, Self::Corrupt(_) | Self::Protocol)
    }
}
