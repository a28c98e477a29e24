//! The sticky error mask (§7): once a bit is set the pager refuses
//! further writes until it is reopened.

use bitflags::bitflags;

bitflags! {
    /// Bits mirroring the taxonomy subset that can poison a pager.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorMask: u8 {
        /// The disk or a configured size limit is full.
        const FULL = 1 << 0;
        /// A fallible allocation failed.
        const NOMEM = 1 << 1;
        /// A locking-protocol invariant was violated.
        const LOCK = 1 << 2;
        /// The database or journal image is malformed.
        const CORRUPT = 1 << 3;
        /// An I/O error was surfaced from the OS interface.
        const DISK = 1 << 4;
    }
}

impl ErrorMask {
    /// Whether any bit is set; once true the pager is poisoned.
    #[must_use]
    pub const fn is_poisoned(self) -> bool {
        !self.is_empty()
    }
}
