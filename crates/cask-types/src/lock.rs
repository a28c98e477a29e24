//! The five-level file-lock primitive consumed by the VFS trait (§6).

/// Lock levels a `VfsFile` can hold, in strictly increasing strength.
///
/// `Pending` is never held for long: it exists only to stop new readers
/// from arriving while a writer waits out the readers already present,
/// and is traversed transparently on the way to `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum LockLevel {
    #[default]
    None,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

impl LockLevel {
    /// Whether this level permits concurrent readers.
    #[must_use]
    pub const fn allows_concurrent_readers(self) -> bool {
        matches!(self, Self::None | Self::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_monotonic_by_strength() {
        assert!(LockLevel::None < LockLevel::Shared);
        assert!(LockLevel::Shared < LockLevel::Reserved);
        assert!(LockLevel::Reserved < LockLevel::Pending);
        assert!(LockLevel::Pending < LockLevel::Exclusive);
    }

    #[test]
    fn only_none_and_shared_allow_concurrent_readers() {
        assert!(LockLevel::None.allows_concurrent_readers());
        assert!(LockLevel::Shared.allows_concurrent_readers());
        assert!(!LockLevel::Reserved.allows_concurrent_readers());
        assert!(!LockLevel::Pending.allows_concurrent_readers());
        assert!(!LockLevel::Exclusive.allows_concurrent_readers());
    }
}
