//! Pager lifecycle state (§4.1) and the sync-safety knob (§4.9).

/// The pager's lifecycle state. Climbs monotonically within a
/// transaction and falls back to `Shared` or `Unlock` on commit,
/// rollback, or release (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub enum PagerState {
    #[default]
    Unlock,
    Shared,
    Reserved,
    Exclusive,
    Synced,
}

impl PagerState {
    /// Whether the pager currently holds at least a `Reserved` lock,
    /// i.e. is mid-write-transaction.
    #[must_use]
    pub const fn is_writing(self) -> bool {
        matches!(self, Self::Reserved | Self::Exclusive | Self::Synced)
    }
}

/// Controls the `no_sync` / `full_sync` flags named throughout the
/// pager's field list (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SafetyLevel {
    /// Never fsync; fastest, least durable. Appropriate for scratch or
    /// temporary databases that can be rebuilt after a crash.
    Off,
    /// Sync the journal once before flushing pages, and sync the
    /// database file on commit. The default.
    #[default]
    Normal,
    /// Sync the journal twice around writing its record count, in
    /// addition to the `Normal` syncs, to survive disks that reorder
    /// writes within a single fsync.
    Full,
}

impl SafetyLevel {
    #[must_use]
    pub const fn no_sync(self) -> bool {
        matches!(self, Self::Off)
    }

    #[must_use]
    pub const fn full_sync(self) -> bool {
        matches!(self, Self::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ordering_matches_lifecycle() {
        assert!(PagerState::Unlock < PagerState::Shared);
        assert!(PagerState::Shared < PagerState::Reserved);
        assert!(PagerState::Reserved < PagerState::Exclusive);
        assert!(PagerState::Exclusive < PagerState::Synced);
    }

    #[test]
    fn is_writing_only_true_from_reserved_up() {
        assert!(!PagerState::Unlock.is_writing());
        assert!(!PagerState::Shared.is_writing());
        assert!(PagerState::Reserved.is_writing());
        assert!(PagerState::Exclusive.is_writing());
        assert!(PagerState::Synced.is_writing());
    }

    #[test]
    fn safety_level_flags() {
        assert!(SafetyLevel::Off.no_sync());
        assert!(!SafetyLevel::Normal.no_sync());
        assert!(!SafetyLevel::Normal.full_sync());
        assert!(SafetyLevel::Full.full_sync());
    }
}
