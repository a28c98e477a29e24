//! Owned page payload.

use std::ops::{Deref, DerefMut};

/// An owned, fixed-length page payload.
///
/// Kept as a thin `Vec<u8>` wrapper rather than a fixed-size array since
/// the page size is a runtime property of the database, not a
/// compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageData(Vec<u8>);

impl PageData {
    /// A zero-filled page of the given size.
    #[must_use]
    pub fn zeroed(size: usize) -> Self {
        Self(vec![0_u8; size])
    }

    /// Wrap an already-sized buffer.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self(data)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for PageData {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<[u8]> for PageData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_has_requested_length() {
        let page = PageData::zeroed(1024);
        assert_eq!(page.len(), 1024);
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn deref_mut_allows_in_place_edits() {
        let mut page = PageData::zeroed(8);
        page[0] = 0xAA;
        assert_eq!(page[0], 0xAA);
    }
}
