//! 1-based page numbers.

use std::fmt;
use std::num::NonZeroU32;

/// A 1-based page number. Page 0 is never a valid page; it is used in
/// the journal format as a terminator record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct PageNumber(NonZeroU32);

impl PageNumber {
    /// The first page of any database, holding the file header.
    pub const ONE: Self = Self(NonZeroU32::new(1).expect("1 is non-zero"));

    /// Build a page number, rejecting zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        match NonZeroU32::new(value) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The raw 1-based page number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Zero-based byte offset of this page within the database file.
    #[must_use]
    pub fn offset(self, page_size: u32) -> u64 {
        u64::from(self.get() - 1) * u64::from(page_size)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl TryFrom<u32> for PageNumber {
    type Error = PageNumberZeroError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(PageNumberZeroError)
    }
}

/// Page number 0 was used where a valid (1-based) page number is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageNumberZeroError;

impl fmt::Display for PageNumberZeroError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page number 0 is not a valid page")
    }
}

impl std::error::Error for PageNumberZeroError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(PageNumber::new(0).is_none());
        assert!(PageNumber::try_from(0).is_err());
    }

    #[test]
    fn one_round_trips() {
        assert_eq!(PageNumber::ONE.get(), 1);
        assert_eq!(PageNumber::new(1), Some(PageNumber::ONE));
    }

    #[test]
    fn offset_is_zero_based() {
        let p1 = PageNumber::new(1).unwrap();
        let p2 = PageNumber::new(2).unwrap();
        assert_eq!(p1.offset(1024), 0);
        assert_eq!(p2.offset(1024), 1024);
    }

    #[test]
    fn ordering_matches_numeric_order() {
        let a = PageNumber::new(3).unwrap();
        let b = PageNumber::new(7).unwrap();
        assert!(a < b);
    }
}
