//! Identity types for murmur
//!
//! Peers are named by a free-form origin string chosen at startup. Every
//! origin numbers its own rumors densely, starting at [`SeqNo::FIRST`].

use std::borrow::Borrow;
use std::fmt;

/// Peer identifier carried in the `Origin` field of rumors
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Origin(String);

impl Origin {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Origin(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Origin({})", self.0)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Origin {
    fn from(s: &str) -> Self {
        Origin(s.to_string())
    }
}

impl From<String> for Origin {
    fn from(s: String) -> Self {
        Origin(s)
    }
}

impl Borrow<str> for Origin {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Per-origin rumor sequence number. Valid values start at 1.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNo(pub u32);

impl SeqNo {
    /// The first sequence number an origin assigns
    pub const FIRST: SeqNo = SeqNo(1);

    #[inline]
    pub fn new(n: u32) -> Self {
        SeqNo(n)
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    /// The sequence number immediately after this one
    #[inline]
    pub fn next(self) -> SeqNo {
        SeqNo(self.0.saturating_add(1))
    }

    /// Zero is never assigned to a rumor
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 1
    }
}

impl Default for SeqNo {
    fn default() -> Self {
        SeqNo::FIRST
    }
}

impl fmt::Debug for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_next() {
        assert_eq!(SeqNo::FIRST.next(), SeqNo::new(2));
        assert_eq!(SeqNo::new(u32::MAX).next(), SeqNo::new(u32::MAX));
    }

    #[test]
    fn test_seq_validity() {
        assert!(!SeqNo::new(0).is_valid());
        assert!(SeqNo::FIRST.is_valid());
    }

    #[test]
    fn test_origin_ordering_and_borrow() {
        let a = Origin::from("alice");
        let b = Origin::from("bob");
        assert!(a < b);

        let mut map = std::collections::BTreeMap::new();
        map.insert(a.clone(), 1);
        assert_eq!(map.get("alice"), Some(&1));
        assert_eq!(a.to_string(), "alice");
    }
}
