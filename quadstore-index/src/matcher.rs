//! Residual key filters.
//!
//! A prefix range scan over-includes keys whose bound columns sit after the
//! first unbound column of the chosen permutation. A [`Matcher`] holds one
//! `(byte offset, expected bytes)` check per such column and rejects exactly
//! those false positives.

use quadstore_core::RegionComparator;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Check {
    offset: usize,
    expected: RegionComparator,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Matcher {
    checks: Vec<Check>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `expected` at `offset` in every accepted key.
    pub fn push(&mut self, offset: usize, expected: &[u8]) {
        self.checks.push(Check {
            offset,
            expected: RegionComparator::capture(expected, 0, expected.len()),
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// `(offset, expected)` pairs in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.checks.iter().map(|c| (c.offset, c.expected.region()))
    }

    /// True when every check holds for `key`.
    #[inline]
    pub fn matches(&self, key: &[u8]) -> bool {
        self.checks
            .iter()
            .all(|c| c.expected.matches(key, c.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matcher_accepts_everything() {
        assert!(Matcher::new().matches(&[1, 2, 3]));
    }

    #[test]
    fn all_checks_must_hold() {
        let mut m = Matcher::new();
        m.push(1, &[7]);
        m.push(3, &[9, 9]);
        assert_eq!(m.len(), 2);
        assert!(m.matches(&[0, 7, 0, 9, 9]));
        assert!(!m.matches(&[0, 7, 0, 9, 8]));
        assert!(!m.matches(&[0, 6, 0, 9, 9]));
        assert!(!m.matches(&[0, 7, 0, 9]));
        let entries: Vec<_> = m.entries().collect();
        assert_eq!(entries, vec![(1, &[7u8][..]), (3, &[9u8, 9][..])]);
    }
}
