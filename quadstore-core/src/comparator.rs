//! Byte region comparison.
//!
//! [`RegionComparator`] captures a reference region once and compares it
//! against candidate buffers at arbitrary offsets. It backs the residual
//! matchers of the planner; [`compare_keys`] is the same unsigned byte order
//! applied to whole keys and is registered with the engine as the sort order
//! of every index sub-store.

use quadstore_kv::KeyComparator;
use std::cmp::Ordering;

/// Engine comparator for quad keys.
pub const QUAD_KEY_COMPARATOR: KeyComparator = KeyComparator::new("quad-key", compare_keys);

#[inline]
fn byte_diff(reference: u8, candidate: u8) -> i32 {
    reference as i32 - candidate as i32
}

/// A captured reference byte region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionComparator {
    region: Box<[u8]>,
}

impl RegionComparator {
    /// Copy `len` bytes of `source` starting at `offset`.
    ///
    /// The region is clamped to the bytes actually available in `source`.
    pub fn capture(source: &[u8], offset: usize, len: usize) -> Self {
        let start = offset.min(source.len());
        let end = offset.saturating_add(len).min(source.len());
        Self {
            region: source[start..end].into(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    #[inline]
    pub fn region(&self) -> &[u8] {
        &self.region
    }

    /// Compare the region against `candidate[candidate_offset..]`.
    ///
    /// Position 0 uses `reference_first_byte` in place of the captured first
    /// byte; positions `1..len` use the captured bytes. Bytes are unsigned.
    /// Returns `reference - candidate` at the first differing position, or 0
    /// when the whole region matches. A candidate that ends inside the region
    /// compares below it (positive result).
    ///
    /// An empty region compares equal to anything.
    pub fn compare(&self, reference_first_byte: u8, candidate: &[u8], candidate_offset: usize) -> i32 {
        if self.region.is_empty() {
            return 0;
        }
        for i in 0..self.region.len() {
            let reference = if i == 0 {
                reference_first_byte
            } else {
                self.region[i]
            };
            let Some(&c) = candidate_offset
                .checked_add(i)
                .and_then(|pos| candidate.get(pos))
            else {
                return 1 + reference as i32;
            };
            let d = byte_diff(reference, c);
            if d != 0 {
                return d;
            }
        }
        0
    }

    /// True when `candidate` holds exactly the captured region at `offset`.
    #[inline]
    pub fn matches(&self, candidate: &[u8], offset: usize) -> bool {
        match self.region.first() {
            Some(&first) => self.compare(first, candidate, offset) == 0,
            None => true,
        }
    }
}

/// Unsigned lexicographic order; a proper prefix sorts first.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    for (&x, &y) in a.iter().zip(b) {
        let d = byte_diff(x, y);
        if d != 0 {
            return d.cmp(&0);
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_region_compares_equal() {
        let src = [9u8, 1, 2, 3, 4];
        let cmp = RegionComparator::capture(&src, 1, 3);
        assert_eq!(cmp.region(), &[1, 2, 3]);
        assert_eq!(cmp.compare(1, &[0, 0, 1, 2, 3], 2), 0);
        assert!(cmp.matches(&[1, 2, 3], 0));
    }

    #[test]
    fn first_byte_comes_from_caller() {
        let cmp = RegionComparator::capture(&[5, 6], 0, 2);
        assert_eq!(cmp.compare(7, &[5, 6], 0), 2);
        assert_eq!(cmp.compare(5, &[5, 6], 0), 0);
    }

    #[test]
    fn bytes_are_unsigned() {
        let cmp = RegionComparator::capture(&[0x80], 0, 1);
        assert!(cmp.compare(0x80, &[0x7f], 0) > 0);
        assert_eq!(cmp.compare(0xff, &[0x00], 0), 255);
    }

    #[test]
    fn empty_region_is_always_equal() {
        let cmp = RegionComparator::capture(&[1, 2, 3], 1, 0);
        assert!(cmp.is_empty());
        assert_eq!(cmp.compare(42, &[], 0), 0);
        assert_eq!(cmp.compare(0, &[9, 9], 5), 0);
    }

    #[test]
    fn short_candidate_sorts_below() {
        let cmp = RegionComparator::capture(&[0, 0], 0, 2);
        assert!(cmp.compare(0, &[0], 0) > 0);
    }

    #[test]
    fn capture_clamps_to_source() {
        let cmp = RegionComparator::capture(&[1, 2, 3], 2, 10);
        assert_eq!(cmp.region(), &[3]);
        assert!(RegionComparator::capture(&[1], 5, 2).is_empty());
    }

    #[test]
    fn key_order_is_unsigned_lexicographic() {
        assert_eq!(compare_keys(&[1, 2], &[1, 3]), Ordering::Less);
        assert_eq!(compare_keys(&[0xff], &[0x00, 0x01]), Ordering::Greater);
        assert_eq!(compare_keys(&[1], &[1, 0]), Ordering::Less);
        assert_eq!(compare_keys(&[4, 4], &[4, 4]), Ordering::Equal);
        assert_eq!(QUAD_KEY_COMPARATOR.name(), "quad-key");
    }
}
