//! Query pattern planning.
//!
//! Pure selection and construction, no state:
//!
//! 1. For each available permutation, `prefix_len` is the number of leading
//!    columns (in that permutation's order) that are bound, stopping at the
//!    first unbound one.
//! 2. The permutation with the longest prefix wins; ties go to the one
//!    declared first.
//! 3. The scan range is the bound prefix padded with `0x00` (low) and `0xFF`
//!    (high). Keys are fixed width, so the inclusive range `[low, high]`
//!    holds exactly the keys sharing the prefix.
//! 4. Bound columns after the first unbound one become matcher checks.

use crate::matcher::Matcher;
use quadstore_core::{Error, Permutation, QuadPattern, Result, TermId, KEY_LEN};
use std::fmt;

/// Inclusive key range `[low, high]`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub low: [u8; KEY_LEN],
    pub high: [u8; KEY_LEN],
}

impl ScanRange {
    /// The whole key space.
    pub const FULL: ScanRange = ScanRange {
        low: [0x00; KEY_LEN],
        high: [0xFF; KEY_LEN],
    };

    #[inline]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= &self.low[..] && key <= &self.high[..]
    }

    /// True when `key` sorts after the range.
    #[inline]
    pub fn is_past(&self, key: &[u8]) -> bool {
        key > &self.high[..]
    }

    #[inline]
    pub fn is_point(&self) -> bool {
        self.low == self.high
    }
}

impl fmt::Debug for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn hex(bytes: &[u8]) -> String {
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        }
        f.debug_struct("ScanRange")
            .field("low", &hex(&self.low))
            .field("high", &hex(&self.high))
            .finish()
    }
}

/// Everything a record iterator needs to scan one index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    pub permutation: Permutation,
    pub prefix_len: usize,
    pub range: ScanRange,
    pub matcher: Option<Matcher>,
}

/// Leading bound columns of `pattern` in `perm` order.
pub fn prefix_len(perm: &Permutation, pattern: &QuadPattern) -> usize {
    perm.columns()
        .iter()
        .take_while(|c| pattern.get(**c).is_bound())
        .count()
}

/// Pick the permutation with the longest bound prefix and plan the scan.
pub fn plan(available: &[Permutation], pattern: &QuadPattern) -> Result<QueryPlan> {
    let mut best: Option<(Permutation, usize)> = None;
    for perm in available {
        let len = prefix_len(perm, pattern);
        if best.map_or(true, |(_, best_len)| len > best_len) {
            best = Some((*perm, len));
        }
    }
    let (perm, _) = best.ok_or_else(|| Error::invalid_index_spec("no index available"))?;
    let plan = plan_with(perm, pattern);
    tracing::trace!(
        %pattern,
        index = %plan.permutation,
        prefix_len = plan.prefix_len,
        matcher = plan.matcher.as_ref().map_or(0, Matcher::len),
        "planned pattern"
    );
    Ok(plan)
}

/// Plan a scan of `perm` regardless of how well it fits the pattern.
pub fn plan_with(perm: Permutation, pattern: &QuadPattern) -> QueryPlan {
    let prefix = prefix_len(&perm, pattern);
    let mut range = ScanRange::FULL;
    let mut matcher = Matcher::new();

    for (pos, column) in perm.columns().iter().enumerate() {
        let Some(id) = pattern.get(*column).id() else {
            continue;
        };
        let offset = pos * TermId::WIDTH;
        let bytes = id.to_be_bytes();
        if pos < prefix {
            range.low[offset..offset + TermId::WIDTH].copy_from_slice(&bytes);
            range.high[offset..offset + TermId::WIDTH].copy_from_slice(&bytes);
        } else {
            matcher.push(offset, &bytes);
        }
    }

    QueryPlan {
        permutation: perm,
        prefix_len: prefix,
        range,
        matcher: (!matcher.is_empty()).then_some(matcher),
    }
}
