//! Column permutations and the physical key layout.
//!
//! Each index stores every quad under a 32-byte key: the four ids in the
//! permutation's column order, 8 bytes big-endian each. Unsigned byte order
//! of the keys is therefore the permutation's column order.
//!
//! | Permutation | Key layout |
//! |-------------|------------|
//! | `spoc` | s, p, o, c |
//! | `posc` | p, o, s, c |
//! | `cspo` | c, s, p, o |

use crate::error::{Error, Result};
use crate::ids::TermId;
use crate::quad::Quad;
use std::fmt;
use std::str::FromStr;

/// Width of every index key.
pub const KEY_LEN: usize = 4 * TermId::WIDTH;

/// Value byte for explicit quads.
pub const VALUE_EXPLICIT: u8 = 0x1;
/// Value byte for inferred quads.
pub const VALUE_INFERRED: u8 = 0x0;

/// Index spec used when none is configured.
pub const DEFAULT_INDEX_SPEC: &str = "spoc,posc";

/// Prefix of index sub-store names (`triples-spoc`).
pub const INDEX_STORE_PREFIX: &str = "triples-";

// ============================================================================
// Column
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    Subject,
    Predicate,
    Object,
    Context,
}

impl Column {
    pub const ALL: [Column; 4] = [
        Column::Subject,
        Column::Predicate,
        Column::Object,
        Column::Context,
    ];

    pub fn letter(self) -> char {
        match self {
            Column::Subject => 's',
            Column::Predicate => 'p',
            Column::Object => 'o',
            Column::Context => 'c',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            's' => Some(Column::Subject),
            'p' => Some(Column::Predicate),
            'o' => Some(Column::Object),
            'c' => Some(Column::Context),
            _ => None,
        }
    }
}

// ============================================================================
// Permutation
// ============================================================================

/// One column ordering. Defines both the key byte layout and sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Permutation {
    columns: [Column; 4],
}

impl Permutation {
    pub const SPOC: Permutation = Permutation::from_columns_unchecked([
        Column::Subject,
        Column::Predicate,
        Column::Object,
        Column::Context,
    ]);
    pub const POSC: Permutation = Permutation::from_columns_unchecked([
        Column::Predicate,
        Column::Object,
        Column::Subject,
        Column::Context,
    ]);
    pub const OSPC: Permutation = Permutation::from_columns_unchecked([
        Column::Object,
        Column::Subject,
        Column::Predicate,
        Column::Context,
    ]);
    pub const CSPO: Permutation = Permutation::from_columns_unchecked([
        Column::Context,
        Column::Subject,
        Column::Predicate,
        Column::Object,
    ]);

    const fn from_columns_unchecked(columns: [Column; 4]) -> Self {
        Self { columns }
    }

    /// Build from columns; each column must appear exactly once.
    pub fn from_columns(columns: [Column; 4]) -> Result<Self> {
        for c in Column::ALL {
            if !columns.contains(&c) {
                return Err(Error::invalid_index_spec(format!(
                    "permutation {:?} is missing column '{}'",
                    columns,
                    c.letter()
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Parse a four-letter spec such as `"posc"` (case-insensitive).
    pub fn parse(spec: &str) -> Result<Self> {
        let letters: Vec<char> = spec.trim().chars().collect();
        if letters.len() != 4 {
            return Err(Error::invalid_index_spec(format!(
                "'{spec}' must be exactly four of the letters s, p, o, c"
            )));
        }
        let mut columns = [Column::Subject; 4];
        for (slot, ch) in columns.iter_mut().zip(&letters) {
            *slot = Column::from_letter(*ch).ok_or_else(|| {
                Error::invalid_index_spec(format!("'{spec}' contains unknown column '{ch}'"))
            })?;
        }
        Self::from_columns(columns).map_err(|_| {
            Error::invalid_index_spec(format!("'{spec}' must name each of s, p, o, c once"))
        })
    }

    #[inline]
    pub fn columns(&self) -> &[Column; 4] {
        &self.columns
    }

    #[inline]
    pub fn first(&self) -> Column {
        self.columns[0]
    }

    pub fn name(&self) -> String {
        self.columns.iter().map(|c| c.letter()).collect()
    }

    /// Sub-store name holding this index.
    pub fn store_name(&self) -> String {
        format!("{INDEX_STORE_PREFIX}{}", self.name())
    }

    /// Position of `column` in this order.
    #[inline]
    pub fn position(&self, column: Column) -> usize {
        self.columns
            .iter()
            .position(|c| *c == column)
            .unwrap_or_default()
    }

    /// Byte offset of `column` inside a key.
    #[inline]
    pub fn column_offset(&self, column: Column) -> usize {
        self.position(column) * TermId::WIDTH
    }

    /// Serialize the quad's ids in this column order.
    pub fn encode_key(&self, quad: &Quad) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        for (i, column) in self.columns.iter().enumerate() {
            let off = i * TermId::WIDTH;
            key[off..off + TermId::WIDTH].copy_from_slice(&quad.get(*column).to_be_bytes());
        }
        key
    }

    /// Inverse of [`Permutation::encode_key`]. The returned quad is explicit;
    /// the flag lives in the value.
    pub fn decode_key(&self, key: &[u8]) -> Option<Quad> {
        if key.len() != KEY_LEN {
            return None;
        }
        let mut ids = [TermId::DEFAULT_GRAPH; 4];
        for (i, column) in self.columns.iter().enumerate() {
            let id = TermId::read_be(&key[i * TermId::WIDTH..])?;
            let slot = match column {
                Column::Subject => 0,
                Column::Predicate => 1,
                Column::Object => 2,
                Column::Context => 3,
            };
            ids[slot] = id;
        }
        Some(Quad::new(ids[0], ids[1], ids[2], ids[3]))
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.columns {
            write!(f, "{}", c.letter())?;
        }
        Ok(())
    }
}

impl FromStr for Permutation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[inline]
pub fn encode_value(explicit: bool) -> [u8; 1] {
    [if explicit {
        VALUE_EXPLICIT
    } else {
        VALUE_INFERRED
    }]
}

#[inline]
pub fn decode_value(value: &[u8]) -> bool {
    value.first().is_some_and(|b| b & VALUE_EXPLICIT != 0)
}

// ============================================================================
// IndexSpec
// ============================================================================

/// An ordered, duplicate-free list of permutations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    permutations: Vec<Permutation>,
}

impl IndexSpec {
    /// Parse `"spoc, posc"`-style specs. Entries are separated by commas or
    /// whitespace; an empty spec means [`DEFAULT_INDEX_SPEC`].
    pub fn parse(spec: &str) -> Result<Self> {
        let entries: Vec<&str> = spec
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect();
        if entries.is_empty() {
            return Self::parse(DEFAULT_INDEX_SPEC);
        }
        let mut permutations: Vec<Permutation> = Vec::with_capacity(entries.len());
        for entry in entries {
            let perm = Permutation::parse(entry)?;
            if permutations.contains(&perm) {
                return Err(Error::invalid_index_spec(format!(
                    "index '{perm}' listed more than once"
                )));
            }
            permutations.push(perm);
        }
        Ok(Self { permutations })
    }

    pub fn from_permutations(permutations: Vec<Permutation>) -> Result<Self> {
        if permutations.is_empty() {
            return Err(Error::invalid_index_spec("at least one index is required"));
        }
        for (i, p) in permutations.iter().enumerate() {
            if permutations[..i].contains(p) {
                return Err(Error::invalid_index_spec(format!(
                    "index '{p}' listed more than once"
                )));
            }
        }
        Ok(Self { permutations })
    }

    #[inline]
    pub fn permutations(&self) -> &[Permutation] {
        &self.permutations
    }

    pub fn contains(&self, perm: &Permutation) -> bool {
        self.permutations.contains(perm)
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self {
            permutations: vec![Permutation::SPOC, Permutation::POSC],
        }
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.permutations.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

impl FromStr for IndexSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_any_case() {
        assert_eq!(Permutation::parse("POSC").unwrap(), Permutation::POSC);
        assert_eq!("cspo".parse::<Permutation>().unwrap(), Permutation::CSPO);
        assert_eq!(Permutation::OSPC.to_string(), "ospc");
        assert_eq!(Permutation::SPOC.store_name(), "triples-spoc");
    }

    #[test]
    fn parse_rejects_bad_permutations() {
        for bad in ["spo", "spocc", "spox", "sppc", ""] {
            assert!(
                matches!(Permutation::parse(bad), Err(Error::InvalidIndexSpec(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn key_layout_follows_column_order() {
        let q = Quad::from_ids(1, 2, 3, 4);
        let key = Permutation::POSC.encode_key(&q);
        assert_eq!(TermId::read_be(&key[0..]), Some(TermId::new(2)));
        assert_eq!(TermId::read_be(&key[8..]), Some(TermId::new(3)));
        assert_eq!(TermId::read_be(&key[16..]), Some(TermId::new(1)));
        assert_eq!(TermId::read_be(&key[24..]), Some(TermId::new(4)));
        assert_eq!(Permutation::POSC.column_offset(Column::Subject), 16);
        assert_eq!(Permutation::POSC.decode_key(&key), Some(q));
        assert_eq!(Permutation::POSC.decode_key(&key[..31]), None);
    }

    #[test]
    fn key_order_is_column_order() {
        let a = Permutation::SPOC.encode_key(&Quad::from_ids(1, 300, 0, 0));
        let b = Permutation::SPOC.encode_key(&Quad::from_ids(2, 1, 0, 0));
        assert!(a < b);
    }

    #[test]
    fn value_flag() {
        assert_eq!(encode_value(true), [VALUE_EXPLICIT]);
        assert!(decode_value(&encode_value(true)));
        assert!(!decode_value(&encode_value(false)));
        assert!(!decode_value(&[]));
    }

    #[test]
    fn index_spec_parsing() {
        let spec = IndexSpec::parse(" SPOC, posc  cspo ").unwrap();
        assert_eq!(
            spec.permutations(),
            &[Permutation::SPOC, Permutation::POSC, Permutation::CSPO]
        );
        assert_eq!(spec.to_string(), "spoc,posc,cspo");
        assert_eq!(IndexSpec::parse("").unwrap(), IndexSpec::default());
        assert!(matches!(
            IndexSpec::parse("spoc,SPOC"),
            Err(Error::InvalidIndexSpec(_))
        ));
        assert!(matches!(
            IndexSpec::from_permutations(vec![]),
            Err(Error::InvalidIndexSpec(_))
        ));
    }
}
