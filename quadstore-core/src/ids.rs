//! Surrogate identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate id standing in for one RDF term (u64).
///
/// The dictionary allocates from 1. `0` is [`TermId::DEFAULT_GRAPH`], the
/// context column of quads in the unnamed graph; it never maps to a term.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct TermId(u64);

impl TermId {
    /// Context of quads in the default graph.
    pub const DEFAULT_GRAPH: Self = Self(0);
    /// First id handed out by a dictionary.
    pub const FIRST: Self = Self(1);
    /// Encoded width in bytes.
    pub const WIDTH: usize = 8;

    #[inline]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_default_graph(self) -> bool {
        self.0 == 0
    }

    /// Big-endian bytes, so byte order matches numeric order.
    #[inline]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Read an id from the first 8 bytes of `buf`.
    #[inline]
    pub fn read_be(buf: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = buf.get(..8)?.try_into().ok()?;
        Some(Self::from_be_bytes(bytes))
    }
}

impl From<u64> for TermId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermId({})", self.0)
    }
}
