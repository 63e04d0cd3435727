//! # Quadstore Core
//!
//! Engine-independent building blocks of the quad store.
//!
//! This crate provides:
//! - RDF [`Term`]s and their persisted byte form
//! - Surrogate ids ([`TermId`]), [`Quad`]s and [`QuadPattern`]s
//! - Column [`Permutation`]s and the fixed-width index key layout
//! - The byte [`RegionComparator`] used for key order and residual matching
//! - The shared [`Error`] type
//!
//! ## Design Principles
//!
//! 1. **No sentinels**: pattern columns are [`Binding::Bound`] or
//!    [`Binding::Unbound`]; id `0` is only ever the default graph
//! 2. **Order by bytes**: keys are big-endian ids, so unsigned byte order
//!    is the permutation's column order

pub mod comparator;
pub mod error;
pub mod ids;
pub mod permutation;
pub mod quad;
pub mod term;

pub use comparator::{compare_keys, RegionComparator, QUAD_KEY_COMPARATOR};
pub use error::{Error, Result, StorageContext};
pub use ids::TermId;
pub use permutation::{
    decode_value, encode_value, Column, IndexSpec, Permutation, DEFAULT_INDEX_SPEC,
    INDEX_STORE_PREFIX, KEY_LEN, VALUE_EXPLICIT, VALUE_INFERRED,
};
pub use quad::{Binding, Quad, QuadPattern};
pub use term::Term;
