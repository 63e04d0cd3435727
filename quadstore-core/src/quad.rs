//! Quads and quad patterns.

use crate::ids::TermId;
use crate::permutation::Column;
use std::fmt;

/// A stored statement: four surrogate ids plus the explicit/inferred flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quad {
    pub subject: TermId,
    pub predicate: TermId,
    pub object: TermId,
    pub context: TermId,
    /// `false` for inferred statements.
    pub explicit: bool,
}

impl Quad {
    /// An explicit quad.
    pub fn new(subject: TermId, predicate: TermId, object: TermId, context: TermId) -> Self {
        Self {
            subject,
            predicate,
            object,
            context,
            explicit: true,
        }
    }

    /// Shorthand over raw ids, mostly for tests.
    pub fn from_ids(s: u64, p: u64, o: u64, c: u64) -> Self {
        Self::new(TermId::new(s), TermId::new(p), TermId::new(o), TermId::new(c))
    }

    pub fn inferred(mut self) -> Self {
        self.explicit = false;
        self
    }

    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    #[inline]
    pub fn get(&self, column: Column) -> TermId {
        match column {
            Column::Subject => self.subject,
            Column::Predicate => self.predicate,
            Column::Object => self.object,
            Column::Context => self.context,
        }
    }

    /// The four ids in `s, p, o, c` order, ignoring the flag.
    #[inline]
    pub fn ids(&self) -> [TermId; 4] {
        [self.subject, self.predicate, self.object, self.context]
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}){}",
            self.subject.as_u64(),
            self.predicate.as_u64(),
            self.object.as_u64(),
            self.context.as_u64(),
            if self.explicit { "" } else { " [inferred]" }
        )
    }
}

/// One pattern column: a fixed id or a wildcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Binding {
    Bound(TermId),
    #[default]
    Unbound,
}

impl Binding {
    #[inline]
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    #[inline]
    pub fn id(&self) -> Option<TermId> {
        match self {
            Binding::Bound(id) => Some(*id),
            Binding::Unbound => None,
        }
    }

    #[inline]
    pub fn matches(&self, id: TermId) -> bool {
        match self {
            Binding::Bound(b) => *b == id,
            Binding::Unbound => true,
        }
    }
}

impl From<TermId> for Binding {
    fn from(id: TermId) -> Self {
        Binding::Bound(id)
    }
}

impl From<Option<TermId>> for Binding {
    fn from(id: Option<TermId>) -> Self {
        id.map_or(Binding::Unbound, Binding::Bound)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Bound(id) => write!(f, "{}", id.as_u64()),
            Binding::Unbound => write!(f, "?"),
        }
    }
}

/// A partially bound quad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct QuadPattern {
    pub subject: Binding,
    pub predicate: Binding,
    pub object: Binding,
    pub context: Binding,
}

impl QuadPattern {
    pub fn new(
        subject: impl Into<Binding>,
        predicate: impl Into<Binding>,
        object: impl Into<Binding>,
        context: impl Into<Binding>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            context: context.into(),
        }
    }

    /// Fully unbound pattern.
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern that binds exactly the ids of `quad`.
    pub fn exact(quad: &Quad) -> Self {
        Self::new(quad.subject, quad.predicate, quad.object, quad.context)
    }

    /// Shorthand over raw ids where `None` is unbound.
    pub fn from_options(s: Option<u64>, p: Option<u64>, o: Option<u64>, c: Option<u64>) -> Self {
        Self::new(
            s.map(TermId::new),
            p.map(TermId::new),
            o.map(TermId::new),
            c.map(TermId::new),
        )
    }

    #[inline]
    pub fn get(&self, column: Column) -> Binding {
        match column {
            Column::Subject => self.subject,
            Column::Predicate => self.predicate,
            Column::Object => self.object,
            Column::Context => self.context,
        }
    }

    pub fn bound_count(&self) -> usize {
        Column::ALL.iter().filter(|c| self.get(**c).is_bound()).count()
    }

    /// Reference semantics: every bound column equals the quad's column.
    pub fn matches(&self, quad: &Quad) -> bool {
        Column::ALL
            .iter()
            .all(|c| self.get(*c).matches(quad.get(*c)))
    }
}

impl fmt::Display for QuadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.subject, self.predicate, self.object, self.context
        )
    }
}
