//! Definition: the archetype key (C4).
//!
//! A [`Definition`] is the triple of [`BitMask`]s — components present,
//! array-element types present, tag types present — that identifies an
//! archetype. Two entities share a chunk if and only if they share a
//! `Definition`. Definitions are the key of the world's chunk table
//! ([`crate::ecs::storage::Storage`]) and must be stable under reordering:
//! equality and hashing are defined over the triple of masks, never over
//! insertion order.

use std::hash::{Hash, Hasher};

use crate::ecs::bitmask::BitMask;

/// The three independent kinds a type index can belong to. Each kind has
/// its own dense index space, assigned by [`crate::ecs::schema::Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Component,
    Array,
    Tag,
}

/// A tagged handle to one type's index within its kind — pairs a kind with
/// the dense index `Schema` assigned it, so code that only has a `DataType`
/// (no compile-time `T`) can still test/flip the right bit of a
/// `Definition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub kind: DataKind,
    pub index: u32,
}

impl DataType {
    pub fn new(kind: DataKind, index: u32) -> Self {
        Self { kind, index }
    }
}

/// The archetype key: which components, array types, and tags an entity's
/// chunk holds.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    components: BitMask,
    arrays: BitMask,
    tags: BitMask,
}

impl Definition {
    pub fn new() -> Self {
        Self {
            components: BitMask::new(),
            arrays: BitMask::new(),
            tags: BitMask::new(),
        }
    }

    #[inline]
    pub fn components(&self) -> &BitMask {
        &self.components
    }

    #[inline]
    pub fn arrays(&self) -> &BitMask {
        &self.arrays
    }

    #[inline]
    pub fn tags(&self) -> &BitMask {
        &self.tags
    }

    /// Add a type of the given kind/index to this definition, returning a
    /// new `Definition` (definitions themselves are immutable once a chunk
    /// is keyed on them — archetype transitions always compute a fresh one).
    pub fn with(&self, ty: DataType) -> Self {
        let mut next = self.clone();
        next.set(ty, true);
        next
    }

    pub fn without(&self, ty: DataType) -> Self {
        let mut next = self.clone();
        next.set(ty, false);
        next
    }

    fn set(&mut self, ty: DataType, present: bool) {
        let mask = match ty.kind {
            DataKind::Component => &mut self.components,
            DataKind::Array => &mut self.arrays,
            DataKind::Tag => &mut self.tags,
        };
        if present {
            mask.set(ty.index as usize);
        } else {
            mask.clear(ty.index as usize);
        }
    }

    pub fn contains(&self, ty: DataType) -> bool {
        match ty.kind {
            DataKind::Component => self.components.contains(ty.index as usize),
            DataKind::Array => self.arrays.contains(ty.index as usize),
            DataKind::Tag => self.tags.contains(ty.index as usize),
        }
    }

    /// Whether `self` is a superset of `other` in every kind — used by the
    /// query engine's "required" masks and by `Archetype::supports`.
    pub fn contains_all(&self, other: &Definition) -> bool {
        self.components.contains_all(&other.components)
            && self.arrays.contains_all(&other.arrays)
            && self.tags.contains_all(&other.tags)
    }

    /// Whether `self` shares no component bit with `other` — used by the
    /// query engine's "excluded" mask.
    pub fn components_disjoint(&self, other: &BitMask) -> bool {
        self.components.is_disjoint(other)
    }

    pub fn tags_disjoint(&self, other: &BitMask) -> bool {
        self.tags.is_disjoint(other)
    }
}

impl PartialEq for Definition {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components && self.arrays == other.arrays && self.tags == other.tags
    }
}
impl Eq for Definition {}

impl Hash for Definition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
        self.arrays.hash(state);
        self.tags.hash(state);
    }
}
