//! World-level error type (§7).
//!
//! Hand-rolled rather than built with `thiserror`, matching the teacher's
//! own `ConflictError` convention elsewhere in the crate: a plain enum with
//! a manual `Display` impl and a no-op `Error::source`.

use std::fmt;

use crate::ecs::{component::TypeHash, entity};

/// Every failure mode a [`super::World`] mutation can report. Distinct from
/// a panic: these are expected, recoverable conditions a caller is meant to
/// match on (an unknown entity id, a duplicate component add), not
/// programmer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldError {
    /// The given entity id names no live entity (never allocated, already
    /// destroyed, or a stale/generation-mismatched handle).
    EntityDoesNotExist(entity::Id),
    ComponentAlreadyPresent(entity::Id, TypeHash),
    ComponentAbsent(entity::Id, TypeHash),
    ArrayAlreadyPresent(entity::Id, TypeHash),
    ArrayAbsent(entity::Id, TypeHash),
    TagAlreadyPresent(entity::Id, TypeHash),
    TagAbsent(entity::Id, TypeHash),
    /// A reference handle named an index outside `0..referenceCount` for
    /// its owning entity.
    ReferenceOutOfRange(entity::Id, u32),
    /// Setting `child`'s parent to `parent` would create a cycle in the
    /// parent/child graph.
    ParentCycle(entity::Id, entity::Id),
    /// A query iterator observed its chunk's version counter change
    /// mid-iteration.
    ChunkModifiedWhileIterating,
    /// A type named by hash has never been registered in this world's
    /// schema (or, for `append`, in the source world's schema).
    TypeNotRegistered(TypeHash),
    /// A component/array/tag namespace is already at its `WIDTH`-wide
    /// capacity and cannot accept one more *distinct* type.
    IndexSpaceExhausted,
    /// Registering one more type in a namespace would exceed `WIDTH`.
    DefinitionCapacityExceeded,
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::EntityDoesNotExist(id) => write!(f, "entity {} does not exist", id.get()),
            WorldError::ComponentAlreadyPresent(id, hash) => {
                write!(f, "entity {} already has component {hash}", id.get())
            }
            WorldError::ComponentAbsent(id, hash) => {
                write!(f, "entity {} has no component {hash}", id.get())
            }
            WorldError::ArrayAlreadyPresent(id, hash) => {
                write!(f, "entity {} already has array {hash}", id.get())
            }
            WorldError::ArrayAbsent(id, hash) => write!(f, "entity {} has no array {hash}", id.get()),
            WorldError::TagAlreadyPresent(id, hash) => {
                write!(f, "entity {} already has tag {hash}", id.get())
            }
            WorldError::TagAbsent(id, hash) => write!(f, "entity {} has no tag {hash}", id.get()),
            WorldError::ReferenceOutOfRange(id, handle) => {
                write!(f, "entity {} has no reference handle {handle}", id.get())
            }
            WorldError::ParentCycle(child, parent) => write!(
                f,
                "setting {} as parent of {} would create a cycle",
                parent.get(),
                child.get()
            ),
            WorldError::ChunkModifiedWhileIterating => {
                write!(f, "chunk was modified while a query iterator was reading it")
            }
            WorldError::TypeNotRegistered(hash) => write!(f, "type {hash} is not registered"),
            WorldError::IndexSpaceExhausted => write!(f, "type index space is exhausted"),
            WorldError::DefinitionCapacityExceeded => {
                write!(f, "definition capacity exceeded: namespace already holds the maximum number of types")
            }
        }
    }
}

impl std::error::Error for WorldError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_the_entity_id() {
        let mut directory = entity::Directory::new();
        let e = directory.allocate();
        let err = WorldError::EntityDoesNotExist(e.id());
        assert!(err.to_string().contains(&e.id().get().to_string()));
    }
}
