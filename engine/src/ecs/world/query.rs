//! Query engine (C8): chunk-major iteration over entities matching an
//! include/exclude predicate, with concurrent-modification detection.
//!
//! Two flavors, both built on the same chunk-walk: [`Query`] yields bare
//! entity ids (optionally filtered further by the caller), and
//! [`ComponentQuery`] (for one to four component types, via the [`Fetch`]
//! trait) yields `(Entity, &mut C1, ...)` tuples. Both snapshot every
//! visited chunk's `version` at entry and detect a change on the next
//! advance, matching the teacher's raw-pointer column-access idiom
//! (`storage/cell.rs`) rather than trying to prove column disjointness to
//! the borrow checker.

use crate::ecs::{
    bitmask::BitMask,
    component::Component,
    definition::{DataKind, DataType, Definition},
    entity::Entity,
    schema::Schema,
    storage::{Chunk, chunk},
    world::{World, error::WorldError},
};

/// Include/exclude predicate a query matches chunks against.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    pub required_components: BitMask,
    pub excluded_components: BitMask,
    pub required_tags: BitMask,
    pub excluded_tags: BitMask,
    pub include_disabled: bool,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_component(mut self, ty: DataType) -> Self {
        debug_assert_eq!(ty.kind, DataKind::Component);
        self.required_components.set(ty.index as usize);
        self
    }

    pub fn exclude_component(mut self, ty: DataType) -> Self {
        debug_assert_eq!(ty.kind, DataKind::Component);
        self.excluded_components.set(ty.index as usize);
        self
    }

    pub fn require_tag(mut self, ty: DataType) -> Self {
        debug_assert_eq!(ty.kind, DataKind::Tag);
        self.required_tags.set(ty.index as usize);
        self
    }

    pub fn exclude_tag(mut self, ty: DataType) -> Self {
        debug_assert_eq!(ty.kind, DataKind::Tag);
        self.excluded_tags.set(ty.index as usize);
        self
    }

    pub fn include_disabled(mut self, include: bool) -> Self {
        self.include_disabled = include;
        self
    }

    fn matches(&self, definition: &Definition, schema: &Schema) -> bool {
        if !definition.components().contains_all(&self.required_components) {
            return false;
        }
        if !definition.components_disjoint(&self.excluded_components) {
            return false;
        }
        if !definition.tags().contains_all(&self.required_tags) {
            return false;
        }
        if !definition.tags_disjoint(&self.excluded_tags) {
            return false;
        }
        if !self.include_disabled && definition.contains(schema.disabled_tag()) {
            return false;
        }
        true
    }
}

/// Untagged iteration: entity ids only.
pub struct Query<'w> {
    world: &'w World,
    predicate: Predicate,
}

impl<'w> Query<'w> {
    pub fn new(world: &'w World, predicate: Predicate) -> Self {
        Self { world, predicate }
    }

    pub fn iter(&self) -> QueryIter<'w> {
        let chunk_ids: Vec<chunk::Id> = self
            .world
            .storage
            .matching(|def| self.predicate.matches(def, &self.world.schema))
            .collect();
        let snapshots = chunk_ids.iter().map(|&id| self.world.storage.get(id).version()).collect();
        QueryIter {
            world: self.world,
            chunk_ids,
            snapshots,
            chunk_cursor: 0,
            row_cursor: 0,
        }
    }
}

pub struct QueryIter<'w> {
    world: &'w World,
    chunk_ids: Vec<chunk::Id>,
    snapshots: Vec<u64>,
    chunk_cursor: usize,
    row_cursor: usize,
}

impl Iterator for QueryIter<'_> {
    type Item = Result<Entity, WorldError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk_id = *self.chunk_ids.get(self.chunk_cursor)?;
            let chunk = self.world.storage.get(chunk_id);

            if chunk.version() != self.snapshots[self.chunk_cursor] {
                self.chunk_cursor += 1;
                self.row_cursor = 0;
                return Some(Err(WorldError::ChunkModifiedWhileIterating));
            }

            if self.row_cursor < chunk.len() {
                let entity_id = chunk.entity_at(self.row_cursor);
                self.row_cursor += 1;
                let entity = self
                    .world
                    .directory
                    .entity_for_id(entity_id)
                    .expect("a row always names a live entity");
                return Some(Ok(entity));
            }

            self.chunk_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

/// What a [`ComponentQuery`] fetches per matching row. Implemented for
/// `C: Component` and for tuples of up to four such types.
pub trait Fetch {
    type Item<'a>;

    fn type_list(schema: &mut Schema) -> Result<Vec<DataType>, WorldError>;

    /// # Safety
    /// `indices` must have one entry per type in `type_list`'s order, and
    /// `row` must be `< chunk.len()`.
    unsafe fn get<'a>(chunk: &'a mut Chunk, indices: &[u32], row: usize) -> Self::Item<'a>;
}

impl<C: Component> Fetch for C {
    type Item<'a> = &'a mut C;

    fn type_list(schema: &mut Schema) -> Result<Vec<DataType>, WorldError> {
        Ok(vec![schema.register_component::<C>()?])
    }

    unsafe fn get<'a>(chunk: &'a mut Chunk, indices: &[u32], row: usize) -> Self::Item<'a> {
        let bytes = chunk.component_bytes_mut(row, indices[0]).expect("type_list index is always present on a matching chunk");
        unsafe { &mut *(bytes.as_mut_ptr() as *mut C) }
    }
}

macro_rules! impl_fetch_tuple {
    ($($c:ident : $i:tt),+) => {
        impl<$($c: Component),+> Fetch for ($($c,)+) {
            type Item<'a> = ($(&'a mut $c,)+);

            fn type_list(schema: &mut Schema) -> Result<Vec<DataType>, WorldError> {
                Ok(vec![$(schema.register_component::<$c>()?),+])
            }

            unsafe fn get<'a>(chunk: &'a mut Chunk, indices: &[u32], row: usize) -> Self::Item<'a> {
                // Each `$c`'s column is a distinct entry in the chunk's column
                // map; re-deriving the pointer per field is how disjoint
                // mutable access across a type-erased map is expressed
                // without a safe split-borrow API for it.
                let raw = chunk as *mut Chunk;
                ($({
                    let bytes = unsafe { (&mut *raw).component_bytes_mut(row, indices[$i]) }
                        .expect("type_list index is always present on a matching chunk");
                    unsafe { &mut *(bytes.as_mut_ptr() as *mut $c) }
                },)+)
            }
        }
    };
}

impl_fetch_tuple!(C1: 0, C2: 1);
impl_fetch_tuple!(C1: 0, C2: 1, C3: 2);
impl_fetch_tuple!(C1: 0, C2: 1, C3: 2, C4: 3);

/// Typed iteration over one to four component types at once.
pub struct ComponentQuery<'w, F: Fetch> {
    world: &'w mut World,
    predicate: Predicate,
    indices: Vec<u32>,
    _marker: std::marker::PhantomData<F>,
}

impl<'w, F: Fetch> ComponentQuery<'w, F> {
    pub fn new(world: &'w mut World) -> Result<Self, WorldError> {
        let types = F::type_list(&mut world.schema)?;
        let mut predicate = Predicate::new();
        for &ty in &types {
            predicate = predicate.require_component(ty);
        }
        let indices = types.iter().map(|ty| ty.index).collect();
        Ok(Self {
            world,
            predicate,
            indices,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn with_predicate(mut self, f: impl FnOnce(Predicate) -> Predicate) -> Self {
        self.predicate = f(self.predicate);
        self
    }

    /// Visit every matching row, chunk-major and row-ascending, raising
    /// `ChunkModifiedWhileIterating` if a chunk's structure changed partway
    /// through visiting it (already-yielded rows are unaffected).
    pub fn for_each_mut(&mut self, mut f: impl FnMut(Entity, F::Item<'_>)) -> Result<(), WorldError> {
        let chunk_ids: Vec<chunk::Id> = self
            .world
            .storage
            .matching(|def| self.predicate.matches(def, &self.world.schema))
            .collect();

        for chunk_id in chunk_ids {
            let snapshot = self.world.storage.get(chunk_id).version();
            let len = self.world.storage.get(chunk_id).len();

            for row in 0..len {
                let chunk = self.world.storage.get_mut(chunk_id);
                let entity_id = chunk.entity_at(row);
                let entity = self
                    .world
                    .directory
                    .entity_for_id(entity_id)
                    .expect("a row always names a live entity");
                let item = unsafe { F::get(chunk, &self.indices, row) };
                f(entity, item);
            }

            if self.world.storage.get(chunk_id).version() != snapshot {
                return Err(WorldError::ChunkModifiedWhileIterating);
            }
        }
        Ok(())
    }
}
