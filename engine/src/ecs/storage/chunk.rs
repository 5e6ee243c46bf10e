//! Chunks: one archetype's worth of entity rows (C5).
//!
//! A [`Chunk`] is the columnar table for a single [`Definition`]: every
//! entity sharing that definition lives in the same chunk, at some row, and
//! each present component gets its own [`Column`]. Rows are not stable
//! across removal — `remove_row` swap-removes, matching the teacher's
//! `Table` compaction strategy, so callers must use the returned moved-entity
//! id to patch up that entity's slot.
//!
//! Chunks carry a monotonic `version` counter bumped on every structural or
//! data change. The query engine snapshots this at iteration start and
//! compares it at the end to detect `ChunkModifiedWhileIterating`.

use std::collections::HashMap;

use crate::ecs::{definition::Definition, entity, schema::Schema, storage::column::Column};

/// Dense identifier of a chunk within a [`super::Storage`]'s chunk table.
/// Chunks are never removed during a world's life, so this id is stable for
/// as long as the world exists — the entity directory's `Slot::chunk` field
/// can hold it as a non-owning, never-dangling reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(u32);

impl Id {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One archetype's rows.
pub struct Chunk {
    definition: Definition,
    entities: Vec<entity::Id>,
    columns: HashMap<u32, Column>,
    version: u64,
}

impl Chunk {
    pub fn new(definition: Definition, schema: &Schema) -> Self {
        let mut columns = HashMap::new();
        for index in definition.components().iter_ones() {
            let index = index as u32;
            let size = schema
                .component_size(index)
                .expect("definition references an unregistered component index") as usize;
            columns.insert(index, Column::new(size));
        }
        Self {
            definition,
            entities: Vec::new(),
            columns,
            version: 0,
        }
    }

    #[inline]
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn entities(&self) -> &[entity::Id] {
        &self.entities
    }

    pub fn entity_at(&self, row: usize) -> entity::Id {
        self.entities[row]
    }

    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Append a zero-initialized row for `entity`, returning its row index.
    pub fn add_entity(&mut self, entity: entity::Id) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in self.columns.values_mut() {
            column.push_zeroed();
        }
        self.touch();
        row
    }

    /// Remove `row` by swap-removing from every column and the entity list.
    /// Returns the entity that was moved into `row`'s place, if any.
    pub fn remove_row(&mut self, row: usize) -> Option<entity::Id> {
        let last = self.entities.len() - 1;
        let moved = if row != last {
            Some(self.entities[last])
        } else {
            None
        };
        self.entities.swap_remove(row);
        for column in self.columns.values_mut() {
            column.swap_remove(row);
        }
        self.touch();
        moved
    }

    pub fn component_bytes(&self, row: usize, component_index: u32) -> Option<&[u8]> {
        self.columns.get(&component_index).map(|c| c.get(row))
    }

    /// In-place mutable access to one row's component bytes. Deliberately
    /// does not `touch()` — §4.8 treats in-place component writes as
    /// non-structural, so they must not bump `version` (the query engine's
    /// `ChunkModifiedWhileIterating` detection relies on that: a
    /// `for_each_mut` snapshot must only ever see the version change when a
    /// row was actually added or removed mid-walk).
    pub fn component_bytes_mut(&mut self, row: usize, component_index: u32) -> Option<&mut [u8]> {
        self.columns.get_mut(&component_index).map(|c| c.get_mut(row))
    }

    pub fn set_component_bytes(&mut self, row: usize, component_index: u32, data: &[u8]) {
        if let Some(column) = self.columns.get_mut(&component_index) {
            column.set(row, data);
            self.touch();
        }
    }

    /// Copy every column's `src_row` into `dest_row` within this same chunk.
    /// Used by `clone_entity`, where the clone always shares its source's
    /// archetype and so never needs a migration — just a new row.
    pub fn copy_row_within(&mut self, src_row: usize, dest_row: usize) {
        for column in self.columns.values_mut() {
            column.copy_within(src_row, dest_row);
        }
        self.touch();
    }

    /// Copy every component row `src_row` shares with `dest`'s definition
    /// into the just-added last row of `dest`. Used by archetype
    /// transitions (`add_component`/`remove_component`/tag changes) to carry
    /// surviving component data across the old chunk → new chunk move.
    pub fn copy_shared_components_into(&self, src_row: usize, dest: &mut Chunk, dest_row: usize) {
        for (&index, src_column) in &self.columns {
            if let Some(dest_column) = dest.columns.get_mut(&index) {
                let data = src_column.get(src_row).to_vec();
                dest_column.set(dest_row, &data);
            }
        }
    }
}

impl Id {
    pub(super) fn new(index: u32) -> Self {
        Self(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Component;

    #[derive(Clone, Copy)]
    struct Weight(#[allow(dead_code)] f32);
    impl Component for Weight {
        fn type_name() -> &'static str {
            "loom_engine::storage::chunk::tests::Weight"
        }
    }

    #[test]
    fn add_entity_grows_every_column() {
        // Given
        let mut schema = Schema::new();
        let weight = schema.register_component::<Weight>().unwrap();
        let definition = Definition::new().with(weight);
        let mut chunk = Chunk::new(definition, &schema);
        let mut directory = entity::Directory::new();
        let e = directory.allocate();

        // When
        let row = chunk.add_entity(e.id());

        // Then
        assert_eq!(row, 0);
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.component_bytes(0, weight.index).unwrap().len(), 4);
    }

    #[test]
    fn remove_row_reports_the_moved_entity() {
        // Given
        let schema = Schema::new();
        let definition = Definition::new();
        let mut chunk = Chunk::new(definition, &schema);
        let mut directory = entity::Directory::new();
        let a = directory.allocate();
        let b = directory.allocate();
        chunk.add_entity(a.id());
        chunk.add_entity(b.id());

        // When
        let moved = chunk.remove_row(0);

        // Then
        assert_eq!(moved, Some(b.id()));
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.entity_at(0), b.id());
    }

    #[test]
    fn set_and_get_component_bytes_round_trip() {
        let mut schema = Schema::new();
        let weight = schema.register_component::<Weight>().unwrap();
        let definition = Definition::new().with(weight);
        let mut chunk = Chunk::new(definition, &schema);
        let mut directory = entity::Directory::new();
        let e = directory.allocate();
        chunk.add_entity(e.id());

        chunk.set_component_bytes(0, weight.index, &1.5f32.to_ne_bytes());
        let bytes = chunk.component_bytes(0, weight.index).unwrap();
        assert_eq!(f32::from_ne_bytes(bytes.try_into().unwrap()), 1.5);
    }

    #[test]
    fn copy_row_within_duplicates_component_bytes_into_a_new_row() {
        // Given
        let mut schema = Schema::new();
        let weight = schema.register_component::<Weight>().unwrap();
        let definition = Definition::new().with(weight);
        let mut chunk = Chunk::new(definition, &schema);
        let mut directory = entity::Directory::new();
        let a = directory.allocate();
        let b = directory.allocate();
        chunk.add_entity(a.id());
        chunk.set_component_bytes(0, weight.index, &2.5f32.to_ne_bytes());

        // When
        let dest_row = chunk.add_entity(b.id());
        chunk.copy_row_within(0, dest_row);

        // Then
        let bytes = chunk.component_bytes(dest_row, weight.index).unwrap();
        assert_eq!(f32::from_ne_bytes(bytes.try_into().unwrap()), 2.5);
    }

    #[test]
    fn version_bumps_on_mutation() {
        let schema = Schema::new();
        let mut chunk = Chunk::new(Definition::new(), &schema);
        let before = chunk.version();
        let mut directory = entity::Directory::new();
        let e = directory.allocate();
        chunk.add_entity(e.id());
        assert_ne!(chunk.version(), before);
    }
}
