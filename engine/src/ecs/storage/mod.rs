//! Chunk storage: the world's archetype table (C5, C7).
//!
//! [`Storage`] maps each distinct [`Definition`] to the [`chunk::Chunk`]
//! holding every entity with that exact component/array/tag set. Chunks are
//! created lazily on first use and are never removed for the life of the
//! world — an archetype that becomes empty keeps its (empty) chunk rather
//! than being torn down, so [`chunk::Id`]s handed out to the entity
//! directory never dangle.

use std::collections::HashMap;

use crate::ecs::{definition::Definition, schema::Schema};

pub mod chunk;
pub mod column;

pub use chunk::Chunk;

/// The world's chunk table: `Definition -> Chunk`, plus the dense id each
/// chunk is addressed by.
#[derive(Default)]
pub struct Storage {
    chunks: Vec<Chunk>,
    by_definition: HashMap<Definition, chunk::Id>,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            by_definition: HashMap::new(),
        }
    }

    /// Look up or lazily create the chunk for `definition`.
    pub fn get_or_create(&mut self, definition: Definition, schema: &Schema) -> chunk::Id {
        if let Some(&id) = self.by_definition.get(&definition) {
            return id;
        }
        let id = chunk::Id::new(self.chunks.len() as u32);
        self.chunks.push(Chunk::new(definition.clone(), schema));
        self.by_definition.insert(definition, id);
        id
    }

    pub fn get(&self, id: chunk::Id) -> &Chunk {
        &self.chunks[id.index()]
    }

    pub fn get_mut(&mut self, id: chunk::Id) -> &mut Chunk {
        &mut self.chunks[id.index()]
    }

    /// Mutable access to two distinct chunks at once — needed by archetype
    /// transitions, which copy a row from the old chunk into a freshly
    /// added row of the new one.
    pub fn get_pair_mut(&mut self, a: chunk::Id, b: chunk::Id) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a.index(), b.index(), "get_pair_mut requires distinct chunks");
        if a.index() < b.index() {
            let (left, right) = self.chunks.split_at_mut(b.index());
            (&mut left[a.index()], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(a.index());
            (&mut right[0], &mut left[b.index()])
        }
    }

    /// All chunks whose definition satisfies `predicate` — the set the
    /// query engine iterates.
    pub fn matching(
        &self,
        mut predicate: impl FnMut(&Definition) -> bool,
    ) -> impl Iterator<Item = chunk::Id> + '_ {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(move |(i, chunk)| predicate(chunk.definition()).then(|| chunk::Id::new(i as u32)))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Component;

    #[derive(Clone, Copy)]
    struct Mass(#[allow(dead_code)] f32);
    impl Component for Mass {
        fn type_name() -> &'static str {
            "loom_engine::storage::tests::Mass"
        }
    }

    #[test]
    fn get_or_create_is_idempotent_per_definition() {
        // Given
        let schema = Schema::new();
        let mut storage = Storage::new();
        let def = Definition::new();
        // When
        let a = storage.get_or_create(def.clone(), &schema);
        let b = storage.get_or_create(def, &schema);
        // Then
        assert_eq!(a, b);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn distinct_definitions_get_distinct_chunks() {
        let mut schema = Schema::new();
        let mass = schema.register_component::<Mass>().unwrap();
        let mut storage = Storage::new();
        let a = storage.get_or_create(Definition::new(), &schema);
        let b = storage.get_or_create(Definition::new().with(mass), &schema);
        assert_ne!(a, b);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn matching_filters_by_predicate() {
        let mut schema = Schema::new();
        let mass = schema.register_component::<Mass>().unwrap();
        let mut storage = Storage::new();
        storage.get_or_create(Definition::new(), &schema);
        storage.get_or_create(Definition::new().with(mass), &schema);

        let matches: Vec<_> = storage.matching(|def| def.contains(mass)).collect();
        assert_eq!(matches.len(), 1);
    }
}
