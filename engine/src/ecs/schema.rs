//! Schema: per-world type-index assignment (C3).
//!
//! Where [`crate::ecs::component::TypeRegistry`] is a process-wide table of
//! *what a type looks like*, `Schema` is a per-world table of *which small
//! integer this world uses for it*, kept separately per
//! [`crate::ecs::definition::DataKind`] (component / array / tag). Indices
//! are assigned densely and monotonically starting at zero within each
//! kind, and refusing the `WIDTH`+1'th registration is how
//! `DefinitionCapacityExceeded` becomes reachable.

use std::collections::HashMap;

use crate::ecs::{
    bitmask::WIDTH,
    component::{self, ArrayElement, Component, Tag, TypeHash, TypeRegistry},
    definition::{DataKind, DataType},
    world::error::WorldError,
};

/// One kind's worth of assignments: name-hash → dense index, plus the size
/// recorded for that index (0 for tags).
#[derive(Debug, Default, Clone)]
struct Namespace {
    by_hash: HashMap<TypeHash, u32>,
    sizes: Vec<u16>,
    hashes: Vec<TypeHash>,
}

impl Namespace {
    fn register(&mut self, hash: TypeHash, size: u16) -> Result<u32, WorldError> {
        if let Some(&idx) = self.by_hash.get(&hash) {
            return Ok(idx);
        }
        if self.hashes.len() >= WIDTH {
            return Err(WorldError::DefinitionCapacityExceeded);
        }
        let index = self.hashes.len() as u32;
        self.by_hash.insert(hash, index);
        self.sizes.push(size);
        self.hashes.push(hash);
        Ok(index)
    }

    fn index_of(&self, hash: TypeHash) -> Option<u32> {
        self.by_hash.get(&hash).copied()
    }

    fn size_of(&self, index: u32) -> Option<u16> {
        self.sizes.get(index as usize).copied()
    }

    fn hash_of(&self, index: u32) -> Option<TypeHash> {
        self.hashes.get(index as usize).copied()
    }

    fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// Reserved tag index used to encode the "locally disabled" state as a tag
/// occupant of the entity's `Definition`. Always present at index 0 of the
/// tag namespace, in every schema.
pub const DISABLED_TAG_INDEX: u32 = 0;
const DISABLED_TAG_NAME: &str = "loom_engine::__Disabled";

/// Per-world assignment of dense indices to component/array/tag types.
pub struct Schema {
    components: Namespace,
    arrays: Namespace,
    tags: Namespace,
}

impl Schema {
    pub fn new() -> Self {
        let mut tags = Namespace::default();
        let disabled_hash = component::registry::hash_name(DISABLED_TAG_NAME);
        let idx = tags
            .register(disabled_hash, 0)
            .expect("the reserved Disabled tag always fits in an empty namespace");
        debug_assert_eq!(idx, DISABLED_TAG_INDEX);

        Self {
            components: Namespace::default(),
            arrays: Namespace::default(),
            tags,
        }
    }

    /// The reserved tag index used to encode "locally disabled".
    pub fn disabled_tag(&self) -> DataType {
        DataType::new(DataKind::Tag, DISABLED_TAG_INDEX)
    }

    pub fn register_component<T: Component>(&mut self) -> Result<DataType, WorldError> {
        Self::register_typed::<T>(&mut self.components, DataKind::Component, T::type_name, T::fields)
    }

    pub fn register_array_element<T: ArrayElement>(&mut self) -> Result<DataType, WorldError> {
        Self::register_typed::<T>(&mut self.arrays, DataKind::Array, T::type_name, T::fields)
    }

    pub fn register_tag<T: Tag>(&mut self) -> Result<DataType, WorldError> {
        let registry = TypeRegistry::global();
        let hash = registry.register::<T>(T::type_name(), 0, &[]);
        let index = self.tags.register(hash, 0)?;
        Ok(DataType::new(DataKind::Tag, index))
    }

    fn register_typed<T: 'static>(
        namespace: &mut Namespace,
        kind: DataKind,
        type_name: fn() -> &'static str,
        fields: fn() -> &'static [component::Field],
    ) -> Result<DataType, WorldError> {
        let registry = TypeRegistry::global();
        let size = std::mem::size_of::<T>();
        let hash = registry.register::<T>(type_name(), size, fields());
        let index = namespace.register(
            hash,
            u16::try_from(size).expect("component/array element larger than 64KiB"),
        )?;
        Ok(DataType::new(kind, index))
    }

    pub fn component_type<T: Component>(&self) -> Option<DataType> {
        let hash = TypeRegistry::global().hash_of::<T>()?;
        let index = self.components.index_of(hash)?;
        Some(DataType::new(DataKind::Component, index))
    }

    pub fn array_type<T: ArrayElement>(&self) -> Option<DataType> {
        let hash = TypeRegistry::global().hash_of::<T>()?;
        let index = self.arrays.index_of(hash)?;
        Some(DataType::new(DataKind::Array, index))
    }

    pub fn tag_type<T: Tag>(&self) -> Option<DataType> {
        let hash = component::registry::hash_name(T::type_name());
        self.tags.index_of(hash).map(|i| DataType::new(DataKind::Tag, i))
    }

    /// Size in bytes of the component at `index` (0 for array element sizes
    /// use `array_element_size`; tags are always 0).
    pub fn component_size(&self, index: u32) -> Option<u16> {
        self.components.size_of(index)
    }

    pub fn array_element_size(&self, index: u32) -> Option<u16> {
        self.arrays.size_of(index)
    }

    pub fn type_hash_for(&self, ty: DataType) -> Option<TypeHash> {
        match ty.kind {
            DataKind::Component => self.components.hash_of(ty.index),
            DataKind::Array => self.arrays.hash_of(ty.index),
            DataKind::Tag => self.tags.hash_of(ty.index),
        }
    }

    /// Register a type by raw hash/size within `kind`'s namespace, without
    /// going through a concrete Rust type. Used by the binary codec
    /// (§4.10) to rebuild a schema from a stream of `TypeLayout`s.
    pub fn register_raw_in(&mut self, kind: DataKind, hash: TypeHash, size: u16) -> Result<u32, WorldError> {
        let namespace = match kind {
            DataKind::Component => &mut self.components,
            DataKind::Array => &mut self.arrays,
            DataKind::Tag => &mut self.tags,
        };
        namespace.register(hash, size)
    }

    /// The dense index this schema assigned to `hash` within `kind`, if any.
    /// Used by `World::append` to translate a source world's type indices
    /// into this schema's indices.
    pub fn index_by_hash(&self, kind: DataKind, hash: TypeHash) -> Option<u32> {
        match kind {
            DataKind::Component => self.components.index_of(hash),
            DataKind::Array => self.arrays.index_of(hash),
            DataKind::Tag => self.tags.index_of(hash),
        }
    }

    /// Merge another schema's assignments into this one. Applied to an
    /// empty schema, produces identical indices to `other` (assignment
    /// order is preserved because registration is monotonic).
    pub fn copy_from(&mut self, other: &Schema) -> Result<(), WorldError> {
        Self::merge_namespace(&mut self.components, &other.components)?;
        Self::merge_namespace(&mut self.arrays, &other.arrays)?;
        // Skip index 0 of tags: both schemas already reserve it for Disabled.
        for i in 1..other.tags.len() as u32 {
            let hash = other.tags.hash_of(i).unwrap();
            self.tags.register(hash, 0)?;
        }
        Ok(())
    }

    fn merge_namespace(dest: &mut Namespace, src: &Namespace) -> Result<(), WorldError> {
        for i in 0..src.len() as u32 {
            let hash = src.hash_of(i).unwrap();
            let size = src.size_of(i).unwrap();
            dest.register(hash, size)?;
        }
        Ok(())
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}
