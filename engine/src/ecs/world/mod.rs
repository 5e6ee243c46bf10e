//! The World: the ECS's single entry point (C7).
//!
//! A `World` owns everything an application needs to create, query, and
//! destroy entities: the per-world [`Schema`] (type-index assignment), the
//! [`entity::Directory`] (id -> slot), the [`Storage`] (archetype chunks),
//! the [`ReferenceTable`], and the change-notification [`notify::Registry`].
//! Every structural mutation funnels through [`World::migrate`], which is
//! also the core the operation buffer's replay loop reuses by calling the
//! `*_raw` methods directly with a `DataType` instead of a compile-time
//! generic.

pub mod error;
pub mod notify;
pub mod operation;
pub mod query;
pub mod serialize;

use std::collections::HashMap;

use crate::ecs::{
    component::{self, ArrayElement, BoxedValue, Component, Tag, TypeHash},
    definition::{DataKind, DataType, Definition},
    entity::{self, Entity, State},
    reference::{self, ReferenceTable},
    schema::{self, Schema},
    storage::{Storage, chunk},
    world::error::WorldError,
};

/// A value (or tuple of values) that can be inserted into a freshly created
/// entity in one call. Implemented for any single [`Component`] and, via
/// `impl_bundle_tuple!`, for tuples of up to six — one differently-generic-
/// arity method per component count isn't something Rust's inherent-method
/// rules allow for a single name, so each arity gets its own macro-generated
/// impl instead.
pub trait Bundle {
    fn insert_into(self, world: &mut World, entity: Entity) -> Result<(), WorldError>;
}

impl<C: Component> Bundle for C {
    fn insert_into(self, world: &mut World, entity: Entity) -> Result<(), WorldError> {
        world.add_component(entity, self)
    }
}

macro_rules! impl_bundle_tuple {
    ($($c:ident),+) => {
        impl<$($c: Component),+> Bundle for ($($c,)+) {
            #[allow(non_snake_case)]
            fn insert_into(self, world: &mut World, entity: Entity) -> Result<(), WorldError> {
                let ($($c,)+) = self;
                $(world.add_component(entity, $c)?;)+
                Ok(())
            }
        }
    };
}

impl_bundle_tuple!(C1, C2);
impl_bundle_tuple!(C1, C2, C3);
impl_bundle_tuple!(C1, C2, C3, C4);
impl_bundle_tuple!(C1, C2, C3, C4, C5);
impl_bundle_tuple!(C1, C2, C3, C4, C5, C6);

/// The ECS world.
pub struct World {
    schema: Schema,
    directory: entity::Directory,
    storage: Storage,
    references: ReferenceTable,
    notify: notify::Registry,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(),
            directory: entity::Directory::new(),
            storage: Storage::new(),
            references: ReferenceTable::new(),
            notify: notify::Registry::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    pub fn directory(&self) -> &entity::Directory {
        &self.directory
    }

    pub fn listen_entity_lifecycle(&mut self, callback: notify::LifecycleCallback) {
        self.notify.listen_entity_lifecycle(callback);
    }

    pub fn listen_data_changes(&mut self, callback: notify::DataChangeCallback) {
        self.notify.listen_data_changes(callback);
    }

    // --- Creation -----------------------------------------------------

    pub fn create_entity(&mut self) -> Entity {
        self.create_entity_in(Definition::new())
    }

    pub fn create_entity_in(&mut self, definition: Definition) -> Entity {
        let entity = self.directory.allocate();
        let chunk_id = self.storage.get_or_create(definition, &self.schema);
        let row = self.storage.get_mut(chunk_id).add_entity(entity.id());
        let slot = self.directory.slot_mut(entity).expect("just allocated");
        slot.chunk = Some(chunk_id);
        slot.row = row;
        self.notify.notify_lifecycle(entity, true);
        log::trace!("created entity {:?} in chunk {:?} row {row}", entity.id(), chunk_id);
        entity
    }

    pub fn create_entities(&mut self, count: usize, definition: Definition) -> Vec<Entity> {
        (0..count).map(|_| self.create_entity_in(definition.clone())).collect()
    }

    pub fn create_entity_with<B: Bundle>(&mut self, bundle: B) -> Result<Entity, WorldError> {
        let entity = self.create_entity();
        bundle.insert_into(self, entity)?;
        Ok(entity)
    }

    // --- Archetype transitions -----------------------------------------

    /// Move `entity` to the chunk for `new_definition`, copying every
    /// component the old and new definitions share, and patching up the
    /// swap-moved entity left behind in the old chunk. Every
    /// add/remove-component/tag/array operation and `setEnabled` funnels
    /// through here.
    fn migrate(&mut self, entity: Entity, new_definition: Definition) -> Result<(chunk::Id, usize), WorldError> {
        let slot = self.directory.slot(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let old_chunk_id = slot.chunk.expect("every live entity has a chunk");
        let old_row = slot.row;

        let new_chunk_id = self.storage.get_or_create(new_definition, &self.schema);
        if new_chunk_id == old_chunk_id {
            return Ok((old_chunk_id, old_row));
        }

        let new_row = self.storage.get_mut(new_chunk_id).add_entity(entity.id());
        let (old_chunk, new_chunk) = self.storage.get_pair_mut(old_chunk_id, new_chunk_id);
        old_chunk.copy_shared_components_into(old_row, new_chunk, new_row);

        if let Some(moved) = self.storage.get_mut(old_chunk_id).remove_row(old_row) {
            if let Some(moved_slot) = self.directory.slot_by_id_mut(moved) {
                moved_slot.row = old_row;
            }
        }

        let slot = self.directory.slot_mut(entity).expect("migrate does not destroy the entity");
        slot.chunk = Some(new_chunk_id);
        slot.row = new_row;
        log::trace!("migrated entity {:?} from chunk {:?} to {:?}", entity.id(), old_chunk_id, new_chunk_id);
        Ok((new_chunk_id, new_row))
    }

    fn definition_of(&self, entity: Entity) -> Result<Definition, WorldError> {
        let slot = self.directory.slot(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let chunk_id = slot.chunk.expect("every live entity has a chunk");
        Ok(self.storage.get(chunk_id).definition().clone())
    }

    fn component_hash<T: Component>() -> TypeHash {
        component::registry::hash_name(T::type_name())
    }

    fn tag_hash<T: Tag>() -> TypeHash {
        component::registry::hash_name(T::type_name())
    }

    fn array_hash<T: ArrayElement>() -> TypeHash {
        component::registry::hash_name(T::type_name())
    }

    // --- Components -----------------------------------------------------

    pub(crate) fn add_component_raw(&mut self, entity: Entity, ty: DataType, bytes: &[u8]) -> Result<(), WorldError> {
        let definition = self.definition_of(entity)?;
        if definition.contains(ty) {
            let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
            return Err(WorldError::ComponentAlreadyPresent(entity.id(), hash));
        }
        let (chunk_id, row) = self.migrate(entity, definition.with(ty))?;
        self.storage.get_mut(chunk_id).set_component_bytes(row, ty.index, bytes);
        self.notify.notify_data_change(entity, DataKind::Component, ty.index, true);
        Ok(())
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), WorldError> {
        let ty = self.schema.register_component::<T>()?;
        let boxed = BoxedValue::from_value(value);
        self.add_component_raw(entity, ty, boxed.as_slice())
    }

    pub(crate) fn remove_component_raw(&mut self, entity: Entity, ty: DataType) -> Result<(), WorldError> {
        let definition = self.definition_of(entity)?;
        if !definition.contains(ty) {
            let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
            return Err(WorldError::ComponentAbsent(entity.id(), hash));
        }
        self.migrate(entity, definition.without(ty))?;
        self.notify.notify_data_change(entity, DataKind::Component, ty.index, false);
        Ok(())
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let ty = self
            .schema
            .component_type::<T>()
            .ok_or_else(|| WorldError::ComponentAbsent(entity.id(), Self::component_hash::<T>()))?;
        self.remove_component_raw(entity, ty)
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T, WorldError> {
        let slot = self.directory.slot(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let ty = self
            .schema
            .component_type::<T>()
            .ok_or_else(|| WorldError::ComponentAbsent(entity.id(), Self::component_hash::<T>()))?;
        let chunk_id = slot.chunk.expect("every live entity has a chunk");
        let bytes = self
            .storage
            .get(chunk_id)
            .component_bytes(slot.row, ty.index)
            .ok_or_else(|| WorldError::ComponentAbsent(entity.id(), Self::component_hash::<T>()))?;
        Ok(unsafe { &*(bytes.as_ptr() as *const T) })
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, WorldError> {
        let slot = self.directory.slot(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let ty = self
            .schema
            .component_type::<T>()
            .ok_or_else(|| WorldError::ComponentAbsent(entity.id(), Self::component_hash::<T>()))?;
        let chunk_id = slot.chunk.expect("every live entity has a chunk");
        let row = slot.row;
        let bytes = self
            .storage
            .get_mut(chunk_id)
            .component_bytes_mut(row, ty.index)
            .ok_or_else(|| WorldError::ComponentAbsent(entity.id(), Self::component_hash::<T>()))?;
        Ok(unsafe { &mut *(bytes.as_mut_ptr() as *mut T) })
    }

    pub fn contains_component<T: Component>(&self, entity: Entity) -> Result<bool, WorldError> {
        let definition = self.definition_of(entity)?;
        Ok(self.schema.component_type::<T>().is_some_and(|ty| definition.contains(ty)))
    }

    // --- Tags -------------------------------------------------------------

    pub(crate) fn add_tag_raw(&mut self, entity: Entity, ty: DataType) -> Result<(), WorldError> {
        let definition = self.definition_of(entity)?;
        if definition.contains(ty) {
            let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
            return Err(WorldError::TagAlreadyPresent(entity.id(), hash));
        }
        self.migrate(entity, definition.with(ty))?;
        self.notify.notify_data_change(entity, DataKind::Tag, ty.index, true);
        Ok(())
    }

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let ty = self.schema.register_tag::<T>()?;
        self.add_tag_raw(entity, ty)
    }

    pub(crate) fn remove_tag_raw(&mut self, entity: Entity, ty: DataType) -> Result<(), WorldError> {
        let definition = self.definition_of(entity)?;
        if !definition.contains(ty) {
            let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
            return Err(WorldError::TagAbsent(entity.id(), hash));
        }
        self.migrate(entity, definition.without(ty))?;
        self.notify.notify_data_change(entity, DataKind::Tag, ty.index, false);
        Ok(())
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let ty = self
            .schema
            .tag_type::<T>()
            .ok_or_else(|| WorldError::TagAbsent(entity.id(), Self::tag_hash::<T>()))?;
        self.remove_tag_raw(entity, ty)
    }

    pub fn has_tag<T: Tag>(&self, entity: Entity) -> Result<bool, WorldError> {
        let definition = self.definition_of(entity)?;
        Ok(self.schema.tag_type::<T>().is_some_and(|ty| definition.contains(ty)))
    }

    // --- Enable / disable / hierarchy -------------------------------------

    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) -> Result<(), WorldError> {
        let currently = self.is_locally_enabled(entity)?;
        if enabled != currently {
            let disabled_tag = self.schema.disabled_tag();
            if enabled {
                self.remove_tag_raw(entity, disabled_tag)?;
            } else {
                self.add_tag_raw(entity, disabled_tag)?;
            }
        }
        self.recompute_effective_state(entity);
        Ok(())
    }

    pub fn is_locally_enabled(&self, entity: Entity) -> Result<bool, WorldError> {
        let definition = self.definition_of(entity)?;
        Ok(!definition.contains(self.schema.disabled_tag()))
    }

    pub fn is_enabled(&self, entity: Entity) -> Result<bool, WorldError> {
        let slot = self.directory.slot(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        Ok(matches!(slot.state, State::Enabled))
    }

    /// Recompute `entity`'s effective [`State`] from its local `Disabled`
    /// tag and its parent's current state, then recurse into its children.
    /// There is no eager child-list cache (`ecs::entity::Directory` doesn't
    /// maintain one) — `get_children` does an O(live entities) scan, which
    /// is the simplification this implementation takes over materializing
    /// and invalidating a per-entity child buffer.
    fn recompute_effective_state(&mut self, entity: Entity) {
        let Some(slot) = self.directory.slot(entity) else { return };
        let parent = slot.parent;
        let chunk_id = slot.chunk.expect("live entity has a chunk");
        let locally_disabled = self.storage.get(chunk_id).definition().contains(self.schema.disabled_tag());

        let ancestor_disabled = if parent == entity::Id::NONE {
            false
        } else {
            self.directory
                .slot_by_id(parent)
                .is_some_and(|p| !matches!(p.state, State::Enabled))
        };

        let new_state = if locally_disabled {
            State::Disabled
        } else if ancestor_disabled {
            State::DisabledDueToAncestor
        } else {
            State::Enabled
        };

        if let Some(slot) = self.directory.slot_mut(entity) {
            slot.state = new_state;
        }

        for child in self.get_children(entity) {
            self.recompute_effective_state(child);
        }
    }

    pub fn get_children(&self, entity: Entity) -> Vec<Entity> {
        self.directory
            .iter()
            .filter(|&candidate| self.directory.slot(candidate).map(|s| s.parent) == Some(entity.id()))
            .collect()
    }

    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) -> Result<(), WorldError> {
        if !self.directory.is_live(child) {
            return Err(WorldError::EntityDoesNotExist(child.id()));
        }
        if let Some(parent) = parent {
            if !self.directory.is_live(parent) {
                return Err(WorldError::EntityDoesNotExist(parent.id()));
            }
            let mut cursor = parent.id();
            loop {
                if cursor == child.id() {
                    return Err(WorldError::ParentCycle(child.id(), parent.id()));
                }
                match self.directory.slot_by_id(cursor).map(|s| s.parent) {
                    Some(next) if next != entity::Id::NONE => cursor = next,
                    _ => break,
                }
            }
        }

        let old_parent = self.directory.slot(child).expect("checked live above").parent;
        if old_parent != entity::Id::NONE {
            if let Some(old_parent_slot) = self.directory.slot_by_id_mut(old_parent) {
                old_parent_slot.child_count = old_parent_slot.child_count.saturating_sub(1);
            }
        }

        let new_parent_id = parent.map(|p| p.id()).unwrap_or(entity::Id::NONE);
        if let Some(slot) = self.directory.slot_mut(child) {
            slot.parent = new_parent_id;
        }
        if new_parent_id != entity::Id::NONE {
            if let Some(new_parent_slot) = self.directory.slot_by_id_mut(new_parent_id) {
                new_parent_slot.child_count += 1;
            }
        }

        self.recompute_effective_state(child);
        Ok(())
    }

    // --- References --------------------------------------------------------

    pub fn add_reference(&mut self, owner: Entity, target: Entity) -> Result<reference::Handle, WorldError> {
        if !self.directory.is_live(target) {
            return Err(WorldError::EntityDoesNotExist(target.id()));
        }
        self.references.add(&mut self.directory, owner, target.id())
    }

    pub fn get_reference(&self, owner: Entity, handle: reference::Handle) -> Result<Option<Entity>, WorldError> {
        let target_id = self.references.get(&self.directory, owner, handle)?;
        Ok(target_id.and_then(|id| self.directory.entity_for_id(id)))
    }

    pub fn remove_reference(&mut self, owner: Entity, handle: reference::Handle) -> Result<(), WorldError> {
        self.references.remove(&self.directory, owner, handle)
    }

    // --- Arrays --------------------------------------------------------------

    pub(crate) fn create_array_raw(
        &mut self,
        entity: Entity,
        ty: DataType,
        element_size: usize,
        length: usize,
    ) -> Result<(), WorldError> {
        let definition = self.definition_of(entity)?;
        if definition.contains(ty) {
            let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
            return Err(WorldError::ArrayAlreadyPresent(entity.id(), hash));
        }
        self.migrate(entity, definition.with(ty))?;
        let slot = self.directory.slot_mut(entity).expect("migrate does not destroy the entity");
        slot.arrays
            .get_or_insert_with(HashMap::new)
            .insert(ty.index, vec![0u8; element_size * length]);
        slot.flags.insert(entity::Flags::CONTAINS_ARRAYS);
        self.notify.notify_data_change(entity, DataKind::Array, ty.index, true);
        Ok(())
    }

    pub fn create_array<T: ArrayElement>(&mut self, entity: Entity, length: usize) -> Result<(), WorldError> {
        let ty = self.schema.register_array_element::<T>()?;
        self.create_array_raw(entity, ty, std::mem::size_of::<T>(), length)
    }

    pub(crate) fn resize_array_raw(
        &mut self,
        entity: Entity,
        ty: DataType,
        element_size: usize,
        new_length: usize,
    ) -> Result<(), WorldError> {
        let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
        let slot = self.directory.slot_mut(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let arrays = slot.arrays.as_mut().ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let bytes = arrays.get_mut(&ty.index).ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        bytes.resize(element_size * new_length, 0);
        Ok(())
    }

    pub fn resize_array<T: ArrayElement>(&mut self, entity: Entity, new_length: usize) -> Result<(), WorldError> {
        let ty = self
            .schema
            .array_type::<T>()
            .ok_or_else(|| WorldError::ArrayAbsent(entity.id(), Self::array_hash::<T>()))?;
        self.resize_array_raw(entity, ty, std::mem::size_of::<T>(), new_length)
    }

    pub(crate) fn set_array_element_raw(
        &mut self,
        entity: Entity,
        ty: DataType,
        element_size: usize,
        index: usize,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
        let slot = self.directory.slot_mut(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let arrays = slot.arrays.as_mut().ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let buffer = arrays.get_mut(&ty.index).ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let start = index * element_size;
        buffer[start..start + element_size].copy_from_slice(bytes);
        Ok(())
    }

    /// Bulk write into an entity's array, starting at element index `start`.
    /// `bytes` must be a whole number of `element_size`-sized elements; used
    /// by the operation buffer's `SetArrayElements` (§3) to apply a range in
    /// one call instead of one `set_array_element_raw` per slot.
    pub(crate) fn set_array_elements_raw(
        &mut self,
        entity: Entity,
        ty: DataType,
        element_size: usize,
        start: usize,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
        let slot = self.directory.slot_mut(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let arrays = slot.arrays.as_mut().ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let buffer = arrays.get_mut(&ty.index).ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let start_byte = start * element_size;
        buffer[start_byte..start_byte + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn set_array_element<T: ArrayElement>(&mut self, entity: Entity, index: usize, value: T) -> Result<(), WorldError> {
        let ty = self
            .schema
            .array_type::<T>()
            .ok_or_else(|| WorldError::ArrayAbsent(entity.id(), Self::array_hash::<T>()))?;
        let boxed = BoxedValue::from_value(value);
        self.set_array_element_raw(entity, ty, std::mem::size_of::<T>(), index, boxed.as_slice())
    }

    pub fn get_array<T: ArrayElement>(&self, entity: Entity) -> Result<&[T], WorldError> {
        let ty = self
            .schema
            .array_type::<T>()
            .ok_or_else(|| WorldError::ArrayAbsent(entity.id(), Self::array_hash::<T>()))?;
        let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
        let slot = self.directory.slot(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
        let arrays = slot.arrays.as_ref().ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let bytes = arrays.get(&ty.index).ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
        let len = bytes.len() / std::mem::size_of::<T>();
        Ok(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const T, len) })
    }

    pub(crate) fn destroy_array_raw(&mut self, entity: Entity, ty: DataType) -> Result<(), WorldError> {
        let hash = self.schema.type_hash_for(ty).expect("ty came from this schema");
        {
            let slot = self.directory.slot_mut(entity).ok_or(WorldError::EntityDoesNotExist(entity.id()))?;
            let arrays = slot.arrays.as_mut().ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
            arrays.remove(&ty.index).ok_or(WorldError::ArrayAbsent(entity.id(), hash))?;
            if arrays.is_empty() {
                slot.arrays = None;
                slot.flags.remove(entity::Flags::CONTAINS_ARRAYS);
            }
        }
        let definition = self.definition_of(entity)?;
        self.migrate(entity, definition.without(ty))?;
        self.notify.notify_data_change(entity, DataKind::Array, ty.index, false);
        Ok(())
    }

    pub fn destroy_array<T: ArrayElement>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let ty = self
            .schema
            .array_type::<T>()
            .ok_or_else(|| WorldError::ArrayAbsent(entity.id(), Self::array_hash::<T>()))?;
        self.destroy_array_raw(entity, ty)
    }

    // --- Cloning, destruction, append, clear --------------------------------

    /// Clone `source`'s components, tags, arrays, and references into a new
    /// entity. Hierarchy (parent/children) is deliberately NOT copied — the
    /// clone starts parentless, matching the common "rebuild hierarchy
    /// explicitly via `set_parent`" convention rather than guessing whether
    /// a clone should become a sibling or its own subtree root.
    pub fn clone_entity(&mut self, source: Entity) -> Result<Entity, WorldError> {
        let source_slot = self.directory.slot(source).ok_or(WorldError::EntityDoesNotExist(source.id()))?;
        let chunk_id = source_slot.chunk.expect("live entity has a chunk");
        let source_row = source_slot.row;
        let arrays = source_slot.arrays.clone();
        let reference_start = source_slot.reference_start;
        let reference_count = source_slot.reference_count;

        let clone = self.directory.allocate();
        let chunk = self.storage.get_mut(chunk_id);
        let new_row = chunk.add_entity(clone.id());
        chunk.copy_row_within(source_row, new_row);

        let cloned_refs = self.references.range(reference_start, reference_count).to_vec();
        let (new_start, new_count) = self.references.append_range(&cloned_refs);

        let clone_slot = self.directory.slot_mut(clone).expect("just allocated");
        clone_slot.chunk = Some(chunk_id);
        clone_slot.row = new_row;
        if arrays.is_some() {
            clone_slot.flags.insert(entity::Flags::CONTAINS_ARRAYS);
        }
        clone_slot.arrays = arrays;
        clone_slot.reference_start = new_start;
        clone_slot.reference_count = new_count;

        self.notify.notify_lifecycle(clone, true);
        Ok(clone)
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.destroy_entity_inner(entity)
    }

    fn destroy_entity_inner(&mut self, entity: Entity) -> Result<(), WorldError> {
        if !self.directory.is_live(entity) {
            return Err(WorldError::EntityDoesNotExist(entity.id()));
        }

        for child in self.get_children(entity) {
            self.destroy_entity_inner(child)?;
        }

        // Re-fetch after the recursive pass: a descendant's swap-removal can
        // have moved this entity's own row within its chunk.
        let slot = self.directory.slot(entity).expect("not removed by descendant destruction");
        let chunk_id = slot.chunk.expect("live entity has a chunk");
        let row = slot.row;
        let parent = slot.parent;
        let reference_start = slot.reference_start;
        let reference_count = slot.reference_count;

        if parent != entity::Id::NONE {
            if let Some(parent_slot) = self.directory.slot_by_id_mut(parent) {
                parent_slot.child_count = parent_slot.child_count.saturating_sub(1);
            }
        }

        self.references.clear_range(reference_start, reference_count);
        self.references.invalidate_target(entity.id());

        if let Some(moved) = self.storage.get_mut(chunk_id).remove_row(row) {
            if let Some(moved_slot) = self.directory.slot_by_id_mut(moved) {
                moved_slot.row = row;
            }
        }

        self.directory.free(entity);
        self.notify.notify_lifecycle(entity, false);
        log::trace!("destroyed entity {:?}", entity.id());
        Ok(())
    }

    /// Validate that every type `other` has registered also exists (by
    /// hash) in `dest`, before any entity is copied. A safe superset of
    /// "every type actually used by a live entity in `other`" — simpler,
    /// and never rejects a world that would otherwise append cleanly.
    fn build_type_map(dest: &Schema, src: &Schema) -> Result<HashMap<(DataKind, TypeHash), u32>, WorldError> {
        let mut map = HashMap::new();
        for (kind, count) in [
            (DataKind::Component, src.component_count()),
            (DataKind::Array, src.array_count()),
            (DataKind::Tag, src.tag_count()),
        ] {
            for index in 0..count as u32 {
                let hash = src
                    .type_hash_for(DataType::new(kind, index))
                    .expect("index within count is always present");
                let dest_index = dest.index_by_hash(kind, hash).ok_or(WorldError::TypeNotRegistered(hash))?;
                map.insert((kind, hash), dest_index);
            }
        }
        Ok(map)
    }

    /// Copy every live entity of `other` into `self`, remapping type
    /// indices via name hash and entity ids via a fresh allocation per
    /// source entity. Unresolvable reference targets (destroyed, or
    /// outside `other`) become the `NONE` sentinel rather than erroring.
    pub fn append(&mut self, other: &World) -> Result<(), WorldError> {
        let type_map = Self::build_type_map(&self.schema, &other.schema)?;

        let mut id_map: HashMap<entity::Id, Entity> = HashMap::new();
        for source_entity in other.directory.iter() {
            id_map.insert(source_entity.id(), self.create_entity());
        }

        for source_entity in other.directory.iter() {
            let new_entity = id_map[&source_entity.id()];
            let source_slot = other.directory.slot(source_entity).expect("iter only yields live entities");
            let chunk = other.storage.get(source_slot.chunk.expect("live entity has a chunk"));
            let definition = chunk.definition();

            for index in definition.components().iter_ones() {
                let index = index as u32;
                let hash = other
                    .schema
                    .type_hash_for(DataType::new(DataKind::Component, index))
                    .expect("present component type is registered");
                let dest_index = *type_map.get(&(DataKind::Component, hash)).expect("validated by build_type_map");
                let bytes = chunk
                    .component_bytes(source_slot.row, index)
                    .expect("column exists for a present component");
                self.add_component_raw(new_entity, DataType::new(DataKind::Component, dest_index), bytes)?;
            }

            for index in definition.tags().iter_ones() {
                let index = index as u32;
                if index == schema::DISABLED_TAG_INDEX {
                    continue;
                }
                let hash = other
                    .schema
                    .type_hash_for(DataType::new(DataKind::Tag, index))
                    .expect("present tag type is registered");
                let dest_index = *type_map.get(&(DataKind::Tag, hash)).expect("validated by build_type_map");
                self.add_tag_raw(new_entity, DataType::new(DataKind::Tag, dest_index))?;
            }

            if let Some(arrays) = &source_slot.arrays {
                for (&array_index, bytes) in arrays {
                    let hash = other
                        .schema
                        .type_hash_for(DataType::new(DataKind::Array, array_index))
                        .expect("present array type is registered");
                    let dest_index = *type_map.get(&(DataKind::Array, hash)).expect("validated by build_type_map");
                    let element_size = other
                        .schema
                        .array_element_size(array_index)
                        .expect("registered array type has a recorded element size") as usize;
                    let length = if element_size == 0 { 0 } else { bytes.len() / element_size };
                    self.create_array_raw(new_entity, DataType::new(DataKind::Array, dest_index), element_size, length)?;
                    let new_slot = self.directory.slot_mut(new_entity).expect("just created");
                    new_slot.arrays.get_or_insert_with(HashMap::new).insert(dest_index, bytes.clone());
                }
            }

            if !other.is_locally_enabled(source_entity).unwrap_or(true) {
                self.set_enabled(new_entity, false)?;
            }

            let refs = other.references.range(source_slot.reference_start, source_slot.reference_count);
            let remapped: Vec<entity::Id> = refs
                .iter()
                .map(|&target| {
                    if target == entity::Id::NONE {
                        entity::Id::NONE
                    } else {
                        id_map.get(&target).map(|e| e.id()).unwrap_or(entity::Id::NONE)
                    }
                })
                .collect();
            let (start, count) = self.references.append_range(&remapped);
            let new_slot = self.directory.slot_mut(new_entity).expect("just created");
            new_slot.reference_start = start;
            new_slot.reference_count = count;
        }

        for source_entity in other.directory.iter() {
            let source_slot = other.directory.slot(source_entity).expect("iter only yields live entities");
            if source_slot.parent != entity::Id::NONE {
                if let Some(&mapped_parent) = id_map.get(&source_slot.parent) {
                    let mapped_child = id_map[&source_entity.id()];
                    self.set_parent(mapped_child, Some(mapped_parent))?;
                }
            }
        }

        Ok(())
    }

    /// Destroy every live entity. Parents destroy their subtree, so this
    /// simply walks a snapshot of the live set and ignores entities already
    /// gone by the time their turn comes.
    pub fn clear(&mut self) {
        let all: Vec<Entity> = self.directory.iter().collect();
        for entity in all {
            if self.directory.is_live(entity) {
                let _ = self.destroy_entity_inner(entity);
            }
        }
    }

    pub fn perform(&mut self, buffer: &operation::Buffer) -> Result<(), WorldError> {
        buffer.perform(self)
    }

    pub fn query(&self, predicate: query::Predicate) -> query::Query<'_> {
        query::Query::new(self, predicate)
    }

    pub fn component_query<F: query::Fetch>(&mut self) -> Result<query::ComponentQuery<'_, F>, WorldError> {
        query::ComponentQuery::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Tag as TagTrait;

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {
        fn type_name() -> &'static str {
            "loom_engine::world::tests::Position"
        }
    }

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Velocity {
        dx: f32,
    }
    impl Component for Velocity {
        fn type_name() -> &'static str {
            "loom_engine::world::tests::Velocity"
        }
    }

    #[derive(Clone, Copy)]
    struct Hitpoints(#[allow(dead_code)] u32);
    impl ArrayElement for Hitpoints {
        fn type_name() -> &'static str {
            "loom_engine::world::tests::Hitpoints"
        }
    }

    struct Invulnerable;
    impl TagTrait for Invulnerable {
        fn type_name() -> &'static str {
            "loom_engine::world::tests::Invulnerable"
        }
    }

    #[test]
    fn add_and_get_component_round_trips() {
        // Given
        let mut world = World::new();
        let e = world.create_entity();
        // When
        world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
        // Then
        assert_eq!(*world.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn adding_a_second_component_migrates_without_losing_the_first() {
        // Given
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
        // When
        world.add_component(e, Velocity { dx: 3.0 }).unwrap();
        // Then
        assert_eq!(*world.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
        assert_eq!(*world.get_component::<Velocity>(e).unwrap(), Velocity { dx: 3.0 });
    }

    #[test]
    fn removing_a_component_preserves_a_sibling_entitys_row() {
        // Given: two entities share an archetype, then one drops a component.
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        world.add_component(a, Position { x: 1.0, y: 1.0 }).unwrap();
        world.add_component(b, Position { x: 2.0, y: 2.0 }).unwrap();

        // When
        world.remove_component::<Position>(a).unwrap();

        // Then
        assert!(world.remove_component::<Position>(a).is_err());
        assert_eq!(*world.get_component::<Position>(b).unwrap(), Position { x: 2.0, y: 2.0 });
    }

    #[test]
    fn double_add_is_rejected() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
        assert!(matches!(
            world.add_component(e, Position { x: 1.0, y: 1.0 }),
            Err(WorldError::ComponentAlreadyPresent(_, _))
        ));
    }

    #[test]
    fn set_enabled_propagates_to_children() {
        // Given
        let mut world = World::new();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.set_parent(child, Some(parent)).unwrap();

        // When
        world.set_enabled(parent, false).unwrap();

        // Then
        assert!(!world.is_enabled(parent).unwrap());
        assert!(world.is_locally_enabled(child).unwrap());
        assert!(!world.is_enabled(child).unwrap());
    }

    #[test]
    fn set_parent_rejects_a_cycle() {
        // Given
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        world.set_parent(b, Some(a)).unwrap();

        // When/Then
        assert!(matches!(world.set_parent(a, Some(b)), Err(WorldError::ParentCycle(_, _))));
    }

    #[test]
    fn destroying_a_parent_destroys_its_children() {
        // Given
        let mut world = World::new();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.set_parent(child, Some(parent)).unwrap();

        // When
        world.destroy_entity(parent).unwrap();

        // Then
        assert!(!world.directory.is_live(child));
    }

    #[test]
    fn reference_resolves_and_survives_target_relocation() {
        // Given
        let mut world = World::new();
        let owner = world.create_entity();
        let target = world.create_entity();
        let handle = world.add_reference(owner, target).unwrap();

        // When: give the target a component so it migrates to a new chunk/row.
        world.add_component(target, Position { x: 9.0, y: 9.0 }).unwrap();

        // Then
        assert_eq!(world.get_reference(owner, handle).unwrap(), Some(target));
    }

    #[test]
    fn destroying_a_referenced_entity_invalidates_the_reference() {
        let mut world = World::new();
        let owner = world.create_entity();
        let target = world.create_entity();
        let handle = world.add_reference(owner, target).unwrap();

        world.destroy_entity(target).unwrap();

        assert_eq!(world.get_reference(owner, handle).unwrap(), None);
    }

    #[test]
    fn clone_entity_copies_components_and_arrays_independently() {
        // Given
        let mut world = World::new();
        let source = world.create_entity();
        world.add_component(source, Position { x: 1.0, y: 2.0 }).unwrap();
        world.create_array::<Hitpoints>(source, 2).unwrap();
        world.set_array_element(source, 0, Hitpoints(10)).unwrap();

        // When
        let clone = world.clone_entity(source).unwrap();
        world.set_array_element(clone, 0, Hitpoints(99)).unwrap();

        // Then
        assert_eq!(*world.get_component::<Position>(clone).unwrap(), Position { x: 1.0, y: 2.0 });
        assert_eq!(world.get_array::<Hitpoints>(source).unwrap()[0].0, 10);
        assert_eq!(world.get_array::<Hitpoints>(clone).unwrap()[0].0, 99);
    }

    #[test]
    fn tag_round_trip_and_absent_error() {
        let mut world = World::new();
        let e = world.create_entity();
        assert!(!world.has_tag::<Invulnerable>(e).unwrap());
        world.add_tag::<Invulnerable>(e).unwrap();
        assert!(world.has_tag::<Invulnerable>(e).unwrap());
        world.remove_tag::<Invulnerable>(e).unwrap();
        assert!(matches!(world.remove_tag::<Invulnerable>(e), Err(WorldError::TagAbsent(_, _))));
    }

    #[test]
    fn append_copies_entities_and_remaps_references() {
        // Given
        let mut source = World::new();
        let a = source.create_entity();
        let b = source.create_entity();
        source.add_component(a, Position { x: 4.0, y: 5.0 }).unwrap();
        let handle = source.add_reference(a, b).unwrap();

        let mut dest = World::new();
        dest.schema_mut().register_component::<Position>().unwrap();

        // When
        dest.append(&source).unwrap();

        // Then
        let entities: Vec<Entity> = dest.query(query::Predicate::new()).iter().map(|r| r.unwrap()).collect();
        assert_eq!(entities.len(), 2);
        let copied_a = entities
            .iter()
            .copied()
            .find(|&e| dest.contains_component::<Position>(e).unwrap())
            .unwrap();
        assert_eq!(*dest.get_component::<Position>(copied_a).unwrap(), Position { x: 4.0, y: 5.0 });
        assert!(dest.get_reference(copied_a, handle).unwrap().is_some());
    }

    #[test]
    fn clear_destroys_every_entity() {
        let mut world = World::new();
        world.create_entity();
        world.create_entity();
        world.clear();
        assert_eq!(world.directory.iter().count(), 0);
    }
}
