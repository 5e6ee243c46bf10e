//! Deferred operation buffer (C9).
//!
//! An append-only instruction stream that can be built without touching a
//! [`World`] at all (e.g. while a query iterator holds it borrowed) and
//! later replayed in one call. Every instruction carries only ids/byte
//! payloads — never a borrow into the world — which is what lets the
//! buffer sidestep the "can't mutate while iterating" problem §4.9
//! describes: collect intent, apply after.
//!
//! Replay tracks two pieces of state alongside the world itself: the
//! current *selection* (the ids every subsequent mutation applies to) and
//! the *previously created* list (every id ever produced by a `CreateEntity`
//! / `CreateEntities` in this replay, most-recent-first). Both are ordinary
//! local variables in [`Buffer::perform`] — they don't outlive one replay.

use crate::ecs::{
    component::BoxedValue,
    definition::DataType,
    entity,
    reference,
    world::{World, error::WorldError},
};

/// One deferred instruction. Mirrors the teacher's "thin wrapper over a
/// handful of core operations" shape: every component/array-typed entry
/// carries a [`DataType`] (and, where needed, an element size) rather than
/// a generic parameter, since the buffer itself is never monomorphized per
/// component type.
#[derive(Debug, Clone)]
pub enum Entry {
    CreateEntity,
    CreateEntities(usize),
    SelectEntity(entity::Id),
    SelectEntities(Vec<entity::Id>),
    SelectPreviouslyCreated(usize),
    ClearSelection,
    AddComponent(DataType, BoxedValue),
    RemoveComponent(DataType),
    AddTag(DataType),
    RemoveTag(DataType),
    SetEnabled(bool),
    SetParent(Option<entity::Id>),
    SetParentToPreviouslyCreated(usize),
    CreateArray(DataType, usize, usize),
    ResizeArray(DataType, usize, usize),
    SetArrayElement(DataType, usize, usize, BoxedValue),
    SetArrayElements(DataType, usize, usize, BoxedValue),
    DestroyArray(DataType),
    AddReference(entity::Id),
    RemoveReference(reference::Handle),
    DestroySelected,
}

/// An append-only list of [`Entry`] instructions, replayed in order against
/// a [`World`] by [`Buffer::perform`].
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    entries: Vec<Entry>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the buffer, discarding every recorded instruction. `reset` and
    /// `clear` are the same operation under two names the design uses
    /// interchangeably (§4.9).
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn create_entity(&mut self) -> &mut Self {
        self.entries.push(Entry::CreateEntity);
        self
    }

    pub fn create_entities(&mut self, count: usize) -> &mut Self {
        self.entries.push(Entry::CreateEntities(count));
        self
    }

    /// Select a single pre-existing entity (one not created by this buffer),
    /// by id.
    pub fn select_entity(&mut self, id: entity::Id) -> &mut Self {
        self.entries.push(Entry::SelectEntity(id));
        self
    }

    /// Select a set of pre-existing entities, by id.
    pub fn select_entities(&mut self, ids: Vec<entity::Id>) -> &mut Self {
        self.entries.push(Entry::SelectEntities(ids));
        self
    }

    pub fn select_previously_created(&mut self, steps_back: usize) -> &mut Self {
        self.entries.push(Entry::SelectPreviouslyCreated(steps_back));
        self
    }

    pub fn clear_selection(&mut self) -> &mut Self {
        self.entries.push(Entry::ClearSelection);
        self
    }

    pub fn add_component(&mut self, ty: DataType, value: BoxedValue) -> &mut Self {
        self.entries.push(Entry::AddComponent(ty, value));
        self
    }

    pub fn remove_component(&mut self, ty: DataType) -> &mut Self {
        self.entries.push(Entry::RemoveComponent(ty));
        self
    }

    pub fn add_tag(&mut self, ty: DataType) -> &mut Self {
        self.entries.push(Entry::AddTag(ty));
        self
    }

    pub fn remove_tag(&mut self, ty: DataType) -> &mut Self {
        self.entries.push(Entry::RemoveTag(ty));
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.entries.push(Entry::SetEnabled(enabled));
        self
    }

    pub fn set_parent(&mut self, parent: Option<entity::Id>) -> &mut Self {
        self.entries.push(Entry::SetParent(parent));
        self
    }

    /// Set every selected entity's parent to the id that was created `k`
    /// steps before the current position — the forward-reference trick that
    /// lets a buffer build a hierarchy where the parent is created later in
    /// the same replay than the children selected here.
    pub fn set_parent_to_previously_created(&mut self, steps_back: usize) -> &mut Self {
        self.entries.push(Entry::SetParentToPreviouslyCreated(steps_back));
        self
    }

    pub fn create_array(&mut self, ty: DataType, element_size: usize, length: usize) -> &mut Self {
        self.entries.push(Entry::CreateArray(ty, element_size, length));
        self
    }

    pub fn resize_array(&mut self, ty: DataType, element_size: usize, new_length: usize) -> &mut Self {
        self.entries.push(Entry::ResizeArray(ty, element_size, new_length));
        self
    }

    pub fn set_array_element(&mut self, ty: DataType, element_size: usize, index: usize, value: BoxedValue) -> &mut Self {
        self.entries.push(Entry::SetArrayElement(ty, element_size, index, value));
        self
    }

    /// Bulk-write `elements` worth of bytes starting at element index
    /// `start`, in one instruction rather than one `SetArrayElement` per
    /// slot.
    pub fn set_array_elements(&mut self, ty: DataType, element_size: usize, start: usize, elements: BoxedValue) -> &mut Self {
        self.entries.push(Entry::SetArrayElements(ty, element_size, start, elements));
        self
    }

    pub fn destroy_array(&mut self, ty: DataType) -> &mut Self {
        self.entries.push(Entry::DestroyArray(ty));
        self
    }

    pub fn add_reference(&mut self, target: entity::Id) -> &mut Self {
        self.entries.push(Entry::AddReference(target));
        self
    }

    pub fn remove_reference(&mut self, handle: reference::Handle) -> &mut Self {
        self.entries.push(Entry::RemoveReference(handle));
        self
    }

    pub fn destroy_selected(&mut self) -> &mut Self {
        self.entries.push(Entry::DestroySelected);
        self
    }

    /// Replay every instruction against `world`, in order. A failing
    /// instruction aborts replay immediately — effects already applied by
    /// earlier instructions in this call are **not** rolled back, matching
    /// §4.9's "partial effects already applied are not rolled back".
    pub fn perform(&self, world: &mut World) -> Result<(), WorldError> {
        let mut selection: Vec<entity::Entity> = Vec::new();
        let mut previously_created: Vec<entity::Entity> = Vec::new();

        for entry in &self.entries {
            match entry {
                Entry::CreateEntity => {
                    let e = world.create_entity();
                    previously_created.insert(0, e);
                    selection = vec![e];
                }
                Entry::CreateEntities(count) => {
                    let created = world.create_entities(*count, crate::ecs::definition::Definition::new());
                    for &e in &created {
                        previously_created.insert(0, e);
                    }
                    selection = created;
                }
                Entry::SelectEntity(id) => {
                    let e = world
                        .directory()
                        .entity_for_id(*id)
                        .ok_or(WorldError::EntityDoesNotExist(*id))?;
                    selection = vec![e];
                }
                Entry::SelectEntities(ids) => {
                    selection = ids
                        .iter()
                        .map(|&id| world.directory().entity_for_id(id).ok_or(WorldError::EntityDoesNotExist(id)))
                        .collect::<Result<Vec<_>, _>>()?;
                }
                Entry::SelectPreviouslyCreated(steps_back) => {
                    let e = previously_created
                        .get(*steps_back)
                        .copied()
                        .ok_or(WorldError::EntityDoesNotExist(entity::Id::NONE))?;
                    selection = vec![e];
                }
                Entry::ClearSelection => selection.clear(),
                Entry::AddComponent(ty, value) => {
                    for &e in &selection {
                        world.add_component_raw(e, *ty, value.as_slice())?;
                    }
                }
                Entry::RemoveComponent(ty) => {
                    for &e in &selection {
                        world.remove_component_raw(e, *ty)?;
                    }
                }
                Entry::AddTag(ty) => {
                    for &e in &selection {
                        world.add_tag_raw(e, *ty)?;
                    }
                }
                Entry::RemoveTag(ty) => {
                    for &e in &selection {
                        world.remove_tag_raw(e, *ty)?;
                    }
                }
                Entry::SetEnabled(enabled) => {
                    for &e in &selection {
                        world.set_enabled(e, *enabled)?;
                    }
                }
                Entry::SetParent(parent_id) => {
                    let parent = match parent_id {
                        Some(id) => Some(
                            world
                                .directory()
                                .entity_for_id(*id)
                                .ok_or(WorldError::EntityDoesNotExist(*id))?,
                        ),
                        None => None,
                    };
                    for &e in &selection {
                        world.set_parent(e, parent)?;
                    }
                }
                Entry::SetParentToPreviouslyCreated(steps_back) => {
                    let parent = previously_created
                        .get(*steps_back)
                        .copied()
                        .ok_or(WorldError::EntityDoesNotExist(entity::Id::NONE))?;
                    for &e in &selection {
                        world.set_parent(e, Some(parent))?;
                    }
                }
                Entry::CreateArray(ty, element_size, length) => {
                    for &e in &selection {
                        world.create_array_raw(e, *ty, *element_size, *length)?;
                    }
                }
                Entry::ResizeArray(ty, element_size, new_length) => {
                    for &e in &selection {
                        world.resize_array_raw(e, *ty, *element_size, *new_length)?;
                    }
                }
                Entry::SetArrayElement(ty, element_size, index, value) => {
                    for &e in &selection {
                        world.set_array_element_raw(e, *ty, *element_size, *index, value.as_slice())?;
                    }
                }
                Entry::SetArrayElements(ty, element_size, start, elements) => {
                    for &e in &selection {
                        world.set_array_elements_raw(e, *ty, *element_size, *start, elements.as_slice())?;
                    }
                }
                Entry::DestroyArray(ty) => {
                    for &e in &selection {
                        world.destroy_array_raw(e, *ty)?;
                    }
                }
                Entry::AddReference(target_id) => {
                    let target = world
                        .directory()
                        .entity_for_id(*target_id)
                        .ok_or(WorldError::EntityDoesNotExist(*target_id))?;
                    for &e in &selection {
                        world.add_reference(e, target)?;
                    }
                }
                Entry::RemoveReference(handle) => {
                    for &e in &selection {
                        world.remove_reference(e, *handle)?;
                    }
                }
                Entry::DestroySelected => {
                    for &e in &selection {
                        world.destroy_entity(e)?;
                    }
                    selection.clear();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ArrayElement, Component};

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Position {
        x: f32,
    }
    impl Component for Position {
        fn type_name() -> &'static str {
            "loom_engine::world::operation::tests::Position"
        }
    }

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Waypoint(f32);
    impl ArrayElement for Waypoint {
        fn type_name() -> &'static str {
            "loom_engine::world::operation::tests::Waypoint"
        }
    }

    #[test]
    fn create_entity_then_add_component_applies_to_the_new_selection() {
        // Given
        let mut world = World::new();
        let ty = world.schema_mut().register_component::<Position>().unwrap();
        let mut buffer = Buffer::new();
        buffer.create_entity().add_component(ty, BoxedValue::from_value(Position { x: 3.0 }));

        // When
        buffer.perform(&mut world).unwrap();

        // Then
        let created = world.directory().iter().next().unwrap();
        assert_eq!(*world.get_component::<Position>(created).unwrap(), Position { x: 3.0 });
    }

    #[test]
    fn select_previously_created_reselects_an_earlier_batch() {
        // Given
        let mut world = World::new();
        let ty = world.schema_mut().register_component::<Position>().unwrap();
        let mut buffer = Buffer::new();
        buffer
            .create_entity() // previously_created = [e0]
            .create_entity() // previously_created = [e1, e0]; selection = [e1]
            .select_previously_created(1) // reselect e0
            .add_component(ty, BoxedValue::from_value(Position { x: 1.0 }));

        // When
        buffer.perform(&mut world).unwrap();

        // Then: exactly one of the two created entities has the component.
        let with_component = world
            .directory()
            .iter()
            .filter(|&e| world.contains_component::<Position>(e).unwrap())
            .count();
        assert_eq!(with_component, 1);
    }

    #[test]
    fn select_entity_targets_an_id_created_outside_the_buffer() {
        // Given: an entity that already existed before the buffer ran.
        let mut world = World::new();
        let ty = world.schema_mut().register_component::<Position>().unwrap();
        let existing = world.create_entity();

        let mut buffer = Buffer::new();
        buffer
            .select_entity(existing.id())
            .add_component(ty, BoxedValue::from_value(Position { x: 7.0 }));

        // When
        buffer.perform(&mut world).unwrap();

        // Then
        assert_eq!(*world.get_component::<Position>(existing).unwrap(), Position { x: 7.0 });
    }

    #[test]
    fn select_entities_targets_every_listed_id() {
        // Given
        let mut world = World::new();
        let ty = world.schema_mut().register_component::<Position>().unwrap();
        let a = world.create_entity();
        let b = world.create_entity();

        let mut buffer = Buffer::new();
        buffer
            .select_entities(vec![a.id(), b.id()])
            .add_component(ty, BoxedValue::from_value(Position { x: 2.0 }));

        // When
        buffer.perform(&mut world).unwrap();

        // Then
        assert_eq!(*world.get_component::<Position>(a).unwrap(), Position { x: 2.0 });
        assert_eq!(*world.get_component::<Position>(b).unwrap(), Position { x: 2.0 });
    }

    #[test]
    fn set_parent_to_previously_created_links_a_forward_referenced_parent() {
        // Given: the child is created and selected first, the parent second —
        // `set_parent_to_previously_created` is what lets the child point at
        // a parent the buffer hasn't created yet at the point it's selected.
        let mut world = World::new();
        let mut buffer = Buffer::new();
        buffer
            .create_entity() // previously_created = [child]; selection = [child]
            .create_entity() // previously_created = [parent, child]; selection = [parent]
            .select_previously_created(1) // reselect child
            .set_parent_to_previously_created(0); // parent = most recently created

        // When
        buffer.perform(&mut world).unwrap();

        // Then
        let entities: Vec<_> = world.directory().iter().collect();
        let parent = entities.iter().copied().find(|&e| !world.get_children(e).is_empty()).unwrap();
        let child = entities.into_iter().find(|&e| e != parent).unwrap();
        assert_eq!(world.get_children(parent), vec![child]);
    }

    #[test]
    fn set_array_elements_writes_a_contiguous_range_in_one_call() {
        // Given
        let mut world = World::new();
        let ty = world.schema_mut().register_array_element::<Waypoint>().unwrap();
        let entity = world.create_entity();
        world.create_array::<Waypoint>(entity, 4).unwrap();

        let elements = [Waypoint(1.0), Waypoint(2.0)];
        let bytes: Vec<u8> = elements.iter().flat_map(|w| w.0.to_ne_bytes()).collect();

        let mut buffer = Buffer::new();
        buffer
            .select_entity(entity.id())
            .set_array_elements(ty, std::mem::size_of::<Waypoint>(), 1, BoxedValue::from_bytes(bytes));

        // When
        buffer.perform(&mut world).unwrap();

        // Then
        let array = world.get_array::<Waypoint>(entity).unwrap();
        assert_eq!(array[0], Waypoint(0.0));
        assert_eq!(array[1], Waypoint(1.0));
        assert_eq!(array[2], Waypoint(2.0));
        assert_eq!(array[3], Waypoint(0.0));
    }

    #[test]
    fn destroy_selected_clears_the_selection() {
        let mut world = World::new();
        let mut buffer = Buffer::new();
        buffer.create_entity().destroy_selected().destroy_selected();
        assert!(buffer.perform(&mut world).is_ok());
        assert_eq!(world.directory().iter().count(), 0);
    }

    #[test]
    fn reset_empties_the_instruction_list() {
        let mut buffer = Buffer::new();
        buffer.create_entity().create_entity();
        assert_eq!(buffer.len(), 2);
        buffer.reset();
        assert!(buffer.is_empty());
    }
}
