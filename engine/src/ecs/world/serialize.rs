//! Binary encoding of [`TypeLayout`], [`Schema`], and [`World`] (C10).
//!
//! Little-endian, size-prefixed, grounded directly in §4.10's byte layout.
//! Every writer takes a `&mut impl Write` and every reader a `&mut impl
//! Read`, the same shape the teacher's other stream-oriented code (its
//! `net` transport framing) uses rather than reaching for a generic `serde`
//! derive — the layout here is bit-exact and doesn't fit serde's
//! self-describing model.
//!
//! A 4-byte magic and 2-byte version word are written ahead of the schema,
//! per §6's recommendation that the source format left implicit.

use std::io::{self, Read, Write};

use crate::ecs::{
    component::{Field, TypeHash, TypeLayout, TypeRegistry},
    definition::{DataKind, DataType, Definition},
    entity,
    schema::{self, Schema},
    world::{World, error::WorldError},
};

/// `"LOOM"`.
const MAGIC: [u8; 4] = *b"LOOM";
const FORMAT_VERSION: u16 = 1;

/// Failure reading or writing a binary stream. Distinct from [`WorldError`]
/// (which never touches I/O) since a truncated/corrupt stream, an
/// unresolvable type, and an underlying I/O failure are different callers'
/// problems.
#[derive(Debug)]
pub enum SerializeError {
    Io(io::Error),
    BadMagic,
    UnsupportedVersion(u16),
    World(WorldError),
}

impl std::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializeError::Io(e) => write!(f, "I/O error: {e}"),
            SerializeError::BadMagic => write!(f, "not a loom world stream (bad magic)"),
            SerializeError::UnsupportedVersion(v) => write!(f, "unsupported world stream version {v}"),
            SerializeError::World(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SerializeError {}

impl From<io::Error> for SerializeError {
    fn from(e: io::Error) -> Self {
        SerializeError::Io(e)
    }
}

impl From<WorldError> for SerializeError {
    fn from(e: WorldError) -> Self {
        SerializeError::World(e)
    }
}

/// Resolves a stored [`TypeHash`] to a schema index within some [`DataKind`]
/// namespace. The default resolver (used by [`Schema::read_from`]) just
/// registers every incoming layout fresh into an empty schema; a caller
/// restoring into an already-populated schema supplies its own to map
/// incoming hashes onto already-assigned indices instead.
pub trait TypeResolver {
    fn resolve(&mut self, kind: DataKind, hash: TypeHash, layout: &TypeLayout) -> Result<u32, WorldError>;
}

/// Registers every incoming type fresh, in arrival order, into a schema
/// that starts empty for that namespace. This is what [`World::deserialize`]
/// uses when restoring into a brand-new `World`.
pub struct FreshSchema<'s> {
    schema: &'s mut Schema,
}

impl<'s> FreshSchema<'s> {
    pub fn new(schema: &'s mut Schema) -> Self {
        Self { schema }
    }
}

impl TypeResolver for FreshSchema<'_> {
    fn resolve(&mut self, kind: DataKind, hash: TypeHash, layout: &TypeLayout) -> Result<u32, WorldError> {
        TypeRegistry::global().register_raw(layout.name(), layout.size(), layout.fields());
        self.schema.register_raw_in(kind, hash, layout.size() as u16)
    }
}

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u16(w: &mut impl Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    debug_assert!(bytes.len() <= u8::MAX as usize, "name too long for a u8-prefixed field");
    write_u8(w, bytes.len() as u8)?;
    w.write_all(bytes)
}

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(r: &mut impl Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_str(r: &mut impl Read) -> io::Result<String> {
    let len = read_u8(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// `TypeLayout: u8 nameLen, nameLen×u8 name, u16 size, u8 varCount,
/// varCount × {u8 nameLen, nameLen×u8, i64 typeHash}`.
fn write_type_layout(w: &mut impl Write, layout: &TypeLayout) -> io::Result<()> {
    write_str(w, layout.name())?;
    write_u16(w, layout.size() as u16)?;
    let fields = layout.fields();
    debug_assert!(fields.len() <= u8::MAX as usize);
    write_u8(w, fields.len() as u8)?;
    for field in fields {
        write_str(w, &field.name)?;
        write_i64(w, field.type_hash.0)?;
    }
    Ok(())
}

fn read_type_layout(r: &mut impl Read) -> io::Result<TypeLayout> {
    let name = read_str(r)?;
    let size = read_u16(r)? as usize;
    let var_count = read_u8(r)?;
    let mut fields = Vec::with_capacity(var_count as usize);
    for _ in 0..var_count {
        let field_name = read_str(r)?;
        let type_hash = TypeHash(read_i64(r)?);
        fields.push(Field {
            name: field_name,
            type_hash,
        });
    }
    Ok(TypeLayout::from_parts(name, size, fields))
}

fn write_namespace_section(
    w: &mut impl Write,
    kind: DataKind,
    schema: &Schema,
    count: usize,
) -> io::Result<()> {
    write_u16(w, count as u16)?;
    for index in 0..count as u32 {
        let ty = DataType::new(kind, index);
        let hash = schema.type_hash_for(ty).expect("index within count is always assigned");
        let layout = TypeRegistry::global()
            .get_by_hash(hash)
            .expect("every schema-assigned hash is registered in the global type registry");
        write_u8(w, index as u8)?;
        write_type_layout(w, &layout)?;
    }
    Ok(())
}

/// Write `schema` per §4.10's `Schema` layout: component section, then
/// array-element section, then tag section, each `count × {idx, layout}`.
pub fn write_schema(w: &mut impl Write, schema: &Schema) -> io::Result<()> {
    write_namespace_section(w, DataKind::Component, schema, schema.component_count())?;
    write_namespace_section(w, DataKind::Array, schema, schema.array_count())?;
    write_namespace_section(w, DataKind::Tag, schema, schema.tag_count())?;
    Ok(())
}

/// Read a schema section into a resolver, returning the `(kind, storedIndex)
/// -> localIndex` map the caller uses to translate the rest of the stream
/// (entity component/array/tag bits, which are stored by the writer's
/// index, not necessarily the reader's).
fn read_namespace_section(
    r: &mut impl Read,
    kind: DataKind,
    resolver: &mut impl TypeResolver,
) -> Result<std::collections::HashMap<u32, u32>, SerializeError> {
    let count = read_u16(r)?;
    let mut map = std::collections::HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let stored_index = read_u8(r)? as u32;
        let layout = read_type_layout(r)?;
        let local_index = resolver.resolve(kind, layout.hash(), &layout)?;
        map.insert(stored_index, local_index);
    }
    Ok(map)
}

/// Index remap produced by reading a schema section: translates a stored
/// `(kind, index)` into the local schema's index for the same type.
pub struct SchemaIndexMap {
    components: std::collections::HashMap<u32, u32>,
    arrays: std::collections::HashMap<u32, u32>,
    tags: std::collections::HashMap<u32, u32>,
}

impl SchemaIndexMap {
    fn translate(&self, kind: DataKind, stored_index: u32) -> Option<u32> {
        match kind {
            DataKind::Component => self.components.get(&stored_index).copied(),
            DataKind::Array => self.arrays.get(&stored_index).copied(),
            DataKind::Tag => self.tags.get(&stored_index).copied(),
        }
    }
}

/// Read a `Schema` section, registering every incoming type via `resolver`
/// and returning the index map needed to translate the rest of the stream.
pub fn read_schema(r: &mut impl Read, resolver: &mut impl TypeResolver) -> Result<SchemaIndexMap, SerializeError> {
    let components = read_namespace_section(r, DataKind::Component, resolver)?;
    let arrays = read_namespace_section(r, DataKind::Array, resolver)?;
    let tags = read_namespace_section(r, DataKind::Tag, resolver)?;
    Ok(SchemaIndexMap { components, arrays, tags })
}

fn write_bitmask_as_indices(w: &mut impl Write, mask: &crate::ecs::bitmask::BitMask) -> io::Result<()> {
    let indices: Vec<u32> = mask.iter_ones().map(|i| i as u32).collect();
    write_u16(w, indices.len() as u16)?;
    for i in indices {
        write_u32(w, i)?;
    }
    Ok(())
}

fn read_index_list(r: &mut impl Read) -> io::Result<Vec<u32>> {
    let count = read_u16(r)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(read_u32(r)?);
    }
    Ok(out)
}

/// Write a `Definition` as three index lists (components, arrays, tags)
/// rather than raw mask words — stable across a `WIDTH` change between
/// writer and reader, unlike dumping the bitset's backing storage.
fn write_definition(w: &mut impl Write, definition: &Definition) -> io::Result<()> {
    write_bitmask_as_indices(w, definition.components())?;
    write_bitmask_as_indices(w, definition.arrays())?;
    write_bitmask_as_indices(w, definition.tags())
}

struct StoredDefinition {
    components: Vec<u32>,
    arrays: Vec<u32>,
    tags: Vec<u32>,
}

fn read_definition(r: &mut impl Read) -> io::Result<StoredDefinition> {
    Ok(StoredDefinition {
        components: read_index_list(r)?,
        arrays: read_index_list(r)?,
        tags: read_index_list(r)?,
    })
}

/// Write `world` to `w`: 4-byte magic, 2-byte version, the schema, then
/// `u32 entityCount` entries of `{id, parent, stateFlags, definition,
/// components..., arrayCount, arrays..., refStart, refCount}`, then the
/// flat reference table.
pub fn write_world(w: &mut impl Write, world: &World) -> Result<(), SerializeError> {
    w.write_all(&MAGIC)?;
    write_u16(w, FORMAT_VERSION)?;
    write_schema(w, &world.schema)?;

    let entities: Vec<entity::Entity> = world.directory.iter().collect();
    write_u32(w, entities.len() as u32)?;

    let mut max_ref_end = 0u32;
    for entity in &entities {
        let slot = world.directory.slot(*entity).expect("iter() only yields live entities");
        write_u32(w, entity.id().get())?;
        write_u32(w, slot.parent.get())?;
        write_u8(w, state_flags(slot))?;

        let chunk_id = slot.chunk.expect("every live entity has a chunk");
        let chunk = world.storage.get(chunk_id);
        write_definition(w, chunk.definition())?;

        for index in chunk.definition().components().iter_ones() {
            let bytes = chunk
                .component_bytes(slot.row, index as u32)
                .expect("definition bit implies a present column");
            w.write_all(bytes)?;
        }

        match &slot.arrays {
            Some(arrays) => {
                write_u32(w, arrays.len() as u32)?;
                for (&array_index, bytes) in arrays {
                    write_u32(w, array_index)?;
                    write_u32(w, bytes.len() as u32)?;
                    w.write_all(bytes)?;
                }
            }
            None => write_u32(w, 0)?,
        }

        write_u32(w, slot.reference_start)?;
        write_u32(w, slot.reference_count)?;
        max_ref_end = max_ref_end.max(slot.reference_start + slot.reference_count);
    }

    let references = world.references.range(0, max_ref_end);
    write_u32(w, references.len() as u32)?;
    for target in references {
        write_u32(w, target.get())?;
    }
    Ok(())
}

fn state_flags(slot: &entity::Slot) -> u8 {
    match slot.state {
        entity::State::Enabled => 0,
        entity::State::Disabled => 1,
        entity::State::DisabledDueToAncestor => 2,
        entity::State::Free => unreachable!("iter() never yields a free slot"),
    }
}

/// Read a world stream written by [`write_world`] into a brand-new
/// [`World`], registering every incoming type into the fresh world's
/// schema. Stored entity ids are renumbered by allocation order; a
/// `u32 -> Entity` map is returned alongside so a caller that also
/// persisted external links (outside the world) can remap them too.
pub fn read_world(r: &mut impl Read) -> Result<(World, std::collections::HashMap<u32, entity::Entity>), SerializeError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(SerializeError::BadMagic);
    }
    let version = read_u16(r)?;
    if version != FORMAT_VERSION {
        return Err(SerializeError::UnsupportedVersion(version));
    }

    let mut world = World::new();
    let index_map = {
        let mut resolver = FreshSchema::new(&mut world.schema);
        read_schema(r, &mut resolver)?
    };

    let entity_count = read_u32(r)?;
    struct Pending {
        stored_id: u32,
        stored_parent: u32,
        state_flags: u8,
        definition: StoredDefinition,
        component_bytes: Vec<(u32, Vec<u8>)>,
        arrays: Vec<(u32, Vec<u8>)>,
        reference_start: u32,
        reference_count: u32,
    }

    let mut pending = Vec::with_capacity(entity_count as usize);
    for _ in 0..entity_count {
        let stored_id = read_u32(r)?;
        let stored_parent = read_u32(r)?;
        let state_flags = read_u8(r)?;
        let definition = read_definition(r)?;

        let mut component_bytes = Vec::with_capacity(definition.components.len());
        for &stored_index in &definition.components {
            let local_index = index_map
                .translate(DataKind::Component, stored_index)
                .ok_or_else(|| WorldError::TypeNotRegistered(TypeHash(0)))?;
            let size = world
                .schema
                .component_size(local_index)
                .ok_or_else(|| WorldError::TypeNotRegistered(TypeHash(0)))? as usize;
            let mut bytes = vec![0u8; size];
            r.read_exact(&mut bytes)?;
            component_bytes.push((local_index, bytes));
        }

        let array_count = read_u32(r)?;
        let mut arrays = Vec::with_capacity(array_count as usize);
        for _ in 0..array_count {
            let stored_array_index = read_u32(r)?;
            let byte_len = read_u32(r)? as usize;
            let mut bytes = vec![0u8; byte_len];
            r.read_exact(&mut bytes)?;
            let local_index = index_map
                .translate(DataKind::Array, stored_array_index)
                .ok_or_else(|| WorldError::TypeNotRegistered(TypeHash(0)))?;
            arrays.push((local_index, bytes));
        }

        let reference_start = read_u32(r)?;
        let reference_count = read_u32(r)?;

        pending.push(Pending {
            stored_id,
            stored_parent,
            state_flags,
            definition,
            component_bytes,
            arrays,
            reference_start,
            reference_count,
        });
    }

    let reference_table_len = read_u32(r)?;
    let mut stored_references = Vec::with_capacity(reference_table_len as usize);
    for _ in 0..reference_table_len {
        stored_references.push(entity::Id::new(read_u32(r)?));
    }

    // Pass 1: allocate every entity and build the stored-id -> live-Entity map.
    let mut id_map = std::collections::HashMap::with_capacity(pending.len());
    for entry in &pending {
        let created = world.create_entity();
        id_map.insert(entry.stored_id, created);
    }

    // Pass 2: replay components/tags/arrays/enabled-state, then references, then parents.
    for entry in &pending {
        let entity = id_map[&entry.stored_id];
        for &(local_index, ref bytes) in &entry.component_bytes {
            world.add_component_raw(entity, DataType::new(DataKind::Component, local_index), bytes)?;
        }
        for &stored_tag_index in &entry.definition.tags {
            if stored_tag_index == schema::DISABLED_TAG_INDEX {
                continue;
            }
            let local_index = index_map
                .translate(DataKind::Tag, stored_tag_index)
                .ok_or_else(|| WorldError::TypeNotRegistered(TypeHash(0)))?;
            world.add_tag_raw(entity, DataType::new(DataKind::Tag, local_index))?;
        }
        for &(local_index, ref bytes) in &entry.arrays {
            let element_size = world
                .schema
                .array_element_size(local_index)
                .ok_or_else(|| WorldError::TypeNotRegistered(TypeHash(0)))? as usize;
            let length = if element_size == 0 { 0 } else { bytes.len() / element_size };
            world.create_array_raw(entity, DataType::new(DataKind::Array, local_index), element_size, length)?;
            if let Some(slot) = world.directory.slot_by_id_mut(entity.id())
                && let Some(arrays) = &mut slot.arrays
            {
                arrays.insert(local_index, bytes.clone());
            }
        }
        if entry.state_flags != 0 {
            world.set_enabled(entity, false)?;
        }

        let targets: Vec<entity::Id> = stored_references
            [entry.reference_start as usize..(entry.reference_start + entry.reference_count) as usize]
            .iter()
            .map(|&stored_target| {
                if stored_target == entity::Id::NONE {
                    entity::Id::NONE
                } else {
                    id_map
                        .get(&stored_target.get())
                        .map(|e| e.id())
                        .unwrap_or(entity::Id::NONE)
                }
            })
            .collect();
        let (start, count) = world.references.append_range(&targets);
        if let Some(slot) = world.directory.slot_by_id_mut(entity.id()) {
            slot.reference_start = start;
            slot.reference_count = count;
        }
    }

    for entry in &pending {
        if entry.stored_parent == entity::Id::NONE.get() {
            continue;
        }
        if let Some(&parent) = id_map.get(&entry.stored_parent) {
            let child = id_map[&entry.stored_id];
            world.set_parent(child, Some(parent))?;
        }
    }

    Ok((world, id_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ArrayElement, Component, Tag};

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {
        fn type_name() -> &'static str {
            "loom_engine::world::serialize::tests::Position"
        }
        fn fields() -> &'static [Field] {
            static FIELDS: std::sync::OnceLock<Vec<Field>> = std::sync::OnceLock::new();
            FIELDS.get_or_init(|| vec![Field::new("x", "f32"), Field::new("y", "f32")])
        }
    }

    #[derive(Clone, Copy)]
    struct Hitpoints(#[allow(dead_code)] u32);
    impl ArrayElement for Hitpoints {
        fn type_name() -> &'static str {
            "loom_engine::world::serialize::tests::Hitpoints"
        }
    }

    struct Marked;
    impl Tag for Marked {
        fn type_name() -> &'static str {
            "loom_engine::world::serialize::tests::Marked"
        }
    }

    #[test]
    fn type_layout_round_trips() {
        // Given
        let layout = TypeLayout::new("Position".to_string(), 8, vec![Field::new("x", "f32"), Field::new("y", "f32")]);
        let mut buf = Vec::new();

        // When
        write_type_layout(&mut buf, &layout).unwrap();
        let round_tripped = read_type_layout(&mut buf.as_slice()).unwrap();

        // Then
        assert_eq!(round_tripped.name(), "Position");
        assert_eq!(round_tripped.size(), 8);
        assert_eq!(round_tripped.fields().len(), 2);
    }

    #[test]
    fn world_round_trips_component_data() {
        // Given
        let mut world = World::new();
        let a = world.create_entity();
        world.add_component(a, Position { x: 1.0, y: 2.0 }).unwrap();

        // When
        let mut buf = Vec::new();
        write_world(&mut buf, &world).unwrap();
        let (restored, id_map) = read_world(&mut buf.as_slice()).unwrap();

        // Then
        let restored_a = id_map[&a.id().get()];
        assert_eq!(
            *restored.get_component::<Position>(restored_a).unwrap(),
            Position { x: 1.0, y: 2.0 }
        );
    }

    #[test]
    fn world_round_trips_hierarchy_and_references() {
        // Given
        let mut world = World::new();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.set_parent(child, Some(parent)).unwrap();
        world.add_reference(parent, child).unwrap();
        world.set_enabled(parent, false).unwrap();

        // When
        let mut buf = Vec::new();
        write_world(&mut buf, &world).unwrap();
        let (restored, id_map) = read_world(&mut buf.as_slice()).unwrap();

        // Then
        let restored_parent = id_map[&parent.id().get()];
        let restored_child = id_map[&child.id().get()];
        assert_eq!(restored.get_children(restored_parent), vec![restored_child]);
        assert!(!restored.is_locally_enabled(restored_parent).unwrap());
        assert!(!restored.is_enabled(restored_child).unwrap());
        assert_eq!(restored.get_reference(restored_parent, 1).unwrap(), Some(restored_child));
    }

    #[test]
    fn world_round_trips_arrays_and_tags() {
        // Given
        let mut world = World::new();
        let a = world.create_entity();
        world.create_array::<Hitpoints>(a, 3).unwrap();
        world.set_array_element(a, 1, Hitpoints(7)).unwrap();
        world.add_tag::<Marked>(a).unwrap();

        // When
        let mut buf = Vec::new();
        write_world(&mut buf, &world).unwrap();
        let (restored, id_map) = read_world(&mut buf.as_slice()).unwrap();

        // Then
        let restored_a = id_map[&a.id().get()];
        assert_eq!(restored.get_array::<Hitpoints>(restored_a).unwrap().len(), 3);
        assert_eq!(restored.get_array::<Hitpoints>(restored_a).unwrap()[1].0, 7);
        assert!(restored.has_tag::<Marked>(restored_a).unwrap());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; 16];
        assert!(matches!(read_world(&mut buf.as_slice()), Err(SerializeError::BadMagic)));
    }
}
