//! Process-wide type registry (C2: TypeRegistry & TypeLayout).
//!
//! Registration is keyed by a hash of the type's fully-qualified name, not
//! by `std::any::TypeId` — the name hash is what survives into the binary
//! format (§4.10) and across processes/resolvers, whereas `TypeId` is only
//! meaningful within one running process. `TypeId` is still used as a
//! fast-path cache key for the common "I have a concrete Rust type, give me
//! its hash" lookup.

use std::{
    any::TypeId as StdTypeId,
    fmt,
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

/// A stable, name-derived type identity. Two processes (or two runs of the
/// same build) that register a type with the same fully-qualified name
/// arrive at the same hash, which is what makes the binary format portable
/// across a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHash(pub i64);

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0 as u64)
    }
}

/// One named field of a registered type, for reflection purposes only —
/// the engine never reads through a field to lay out memory, it only
/// records the description for serialization/debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    /// Hash of the field's own type name.
    pub type_hash: TypeHash,
}

impl Field {
    pub fn new(name: impl Into<String>, type_name: &str) -> Self {
        Self {
            name: name.into(),
            type_hash: hash_name(type_name),
        }
    }
}

/// Metadata recorded for every registered type: name, size, and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLayout {
    name: String,
    hash: TypeHash,
    size: usize,
    fields: Vec<Field>,
}

impl TypeLayout {
    /// Construct directly from parts — used by the binary codec (§4.10),
    /// which reads a name/size/field list off the wire rather than
    /// deriving them from a concrete Rust type.
    pub(crate) fn new(name: String, size: usize, fields: Vec<Field>) -> Self {
        let hash = hash_name(&name);
        Self {
            name,
            hash,
            size,
            fields,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// FNV-1a 64-bit over the UTF-8 bytes of a fully-qualified type name,
/// reinterpreted as a signed hash per the wire format (`i64 typeHash`).
pub fn hash_name(name: &str) -> TypeHash {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    TypeHash(hash as i64)
}

/// Process-wide, thread-safe table of [`TypeLayout`]s.
///
/// Registration is idempotent by name hash: registering the same name
/// twice with an identical layout returns the existing entry; registering
/// the same name with a *different* layout is a programmer error and
/// panics, matching the design's "double-registering with a mismatched
/// layout is a programmer error" contract.
pub struct TypeRegistry {
    by_std_type: DashMap<StdTypeId, TypeHash>,
    by_hash: DashMap<TypeHash, TypeLayout>,
    registrations: AtomicU64,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            by_std_type: DashMap::new(),
            by_hash: DashMap::new(),
            registrations: AtomicU64::new(0),
        }
    }

    /// The single process-wide instance. Multiple [`crate::ecs::world::World`]s
    /// share it so that the same Rust type always maps to the same
    /// [`TypeHash`], regardless of which world (or thread) registered it
    /// first.
    pub fn global() -> &'static TypeRegistry {
        static INSTANCE: OnceLock<TypeRegistry> = OnceLock::new();
        INSTANCE.get_or_init(TypeRegistry::new)
    }

    /// Register a concrete Rust type `T`, deriving name/size/fields from
    /// the type itself. This is the path `Component`/`ArrayElement`/`Tag`
    /// derives and blanket registration helpers use.
    pub fn register<T: 'static>(
        &self,
        name: &str,
        size: usize,
        fields: &[Field],
    ) -> TypeHash {
        let std_id = StdTypeId::of::<T>();
        if let Some(existing) = self.by_std_type.get(&std_id) {
            return *existing;
        }
        let hash = self.register_raw(name, size, fields);
        self.by_std_type.insert(std_id, hash);
        hash
    }

    /// Register a type with no compile-time Rust representation (e.g. a
    /// layout described by an external schema at runtime). Grounded in the
    /// "foreign/TS-defined component" idiom: a consumer can register a
    /// layout purely by name/size/fields and later address it by
    /// [`TypeHash`] alone.
    pub fn register_raw(&self, name: &str, size: usize, fields: &[Field]) -> TypeHash {
        let layout = TypeLayout::new(name.to_string(), size, fields.to_vec());
        let hash = layout.hash;

        match self.by_hash.entry(hash) {
            dashmap::Entry::Occupied(existing) => {
                let existing = existing.get();
                assert_eq!(
                    existing.size, layout.size,
                    "type '{name}' already registered with a different size ({} vs {})",
                    existing.size, layout.size
                );
                assert_eq!(
                    existing.fields, layout.fields,
                    "type '{name}' already registered with a different field layout"
                );
            }
            dashmap::Entry::Vacant(vacant) => {
                vacant.insert(layout);
                self.registrations.fetch_add(1, Ordering::Relaxed);
            }
        }
        hash
    }

    /// Look up by fully-qualified name.
    pub fn get(&self, name: &str) -> Option<TypeLayout> {
        self.get_by_hash(hash_name(name))
    }

    /// Look up by the stable name hash (what the binary format stores).
    pub fn get_by_hash(&self, hash: TypeHash) -> Option<TypeLayout> {
        self.by_hash.get(&hash).map(|e| e.value().clone())
    }

    /// Whether Rust type `T` has been registered.
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.by_std_type.contains_key(&StdTypeId::of::<T>())
    }

    /// The hash assigned to Rust type `T`, if it has been registered.
    pub fn hash_of<T: 'static>(&self) -> Option<TypeHash> {
        self.by_std_type.get(&StdTypeId::of::<T>()).map(|e| *e.value())
    }

    /// Number of distinct registered types.
    pub fn len(&self) -> usize {
        self.registrations.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get_by_name() {
        // Given
        let registry = TypeRegistry::new();
        // When
        registry.register::<u32>("Position", 8, &[]);
        // Then
        let layout = registry.get("Position").unwrap();
        assert_eq!(layout.size(), 8);
    }

    #[test]
    fn registration_is_idempotent_by_name() {
        let registry = TypeRegistry::new();
        let h1 = registry.register::<u32>("Position", 8, &[]);
        let h2 = registry.register_raw("Position", 8, &[]);
        assert_eq!(h1, h2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already registered with a different size")]
    fn mismatched_size_on_reregistration_panics() {
        let registry = TypeRegistry::new();
        registry.register_raw("Position", 8, &[]);
        registry.register_raw("Position", 12, &[]);
    }

    #[test]
    fn is_registered_reflects_rust_type() {
        let registry = TypeRegistry::new();
        assert!(!registry.is_registered::<u32>());
        registry.register::<u32>("u32", 4, &[]);
        assert!(registry.is_registered::<u32>());
    }

    #[test]
    fn fields_are_recorded() {
        let registry = TypeRegistry::new();
        let fields = vec![Field::new("x", "f32"), Field::new("y", "f32")];
        registry.register_raw("Position", 8, &fields);
        let layout = registry.get("Position").unwrap();
        assert_eq!(layout.fields().len(), 2);
        assert_eq!(layout.fields()[0].name, "x");
    }

    #[test]
    fn hash_name_is_stable() {
        assert_eq!(hash_name("Position"), hash_name("Position"));
        assert_ne!(hash_name("Position"), hash_name("Velocity"));
    }
}
