//! Component, array-element, and tag marker traits plus the process-wide
//! type registry (C2) that backs every per-world [`crate::ecs::schema::Schema`].
//!
//! ## Architecture
//!
//! - [`Component`] / [`ArrayElement`] / [`Tag`]: marker traits a value type
//!   implements (usually via `#[derive(Component)]` etc. from `loom_macros`)
//!   to become eligible for one of the three per-world index namespaces.
//! - [`registry::TypeRegistry`]: process-wide, idempotent-by-name-hash table
//!   of [`registry::TypeLayout`] — the thing the design calls a "singleton
//!   guarded by init-once."
//! - [`value::BoxedValue`]: a type-erased, fixed-size byte payload used by
//!   the operation buffer and any other dynamic (non-generic) code path.
//!
//! ## Thread Safety
//!
//! [`registry::TypeRegistry`] uses lock-free reads via `DashMap` and minimal
//! locking only on first registration of a type, mirroring the access
//! pattern production component registries in this lineage use — multiple
//! worlds, possibly on different threads, share one registry and must agree
//! on type identity.

pub mod registry;
pub mod value;

pub use registry::{Field, TypeHash, TypeLayout, TypeRegistry};
pub use value::BoxedValue;

/// Plain-data component type: fixed-size, attached to entities, occupies a
/// column in every chunk whose definition includes it.
///
/// Components carry no owned heap allocation and no non-trivial destructor
/// — the "unmanaged value semantics" the design calls for. `Copy` is the
/// idiomatic way to express that bound in Rust.
pub trait Component: Copy + Send + Sync + 'static {
    /// Fully-qualified type name, used as the registry's stable identity
    /// and embedded in the binary format.
    fn type_name() -> &'static str;

    /// Named fields, for `TypeLayout`'s field descriptors. Most components
    /// don't need reflection beyond name/size and can leave this empty;
    /// `#[derive(Component)]` populates it from the struct's named fields.
    fn fields() -> &'static [Field] {
        &[]
    }
}

/// Plain-data array-element type: the element type of a per-entity
/// variable-length buffer (§4.7 `createArray`/`getArray`).
pub trait ArrayElement: Copy + Send + Sync + 'static {
    fn type_name() -> &'static str;

    fn fields() -> &'static [Field] {
        &[]
    }
}

/// Zero-size marker type that participates in archetype identity without
/// occupying a chunk column.
pub trait Tag: Send + Sync + 'static {
    fn type_name() -> &'static str;
}
