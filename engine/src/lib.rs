//! An archetype-based entity-component-system storage engine.
//!
//! Entities are rows in a [`World`](ecs::world::World); components, array
//! elements, and tags are declared by deriving
//! [`Component`](ecs::component::Component), [`ArrayElement`](ecs::component::ArrayElement),
//! and [`Tag`](ecs::component::Tag). Entities sharing the same set of
//! components/arrays/tags (their [`Definition`](ecs::definition::Definition))
//! are stored together in a columnar [`Chunk`](ecs::storage::chunk::Chunk),
//! so that queries over a component set touch only the chunks that carry it.

pub mod ecs;

pub use ecs::{
    component::{ArrayElement, Component, Tag},
    entity::Entity,
    world::{World, error::WorldError},
};
