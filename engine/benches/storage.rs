//! Throughput of entity creation, component writes, and destruction across
//! a realistic spread of archetypes.

use criterion::{Criterion, criterion_group, criterion_main};
use loom_engine::World;
use loom_macros::{ArrayElement, Component, Tag};

#[derive(Component, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Component, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Component, Clone, Copy)]
struct Health {
    current: u32,
    max: u32,
}

#[derive(ArrayElement, Clone, Copy)]
struct Waypoint {
    x: f32,
    y: f32,
}

#[derive(Tag)]
struct Friendly;

const ENTITY_COUNT: usize = 10_000;

fn spawn_mixed_archetypes(world: &mut World) {
    for i in 0..ENTITY_COUNT {
        let entity = world.create_entity();
        world
            .add_component(entity, Position { x: 0.0, y: 0.0, z: 0.0 })
            .unwrap();
        if i % 2 == 0 {
            world
                .add_component(entity, Velocity { x: 1.0, y: 0.0, z: 0.0 })
                .unwrap();
        }
        if i % 3 == 0 {
            world
                .add_component(entity, Health { current: 100, max: 100 })
                .unwrap();
        }
        if i % 5 == 0 {
            world.add_tag::<Friendly>(entity).unwrap();
        }
    }
}

fn bench_create_entities(c: &mut Criterion) {
    c.bench_function("create_entity/single_archetype", |b| {
        b.iter(|| {
            let mut world = World::new();
            for _ in 0..ENTITY_COUNT {
                let entity = world.create_entity();
                world
                    .add_component(entity, Position { x: 0.0, y: 0.0, z: 0.0 })
                    .unwrap();
            }
            world
        });
    });

    c.bench_function("create_entity/mixed_archetypes", |b| {
        b.iter(|| {
            let mut world = World::new();
            spawn_mixed_archetypes(&mut world);
            world
        });
    });
}

fn bench_component_mutation(c: &mut Criterion) {
    let mut world = World::new();
    spawn_mixed_archetypes(&mut world);

    c.bench_function("component/get_mut_position", |b| {
        b.iter(|| {
            let entities: Vec<_> = world.query(Default::default()).iter().filter_map(Result::ok).collect();
            for entity in entities {
                if let Ok(position) = world.get_component_mut::<Position>(entity) {
                    position.x += 1.0;
                }
            }
        });
    });
}

fn bench_destroy_entities(c: &mut Criterion) {
    c.bench_function("destroy_entity/mixed_archetypes", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                spawn_mixed_archetypes(&mut world);
                let entities: Vec<_> = world.query(Default::default()).iter().filter_map(Result::ok).collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for entity in entities {
                    world.destroy_entity(entity).unwrap();
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_create_entities,
    bench_component_mutation,
    bench_destroy_entities
);
criterion_main!(benches);
