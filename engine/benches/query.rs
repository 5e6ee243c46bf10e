//! Throughput of the typed [`ComponentQuery`](loom_engine::ecs::world::query::ComponentQuery)
//! path across sparse and dense archetype layouts.

use criterion::{Criterion, criterion_group, criterion_main};
use loom_engine::World;
use loom_engine::ecs::world::query::ComponentQuery;
use loom_macros::Component;

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

const ENTITY_COUNT: usize = 10_000;

fn build_world(velocity_fraction: usize) -> World {
    let mut world = World::new();
    for i in 0..ENTITY_COUNT {
        let entity = world.create_entity();
        world
            .add_component(entity, Position { x: 0.0, y: 0.0, z: 0.0 })
            .unwrap();
        if velocity_fraction == 1 || i % velocity_fraction == 0 {
            world
                .add_component(entity, Velocity { x: 1.0, y: 2.0, z: 3.0 })
                .unwrap();
        }
    }
    world
}

fn bench_single_component_dense(c: &mut Criterion) {
    let mut world = build_world(1);

    c.bench_function("query/single_component_dense", |b| {
        b.iter(|| {
            let mut query = ComponentQuery::<Position>::new(&mut world).unwrap();
            query
                .for_each_mut(|_entity, position| position.x += 1.0)
                .unwrap();
        });
    });
}

fn bench_two_component_join(c: &mut Criterion) {
    let mut world = build_world(1);

    c.bench_function("query/two_component_join_dense", |b| {
        b.iter(|| {
            let mut query = ComponentQuery::<(Position, Velocity)>::new(&mut world).unwrap();
            query
                .for_each_mut(|_entity, (position, velocity)| {
                    position.x += velocity.x;
                    position.y += velocity.y;
                    position.z += velocity.z;
                })
                .unwrap();
        });
    });
}

fn bench_two_component_join_sparse(c: &mut Criterion) {
    let mut world = build_world(10);

    c.bench_function("query/two_component_join_sparse", |b| {
        b.iter(|| {
            let mut query = ComponentQuery::<(Position, Velocity)>::new(&mut world).unwrap();
            query
                .for_each_mut(|_entity, (position, velocity)| {
                    position.x += velocity.x;
                })
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_single_component_dense,
    bench_two_component_join,
    bench_two_component_join_sparse
);
criterion_main!(benches);
