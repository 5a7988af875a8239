//! Property-based tests over random op sequences: handle identity, the
//! archetype/lookup bijection, column integrity, canonical column order,
//! and stale-op drops, checked against a reference model at every frame
//! boundary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use swarm_ecs::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompA(u64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompB(u64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompC(u64);

const COMPONENTS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    /// Create an entity with the components named by the low 3 mask bits.
    Create(u8),
    Destroy(usize),
    Add(usize, u8),
    Remove(usize, u8),
    DeferredDestroy(usize),
    DeferredAdd(usize, u8),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<u8>().prop_map(Op::Create),
        2 => any::<usize>().prop_map(Op::Destroy),
        3 => (any::<usize>(), 0u8..COMPONENTS as u8).prop_map(|(i, c)| Op::Add(i, c)),
        2 => (any::<usize>(), 0u8..COMPONENTS as u8).prop_map(|(i, c)| Op::Remove(i, c)),
        1 => any::<usize>().prop_map(Op::DeferredDestroy),
        1 => (any::<usize>(), 0u8..COMPONENTS as u8).prop_map(|(i, c)| Op::DeferredAdd(i, c)),
        2 => Just(Op::Tick),
    ]
}

struct ModelEntity {
    handle: Entity,
    alive: bool,
    comps: [Option<u64>; COMPONENTS],
}

fn add_immediate(world: &mut World, e: Entity, comp: u8, v: u64) -> Result<()> {
    match comp {
        0 => world.add_component(e, CompA(v)),
        1 => world.add_component(e, CompB(v)),
        _ => world.add_component(e, CompC(v)),
    }
}

fn enqueue_add(world: &World, e: Entity, comp: u8, v: u64) {
    match comp {
        0 => world.enqueue_component_add(e, CompA(v)),
        1 => world.enqueue_component_add(e, CompB(v)),
        _ => world.enqueue_component_add(e, CompC(v)),
    }
}

fn remove_immediate(world: &mut World, e: Entity, comp: u8) -> Result<()> {
    match comp {
        0 => world.remove_component::<CompA>(e),
        1 => world.remove_component::<CompB>(e),
        _ => world.remove_component::<CompC>(e),
    }
}

fn component_value(world: &World, e: Entity, comp: u8) -> Option<u64> {
    match comp {
        0 => world.get_component::<CompA>(e).map(|c| c.0),
        1 => world.get_component::<CompB>(e).map(|c| c.0),
        _ => world.get_component::<CompC>(e).map(|c| c.0),
    }
}

fn check_invariants(world: &World, model: &[ModelEntity]) {
    // No two live entities share (index, version)
    let mut live = HashSet::new();
    for m in model.iter().filter(|m| m.alive) {
        assert!(
            live.insert(m.handle.to_bits()),
            "duplicate live handle {:?}",
            m.handle
        );
    }

    // The world agrees with the model on liveness, values, and location
    for m in model {
        assert_eq!(world.is_entity_valid(m.handle), m.alive);
        if m.alive {
            for comp in 0..COMPONENTS as u8 {
                assert_eq!(
                    component_value(world, m.handle, comp),
                    m.comps[comp as usize],
                    "component {comp} mismatch on {:?}",
                    m.handle
                );
            }
            let loc = world.try_get_entity_location(m.handle).unwrap();
            let archetype = &world.archetypes()[loc.archetype];
            assert_eq!(archetype.entities()[loc.slot], m.handle);
        } else {
            assert!(world.try_get_entity_location(m.handle).is_none());
        }
    }

    // Column lengths match the entity count, column order is canonical,
    // and every live entity appears in exactly one archetype slot
    let mut listed = HashSet::new();
    for archetype in world.archetypes().iter() {
        let mut prev_column = None;
        for id in archetype.signature().ids() {
            let column_idx = archetype.column_index(id).unwrap();
            if let Some(prev) = prev_column {
                assert!(column_idx > prev, "column order not ascending by id");
            }
            prev_column = Some(column_idx);
            assert_eq!(archetype.column(id).unwrap().len(), archetype.len());
        }
        for &e in archetype.entities() {
            assert!(listed.insert(e.to_bits()), "entity listed twice: {e:?}");
        }
    }
    assert_eq!(listed.len(), world.entity_count());
    assert_eq!(listed, live);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_op_sequences_preserve_world_invariants(
        ops in prop::collection::vec(op_strategy(), 0..200)
    ) {
        let mut world = World::with_registry(Arc::new(ComponentRegistry::new()));
        let mut model: Vec<ModelEntity> = Vec::new();
        // Model mirror of the deferred queues, applied at Tick in
        // pipeline order: destroys first, then adds
        let mut pending_destroys: Vec<usize> = Vec::new();
        let mut pending_adds: Vec<(usize, u8, u64)> = Vec::new();
        let mut next_value: u64 = 1;

        for op in ops {
            match op {
                Op::Create(mask) => {
                    let e = world.create_entity();
                    let mut comps = [None; COMPONENTS];
                    for comp in 0..COMPONENTS as u8 {
                        if mask & (1 << comp) != 0 {
                            let v = next_value;
                            next_value += 1;
                            add_immediate(&mut world, e, comp, v).unwrap();
                            comps[comp as usize] = Some(v);
                        }
                    }
                    model.push(ModelEntity { handle: e, alive: true, comps });
                }
                Op::Destroy(i) if !model.is_empty() => {
                    let i = i % model.len();
                    let was_alive = model[i].alive;
                    assert_eq!(world.destroy_entity(model[i].handle), was_alive);
                    model[i].alive = false;
                }
                Op::Add(i, comp) if !model.is_empty() => {
                    let i = i % model.len();
                    let v = next_value;
                    next_value += 1;
                    let outcome = add_immediate(&mut world, model[i].handle, comp, v);
                    if model[i].alive {
                        outcome.unwrap();
                        model[i].comps[comp as usize] = Some(v);
                    } else {
                        prop_assert!(matches!(outcome, Err(EcsError::StaleHandle(_))));
                    }
                }
                Op::Remove(i, comp) if !model.is_empty() => {
                    let i = i % model.len();
                    let outcome = remove_immediate(&mut world, model[i].handle, comp);
                    if model[i].alive {
                        outcome.unwrap();
                        model[i].comps[comp as usize] = None;
                    } else {
                        prop_assert!(matches!(outcome, Err(EcsError::StaleHandle(_))));
                    }
                }
                Op::DeferredDestroy(i) if !model.is_empty() => {
                    let i = i % model.len();
                    world.enqueue_destroy_entity(model[i].handle);
                    pending_destroys.push(i);
                }
                Op::DeferredAdd(i, comp) if !model.is_empty() => {
                    let i = i % model.len();
                    let v = next_value;
                    next_value += 1;
                    enqueue_add(&world, model[i].handle, comp, v);
                    pending_adds.push((i, comp, v));
                }
                Op::Tick => {
                    world.tick(Duration::from_millis(16));
                    for i in pending_destroys.drain(..) {
                        model[i].alive = false;
                    }
                    // Stale adds drop silently; live ones land
                    for (i, comp, v) in pending_adds.drain(..) {
                        if model[i].alive {
                            model[i].comps[comp as usize] = Some(v);
                        }
                    }
                    check_invariants(&world, &model);
                }
                // Ops targeting an empty world degrade to no-ops
                _ => {}
            }
        }

        world.tick(Duration::from_millis(16));
        for i in pending_destroys.drain(..) {
            model[i].alive = false;
        }
        for (i, comp, v) in pending_adds.drain(..) {
            if model[i].alive {
                model[i].comps[comp as usize] = Some(v);
            }
        }
        check_invariants(&world, &model);
    }
}
