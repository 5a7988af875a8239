// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World: the façade over archetype storage, entity lifecycle, deferred
//! commands, event sinks, the system scheduler, and the spatial chunk
//! index, plus the frame pipeline that stitches them together.

use std::any::TypeId;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use glam::{IVec3, Vec3};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::{debug, error};

use crate::archetype::Archetype;
use crate::archetypes::ArchetypeManager;
use crate::chunk::{ChunkDims, ChunkIndex, ChunkPoolConfig};
use crate::command::{ComponentManager, EntityBuilder, ErasedValue};
use crate::entities::{CreateThunk, EntityManager};
use crate::entity::{Entity, EntityLocation};
use crate::error::{EcsError, Result};
use crate::event::EventSinks;
use crate::kernel::KernelRegistry;
use crate::registry::{Component, ComponentId, ComponentRegistry};
use crate::schedule::SystemScheduler;
use crate::signature::Signature;
use crate::system::{System, SystemId};

/// Central ECS world.
///
/// Immediate structural APIs (`create_entity`, `destroy_entity`,
/// `add_component`, ...) take `&mut self` and belong to the pipeline thread.
/// The `enqueue_*` family takes `&self`, is safe from systems running in a
/// parallel batch, and is drained once per [`World::tick`] in a fixed order.
pub struct World {
    registry: Arc<ComponentRegistry>,
    archetypes: ArchetypeManager,
    entities: EntityManager,
    components: ComponentManager,
    chunks: ChunkIndex,
    events: EventSinks,
    systems: SystemScheduler,
    kernels: KernelRegistry,
    frame: u64,

    // Scratch buffers owned by the world and cleared at tick start, so the
    // pipeline does not allocate fresh intermediates every frame.
    scratch_destroys: Vec<Entity>,
    scratch_seen: FxHashSet<Entity>,
    scratch_created: Vec<Entity>,
    scratch_chunk_updates: Vec<(Entity, IVec3)>,
    /// Per-frame `ordered id pattern -> archetype index` cache for the
    /// builder drain; builders sharing a component pattern skip the bitmap
    /// rebuild and the interning lookup.
    signature_cache: AHashMap<SmallVec<[ComponentId; 8]>, usize>,
}

impl World {
    /// Create a new, empty world sharing the process-wide component registry.
    pub fn new() -> Self {
        Self::with_registry(ComponentRegistry::shared())
    }

    /// Create a world with its own registry handle; tests use this to get a
    /// private id space.
    pub fn with_registry(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            archetypes: ArchetypeManager::new(registry.clone()),
            entities: EntityManager::new(),
            components: ComponentManager::new(),
            chunks: ChunkIndex::default(),
            events: EventSinks::default(),
            systems: SystemScheduler::new(),
            kernels: KernelRegistry::new(),
            frame: 0,
            scratch_destroys: Vec::new(),
            scratch_seen: FxHashSet::default(),
            scratch_created: Vec::new(),
            scratch_chunk_updates: Vec::new(),
            signature_cache: AHashMap::with_capacity(32),
            registry,
        }
    }

    /// Replace the chunk grid configuration. Call before any entity is
    /// indexed; existing assignments are discarded.
    pub fn with_chunk_config(mut self, dims: ChunkDims, pool: ChunkPoolConfig) -> Self {
        self.chunks = ChunkIndex::new(dims, pool);
        self
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Dense id for `T`, interning it on first use.
    pub fn component_id<T: Component>(&self) -> ComponentId {
        self.registry.id_of::<T>()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn chunks(&self) -> &ChunkIndex {
        &self.chunks
    }

    // === Entity lifecycle (immediate) === //

    /// Create an entity in the empty archetype.
    pub fn create_entity(&mut self) -> Entity {
        self.entities.create(&mut self.archetypes)
    }

    /// Create an entity directly in the archetype for `signature`. This is
    /// the batched-creation critical path: no intermediate archetype hops.
    pub fn create_entity_with_signature(&mut self, signature: &Signature) -> Result<Entity> {
        let archetype = self.archetypes.get_or_create(signature)?;
        Ok(self.entities.create_in(&mut self.archetypes, archetype))
    }

    /// A builder for deferred creation via
    /// [`World::enqueue_create_entity`].
    pub fn create_entity_builder(&self) -> EntityBuilder {
        EntityBuilder::new(self.registry.clone())
    }

    /// Immediately destroy an entity. Returns false for stale handles.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.entities.is_alive(entity) {
            return false;
        }
        {
            let Self {
                ref mut chunks,
                ref entities,
                ref archetypes,
                ref registry,
                ..
            } = *self;
            chunks.handle_destroy_request(entities, archetypes, registry, &[entity]);
        }
        self.entities.destroy(&mut self.archetypes, entity)
    }

    pub fn is_entity_valid(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn try_get_entity_location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.location(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    // === Component access (immediate) === //

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let loc = self.entities.location(entity)?;
        let id = self.registry.id_of::<T>();
        self.archetypes[loc.archetype].get_component::<T>(id, loc.slot)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let loc = self.entities.location(entity)?;
        let id = self.registry.id_of::<T>();
        self.archetypes[loc.archetype]
            .column_mut(id)?
            .get_mut::<T>(loc.slot)
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        let id = self.registry.id_of::<T>();
        self.entities
            .location(entity)
            .is_some_and(|loc| self.archetypes[loc.archetype].column_index(id).is_some())
    }

    /// Add (or overwrite) a component right now, moving the entity to the
    /// grown archetype when the component is new.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let value = ErasedValue::new(&self.registry, value);
        ComponentManager::apply_add(&mut self.entities, &mut self.archetypes, entity, value)
    }

    /// Remove a component right now. Removing an absent component is a no-op.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let id = self.registry.id_of::<T>();
        ComponentManager::apply_remove(&mut self.entities, &mut self.archetypes, entity, id)
    }

    // === Deferred command surface (&self, any thread) === //

    /// Queue an entity creation; the builder's components decide its
    /// archetype at drain time.
    pub fn enqueue_create_entity(&self, builder: EntityBuilder) {
        self.entities.enqueue_create_with_builder(builder);
    }

    /// Queue a bare creation into the empty archetype.
    pub fn enqueue_create(&self) {
        self.entities.enqueue_create(None);
    }

    /// Queue a creation into the empty archetype, then run `thunk` against
    /// the world and the fresh entity during the drain.
    pub fn enqueue_create_then(
        &self,
        thunk: impl FnOnce(&mut World, Entity) + Send + 'static,
    ) {
        self.entities
            .enqueue_create(Some(Box::new(thunk) as CreateThunk));
    }

    pub fn enqueue_destroy_entity(&self, entity: Entity) {
        self.entities.enqueue_destroy(entity);
    }

    pub fn enqueue_component_add<T: Component>(&self, entity: Entity, value: T) {
        self.components
            .enqueue_add(entity, ErasedValue::new(&self.registry, value));
    }

    pub fn enqueue_component_remove<T: Component>(&self, entity: Entity) {
        self.enqueue_component_remove_by_id(entity, self.registry.id_of::<T>());
    }

    pub fn enqueue_component_remove_by_id(&self, entity: Entity, id: ComponentId) {
        self.components.enqueue_remove(entity, id);
    }

    /// Report a chunk-boundary crossing observed by a movement system. The
    /// index applies it at the end of the current tick.
    pub fn request_chunk_update(&self, entity: Entity, position: Vec3) {
        self.chunks.request_update_at(entity, position);
    }

    // === Queries === //

    /// Archetypes whose signature contains every id in `all_of`.
    pub fn query_archetypes<'a>(
        &'a self,
        all_of: &'a Signature,
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        self.archetypes.query(all_of)
    }

    pub fn archetypes(&self) -> &ArchetypeManager {
        &self.archetypes
    }

    // === Systems === //

    /// Register a system: rejected if one of the same concrete type is
    /// already present, otherwise initialized and slotted into a batch.
    pub fn register_system<S: System>(&mut self, system: S) -> Result<SystemId> {
        if self.systems.contains_type(TypeId::of::<S>()) {
            error!(system = system.name(), "duplicate system registration rejected");
            return Err(EcsError::DuplicateSystem(system.name()));
        }
        let mut system = system;
        system.on_initialize(self);
        Ok(self.systems.insert(Box::new(system)))
    }

    /// Unregister the system of type `S`, running its shutdown hook.
    pub fn unregister_system<S: System>(&mut self) -> bool {
        match self.systems.remove_type(TypeId::of::<S>()) {
            Some(mut system) => {
                system.on_shutdown(self);
                true
            }
            None => false,
        }
    }

    /// Explicitly run one system outside the batch schedule; the only way
    /// `Manual`-rated systems execute.
    pub fn run_system_now<S: System>(&mut self, delta: Duration) -> Result<()> {
        let mut systems = mem::take(&mut self.systems);
        let result = systems.run_manual_by_type(TypeId::of::<S>(), self, delta);
        self.systems = systems;
        result
    }

    pub fn systems(&self) -> &SystemScheduler {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut SystemScheduler {
        &mut self.systems
    }

    // === Event sinks === //

    pub fn on_entity_batch_created(
        &mut self,
        handler: impl FnMut(&World, &[Entity]) + Send + 'static,
    ) {
        self.events.created.push(Box::new(handler));
    }

    pub fn on_entity_batch_destroy_request(
        &mut self,
        handler: impl FnMut(&World, &[Entity]) + Send + 'static,
    ) {
        self.events.destroy_request.push(Box::new(handler));
    }

    pub fn on_entity_batch_destroyed(
        &mut self,
        handler: impl FnMut(&World, &[Entity]) + Send + 'static,
    ) {
        self.events.destroyed.push(Box::new(handler));
    }

    pub fn on_chunk_update_requested(
        &mut self,
        handler: impl FnMut(&World, &[(Entity, IVec3)]) + Send + 'static,
    ) {
        self.events.chunk_update.push(Box::new(handler));
    }

    // === Frame pipeline === //

    /// Advance the world one frame: drain the deferred queues in the fixed
    /// pipeline order, fire the batched lifecycle events, run the system
    /// scheduler, and settle the chunk index.
    ///
    /// Per-op failures are logged and skipped; nothing escapes `tick`.
    pub fn tick(&mut self, delta: Duration) {
        self.frame += 1;

        // Snapshot queue lengths up front: ops enqueued by event handlers
        // or systems during this tick land in the next frame's drain.
        let destroy_count = self.entities.destroy_queue.len();
        let builder_count = self.entities.builder_queue.len();
        let create_count = self.entities.create_queue.len();
        let remove_count = self.components.remove_queue.len();
        let add_count = self.components.add_queue.len();

        // 1. Collect the set of entities about to die. Stale handles and
        // same-frame duplicates are dropped here.
        self.scratch_destroys.clear();
        self.scratch_seen.clear();
        for _ in 0..destroy_count {
            let Some(entity) = self.entities.destroy_queue.pop() else {
                break;
            };
            if !self.entities.is_alive(entity) || !self.scratch_seen.insert(entity) {
                debug!(%entity, "dropping stale destroy");
                continue;
            }
            self.scratch_destroys.push(entity);
        }

        // 2. Destroy-request observers see the batch still alive, with
        // components accessible; the chunk index unhooks the batch last.
        let destroys = mem::take(&mut self.scratch_destroys);
        let mut events = mem::take(&mut self.events);
        events.fire_destroy_request(self, &destroys);
        self.events = events;
        {
            let Self {
                ref mut chunks,
                ref entities,
                ref archetypes,
                ref registry,
                ..
            } = *self;
            chunks.handle_destroy_request(entities, archetypes, registry, &destroys);
        }

        // 3. Perform the destroys.
        for &entity in &destroys {
            self.entities.destroy(&mut self.archetypes, entity);
        }

        // 4. Destroyed facts.
        let mut events = mem::take(&mut self.events);
        events.fire_destroyed(self, &destroys);
        self.events = events;
        self.scratch_destroys = destroys;

        // 5. Builder creations, with the per-frame signature cache.
        self.signature_cache.clear();
        self.scratch_created.clear();
        let mut created = mem::take(&mut self.scratch_created);
        for _ in 0..builder_count {
            let Some(builder) = self.entities.builder_queue.pop() else {
                break;
            };
            match self.spawn_from_builder(builder) {
                Ok(entity) => created.push(entity),
                Err(err) => error!(error = %err, "queued entity creation failed"),
            }
        }

        // 6. Simple creations into the empty archetype; the caller's thunk
        // mutates from there.
        for _ in 0..create_count {
            let Some(thunk) = self.entities.create_queue.pop() else {
                break;
            };
            let entity = self.entities.create(&mut self.archetypes);
            created.push(entity);
            if let Some(thunk) = thunk {
                let outcome = catch_unwind(AssertUnwindSafe(|| thunk(self, entity)));
                if outcome.is_err() {
                    let err = EcsError::QueueBuilderFailure(format!(
                        "creation thunk for {entity} panicked"
                    ));
                    error!(error = %err, "queued entity creation failed");
                }
            }
        }

        // 7. One created batch covering both creation drains.
        let mut events = mem::take(&mut self.events);
        events.fire_created(self, &created);
        self.events = events;
        self.scratch_created = created;

        // 8. Component removes, before adds to reduce intermediate
        // archetype fan-out.
        for _ in 0..remove_count {
            let Some(op) = self.components.remove_queue.pop() else {
                break;
            };
            if !self.entities.is_alive(op.entity) {
                debug!(entity = %op.entity, "dropping stale component remove");
                continue;
            }
            if let Err(err) = ComponentManager::apply_remove(
                &mut self.entities,
                &mut self.archetypes,
                op.entity,
                op.id,
            ) {
                error!(error = %err, "deferred component remove failed");
            }
        }

        // 9. Component adds.
        for _ in 0..add_count {
            let Some(op) = self.components.add_queue.pop() else {
                break;
            };
            if !self.entities.is_alive(op.entity) {
                debug!(entity = %op.entity, "dropping stale component add");
                continue;
            }
            if let Err(err) = ComponentManager::apply_add(
                &mut self.entities,
                &mut self.archetypes,
                op.entity,
                op.value,
            ) {
                error!(error = %err, "deferred component add failed");
            }
        }

        // 10. Run the system scheduler over the now-stable world.
        let mut systems = mem::take(&mut self.systems);
        systems.run(self, delta);
        self.systems = systems;

        // 11. Settle the chunk index: apply the assignment requests the
        // systems produced and recycle idle chunks.
        self.scratch_chunk_updates.clear();
        let mut updates = mem::take(&mut self.scratch_chunk_updates);
        {
            let Self {
                ref mut chunks,
                ref entities,
                ref components,
                ref registry,
                ..
            } = *self;
            chunks.drain(entities, components, registry, &mut updates);
        }
        let mut events = mem::take(&mut self.events);
        events.fire_chunk_update(self, &updates);
        self.events = events;
        self.scratch_chunk_updates = updates;
    }

    fn spawn_from_builder(&mut self, builder: EntityBuilder) -> Result<Entity> {
        let ids = builder.ids();
        let archetype_idx = match self.signature_cache.get(&ids) {
            Some(&idx) => idx,
            None => {
                let idx = self.archetypes.get_or_create(&builder.signature())?;
                self.signature_cache.insert(ids, idx);
                idx
            }
        };

        let entity = self.entities.create_in(&mut self.archetypes, archetype_idx);
        let archetype = &mut self.archetypes[archetype_idx];
        // The entity was appended, so its slot is the last one
        let slot = archetype.len() - 1;
        for value in builder.into_values() {
            match archetype.column_mut(value.id()) {
                Some(column) => value.write_to(column, slot),
                None => {
                    return Err(EcsError::QueueBuilderFailure(format!(
                        "archetype missing column for component id {}",
                        value.id().index()
                    )))
                }
            }
        }
        Ok(entity)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
