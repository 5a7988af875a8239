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

//! Entity allocation, recycling, lookup, and the deferred lifecycle queues.

use crossbeam::queue::SegQueue;

use crate::archetypes::{ArchetypeManager, EMPTY_ARCHETYPE};
use crate::command::EntityBuilder;
use crate::entity::{Entity, EntityLocation};
use crate::world::World;

const NOT_STORED: u32 = u32::MAX;

/// Thunk run against the world right after a simple deferred create.
pub type CreateThunk = Box<dyn FnOnce(&mut World, Entity) + Send>;

/// Allocates generational handles and maintains the
/// `entity index -> (archetype, slot)` lookup.
///
/// Indices come from a monotonic counter with a free list of recycled
/// handles; the version bump happens at destroy time, so a recycled index is
/// handed out already carrying its incremented version and stale handles can
/// never alias a live entity.
pub struct EntityManager {
    /// Current version per entity index; index 0 is reserved for INVALID.
    versions: Vec<u32>,
    /// Archetype per entity index, `NOT_STORED` when dead.
    archetype_of: Vec<u32>,
    /// Slot within the archetype, parallel to `archetype_of`.
    slot_of: Vec<u32>,
    /// Recyclable handles, already packed with their next version.
    free: Vec<Entity>,
    next_index: u32,
    alive: usize,

    pub(crate) destroy_queue: SegQueue<Entity>,
    pub(crate) create_queue: SegQueue<Option<CreateThunk>>,
    pub(crate) builder_queue: SegQueue<EntityBuilder>,
}

impl EntityManager {
    pub(crate) fn new() -> Self {
        Self {
            versions: vec![0],
            archetype_of: vec![NOT_STORED],
            slot_of: vec![0],
            free: Vec::new(),
            next_index: 1,
            alive: 0,
            destroy_queue: SegQueue::new(),
            create_queue: SegQueue::new(),
            builder_queue: SegQueue::new(),
        }
    }

    fn allocate(&mut self) -> Entity {
        if let Some(handle) = self.free.pop() {
            debug_assert_eq!(self.versions[handle.index() as usize], handle.version());
            return handle;
        }
        let index = self.next_index;
        self.next_index = index.checked_add(1).expect("entity index space exhausted");
        self.versions.push(0);
        self.archetype_of.push(NOT_STORED);
        self.slot_of.push(0);
        Entity::new(index, 0)
    }

    /// Allocate an entity in the empty archetype.
    pub(crate) fn create(&mut self, archetypes: &mut ArchetypeManager) -> Entity {
        self.create_in(archetypes, EMPTY_ARCHETYPE)
    }

    /// Allocate an entity directly in the given archetype. This is the
    /// batched-creation path: an entity built with N components lands in its
    /// final archetype once instead of moving N times.
    pub(crate) fn create_in(&mut self, archetypes: &mut ArchetypeManager, archetype: usize) -> Entity {
        let entity = self.allocate();
        let slot = archetypes[archetype].add_entity(entity);
        let idx = entity.index() as usize;
        self.archetype_of[idx] = archetype as u32;
        self.slot_of[idx] = slot as u32;
        self.alive += 1;
        entity
    }

    /// Immediately destroy `entity`. Returns false for stale handles.
    pub(crate) fn destroy(&mut self, archetypes: &mut ArchetypeManager, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let idx = entity.index() as usize;
        let archetype = self.archetype_of[idx] as usize;
        let slot = self.slot_of[idx] as usize;

        if let Some(moved) = archetypes[archetype].remove_at_swap(slot) {
            self.slot_of[moved.index() as usize] = slot as u32;
        }

        let next_version = entity.version().wrapping_add(1);
        self.versions[idx] = next_version;
        self.archetype_of[idx] = NOT_STORED;
        self.free.push(Entity::new(entity.index(), next_version));
        self.alive -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        idx != 0
            && idx < self.versions.len()
            && self.versions[idx] == entity.version()
            && self.archetype_of[idx] != NOT_STORED
    }

    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.is_alive(entity) {
            return None;
        }
        let idx = entity.index() as usize;
        Some(EntityLocation {
            archetype: self.archetype_of[idx] as usize,
            slot: self.slot_of[idx] as usize,
        })
    }

    /// Called by archetype transitions after an entity moved or a neighbor
    /// was swapped into its old slot.
    pub(crate) fn update_lookup(&mut self, index: u32, archetype: usize, slot: usize) {
        self.archetype_of[index as usize] = archetype as u32;
        self.slot_of[index as usize] = slot as u32;
    }

    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// One past the highest index ever allocated; sizes the per-entity
    /// shadow arrays of external indexers.
    pub fn high_water_index(&self) -> usize {
        self.next_index as usize
    }

    pub(crate) fn enqueue_destroy(&self, entity: Entity) {
        self.destroy_queue.push(entity);
    }

    pub(crate) fn enqueue_create(&self, thunk: Option<CreateThunk>) {
        self.create_queue.push(thunk);
    }

    pub(crate) fn enqueue_create_with_builder(&self, builder: EntityBuilder) {
        self.builder_queue.push(builder);
    }
}
