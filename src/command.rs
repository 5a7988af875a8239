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

//! Deferred structural commands: type-erased component values, batched
//! entity builders, and the add/remove queues with their archetype
//! transitions.
//!
//! Queued ops carry the full entity handle (index + version) so an op whose
//! entity died before the drain is detected as stale and dropped.

use std::alloc::{alloc, dealloc};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use smallvec::SmallVec;

use crate::archetype::ComponentColumn;
use crate::archetypes::ArchetypeManager;
use crate::entities::EntityManager;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry::{Component, ComponentId, ComponentInfo, ComponentRegistry};
use crate::signature::Signature;

/// An owned, type-erased component value with the real layout of its type.
/// The payload is dropped if the value is never written into a column.
pub struct ErasedValue {
    info: ComponentInfo,
    data: NonNull<u8>,
    live: bool,
}

// Safety: construction requires `T: Component`, which is Send + Sync, and
// the buffer is owned exclusively.
unsafe impl Send for ErasedValue {}
unsafe impl Sync for ErasedValue {}

impl ErasedValue {
    pub fn new<T: Component>(registry: &ComponentRegistry, value: T) -> Self {
        let info = registry.info_of_type::<T>();
        let data = if info.size() > 0 {
            let ptr = unsafe { alloc(info.layout()) };
            NonNull::new(ptr).expect("component value allocation failed")
        } else {
            NonNull::new(info.layout().align() as *mut u8).expect("alignment is never zero")
        };
        unsafe {
            ptr::write(data.as_ptr().cast::<T>(), value);
        }
        Self {
            info,
            data,
            live: true,
        }
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.info.id()
    }

    #[inline]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Move the payload into `column[slot]`, consuming the value.
    pub(crate) fn write_to(mut self, column: &mut ComponentColumn, slot: usize) {
        debug_assert_eq!(column.id(), self.id());
        unsafe {
            column.set_raw(slot, self.data.as_ptr());
        }
        // Ownership of the bytes moved into the column
        self.live = false;
    }
}

impl Drop for ErasedValue {
    fn drop(&mut self) {
        if self.live {
            if let Some(drop_fn) = self.info.drop_fn() {
                unsafe {
                    drop_fn(self.data.as_ptr());
                }
            }
        }
        if self.info.size() > 0 {
            unsafe {
                dealloc(self.data.as_ptr(), self.info.layout());
            }
        }
    }
}

impl std::fmt::Debug for ErasedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ErasedValue({})", self.info.type_name())
    }
}

/// Accumulates component values for one deferred entity creation.
///
/// Builders compute their signature once at drain time, so entities created
/// this way land directly in their final archetype instead of hopping
/// through one intermediate archetype per component.
pub struct EntityBuilder {
    registry: Arc<ComponentRegistry>,
    /// Sorted ascending by component id; one value per id, last write wins.
    values: SmallVec<[ErasedValue; 8]>,
}

impl EntityBuilder {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            values: SmallVec::new(),
        }
    }

    /// Chaining form of [`EntityBuilder::add`].
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.add(value);
        self
    }

    pub fn add<T: Component>(&mut self, value: T) {
        let value = ErasedValue::new(&self.registry, value);
        match self
            .values
            .binary_search_by_key(&value.id(), ErasedValue::id)
        {
            Ok(i) => self.values[i] = value,
            Err(i) => self.values.insert(i, value),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The ordered component-id pattern; key for the per-frame
    /// signature cache.
    pub fn ids(&self) -> SmallVec<[ComponentId; 8]> {
        self.values.iter().map(ErasedValue::id).collect()
    }

    pub fn signature(&self) -> Signature {
        self.values.iter().map(ErasedValue::id).collect()
    }

    pub(crate) fn into_values(self) -> SmallVec<[ErasedValue; 8]> {
        self.values
    }
}

pub(crate) struct AddOp {
    pub entity: Entity,
    pub value: ErasedValue,
}

pub(crate) struct RemoveOp {
    pub entity: Entity,
    pub id: ComponentId,
}

/// Owns the deferred component add/remove queues and executes archetype
/// transitions against the entity and archetype managers.
///
/// Queues are multi-producer single-consumer: enqueue is lock-free from any
/// thread, the frame pipeline is the only drainer.
pub struct ComponentManager {
    pub(crate) add_queue: SegQueue<AddOp>,
    pub(crate) remove_queue: SegQueue<RemoveOp>,
}

impl ComponentManager {
    pub(crate) fn new() -> Self {
        Self {
            add_queue: SegQueue::new(),
            remove_queue: SegQueue::new(),
        }
    }

    pub(crate) fn enqueue_add(&self, entity: Entity, value: ErasedValue) {
        self.add_queue.push(AddOp { entity, value });
    }

    pub(crate) fn enqueue_remove(&self, entity: Entity, id: ComponentId) {
        self.remove_queue.push(RemoveOp { entity, id });
    }

    /// Add (or overwrite) a component on a live entity, moving it to the
    /// grown archetype when the component is new.
    pub(crate) fn apply_add(
        entities: &mut EntityManager,
        archetypes: &mut ArchetypeManager,
        entity: Entity,
        value: ErasedValue,
    ) -> Result<()> {
        let loc = entities
            .location(entity)
            .ok_or(EcsError::StaleHandle(entity))?;
        let id = value.id();
        let signature = archetypes[loc.archetype].signature().clone();

        if signature.contains(id) {
            // Overwrite in place, no archetype transition
            let column = archetypes[loc.archetype]
                .column_mut(id)
                .ok_or_else(|| column_missing(id))?;
            value.write_to(column, loc.slot);
            return Ok(());
        }

        let target = archetypes.get_or_create(&signature.with(id))?;
        let (src, dst) = archetypes.pair_mut(loc.archetype, target);
        let (new_slot, moved) = src.move_entity_to(loc.slot, dst, Some(value))?;

        entities.update_lookup(entity.index(), target, new_slot);
        if let Some(moved) = moved {
            entities.update_lookup(moved.index(), loc.archetype, loc.slot);
        }
        Ok(())
    }

    /// Remove a component from a live entity. Removing a component the
    /// entity does not have is a no-op.
    pub(crate) fn apply_remove(
        entities: &mut EntityManager,
        archetypes: &mut ArchetypeManager,
        entity: Entity,
        id: ComponentId,
    ) -> Result<()> {
        let loc = entities
            .location(entity)
            .ok_or(EcsError::StaleHandle(entity))?;
        let signature = archetypes[loc.archetype].signature().clone();

        if !signature.contains(id) {
            return Ok(());
        }

        let target = archetypes.get_or_create(&signature.without(id))?;
        let (src, dst) = archetypes.pair_mut(loc.archetype, target);
        let (new_slot, moved) = src.move_entity_to(loc.slot, dst, None)?;

        entities.update_lookup(entity.index(), target, new_slot);
        if let Some(moved) = moved {
            entities.update_lookup(moved.index(), loc.archetype, loc.slot);
        }
        Ok(())
    }
}

fn column_missing(id: ComponentId) -> EcsError {
    EcsError::ArchetypeMoveFailure(format!("column for component id {} missing", id.index()))
}
