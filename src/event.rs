//! Batched entity-lifecycle event sinks.
//!
//! Sinks are plain observer lists owned by the world; emission is a loop on
//! the pipeline thread. Handlers receive a borrowed view of the batch and
//! may enqueue deferred ops, which land in the next frame's drain.

use glam::IVec3;

use crate::entity::Entity;
use crate::world::World;

/// Handler for an entity batch event.
pub type BatchHandler = Box<dyn FnMut(&World, &[Entity]) + Send>;

/// Handler for the drained chunk-update request batch.
pub type ChunkUpdateHandler = Box<dyn FnMut(&World, &[(Entity, IVec3)]) + Send>;

#[derive(Default)]
pub(crate) struct EventSinks {
    pub(crate) created: Vec<BatchHandler>,
    pub(crate) destroy_request: Vec<BatchHandler>,
    pub(crate) destroyed: Vec<BatchHandler>,
    pub(crate) chunk_update: Vec<ChunkUpdateHandler>,
}

impl EventSinks {
    /// Entities created this frame, fired once after both creation drains.
    pub(crate) fn fire_created(&mut self, world: &World, batch: &[Entity]) {
        if batch.is_empty() {
            return;
        }
        for handler in &mut self.created {
            handler(world, batch);
        }
    }

    /// Entities about to die; still alive with components accessible.
    pub(crate) fn fire_destroy_request(&mut self, world: &World, batch: &[Entity]) {
        if batch.is_empty() {
            return;
        }
        for handler in &mut self.destroy_request {
            handler(world, batch);
        }
    }

    /// The removal facts, after the destroys were performed.
    pub(crate) fn fire_destroyed(&mut self, world: &World, batch: &[Entity]) {
        if batch.is_empty() {
            return;
        }
        for handler in &mut self.destroyed {
            handler(world, batch);
        }
    }

    pub(crate) fn fire_chunk_update(&mut self, world: &World, batch: &[(Entity, IVec3)]) {
        if batch.is_empty() {
            return;
        }
        for handler in &mut self.chunk_update {
            handler(world, batch);
        }
    }
}
