//! Spatial chunk indexing: a uniform 3-D grid of chunks tracking live
//! entities by position.
//!
//! The index never performs structural changes synchronously. Movement
//! systems push `(entity, chunk)` requests onto an assignment queue; the
//! frame pipeline drains it once per tick, maintains the `chunk -> entities`
//! sets and the per-entity shadow, and routes the entity's [`ChunkOwner`]
//! component update through the component-add queue for the next frame.

use ahash::AHashMap;
use crossbeam::queue::SegQueue;
use glam::{IVec3, Vec3};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::archetypes::ArchetypeManager;
use crate::command::{ComponentManager, ErasedValue};
use crate::entities::EntityManager;
use crate::entity::Entity;
use crate::registry::ComponentRegistry;

const NOT_TRACKED: u32 = u32::MAX;

/// Chunk cell size in world units along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDims {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Default for ChunkDims {
    fn default() -> Self {
        Self { x: 64, y: 32, z: 64 }
    }
}

/// Pooling knobs: chunks empty and untouched for `idle_frames` are recycled,
/// at most `evict_budget` per frame.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPoolConfig {
    pub idle_frames: u64,
    pub evict_budget: usize,
    pub pool_capacity: usize,
}

impl Default for ChunkPoolConfig {
    fn default() -> Self {
        Self {
            idle_frames: 120,
            evict_budget: 8,
            pool_capacity: 256,
        }
    }
}

/// Per-entity shadow of its chunk assignment, mirrored into component
/// storage one frame behind the index itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOwner {
    pub location: IVec3,
}

#[derive(Default)]
struct Chunk {
    entities: FxHashSet<Entity>,
    last_touched: u64,
}

/// Uniform-grid index of live entities by chunk location.
pub struct ChunkIndex {
    dims: ChunkDims,
    pool_config: ChunkPoolConfig,
    chunks: AHashMap<IVec3, Chunk>,
    /// Recycled chunk storage.
    pool: Vec<Chunk>,
    /// Per-entity-index shadow, parallel arrays sized to the high-water
    /// entity index. `owner_version[i] == NOT_TRACKED` means untracked; the
    /// version guards against an index recycled while a request or a
    /// component update was still in flight.
    owner_version: Vec<u32>,
    owner_location: Vec<IVec3>,
    requests: SegQueue<(Entity, IVec3)>,
    frame: u64,
}

impl ChunkIndex {
    pub fn new(dims: ChunkDims, pool_config: ChunkPoolConfig) -> Self {
        Self {
            dims,
            pool_config,
            chunks: AHashMap::new(),
            pool: Vec::new(),
            owner_version: Vec::new(),
            owner_location: Vec::new(),
            requests: SegQueue::new(),
            frame: 0,
        }
    }

    #[inline]
    pub fn dims(&self) -> ChunkDims {
        self.dims
    }

    /// Integer floor division of a world position into a chunk location.
    pub fn world_to_chunk(&self, pos: Vec3) -> IVec3 {
        IVec3::new(
            (pos.x.floor() as i32).div_euclid(self.dims.x),
            (pos.y.floor() as i32).div_euclid(self.dims.y),
            (pos.z.floor() as i32).div_euclid(self.dims.z),
        )
    }

    /// Ask the index to move `entity` into the chunk at `location`.
    /// Safe to call from systems running in a parallel batch.
    pub fn request_update(&self, entity: Entity, location: IVec3) {
        self.requests.push((entity, location));
    }

    /// Position form of [`ChunkIndex::request_update`].
    pub fn request_update_at(&self, entity: Entity, pos: Vec3) {
        self.request_update(entity, self.world_to_chunk(pos));
    }

    /// Entities currently indexed in the chunk at `location`.
    pub fn entities_in(&self, location: IVec3) -> impl Iterator<Item = Entity> + '_ {
        self.chunks
            .get(&location)
            .into_iter()
            .flat_map(|chunk| chunk.entities.iter().copied())
    }

    pub fn contains(&self, location: IVec3, entity: Entity) -> bool {
        self.chunks
            .get(&location)
            .is_some_and(|chunk| chunk.entities.contains(&entity))
    }

    /// The chunk this entity is tracked in, if any.
    pub fn chunk_of(&self, entity: Entity) -> Option<IVec3> {
        let idx = entity.index() as usize;
        (self.owner_version.get(idx) == Some(&entity.version()))
            .then(|| self.owner_location[idx])
    }

    /// Number of live (non-pooled) chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn ensure_shadow(&mut self, high_water: usize) {
        if self.owner_version.len() < high_water {
            self.owner_version.resize(high_water, NOT_TRACKED);
            self.owner_location.resize(high_water, IVec3::ZERO);
        }
    }

    fn touch(&mut self, location: IVec3) -> &mut Chunk {
        let pool = &mut self.pool;
        let chunk = self
            .chunks
            .entry(location)
            .or_insert_with(|| pool.pop().unwrap_or_default());
        chunk.last_touched = self.frame;
        chunk
    }

    fn remove_member(&mut self, location: IVec3, entity: Entity) {
        if let Some(chunk) = self.chunks.get_mut(&location) {
            chunk.entities.remove(&entity);
        }
    }

    /// Drain the assignment queue in one pass. Ops for dead entities only
    /// clean up; moves emit a deferred [`ChunkOwner`] update that lands next
    /// frame, plus an entry in `out` for the `ChunkUpdateRequested` sink.
    pub(crate) fn drain(
        &mut self,
        entities: &EntityManager,
        components: &ComponentManager,
        registry: &ComponentRegistry,
        out: &mut Vec<(Entity, IVec3)>,
    ) {
        self.frame += 1;
        self.ensure_shadow(entities.high_water_index());

        let pending = self.requests.len();
        for _ in 0..pending {
            let Some((entity, new_location)) = self.requests.pop() else {
                break;
            };
            let idx = entity.index() as usize;
            let tracked = (self.owner_version.get(idx).copied() == Some(entity.version()))
                .then(|| self.owner_location[idx]);

            if !entities.is_alive(entity) {
                if let Some(old) = tracked {
                    self.remove_member(old, entity);
                    self.owner_version[idx] = NOT_TRACKED;
                }
                debug!(%entity, "dropping chunk update for dead entity");
                continue;
            }

            if tracked == Some(new_location) {
                // Moved back across the boundary before the drain
                self.touch(new_location);
                continue;
            }

            if let Some(old) = tracked {
                self.remove_member(old, entity);
            }
            self.touch(new_location).entities.insert(entity);
            self.owner_version[idx] = entity.version();
            self.owner_location[idx] = new_location;

            components.enqueue_add(
                entity,
                ErasedValue::new(
                    registry,
                    ChunkOwner {
                        location: new_location,
                    },
                ),
            );
            out.push((entity, new_location));
        }

        self.evict_idle();
    }

    /// Destroy-request hook: unindex the batch while the entities are still
    /// alive. The live `ChunkOwner` component is the fast path; the shadow
    /// covers entities whose owner update is still sitting in the deferred
    /// queue.
    pub(crate) fn handle_destroy_request(
        &mut self,
        entities: &EntityManager,
        archetypes: &ArchetypeManager,
        registry: &ComponentRegistry,
        batch: &[Entity],
    ) {
        let owner_id = registry.id_of::<ChunkOwner>();
        for &entity in batch {
            if let Some(loc) = entities.location(entity) {
                if let Some(owner) =
                    archetypes[loc.archetype].get_component::<ChunkOwner>(owner_id, loc.slot)
                {
                    let location = owner.location;
                    self.remove_member(location, entity);
                }
            }

            let idx = entity.index() as usize;
            if self.owner_version.get(idx) == Some(&entity.version()) {
                let stale_location = self.owner_location[idx];
                self.remove_member(stale_location, entity);
                self.owner_version[idx] = NOT_TRACKED;
            }
        }
    }

    /// Recycle idle chunks, bounded by the per-frame eviction budget.
    fn evict_idle(&mut self) {
        let mut evicted: Vec<IVec3> = Vec::new();
        for (&location, chunk) in &self.chunks {
            if chunk.entities.is_empty()
                && self.frame.saturating_sub(chunk.last_touched) >= self.pool_config.idle_frames
            {
                evicted.push(location);
                if evicted.len() >= self.pool_config.evict_budget {
                    break;
                }
            }
        }
        for location in evicted {
            if let Some(mut chunk) = self.chunks.remove(&location) {
                if self.pool.len() < self.pool_config.pool_capacity {
                    chunk.entities.clear();
                    self.pool.push(chunk);
                }
            }
        }
    }
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new(ChunkDims::default(), ChunkPoolConfig::default())
    }
}
