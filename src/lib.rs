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

//! Swarm ECS - archetype Entity Component System runtime
//!
//! Built to simulate large entity populations in soft real time: columnar
//! archetype storage keyed by bit-packed signatures, generational entity
//! handles, deferred structural commands drained at frame boundaries, a
//! read/write-set scheduler with parallel batches and tick-rate gating, and
//! a spatial chunk index driven by the same deferred pipeline.

pub mod archetype;
pub mod archetypes;
mod batch;
pub mod chunk;
pub mod command;
pub mod entities;
pub mod entity;
pub mod error;
pub mod event;
pub mod kernel;
pub mod registry;
pub mod schedule;
pub mod settings;
pub mod signature;
pub mod system;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, ComponentColumn};
pub use archetypes::{ArchetypeManager, EMPTY_ARCHETYPE};
pub use chunk::{ChunkDims, ChunkIndex, ChunkOwner, ChunkPoolConfig};
pub use command::{EntityBuilder, ErasedValue};
pub use entities::EntityManager;
pub use entity::{Entity, EntityLocation};
pub use error::{EcsError, Result};
pub use kernel::{KernelRegistry, SimdCapability};
pub use registry::{Component, ComponentId, ComponentInfo, ComponentRegistry};
pub use schedule::{SystemScheduler, SystemStats};
pub use settings::{SaveContext, SettingValue, SettingsDescriptor};
pub use signature::Signature;
pub use system::{BoxedSystem, System, SystemAccess, SystemId, TickRate};
pub use world::World;

pub mod prelude;
