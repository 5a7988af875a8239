//! Convenience re-exports for the common surface.

pub use crate::chunk::{ChunkDims, ChunkIndex, ChunkOwner, ChunkPoolConfig};
pub use crate::command::EntityBuilder;
pub use crate::entity::{Entity, EntityLocation};
pub use crate::error::{EcsError, Result};
pub use crate::registry::{Component, ComponentId, ComponentRegistry};
pub use crate::signature::Signature;
pub use crate::system::{System, SystemAccess, SystemId, TickRate};
pub use crate::world::World;
