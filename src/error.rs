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

//! Error types

use std::fmt;

use crate::entity::Entity;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity not found or not alive
    EntityNotFound,

    /// Component not present on the entity
    ComponentNotFound,

    /// A deferred op referenced an entity whose version no longer matches
    StaleHandle(Entity),

    /// Registry lookup for an id that was never assigned
    UnknownComponentId(u32),

    /// A system of the same concrete type is already registered
    DuplicateSystem(&'static str),

    /// No registered system of the requested type
    SystemNotFound,

    /// A system raised during `update`
    SystemUpdateFailure {
        system: &'static str,
        message: String,
    },

    /// A queued entity builder raised during creation
    QueueBuilderFailure(String),

    /// An archetype transition hit an internal invariant violation
    ArchetypeMoveFailure(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity not found"),
            EcsError::ComponentNotFound => write!(f, "Component not found"),
            EcsError::StaleHandle(e) => write!(f, "Stale entity handle: {e:?}"),
            EcsError::UnknownComponentId(id) => write!(f, "Unknown component id: {id}"),
            EcsError::DuplicateSystem(name) => {
                write!(f, "System already registered: {name}")
            }
            EcsError::SystemNotFound => write!(f, "System not found"),
            EcsError::SystemUpdateFailure { system, message } => {
                write!(f, "System '{system}' failed during update: {message}")
            }
            EcsError::QueueBuilderFailure(msg) => {
                write!(f, "Queued entity builder failed: {msg}")
            }
            EcsError::ArchetypeMoveFailure(msg) => {
                write!(f, "Archetype move failed: {msg}")
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
