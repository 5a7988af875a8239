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

//! Entity handles and location metadata.

use std::fmt;

/// Generational entity handle packed into a single 64-bit word.
///
/// The version lives in the high 32 bits and the slot index in the low 32
/// bits, so `Entity::INVALID` is the all-zero word. Index 0 is reserved for
/// the invalid handle; live entities start at index 1.
///
/// The version is incremented every time an index is recycled, which makes
/// stale handles compare unequal to the live entity occupying the same index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u64);

impl Entity {
    /// The invalid handle (index 0, version 0).
    pub const INVALID: Entity = Entity(0);

    #[inline]
    pub(crate) const fn new(index: u32, version: u32) -> Self {
        Self(((version as u64) << 32) | index as u64)
    }

    /// Slot index. Recycled across destroys; not unique on its own.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation counter for this handle's index.
    #[inline]
    pub const fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The packed 64-bit representation.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Reconstruct a handle from its packed representation.
    ///
    /// The result is only meaningful for bits previously produced by
    /// [`Entity::to_bits`] against the same world.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.version())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.version())
    }
}

/// Entity location in archetype storage (archetype index, slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: usize,
    pub slot: usize,
}
