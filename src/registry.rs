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

//! Component identity and the component type registry.
//!
//! Component types are interned on first sighting and mapped to dense
//! integer ids. Ids are never reused and never reordered for the lifetime
//! of a registry.

use std::alloc::Layout;
use std::any::TypeId;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{EcsError, Result};

/// Marker trait for components
///
/// Components must be 'static (no borrowed data). They are treated as
/// POD-like copyable values by the storage layer; tag components are
/// zero-sized markers.
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Dense integer identifier for a component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    /// The raw dense index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Runtime descriptor for a component type: identity plus the layout and
/// drop information type-erased columns need.
#[derive(Clone)]
pub struct ComponentInfo {
    id: ComponentId,
    type_id: TypeId,
    type_name: &'static str,
    layout: Layout,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentInfo {
    fn of<T: Component>(id: ComponentId) -> Self {
        Self {
            id,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe {
                    ptr.cast::<T>().drop_in_place();
                })
            } else {
                None
            },
        }
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub(crate) fn drop_fn(&self) -> Option<unsafe fn(*mut u8)> {
        self.drop_fn
    }
}

impl std::fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("size", &self.layout.size())
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_type: FxHashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

/// Bidirectional mapping between component types and dense ids.
///
/// Reads take a short shared lock; the exclusive lock is taken only when a
/// type is seen for the first time. Worlds hold an `Arc` handle so several
/// worlds can share one id space; [`ComponentRegistry::shared`] is the
/// process-wide default instance.
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

lazy_static! {
    static ref SHARED: Arc<ComponentRegistry> = Arc::new(ComponentRegistry::new());
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// The process-wide default registry.
    ///
    /// This is a pure id-assignment table; everything richer is world-owned.
    pub fn shared() -> Arc<ComponentRegistry> {
        SHARED.clone()
    }

    /// Get the dense id for `T`, interning the type on first sighting.
    pub fn id_of<T: Component>(&self) -> ComponentId {
        let type_id = TypeId::of::<T>();

        if let Some(&id) = self.inner.read().by_type.get(&type_id) {
            return id;
        }

        let mut inner = self.inner.write();
        // Another thread may have interned between the two locks
        if let Some(&id) = inner.by_type.get(&type_id) {
            return id;
        }

        let id = ComponentId(inner.infos.len() as u32);
        inner.infos.push(ComponentInfo::of::<T>(id));
        inner.by_type.insert(type_id, id);
        id
    }

    /// Full descriptor for `T`, interning the type on first sighting.
    pub fn info_of_type<T: Component>(&self) -> ComponentInfo {
        let id = self.id_of::<T>();
        self.inner.read().infos[id.0 as usize].clone()
    }

    /// Inverse lookup: descriptor for an id.
    pub fn info_of(&self, id: ComponentId) -> Result<ComponentInfo> {
        self.inner
            .read()
            .infos
            .get(id.0 as usize)
            .cloned()
            .ok_or(EcsError::UnknownComponentId(id.0))
    }

    /// Highest id assigned so far, or `None` if the registry is empty.
    /// Upper bound for signature bitmap sizing.
    pub fn highest_id(&self) -> Option<u32> {
        let len = self.inner.read().infos.len();
        (len > 0).then(|| len as u32 - 1)
    }

    /// Number of interned component types.
    pub fn len(&self) -> usize {
        self.inner.read().infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all interned types. Test-only escape hatch; requires exclusive
    /// ownership, so the shared instance cannot be cleared.
    pub fn clear(&mut self) {
        let inner = self.inner.get_mut();
        inner.by_type.clear();
        inner.infos.clear();
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;

    #[test]
    fn test_ids_are_dense_and_stable() {
        let registry = ComponentRegistry::new();
        let a = registry.id_of::<Position>();
        let b = registry.id_of::<Velocity>();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(registry.id_of::<Position>(), a);
        assert_eq!(registry.highest_id(), Some(1));
    }

    #[test]
    fn test_inverse_lookup() {
        let registry = ComponentRegistry::new();
        let id = registry.id_of::<Position>();

        let info = registry.info_of(id).unwrap();
        assert_eq!(info.id(), id);
        assert_eq!(info.type_id(), TypeId::of::<Position>());
        assert_eq!(info.size(), 0);

        assert!(matches!(
            registry.info_of(ComponentId(99)),
            Err(EcsError::UnknownComponentId(99))
        ));
    }

    #[test]
    fn test_clear_resets_ids() {
        let mut registry = ComponentRegistry::new();
        registry.id_of::<Position>();
        registry.id_of::<Velocity>();
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.id_of::<Velocity>().index(), 0);
    }
}
