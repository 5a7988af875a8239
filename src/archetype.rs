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

//! Archetype storage: one type-erased column per component type, plus a
//! parallel column of entity handles. Column order is ascending component
//! id and fixed for the archetype's lifetime.

use std::alloc::{alloc, dealloc, realloc, Layout};
use std::any::TypeId;
use std::ptr::{self, NonNull};

use crate::command::ErasedValue;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry::{Component, ComponentId, ComponentInfo, ComponentRegistry};
use crate::signature::Signature;

const NO_COLUMN: u32 = u32::MAX;

/// Type-erased component column storing values contiguously with the
/// component's real layout. Drop handling goes through the descriptor's
/// drop function. Zero-sized components keep a length only.
pub struct ComponentColumn {
    data: NonNull<u8>,
    len: usize,
    capacity: usize,
    info: ComponentInfo,
}

// Safety: the column owns its buffer exclusively and component types are
// required to be Send + Sync.
unsafe impl Send for ComponentColumn {}
unsafe impl Sync for ComponentColumn {}

impl ComponentColumn {
    pub fn new(info: ComponentInfo) -> Self {
        // Layout-aligned dangling pointer; valid as a ZST base address
        let data = NonNull::new(info.layout().align() as *mut u8)
            .expect("alignment is never zero");
        Self {
            data,
            len: 0,
            capacity: 0,
            info,
        }
    }

    #[inline]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.info.id()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn item_size(&self) -> usize {
        self.info.size()
    }

    /// Reserve space for at least `additional` more values.
    pub fn reserve(&mut self, additional: usize) {
        let size = self.item_size();
        if size == 0 {
            return;
        }
        let required = self
            .len
            .checked_add(additional)
            .expect("column capacity overflow");
        if required <= self.capacity {
            return;
        }
        let new_capacity = required.max(self.capacity * 2).max(4);
        let align = self.info.layout().align();
        let new_layout =
            Layout::from_size_align(size * new_capacity, align).expect("invalid column layout");

        let new_data = if self.capacity == 0 {
            unsafe { NonNull::new(alloc(new_layout)).expect("column allocation failed") }
        } else {
            let old_layout = Layout::from_size_align(size * self.capacity, align)
                .expect("invalid column layout");
            unsafe {
                NonNull::new(realloc(self.data.as_ptr(), old_layout, new_layout.size()))
                    .expect("column reallocation failed")
            }
        };

        self.data = new_data;
        self.capacity = new_capacity;
    }

    #[inline]
    fn ptr_at(&self, slot: usize) -> *mut u8 {
        unsafe { self.data.as_ptr().add(slot * self.item_size()) }
    }

    /// Append one zero-initialized slot. The caller is expected to write a
    /// real value into it before the value can be observed or dropped.
    pub fn push_zeroed(&mut self) {
        self.reserve(1);
        let size = self.item_size();
        if size > 0 {
            unsafe {
                ptr::write_bytes(self.ptr_at(self.len), 0, size);
            }
        }
        self.len += 1;
    }

    #[inline]
    fn check_type<T: Component>(&self) {
        assert_eq!(
            self.info.type_id(),
            TypeId::of::<T>(),
            "column holds {} values",
            self.info.type_name()
        );
    }

    /// Write a typed value into `slot`. The previous bytes are overwritten
    /// without being dropped (components are POD-like values).
    pub fn set<T: Component>(&mut self, slot: usize, value: T) {
        self.check_type::<T>();
        assert!(slot < self.len, "column slot out of bounds");
        unsafe {
            ptr::write(self.ptr_at(slot).cast::<T>(), value);
        }
    }

    /// Type-erased write: copy `item_size` bytes from `src` into `slot`.
    ///
    /// # Safety
    /// `src` must point to a valid value of this column's component type.
    pub unsafe fn set_raw(&mut self, slot: usize, src: *const u8) {
        assert!(slot < self.len, "column slot out of bounds");
        ptr::copy_nonoverlapping(src, self.ptr_at(slot), self.item_size());
    }

    pub fn get<T: Component>(&self, slot: usize) -> Option<&T> {
        self.check_type::<T>();
        if slot >= self.len {
            return None;
        }
        Some(unsafe { &*self.ptr_at(slot).cast::<T>() })
    }

    pub fn get_mut<T: Component>(&mut self, slot: usize) -> Option<&mut T> {
        self.check_type::<T>();
        if slot >= self.len {
            return None;
        }
        Some(unsafe { &mut *self.ptr_at(slot).cast::<T>() })
    }

    /// The whole column as a typed slice. This is the iteration surface for
    /// systems and kernels.
    pub fn as_slice<T: Component>(&self) -> &[T] {
        self.check_type::<T>();
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<T>(), self.len) }
    }

    pub fn as_mut_slice<T: Component>(&mut self) -> &mut [T] {
        self.check_type::<T>();
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr().cast::<T>(), self.len) }
    }

    /// Copy the value at `src_slot` into `other[dst_slot]`. Both columns
    /// must hold the same component type; the destination bytes are
    /// overwritten without being dropped.
    pub fn copy_value_to(&self, other: &mut ComponentColumn, src_slot: usize, dst_slot: usize) {
        debug_assert_eq!(self.info.id(), other.info.id());
        assert!(src_slot < self.len && dst_slot < other.len);
        let size = self.item_size();
        if size > 0 {
            unsafe {
                ptr::copy_nonoverlapping(self.ptr_at(src_slot), other.ptr_at(dst_slot), size);
            }
        }
    }

    /// Drop the value at `slot`, move the last value into its place, shrink
    /// by one.
    pub fn swap_remove(&mut self, slot: usize) {
        assert!(slot < self.len);
        if let Some(drop_fn) = self.info.drop_fn() {
            unsafe {
                drop_fn(self.ptr_at(slot));
            }
        }
        self.swap_remove_forget(slot);
    }

    /// Like [`ComponentColumn::swap_remove`] but without dropping the value
    /// at `slot` — used when its bytes were already moved to another column.
    pub fn swap_remove_forget(&mut self, slot: usize) {
        assert!(slot < self.len);
        let last = self.len - 1;
        let size = self.item_size();
        if slot != last && size > 0 {
            unsafe {
                ptr::copy_nonoverlapping(self.ptr_at(last), self.ptr_at(slot), size);
            }
        }
        self.len = last;
    }
}

impl Drop for ComponentColumn {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.info.drop_fn() {
            for i in 0..self.len {
                unsafe {
                    drop_fn(self.ptr_at(i));
                }
            }
        }
        let size = self.item_size();
        if self.capacity > 0 && size > 0 {
            let layout = Layout::from_size_align(size * self.capacity, self.info.layout().align())
                .expect("invalid column layout");
            unsafe {
                dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

/// Columnar storage for all entities sharing one signature.
pub struct Archetype {
    signature: Signature,
    entities: Vec<Entity>,
    columns: Vec<ComponentColumn>,
    /// Dense `component id -> column index` table, `NO_COLUMN` sentinel.
    column_of: Vec<u32>,
}

impl Archetype {
    pub(crate) fn new(signature: Signature, registry: &ComponentRegistry) -> Result<Self> {
        let mut columns = Vec::with_capacity(signature.len());
        let mut column_of = Vec::new();

        // Ascending id iteration fixes the canonical column order
        for id in signature.ids() {
            let info = registry.info_of(id)?;
            let idx = id.index() as usize;
            if column_of.len() <= idx {
                column_of.resize(idx + 1, NO_COLUMN);
            }
            column_of[idx] = columns.len() as u32;
            columns.push(ComponentColumn::new(info));
        }

        Ok(Self {
            signature,
            entities: Vec::new(),
            columns,
            column_of,
        })
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Column index for a component id, through the dense per-archetype table.
    #[inline]
    pub fn column_index(&self, id: ComponentId) -> Option<usize> {
        match self.column_of.get(id.index() as usize) {
            Some(&idx) if idx != NO_COLUMN => Some(idx as usize),
            _ => None,
        }
    }

    pub fn column(&self, id: ComponentId) -> Option<&ComponentColumn> {
        self.column_index(id).map(|i| &self.columns[i])
    }

    pub fn column_mut(&mut self, id: ComponentId) -> Option<&mut ComponentColumn> {
        match self.column_index(id) {
            Some(i) => Some(&mut self.columns[i]),
            None => None,
        }
    }

    /// Typed view of one column.
    pub fn component_slice<T: Component>(&self, id: ComponentId) -> Option<&[T]> {
        self.column(id).map(|c| c.as_slice::<T>())
    }

    pub fn component_slice_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut [T]> {
        self.column_mut(id).map(|c| c.as_mut_slice::<T>())
    }

    pub fn get_component<T: Component>(&self, id: ComponentId, slot: usize) -> Option<&T> {
        self.column(id)?.get::<T>(slot)
    }

    pub fn set_component<T: Component>(&mut self, id: ComponentId, slot: usize, value: T) {
        self.column_mut(id)
            .expect("component id not in this archetype")
            .set(slot, value);
    }

    /// Type-erased write; the value's component id picks the column.
    pub fn set_component_erased(&mut self, slot: usize, value: ErasedValue) -> Result<()> {
        match self.column_mut(value.id()) {
            Some(column) => {
                value.write_to(column, slot);
                Ok(())
            }
            None => Err(EcsError::ComponentNotFound),
        }
    }

    /// Append `entity` and a zero-initialized slot in every column; the new
    /// slot's component values must be written before they are observed.
    /// Structural mutation happens only on the pipeline thread, so the
    /// `&mut self` receiver is the serialization.
    pub(crate) fn add_entity(&mut self, entity: Entity) -> usize {
        let slot = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_zeroed();
        }
        slot
    }

    /// Swap-remove the entity at `slot` across the entities column and every
    /// component column, dropping its component values. Returns the entity
    /// that was moved into `slot`, if any, so the caller can fix its lookup.
    pub(crate) fn remove_at_swap(&mut self, slot: usize) -> Option<Entity> {
        assert!(slot < self.entities.len(), "slot out of bounds");
        self.entities.swap_remove(slot);
        for column in &mut self.columns {
            column.swap_remove(slot);
        }
        self.entities.get(slot).copied()
    }

    /// Move the entity at `slot` into `target`, copying every column the
    /// target retains and seeding any new column from `override_value`.
    /// On success the entity is swap-removed from `self`; on failure nothing
    /// is mutated and the entity stays where it was.
    ///
    /// Returns `(new_slot, entity moved into the vacated source slot)`.
    pub(crate) fn move_entity_to(
        &mut self,
        slot: usize,
        target: &mut Archetype,
        override_value: Option<ErasedValue>,
    ) -> Result<(usize, Option<Entity>)> {
        let entity = *self.entities.get(slot).ok_or_else(|| {
            EcsError::ArchetypeMoveFailure(format!("source slot {slot} out of bounds"))
        })?;

        // Validate the full target layout before mutating either side
        for column in &target.columns {
            let id = column.id();
            let fed_by_source = self.column_index(id).is_some();
            let fed_by_override = override_value.as_ref().map(ErasedValue::id) == Some(id);
            if !fed_by_source && !fed_by_override {
                return Err(EcsError::ArchetypeMoveFailure(format!(
                    "target column {} has no source",
                    column.info().type_name()
                )));
            }
        }

        let new_slot = target.add_entity(entity);

        for dst in &mut target.columns {
            if let Some(src_idx) = self.column_index(dst.id()) {
                self.columns[src_idx].copy_value_to(dst, slot, new_slot);
            }
        }
        if let Some(value) = override_value {
            if let Some(dst) = target.column_mut(value.id()) {
                value.write_to(dst, new_slot);
            }
        }

        self.entities.swap_remove(slot);
        for column in &mut self.columns {
            if target.column_index(column.id()).is_some() {
                // Bytes were copied out; ownership lives in the target now
                column.swap_remove_forget(slot);
            } else {
                column.swap_remove(slot);
            }
        }

        let moved = self.entities.get(slot).copied();
        Ok((new_slot, moved))
    }

    /// Reserve space for additional entities across all columns.
    pub fn reserve(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentRegistry;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Mass(f64);

    struct Frozen;

    fn registry_with_all() -> ComponentRegistry {
        let registry = ComponentRegistry::new();
        registry.id_of::<Health>();
        registry.id_of::<Mass>();
        registry.id_of::<Frozen>();
        registry
    }

    #[test]
    fn test_columns_follow_ascending_id_order() {
        let registry = registry_with_all();
        let health = registry.id_of::<Health>();
        let mass = registry.id_of::<Mass>();

        let sig: Signature = [mass, health].into_iter().collect();
        let arch = Archetype::new(sig, &registry).unwrap();

        assert_eq!(arch.column_index(health), Some(0));
        assert_eq!(arch.column_index(mass), Some(1));
    }

    #[test]
    fn test_add_set_remove_swap() {
        let registry = registry_with_all();
        let health = registry.id_of::<Health>();

        let sig: Signature = [health].into_iter().collect();
        let mut arch = Archetype::new(sig, &registry).unwrap();

        let a = Entity::new(1, 0);
        let b = Entity::new(2, 0);
        let c = Entity::new(3, 0);
        for (i, e) in [a, b, c].into_iter().enumerate() {
            let slot = arch.add_entity(e);
            assert_eq!(slot, i);
            arch.set_component(health, slot, Health(10 + i as u32));
        }

        // Removing the head swaps the tail in
        let moved = arch.remove_at_swap(0);
        assert_eq!(moved, Some(c));
        assert_eq!(arch.len(), 2);
        assert_eq!(arch.get_component::<Health>(health, 0), Some(&Health(12)));
        assert_eq!(arch.column(health).unwrap().len(), arch.len());
    }

    #[test]
    fn test_zero_sized_tag_column() {
        let registry = registry_with_all();
        let frozen = registry.id_of::<Frozen>();

        let sig: Signature = [frozen].into_iter().collect();
        let mut arch = Archetype::new(sig, &registry).unwrap();
        arch.add_entity(Entity::new(1, 0));
        arch.add_entity(Entity::new(2, 0));

        assert_eq!(arch.column(frozen).unwrap().len(), 2);
        arch.remove_at_swap(1);
        assert_eq!(arch.column(frozen).unwrap().len(), 1);
    }

    #[test]
    fn test_move_entity_keeps_retained_values() {
        let registry = registry_with_all();
        let health = registry.id_of::<Health>();
        let mass = registry.id_of::<Mass>();

        let src_sig: Signature = [health, mass].into_iter().collect();
        let dst_sig: Signature = [health].into_iter().collect();
        let mut src = Archetype::new(src_sig, &registry).unwrap();
        let mut dst = Archetype::new(dst_sig, &registry).unwrap();

        let e = Entity::new(5, 1);
        let slot = src.add_entity(e);
        src.set_component(health, slot, Health(77));
        src.set_component(mass, slot, Mass(2.5));

        let (new_slot, moved) = src.move_entity_to(slot, &mut dst, None).unwrap();
        assert_eq!(moved, None);
        assert_eq!(src.len(), 0);
        assert_eq!(dst.entities(), &[e]);
        assert_eq!(dst.get_component::<Health>(health, new_slot), Some(&Health(77)));
    }

    #[test]
    fn test_move_without_source_for_target_column_fails() {
        let registry = registry_with_all();
        let health = registry.id_of::<Health>();
        let mass = registry.id_of::<Mass>();

        let src_sig: Signature = [health].into_iter().collect();
        let dst_sig: Signature = [health, mass].into_iter().collect();
        let mut src = Archetype::new(src_sig, &registry).unwrap();
        let mut dst = Archetype::new(dst_sig, &registry).unwrap();

        let slot = src.add_entity(Entity::new(9, 0));
        let err = src.move_entity_to(slot, &mut dst, None);
        assert!(matches!(err, Err(EcsError::ArchetypeMoveFailure(_))));
        // Entity stays in the source archetype
        assert_eq!(src.len(), 1);
        assert_eq!(dst.len(), 0);
    }
}
