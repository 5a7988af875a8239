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

//! Archetype interning and indexed lookup.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use ahash::AHashMap;

use crate::archetype::Archetype;
use crate::error::Result;
use crate::registry::ComponentRegistry;
use crate::signature::Signature;

/// Index of the empty archetype. Always present; entities created without a
/// signature start here.
pub const EMPTY_ARCHETYPE: usize = 0;

/// Interns archetypes by signature and hands out stable dense indices.
///
/// Archetypes are created on first demand and never destroyed during a run,
/// so an index stays valid for the lifetime of the world.
pub struct ArchetypeManager {
    registry: Arc<ComponentRegistry>,
    archetypes: Vec<Archetype>,
    by_signature: AHashMap<Signature, usize>,
    /// Per-component-id posting lists of archetypes containing that id.
    postings: Vec<Vec<u32>>,
}

impl ArchetypeManager {
    pub(crate) fn new(registry: Arc<ComponentRegistry>) -> Self {
        let mut manager = Self {
            registry,
            // Start with reasonable defaults to avoid resize spikes
            archetypes: Vec::with_capacity(64),
            by_signature: AHashMap::with_capacity(64),
            postings: Vec::new(),
        };
        // Bootstrap the empty archetype at index 0; simplifies logic elsewhere
        manager
            .get_or_create(&Signature::empty())
            .expect("empty archetype cannot fail");
        manager
    }

    /// Intern an archetype for `signature`, creating it on first demand.
    pub fn get_or_create(&mut self, signature: &Signature) -> Result<usize> {
        if let Some(&idx) = self.by_signature.get(signature) {
            return Ok(idx);
        }

        let archetype = Archetype::new(signature.clone(), &self.registry)?;
        let idx = self.archetypes.len();
        for id in signature.ids() {
            let slot = id.index() as usize;
            if self.postings.len() <= slot {
                self.postings.resize_with(slot + 1, Vec::new);
            }
            self.postings[slot].push(idx as u32);
        }
        self.by_signature.insert(signature.clone(), idx);
        self.archetypes.push(archetype);
        Ok(idx)
    }

    /// Dense index for a signature already interned.
    pub fn index_of(&self, signature: &Signature) -> Option<usize> {
        self.by_signature.get(signature).copied()
    }

    pub fn get(&self, idx: usize) -> Option<&Archetype> {
        self.archetypes.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Archetype> {
        self.archetypes.get_mut(idx)
    }

    pub fn empty(&self) -> &Archetype {
        &self.archetypes[EMPTY_ARCHETYPE]
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Archetype> {
        self.archetypes.iter()
    }

    /// Indices of archetypes whose signature is a superset of `all_of`.
    ///
    /// The scan starts from the rarest posting list among the requested ids
    /// rather than walking every archetype.
    pub fn query_indices<'a>(&'a self, all_of: &'a Signature) -> QueryIndices<'a> {
        let candidates = if all_of.is_empty() {
            Candidates::All(0..self.archetypes.len())
        } else {
            let rarest = all_of
                .ids()
                .map(|id| {
                    self.postings
                        .get(id.index() as usize)
                        .map(Vec::as_slice)
                        .unwrap_or(&[])
                })
                .min_by_key(|list| list.len());
            match rarest {
                Some(list) if !list.is_empty() => Candidates::Posting(list.iter()),
                _ => Candidates::None,
            }
        };
        QueryIndices {
            archetypes: &self.archetypes,
            all_of,
            candidates,
        }
    }

    /// Archetypes whose signature is a superset of `all_of`.
    pub fn query<'a>(
        &'a self,
        all_of: &'a Signature,
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        self.query_indices(all_of).map(|idx| &self.archetypes[idx])
    }

    /// Disjoint mutable borrows of two archetypes, for entity moves.
    pub(crate) fn pair_mut(&mut self, a: usize, b: usize) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "pair_mut requires distinct archetypes");
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }
}

impl Index<usize> for ArchetypeManager {
    type Output = Archetype;

    fn index(&self, idx: usize) -> &Archetype {
        &self.archetypes[idx]
    }
}

impl IndexMut<usize> for ArchetypeManager {
    fn index_mut(&mut self, idx: usize) -> &mut Archetype {
        &mut self.archetypes[idx]
    }
}

enum Candidates<'a> {
    All(std::ops::Range<usize>),
    Posting(std::slice::Iter<'a, u32>),
    None,
}

/// Iterator over matching archetype indices; see
/// [`ArchetypeManager::query_indices`].
pub struct QueryIndices<'a> {
    archetypes: &'a [Archetype],
    all_of: &'a Signature,
    candidates: Candidates<'a>,
}

impl<'a> Iterator for QueryIndices<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            let idx = match &mut self.candidates {
                Candidates::All(range) => range.next()?,
                Candidates::Posting(iter) => *iter.next()? as usize,
                Candidates::None => return None,
            };
            if self.archetypes[idx].signature().is_superset_of(self.all_of) {
                return Some(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;

    fn setup() -> (ArchetypeManager, Signature, Signature, Signature) {
        let registry = Arc::new(ComponentRegistry::new());
        let a = registry.id_of::<A>();
        let b = registry.id_of::<B>();
        let c = registry.id_of::<C>();

        let ab: Signature = [a, b].into_iter().collect();
        let ac: Signature = [a, c].into_iter().collect();
        let b_only: Signature = [b].into_iter().collect();
        (ArchetypeManager::new(registry), ab, ac, b_only)
    }

    #[test]
    fn test_interning_is_stable() {
        let (mut manager, ab, _, _) = setup();
        let first = manager.get_or_create(&ab).unwrap();
        let second = manager.get_or_create(&ab).unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.index_of(&ab), Some(first));
        assert_ne!(first, EMPTY_ARCHETYPE);
    }

    #[test]
    fn test_empty_archetype_is_bootstrapped() {
        let (manager, _, _, _) = setup();
        assert_eq!(manager.len(), 1);
        assert!(manager.empty().signature().is_empty());
    }

    #[test]
    fn test_query_superset_via_postings() {
        let (mut manager, ab, ac, b_only) = setup();
        let ab_idx = manager.get_or_create(&ab).unwrap();
        let ac_idx = manager.get_or_create(&ac).unwrap();
        let b_idx = manager.get_or_create(&b_only).unwrap();

        let matches: Vec<usize> = manager.query_indices(&b_only).collect();
        assert!(matches.contains(&ab_idx));
        assert!(matches.contains(&b_idx));
        assert!(!matches.contains(&ac_idx));

        // Empty query matches everything, including the empty archetype
        let all: Vec<usize> = manager.query_indices(&Signature::empty()).collect();
        assert_eq!(all.len(), manager.len());
    }
}
