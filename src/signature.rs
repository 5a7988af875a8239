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

//! Immutable component-id bitsets identifying archetypes.

use smallvec::SmallVec;

use crate::registry::ComponentId;

const WORD_BITS: usize = 64;

/// Immutable bitset over component ids; the identity of an archetype.
///
/// Trailing zero words are trimmed on construction so word-wise equality and
/// hashing are well-defined regardless of how large an id the bitmap once
/// covered. [`Signature::with`] grows the bitmap as needed;
/// [`Signature::without`] of an absent id returns an equal signature.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    words: SmallVec<[u64; 4]>,
    count: u32,
}

impl Signature {
    /// The empty signature (the identity of the empty archetype).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of ids in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check membership.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        let (word, bit) = Self::split(id);
        match self.words.get(word) {
            Some(&w) => (w & (1 << bit)) != 0,
            None => false,
        }
    }

    /// A new signature with `id` added.
    pub fn with(&self, id: ComponentId) -> Signature {
        if self.contains(id) {
            return self.clone();
        }
        let (word, bit) = Self::split(id);
        let mut words = self.words.clone();
        if word >= words.len() {
            words.resize(word + 1, 0);
        }
        words[word] |= 1 << bit;
        Signature {
            words,
            count: self.count + 1,
        }
    }

    /// A new signature with `id` removed. Removing an absent id yields a
    /// signature equal to the receiver with the count untouched.
    pub fn without(&self, id: ComponentId) -> Signature {
        if !self.contains(id) {
            return self.clone();
        }
        let (word, bit) = Self::split(id);
        let mut words = self.words.clone();
        words[word] &= !(1 << bit);
        let mut sig = Signature {
            words,
            count: self.count - 1,
        };
        sig.trim();
        sig
    }

    /// True if every id of `other` is also in `self`.
    pub fn is_superset_of(&self, other: &Signature) -> bool {
        if other.words.len() > self.words.len() {
            // A set word beyond our bitmap cannot be covered
            if other.words[self.words.len()..].iter().any(|&w| w != 0) {
                return false;
            }
        }
        other
            .words
            .iter()
            .zip(self.words.iter())
            .all(|(&o, &s)| o & !s == 0)
    }

    /// Iterate ids in ascending order.
    pub fn ids(&self) -> SignatureIds<'_> {
        SignatureIds {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    #[inline]
    fn split(id: ComponentId) -> (usize, usize) {
        let idx = id.index() as usize;
        (idx / WORD_BITS, idx % WORD_BITS)
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl FromIterator<ComponentId> for Signature {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        let mut sig = Signature::empty();
        for id in iter {
            // `with` allocates per step; acceptable off the hot path
            sig = sig.with(id);
        }
        sig
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.ids().map(|id| id.index())).finish()
    }
}

/// Iterator over the ids of a [`Signature`], ascending.
pub struct SignatureIds<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl<'a> Iterator for SignatureIds<'a> {
    type Item = ComponentId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let trailing = self.current.trailing_zeros();
                self.current &= !(1 << trailing);
                return Some(ComponentId(
                    (self.word_idx * WORD_BITS) as u32 + trailing,
                ));
            }

            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn id(n: u32) -> ComponentId {
        ComponentId(n)
    }

    fn hash_of(sig: &Signature) -> u64 {
        let mut h = DefaultHasher::new();
        sig.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_add_remove_round_trip() {
        let base: Signature = [id(1), id(3), id(64)].into_iter().collect();
        let grown = base.with(id(200));
        assert!(grown.contains(id(200)));
        assert_eq!(grown.len(), 4);

        let back = grown.without(id(200));
        assert_eq!(back, base);
        assert_eq!(hash_of(&back), hash_of(&base));
    }

    #[test]
    fn test_remove_absent_is_identity() {
        let base: Signature = [id(2), id(5)].into_iter().collect();
        let same = base.without(id(63));
        assert_eq!(same, base);
        assert_eq!(same.len(), 2);
    }

    #[test]
    fn test_ids_ascending_across_words() {
        let sig: Signature = [id(130), id(0), id(64), id(7)].into_iter().collect();
        let ids: Vec<u32> = sig.ids().map(|i| i.index()).collect();
        assert_eq!(ids, vec![0, 7, 64, 130]);
    }

    #[test]
    fn test_superset() {
        let all: Signature = [id(1), id(2), id(70)].into_iter().collect();
        let some: Signature = [id(1), id(70)].into_iter().collect();
        let other: Signature = [id(1), id(300)].into_iter().collect();

        assert!(all.is_superset_of(&some));
        assert!(all.is_superset_of(&Signature::empty()));
        assert!(!some.is_superset_of(&all));
        assert!(!all.is_superset_of(&other));
    }
}
