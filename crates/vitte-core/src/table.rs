//! table.rs — Table de hachage à adressage ouvert avec tombstones.
//!
//! Grounded sur `lit_table.h`/`lit_table.c` : les tables du langage
//! d'origine sont adressées ouvertement, avec un facteur de charge cible
//! et des tombstones pour la suppression plutôt qu'un tassement immédiat
//! (supprimer déplacerait des entrées et casserait les probes en cours).
//! Les clés sont des chaînes internées : deux chaînes égales partagent
//! toujours le même `Handle` (voir `heap::Heap::intern_string`), donc la
//! comparaison de clé se réduit à une égalité de handle après un premier
//! filtrage par hash.

use ahash::AHasher;
use std::hash::{Hash, Hasher};

use crate::heap::Handle;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Debug)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(Handle, V),
}

/// Table associant des chaînes internées (`Handle`) à des valeurs `V`.
#[derive(Clone, Debug)]
pub struct Table<V> {
    slots: Vec<Slot<V>>,
    len: usize,
    tombstones: usize,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self { slots: Vec::new(), len: 0, tombstones: 0 }
    }
}

fn hash_handle(key: Handle) -> u64 {
    let mut hasher = AHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

impl<V> Table<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Trouve l'index du slot pour `key`, qu'il soit occupé, vide, ou une
    /// tombstone réutilisable : probing linéaire classique.
    fn find_slot(slots: &[Slot<V>], key: Handle) -> usize {
        let cap = slots.len();
        let start = (hash_handle(key) as usize) % cap;
        let mut tombstone: Option<usize> = None;
        let mut i = start;
        loop {
            match &slots[i] {
                Slot::Empty => return tombstone.unwrap_or(i),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(i);
                    }
                }
                Slot::Occupied(k, _) if *k == key => return i,
                Slot::Occupied(_, _) => {}
            }
            i = (i + 1) % cap;
            if i == start {
                return tombstone.unwrap_or(i);
            }
        }
    }

    fn grow(&mut self) {
        let new_cap = if self.capacity() == 0 { 8 } else { self.capacity() * 2 };
        let mut new_slots: Vec<Slot<V>> = (0..new_cap).map(|_| Slot::Empty).collect();
        let old = std::mem::take(&mut self.slots);
        for slot in old {
            if let Slot::Occupied(k, v) = slot {
                let idx = Self::find_slot(&new_slots, k);
                new_slots[idx] = Slot::Occupied(k, v);
            }
        }
        self.slots = new_slots;
        self.tombstones = 0;
    }

    /// Insère ou remplace. Retourne l'ancienne valeur si la clé existait déjà.
    pub fn insert(&mut self, key: Handle, value: V) -> Option<V> {
        if self.capacity() == 0 || (self.len + self.tombstones + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow();
        }
        let idx = Self::find_slot(&self.slots, key);
        match std::mem::replace(&mut self.slots[idx], Slot::Occupied(key, value)) {
            Slot::Occupied(_, old) => Some(old),
            Slot::Empty => {
                self.len += 1;
                None
            }
            Slot::Tombstone => {
                self.len += 1;
                self.tombstones -= 1;
                None
            }
        }
    }

    pub fn get(&self, key: Handle) -> Option<&V> {
        if self.capacity() == 0 {
            return None;
        }
        match &self.slots[Self::find_slot(&self.slots, key)] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Handle) -> Option<&mut V> {
        if self.capacity() == 0 {
            return None;
        }
        let idx = Self::find_slot(&self.slots, key);
        match &mut self.slots[idx] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: Handle) -> bool {
        self.get(key).is_some()
    }

    /// Supprime en posant une tombstone : ne rompt jamais les chaînes de
    /// probing des autres entrées.
    pub fn remove(&mut self, key: Handle) -> Option<V> {
        if self.capacity() == 0 {
            return None;
        }
        let idx = Self::find_slot(&self.slots, key);
        match std::mem::replace(&mut self.slots[idx], Slot::Tombstone) {
            Slot::Occupied(_, v) => {
                self.len -= 1;
                self.tombstones += 1;
                Some(v)
            }
            other => {
                self.slots[idx] = other;
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &V)> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(k, v) => Some((*k, v)),
            _ => None,
        })
    }

    /// Copie toutes les entrées de `other` dans `self`, écrasant les clés
    /// communes. Utilisé par `OP_INHERIT` pour copier la table de méthodes
    /// du parent dans l'enfant (dispatch à coût constant, pas de MRO).
    pub fn copy_from(&mut self, other: &Table<V>)
    where
        V: Clone,
    {
        for (k, v) in other.iter() {
            self.insert(k, v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut heap = Heap::new();
        let a = heap.intern_string("a");
        let b = heap.intern_string("b");
        let mut t: Table<i32> = Table::new();
        assert_eq!(t.insert(a, 1), None);
        assert_eq!(t.insert(b, 2), None);
        assert_eq!(t.get(a), Some(&1));
        assert_eq!(t.remove(a), Some(1));
        assert_eq!(t.get(a), None);
        assert_eq!(t.get(b), Some(&2));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut heap = Heap::new();
        let mut t: Table<usize> = Table::new();
        for i in 0..200 {
            let name = format!("key{i}");
            let h = heap.intern_string(&name);
            t.insert(h, i);
        }
        assert_eq!(t.len(), 200);
    }
}
