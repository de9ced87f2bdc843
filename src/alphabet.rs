//! Deduplicating interning tables.
//!
//! Every compiled entity (symbols, predicates, accessors, values) is
//! referred to by a dense `u32` handed out by an [`Alphabet`]; interning the
//! same value twice yields the same id.
use hashbrown::HashMap;
use std::hash::Hash;
use std::ops::Index;

#[derive(Clone, Debug)]
pub struct Alphabet<T> {
    items: Vec<T>,
    ids: HashMap<T, u32>,
}

impl<T> Default for Alphabet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            ids: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> Alphabet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `item`, assigning the next free one if unseen.
    pub fn intern(&mut self, item: T) -> u32 {
        if let Some(&id) = self.ids.get(&item) {
            return id;
        }
        let id = self.items.len() as u32;
        self.items.push(item.clone());
        self.ids.insert(item, id);
        id
    }

    pub fn get(&self, item: &T) -> Option<u32> {
        self.ids.get(item).copied()
    }

    pub fn resolve(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items.iter().enumerate().map(|(i, x)| (i as u32, x))
    }
}

impl<T> Index<u32> for Alphabet<T> {
    type Output = T;

    fn index(&self, id: u32) -> &T {
        &self.items[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut a = Alphabet::new();
        let x = a.intern("x".to_string());
        let y = a.intern("y".to_string());
        assert_eq!(a.intern("x".to_string()), x);
        assert_ne!(x, y);
        assert_eq!(a.len(), 2);
        assert_eq!(a[y], "y");
        assert_eq!(a.get(&"z".to_string()), None);
    }
}
