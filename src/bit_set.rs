use std::{fmt, iter, slice};

/// Growable set of small integers, one bit per member.
#[derive(Clone, Default)]
pub struct BitSet(Vec<u32>);

impl BitSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns a set able to hold `0..len` without reallocating.
    pub fn with_len(len: usize) -> Self {
        Self(vec![0; (len + u32::BITS as usize - 1) / u32::BITS as usize])
    }

    pub fn contains(&self, x: u32) -> bool {
        self.0
            .get((x / u32::BITS) as usize)
            .map_or(false, |&u| u & 1 << (x % u32::BITS) != 0)
    }

    /// Adds `x`, returning whether it was absent.
    pub fn insert(&mut self, x: u32) -> bool {
        let i = (x / u32::BITS) as usize;
        if i >= self.0.len() {
            self.0.resize(i + 1, 0);
        }
        let mask = 1 << (x % u32::BITS);
        let absent = self.0[i] & mask == 0;
        self.0[i] |= mask;
        absent
    }

    pub fn remove(&mut self, x: u32) -> bool {
        match self.0.get_mut((x / u32::BITS) as usize) {
            Some(word) => {
                let mask = 1 << (x % u32::BITS);
                let present = *word & mask != 0;
                *word &= !mask;
                present
            }
            None => false,
        }
    }

    pub fn len(&self) -> u32 {
        self.0.iter().copied().map(u32::count_ones).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&u| u == 0)
    }

    pub fn clear(&mut self) {
        self.0.fill(0);
    }

    /// Unions `other` into `self`, returning whether anything was added.
    ///
    /// Used as the step function of the FIRST/FOLLOW fixpoints.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        if other.0.len() > self.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        let mut changed = false;
        for (a, &b) in self.0.iter_mut().zip(&other.0) {
            changed |= b & !*a != 0;
            *a |= b;
        }
        changed
    }

    /// Like [`BitSet::union_with`] but never adds `except`.
    pub fn union_except(&mut self, other: &BitSet, except: u32) -> bool {
        if other.0.len() > self.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        let (word, mask) = ((except / u32::BITS) as usize, 1 << (except % u32::BITS));
        let mut changed = false;
        for (i, (a, &b)) in self.0.iter_mut().zip(&other.0).enumerate() {
            let b = if i == word { b & !mask } else { b };
            changed |= b & !*a != 0;
            *a |= b;
        }
        changed
    }

    pub fn iter(&self) -> Iter<iter::Copied<slice::Iter<u32>>> {
        Iter::new(self.0.iter().copied())
    }
}

impl FromIterator<u32> for BitSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut set = Self::new();
        for x in iter {
            set.insert(x);
        }
        set
    }
}

#[derive(Debug)]
pub struct Iter<I> {
    offset: u32,
    head: u32,
    tail: I,
}

impl<I: Iterator<Item = u32>> Iter<I> {
    fn new(mut iter: I) -> Self {
        Self {
            offset: 0,
            head: iter.next().unwrap_or(0),
            tail: iter,
        }
    }
}

impl<I: Iterator<Item = u32>> Iterator for Iter<I> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        while self.head == 0 {
            self.head = self.tail.next()?;
            self.offset += u32::BITS;
        }
        let i = self.offset + self.head.trailing_zeros();
        self.head &= self.head - 1;
        Some(i)
    }
}

impl<'a> IntoIterator for &'a BitSet {
    type Item = u32;
    type IntoIter = Iter<iter::Copied<slice::Iter<'a, u32>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_insert() {
        let mut s = BitSet::new();
        assert!(s.insert(3));
        assert!(s.insert(64));
        assert!(!s.insert(3));
        assert_eq!(s.0.len(), 3);

        let mut iter = s.iter();
        assert_eq!(iter.next(), Some(3));
        assert_eq!(iter.next(), Some(64));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn union_reports_change() {
        let mut a: BitSet = [1, 2].into_iter().collect();
        let b: BitSet = [2, 40].into_iter().collect();
        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), [1, 2, 40]);
    }

    #[test]
    fn union_except_skips_member() {
        let mut a: BitSet = [5].into_iter().collect();
        let b: BitSet = [1, 5].into_iter().collect();
        assert!(!a.union_except(&b, 1));
        assert!(!a.contains(1));
        assert!(a.remove(5));
        assert!(a.is_empty());
    }
}
