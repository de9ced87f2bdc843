//! FIRST, FOLLOW and FIRST-k sets.
use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::bit_set::BitSet;
use crate::grammar::Grammar;
use crate::{SymbolId, EOF, EPSILON};

/// Unions `sets[src]` into `sets[dst]`, leaving out `except`.
fn union_into(sets: &mut [BitSet], dst: usize, src: usize, except: SymbolId) -> bool {
    if let (a, [b, c @ ..]) = sets.split_at_mut(src) {
        let to = if dst < src {
            &mut a[dst]
        } else if dst > src {
            &mut c[dst - src - 1]
        } else {
            return false;
        };
        to.union_except(b, except)
    } else {
        false
    }
}

/// FIRST set of every symbol. Terminals are their own FIRST set, and `ε`
/// is a member of FIRST(X) when X derives the empty string.
#[derive(Clone, Debug)]
pub struct FirstSets {
    sets: Vec<BitSet>,
    passes: usize,
}

impl FirstSets {
    pub fn compute(g: &Grammar) -> Self {
        let mut sets = vec![BitSet::new(); g.num_symbols()];
        for (id, info) in g.symbols() {
            if !info.nonterminal {
                sets[id as usize].insert(id);
            }
        }

        let mut passes = 0;
        let mut changed = true;
        while changed {
            changed = false;
            passes += 1;
            for rule in g.all_rules() {
                let lhs = rule.lhs as usize;
                let mut nullable = true;
                for symbol in rule.symbols() {
                    changed |= union_into(&mut sets, lhs, symbol as usize, EPSILON);
                    if !sets[symbol as usize].contains(EPSILON) {
                        nullable = false;
                        break;
                    }
                }
                if nullable {
                    changed |= sets[lhs].insert(EPSILON);
                }
            }
        }

        Self { sets, passes }
    }

    pub fn get(&self, symbol: SymbolId) -> &BitSet {
        &self.sets[symbol as usize]
    }

    pub fn nullable(&self, symbol: SymbolId) -> bool {
        self.sets[symbol as usize].contains(EPSILON)
    }

    /// Number of full passes the fixpoint took, the last one adding nothing.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// FIRST of a symbol string; contains `ε` iff the whole string is
    /// nullable.
    pub fn of_sequence(&self, symbols: impl IntoIterator<Item = SymbolId>) -> BitSet {
        let mut out = BitSet::new();
        for symbol in symbols {
            out.union_except(self.get(symbol), EPSILON);
            if !self.nullable(symbol) {
                return out;
            }
        }
        out.insert(EPSILON);
        out
    }
}

/// FOLLOW set of every nonterminal.
#[derive(Clone, Debug)]
pub struct FollowSets {
    sets: Vec<BitSet>,
}

impl FollowSets {
    pub fn compute(g: &Grammar, first: &FirstSets) -> Self {
        let mut sets = vec![BitSet::new(); g.num_symbols()];
        sets[g.start() as usize].insert(EOF);

        let mut changed = true;
        while changed {
            changed = false;
            for rule in g.all_rules() {
                // Terminals that may follow the current position
                let mut trailer = sets[rule.lhs as usize].clone();
                for symbol in rule.symbols().rev() {
                    if g.is_nonterminal(symbol) {
                        changed |= sets[symbol as usize].union_with(&trailer);
                    }
                    if !first.nullable(symbol) {
                        trailer.clear();
                    }
                    trailer.union_except(first.get(symbol), EPSILON);
                }
            }
        }

        Self { sets }
    }

    pub fn get(&self, symbol: SymbolId) -> &BitSet {
        &self.sets[symbol as usize]
    }
}

/// A terminal string of length at most k.
pub type Prefix = SmallVec<[SymbolId; 4]>;

/// FIRST-k: for every symbol, the set of terminal prefixes of length at
/// most k of the strings it derives.
#[derive(Clone, Debug)]
pub struct FirstK {
    k: usize,
    sets: Vec<HashSet<Prefix>>,
}

impl FirstK {
    pub fn compute(g: &Grammar, k: usize) -> Self {
        let k = k.max(1);
        let mut sets = vec![HashSet::new(); g.num_symbols()];
        for (id, info) in g.symbols() {
            if !info.nonterminal {
                let prefix = if id == EPSILON {
                    Prefix::new()
                } else {
                    Prefix::from_slice(&[id])
                };
                sets[id as usize].insert(prefix);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for rule in g.all_rules() {
                let mut acc: HashSet<Prefix> = std::iter::once(Prefix::new()).collect();
                for symbol in rule.symbols() {
                    acc = concat_k(&acc, &sets[symbol as usize], k);
                    if acc.is_empty() {
                        break;
                    }
                }
                let lhs = &mut sets[rule.lhs as usize];
                for prefix in acc {
                    changed |= lhs.insert(prefix);
                }
            }
        }

        Self { k, sets }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn get(&self, symbol: SymbolId) -> &HashSet<Prefix> {
        &self.sets[symbol as usize]
    }
}

/// `{ (x ++ y)[..k] | x ∈ xs, y ∈ ys }`, not extending prefixes that are
/// already full.
fn concat_k(xs: &HashSet<Prefix>, ys: &HashSet<Prefix>, k: usize) -> HashSet<Prefix> {
    let mut out = HashSet::new();
    for x in xs {
        if x.len() >= k {
            out.insert(x.clone());
            continue;
        }
        for y in ys {
            let mut p = x.clone();
            p.extend(y.iter().copied().take(k - x.len()));
            out.insert(p);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;

    fn right_recursive() -> Grammar {
        let mut b = GrammarBuilder::new();
        b.terminal("a").start("S").unwrap();
        b.rule("S", ["a", "S"]);
        b.rule("S", Vec::<&str>::new());
        b.build().unwrap()
    }

    #[test]
    fn first_and_follow() {
        let g = right_recursive();
        let (s, a) = (g.lookup("S").unwrap(), g.lookup("a").unwrap());
        let first = FirstSets::compute(&g);
        let mut expected = vec![EPSILON, a];
        expected.sort_unstable();
        assert_eq!(first.get(s).iter().collect::<Vec<_>>(), expected);
        assert!(first.nullable(s));
        // One pass adds `a` and `ε`, the next adds nothing
        assert_eq!(first.passes(), 2);

        let follow = FollowSets::compute(&g, &first);
        assert_eq!(follow.get(s).iter().collect::<Vec<_>>(), [EOF]);
        assert!(!follow.get(s).contains(EPSILON));

        assert_eq!(first.of_sequence([a, s]).iter().collect::<Vec<_>>(), [a]);
        assert!(first.of_sequence([s, s]).contains(EPSILON));
    }

    #[test]
    fn follow_through_nullable_suffix() {
        let mut b = GrammarBuilder::new();
        b.terminal("x").terminal("y").start("S").unwrap();
        b.rule("S", ["A", "B", "y"]);
        b.rule("A", ["x"]);
        b.rule("B", ["x"]);
        b.rule("B", Vec::<&str>::new());
        let g = b.build().unwrap();
        let id = |n| g.lookup(n).unwrap();
        let first = FirstSets::compute(&g);
        let follow = FollowSets::compute(&g, &first);

        let mut expected = vec![id("x"), id("y")];
        expected.sort_unstable();
        assert_eq!(follow.get(id("A")).iter().collect::<Vec<_>>(), expected);
        assert_eq!(follow.get(id("B")).iter().collect::<Vec<_>>(), [id("y")]);
    }

    #[test]
    fn first_k_prefixes() {
        let g = right_recursive();
        let (s, a) = (g.lookup("S").unwrap(), g.lookup("a").unwrap());
        let firstk = FirstK::compute(&g, 2);
        let mut got: Vec<Vec<SymbolId>> = firstk.get(s).iter().map(|p| p.to_vec()).collect();
        got.sort();
        assert_eq!(got, [vec![], vec![a], vec![a, a]]);
    }
}
