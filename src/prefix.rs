//! Prefix-viability filter.
//!
//! A trie over FIRST-k of the start symbol. Parsing fresh from a word can
//! only succeed if some path of spans starting there spells a trie
//! sequence that is either complete or k symbols long.
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::bit_set::BitSet;
use crate::sets::FirstK;
use crate::SymbolId;

#[derive(Clone, Debug, Default)]
struct Node {
    edges: SmallVec<[(SymbolId, u32); 4]>,
    accepting: bool,
}

#[derive(Clone, Debug)]
pub struct PrefixAutomaton {
    nodes: Vec<Node>,
}

impl PrefixAutomaton {
    pub fn new(firstk: &FirstK, start: SymbolId) -> Self {
        let mut nodes = vec![Node::default()];
        for prefix in firstk.get(start) {
            let mut n = 0;
            for &symbol in prefix {
                n = match nodes[n].edges.iter().find(|&&(s, _)| s == symbol) {
                    Some(&(_, next)) => next as usize,
                    None => {
                        nodes.push(Node::default());
                        let next = nodes.len() - 1;
                        nodes[n].edges.push((symbol, next as u32));
                        next
                    }
                };
            }
            nodes[n].accepting = true;
        }
        Self { nodes }
    }

    pub fn num_states(&self) -> usize {
        self.nodes.len()
    }

    fn step(&self, node: u32, symbol: SymbolId) -> Option<u32> {
        self.nodes[node as usize]
            .edges
            .iter()
            .find(|&&(s, _)| s == symbol)
            .map(|&(_, next)| next)
    }

    /// Returns the words from which a parse may start.
    ///
    /// `words[i]` lists the `(symbol, next word)` pairs of the spans
    /// starting at word `i`; a next word of `words.len()` is the end of
    /// input.
    pub fn viable(&self, words: &[Vec<(SymbolId, usize)>]) -> BitSet {
        let mut memo = HashMap::new();
        let mut out = BitSet::with_len(words.len());
        for i in 0..words.len() {
            if self.walk(0, i, words, &mut memo) {
                out.insert(i as u32);
            }
        }
        out
    }

    fn walk(
        &self,
        node: u32,
        word: usize,
        words: &[Vec<(SymbolId, usize)>],
        memo: &mut HashMap<(u32, usize), bool>,
    ) -> bool {
        if self.nodes[node as usize].accepting {
            return true;
        }
        if let Some(&known) = memo.get(&(node, word)) {
            return known;
        }
        let result = words.get(word).map_or(false, |spans| {
            spans.iter().any(|&(symbol, next)| {
                self.step(node, symbol)
                    .map_or(false, |child| self.walk(child, next, words, memo))
            })
        });
        memo.insert((node, word), result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;

    #[test]
    fn viability() {
        let mut b = GrammarBuilder::new();
        b.terminal("a").terminal("b").start("S").unwrap();
        b.rule("S", ["a", "b", "b"]);
        let g = b.build().unwrap();
        let (a, bb) = (g.lookup("a").unwrap(), g.lookup("b").unwrap());
        let firstk = FirstK::compute(&g, 2);
        let prefix = PrefixAutomaton::new(&firstk, g.start());
        assert_eq!(prefix.num_states(), 3);

        // a b b, overlapping b at word 1 skipping to the end
        let words = vec![vec![(a, 1)], vec![(bb, 2), (bb, 3)], vec![(bb, 3)]];
        let viable = prefix.viable(&words);
        assert_eq!(viable.iter().collect::<Vec<_>>(), [0]);

        let words = vec![vec![(a, 1)]];
        assert!(prefix.viable(&words).is_empty());
    }
}
