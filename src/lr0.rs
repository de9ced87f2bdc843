/*!
LR(0) item automaton.

States are item sets closed under prediction and identified by their
kernel; edges are labeled by the symbol shifted.
*/
use hashbrown::{HashMap, HashSet};
use petgraph::{graph::NodeIndex, visit::EdgeRef as _, Graph};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::grammar::{Grammar, Rule};
use crate::{StateId, SymbolId, START_STATE};

#[derive(Clone, Copy, Debug)]
pub struct Item<'g> {
    pub rule: &'g Rule,
    pub cursor: usize,
}

impl PartialEq for Item<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.rule.id == other.rule.id && self.cursor == other.cursor
    }
}

impl Eq for Item<'_> {}

impl Hash for Item<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.rule.id, self.cursor).hash(state);
    }
}

impl<'g> Item<'g> {
    /// Returns the symbol to the right of the dot.
    pub fn next_symbol(&self) -> Option<SymbolId> {
        self.rule.rhs.get(self.cursor).map(|s| s.symbol)
    }

    fn shift_symbol(&self) -> Option<(SymbolId, Item<'g>)> {
        self.next_symbol().map(|s| {
            (
                s,
                Item {
                    rule: self.rule,
                    cursor: self.cursor + 1,
                },
            )
        })
    }

    fn is_start(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.rule.rhs.len()
    }
}

impl fmt::Display for Item<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} →", self.rule.lhs)?;
        let (before, after) = self.rule.rhs.split_at(self.cursor);
        before.iter().try_for_each(|t| write!(fmt, " {}", t.symbol))?;
        write!(fmt, " •")?;
        after.iter().try_for_each(|t| write!(fmt, " {}", t.symbol))
    }
}

#[derive(Debug)]
pub struct ItemSet<'g>(Vec<Item<'g>>);

impl<'g> ItemSet<'g> {
    /// Returns the transitive closure of the specified item set.
    fn closure(mut self, g: &'g Grammar) -> Self {
        let mut set: HashSet<_> = self.0.iter().copied().collect();
        let mut i = 0;
        while let Some(&item) = self.0.get(i) {
            // If the cursor is just left of some nonterminal N
            match item.next_symbol() {
                Some(n) if g.is_nonterminal(n) => {
                    // Add initial items for all N-rules
                    for rule in g.rules_for(n) {
                        let new_item = Item { rule, cursor: 0 };
                        if set.insert(new_item) {
                            self.0.push(new_item);
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item<'g>> {
        self.0.iter()
    }
}

/// A state is uniquely identified by its "seed" items, i.e. the kernel.
///
/// This is because the transitive closure only adds start items,
/// while the item dots of all kernels other than the first are
/// advanced.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct Kernel<'g>(Vec<Item<'g>>);

impl<'g> Kernel<'g> {
    fn start(items: Vec<Item<'g>>) -> Self {
        debug_assert!(items.iter().all(Item::is_start));
        Self(items)
    }

    fn shifted(items: Vec<Item<'g>>) -> Self {
        debug_assert!(items.iter().all(|i| i.cursor > 0));
        Self(items)
    }
}

impl<'g> From<Kernel<'g>> for ItemSet<'g> {
    fn from(x: Kernel<'g>) -> Self {
        Self(x.0)
    }
}

#[derive(Debug)]
pub struct State<'g> {
    pub item_set: ItemSet<'g>,
}

pub struct Lr0Automaton<'g> {
    states: Graph<State<'g>, SymbolId>,
}

impl<'g> Lr0Automaton<'g> {
    /// Constructs the LR(0) automaton of `g` augmented with `S' → start $`.
    pub fn new(g: &'g Grammar) -> Self {
        let mut states = Graph::new();
        // The initial item set is the closure of `S' → • start $`.
        let kernel0 = Kernel::start(vec![Item {
            rule: g.root_rule(),
            cursor: 0,
        }]);
        let state0 = states.add_node(State {
            item_set: ItemSet::from(kernel0.clone()).closure(g),
        });
        debug_assert_eq!(state0.index(), START_STATE);
        let mut kernel_set: HashMap<Kernel, NodeIndex> = HashMap::new();
        kernel_set.insert(kernel0, state0);
        // Breadth-first, so that state numbering is a function of the grammar
        let mut queue = std::collections::VecDeque::from([state0]);
        while let Some(n) = queue.pop_front() {
            // All transitions on shifted symbols from this state, by symbol
            let mut goto_sets: BTreeMap<_, Vec<_>> = BTreeMap::new();
            for (symbol, item) in states[n].item_set.iter().filter_map(Item::shift_symbol) {
                goto_sets.entry(symbol).or_default().push(item);
            }

            for (x, goto_set) in goto_sets {
                // The goto sets remain ordered here, because transitive
                // closure and shifting preserve order. Therefore kernels
                // may be compared as lists instead of as sets.
                let m = *kernel_set
                    .entry(Kernel::shifted(goto_set))
                    .or_insert_with_key(|kernel| {
                        let new_state = states.add_node(State {
                            item_set: ItemSet::from(kernel.clone()).closure(g),
                        });
                        queue.push_back(new_state);
                        new_state
                    });

                // Add an edge X from current state to Goto(I, X) state
                states.add_edge(n, m, x);
            }
        }

        Self { states }
    }

    pub fn num_states(&self) -> usize {
        self.states.node_count()
    }

    pub fn state(&self, id: StateId) -> &State<'g> {
        &self.states[NodeIndex::new(id)]
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &State<'g>)> {
        self.states
            .node_indices()
            .map(move |n| (n.index(), &self.states[n]))
    }

    /// Outgoing transitions of `state` as `(symbol, target)`.
    pub fn transitions(&self, state: StateId) -> impl Iterator<Item = (SymbolId, StateId)> + '_ {
        self.states
            .edges(NodeIndex::new(state))
            .map(|e| (*e.weight(), e.target().index()))
    }

    pub fn goto(&self, state: StateId, symbol: SymbolId) -> Option<StateId> {
        self.transitions(state)
            .find(|&(s, _)| s == symbol)
            .map(|(_, target)| target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::EOF;

    #[test]
    fn test_display_item() {
        let mut b = GrammarBuilder::new();
        b.terminal("b").start("A").unwrap();
        b.rule("A", ["A", "b"]);
        let g = b.build().unwrap();
        let item = Item {
            rule: &g.rules()[0],
            cursor: 1,
        };
        assert_eq!(format!("{}", item), "3 → 3 • 4");
    }

    #[test]
    fn test_build_lr0_automaton() {
        let mut b = GrammarBuilder::new();
        b.terminal("a").start("S").unwrap();
        b.rule("S", ["a", "S"]);
        b.rule("S", ["a"]);
        let g = b.build().unwrap();
        let (s, a) = (g.lookup("S").unwrap(), g.lookup("a").unwrap());
        let lr0 = Lr0Automaton::new(&g);

        // 0: S' → •S $, S → •a S, S → •a
        assert_eq!(lr0.state(START_STATE).item_set.iter().count(), 3);
        let after_a = lr0.goto(START_STATE, a).unwrap();
        assert_eq!(lr0.goto(after_a, a), Some(after_a));
        let accept = lr0.goto(START_STATE, s).unwrap();
        assert!(lr0.goto(accept, EOF).is_some());
        assert!(lr0
            .state(lr0.goto(after_a, s).unwrap())
            .item_set
            .iter()
            .all(Item::is_complete));
        // 0, a, S, a S, S $
        assert_eq!(lr0.num_states(), 5);
    }
}
