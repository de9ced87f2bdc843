//! GLR action/goto table.
//!
//! Cells may hold a shift together with any number of reductions; the
//! parser explores all of them. The table is built sparse and then packed
//! into a double array: each state's row is placed at an offset in one
//! flat array such that its occupied columns do not collide with those of
//! previously placed rows, and every slot records the state and symbol that
//! own it.
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::fmt;

use crate::grammar::Grammar;
use crate::lr0::Lr0Automaton;
use crate::sets::FollowSets;
use crate::{RuleId, StateId, SymbolId, EOF, ROOT};

#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct Cell {
    pub shift: Option<StateId>,
    pub reduces: SmallVec<[RuleId; 2]>,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        self.shift.is_none() && self.reduces.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SparseTable {
    cells: HashMap<(StateId, SymbolId), Cell>,
}

impl SparseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills shifts and gotos from the automaton edges and, for every
    /// completed item `A → α •` with `A ≠ S'`, reductions on FOLLOW(A).
    pub fn from_automaton(g: &Grammar, lr0: &Lr0Automaton<'_>, follow: &FollowSets) -> Self {
        let mut table = Self::new();
        for (state, s) in lr0.states() {
            for (symbol, target) in lr0.transitions(state) {
                // Acceptance is signalled by reducing to the start symbol
                if symbol == EOF {
                    continue;
                }
                table.add_shift(state, symbol, target);
            }
            for item in s.item_set.iter().filter(|i| i.is_complete() && i.rule.lhs != ROOT) {
                for t in follow.get(item.rule.lhs) {
                    table.add_reduce(state, t, item.rule.id);
                }
            }
        }
        debug_assert!(table.cells.keys().all(|&(_, s)| (s as usize) < g.num_symbols()));
        table
    }

    pub fn add_shift(&mut self, state: StateId, symbol: SymbolId, goto: StateId) {
        self.cells.entry((state, symbol)).or_default().shift = Some(goto);
    }

    pub fn add_reduce(&mut self, state: StateId, symbol: SymbolId, rule: RuleId) {
        let reduces = &mut self.cells.entry((state, symbol)).or_default().reduces;
        if !reduces.contains(&rule) {
            reduces.push(rule);
        }
    }

    pub fn get(&self, state: StateId, symbol: SymbolId) -> Option<&Cell> {
        self.cells.get(&(state, symbol))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((StateId, SymbolId), &Cell)> {
        self.cells.iter().map(|(&k, v)| (k, v))
    }

    /// Packs the table into a double array.
    pub fn pack(&self) -> GlrTable {
        let num_states = self.cells.keys().map(|&(s, _)| s + 1).max().unwrap_or(0);
        let mut rows: Vec<Vec<(SymbolId, &Cell)>> = vec![Vec::new(); num_states];
        for (&(state, symbol), cell) in &self.cells {
            if !cell.is_empty() {
                rows[state].push((symbol, cell));
            }
        }
        rows.iter_mut().for_each(|row| row.sort_unstable_by_key(|&(s, _)| s));

        // Densest rows first
        let mut order: Vec<StateId> = (0..num_states).collect();
        order.sort_by(|&a, &b| rows[b].len().cmp(&rows[a].len()).then(a.cmp(&b)));

        let mut cells = vec![Cell::default()];
        let mut cell_ids: HashMap<&Cell, u32> = HashMap::new();
        let mut base = vec![0; num_states];
        let mut owner_state: Vec<StateId> = Vec::new();
        let mut owner_symbol: Vec<SymbolId> = Vec::new();
        let mut slots: Vec<u32> = Vec::new();
        for state in order {
            let row = &rows[state];
            if row.is_empty() {
                continue;
            }
            let fits = |b: usize| {
                row.iter().all(|&(symbol, _)| {
                    owner_state
                        .get(b + symbol as usize)
                        .map_or(true, |&owner| owner == NO_OWNER)
                })
            };
            let b = (0..).find(|&b| fits(b)).unwrap_or_default();
            base[state] = b;

            let end = b + row.last().map_or(0, |&(s, _)| s as usize) + 1;
            if end > slots.len() {
                owner_state.resize(end, NO_OWNER);
                owner_symbol.resize(end, 0);
                slots.resize(end, 0);
            }
            for &(symbol, cell) in row {
                let i = b + symbol as usize;
                owner_state[i] = state;
                owner_symbol[i] = symbol;
                slots[i] = *cell_ids.entry(cell).or_insert_with(|| {
                    cells.push(cell.clone());
                    cells.len() as u32 - 1
                });
            }
        }

        GlrTable {
            base,
            owner_state,
            owner_symbol,
            slots,
            cells,
        }
    }
}

const NO_OWNER: StateId = StateId::MAX;

/// Packed, immutable GLR table.
#[derive(Clone)]
pub struct GlrTable {
    base: Vec<usize>,
    owner_state: Vec<StateId>,
    owner_symbol: Vec<SymbolId>,
    /// Index into `cells` for each slot.
    slots: Vec<u32>,
    /// Distinct cells; index 0 is the empty cell.
    cells: Vec<Cell>,
}

impl GlrTable {
    /// Returns the cell at `(state, symbol)`, or the empty cell.
    pub fn get(&self, state: StateId, symbol: SymbolId) -> &Cell {
        let hit = self.base.get(state).and_then(|&b| {
            let i = b + symbol as usize;
            (self.owner_state.get(i) == Some(&state) && self.owner_symbol[i] == symbol)
                .then(|| self.slots[i])
        });
        &self.cells[hit.unwrap_or(0) as usize]
    }

    pub fn goto(&self, state: StateId, symbol: SymbolId) -> Option<StateId> {
        self.get(state, symbol).shift
    }

    pub fn num_states(&self) -> usize {
        self.base.len()
    }

    /// Length of the packed array.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of distinct cells, the empty one included.
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

impl fmt::Debug for GlrTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.owner_state.iter().filter(|&&o| o != NO_OWNER).count();
        f.debug_struct("GlrTable")
            .field("states", &self.num_states())
            .field("slots", &self.len())
            .field("used", &used)
            .field("cells", &self.num_cells())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::sets::FirstSets;
    use crate::START_STATE;
    use proptest::prelude::*;

    #[test]
    fn slr_reductions() {
        let mut b = GrammarBuilder::new();
        b.terminal("a").start("S").unwrap();
        b.rule("S", ["a", "S"]);
        b.rule("S", ["a"]);
        let g = b.build().unwrap();
        let a = g.lookup("a").unwrap();
        let lr0 = Lr0Automaton::new(&g);
        let first = FirstSets::compute(&g);
        let follow = FollowSets::compute(&g, &first);
        let table = SparseTable::from_automaton(&g, &lr0, &follow).pack();

        let after_a = table.goto(START_STATE, a).unwrap();
        assert_eq!(table.get(after_a, EOF).reduces.as_slice(), [1]);
        assert_eq!(table.get(after_a, a).shift, Some(after_a));
        assert!(table.get(after_a, a).reduces.is_empty());
        assert!(table.get(START_STATE, EOF).is_empty());
        assert!(table.get(1000, a).is_empty());
    }

    fn sparse_tables() -> impl Strategy<Value = Vec<(StateId, SymbolId, Option<StateId>, Vec<RuleId>)>> {
        prop::collection::vec(
            (
                0..24usize,
                0..40u32,
                prop::option::of(0..24usize),
                prop::collection::vec(0..8u32, 0..3),
            ),
            0..120,
        )
    }

    proptest! {
        #[test]
        fn packing_round_trip(entries in sparse_tables()) {
            let mut sparse = SparseTable::new();
            for (state, symbol, shift, reduces) in entries {
                if let Some(goto) = shift {
                    sparse.add_shift(state, symbol, goto);
                }
                for rule in reduces {
                    sparse.add_reduce(state, symbol, rule);
                }
            }
            let packed = sparse.pack();
            for state in 0..30 {
                for symbol in 0..45 {
                    match sparse.get(state, symbol) {
                        Some(cell) => {
                            prop_assert_eq!(packed.get(state, symbol), cell);
                        }
                        None => {
                            prop_assert!(packed.get(state, symbol).is_empty());
                        }
                    }
                }
            }
        }
    }
}
