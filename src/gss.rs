//! Graph structured stack.
//!
//! An arena of state nodes and symbol nodes. Edges point leftwards: a
//! state node's children are the symbol nodes that were shifted or reduced
//! into it, and a symbol node's children are the state nodes below it. A
//! symbol node with several derivations is a locally packed ambiguity.
use hashbrown::HashMap;
use smallvec::{smallvec, SmallVec};
use std::ops;

use crate::span::SpanStore;
use crate::{RuleId, SpanId, StateId, SymbolId};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateNodeId(u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SymbolNodeId(u32);

impl StateNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl SymbolNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Word of the start node, which belongs to every layer.
pub const SHARED: usize = usize::MAX;

#[derive(Clone, Debug)]
pub struct StateNode {
    pub state: StateId,
    pub word: usize,
    pub children: SmallVec<[SymbolNodeId; 4]>,
    /// Waiting in the actor's queue.
    pub active: bool,
    pub removed: bool,
}

/// One derivation of a symbol node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsingChildrenSet {
    pub rule: RuleId,
    /// In right-hand side order.
    pub children: SmallVec<[SymbolNodeId; 4]>,
}

#[derive(Clone, Debug)]
pub struct SymbolNode {
    pub span: SpanId,
    pub symbol: SymbolId,
    pub word: usize,
    pub children: SmallVec<[StateNodeId; 2]>,
    /// Empty for shifted terminals.
    pub derivations: Vec<ParsingChildrenSet>,
    pub removed: bool,
}

impl SymbolNode {
    pub fn is_leaf(&self) -> bool {
        self.derivations.is_empty()
    }
}

/// State nodes created while processing one word.
#[derive(Clone, Debug, Default)]
pub struct Layer {
    by_state: HashMap<StateId, StateNodeId>,
    pub nodes: Vec<StateNodeId>,
    /// Symbol nodes created by reductions at this word.
    pub reduced: Vec<SymbolNodeId>,
}

impl Layer {
    pub fn find(&self, state: StateId) -> Option<StateNodeId> {
        self.by_state.get(&state).copied()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Gss {
    states: Vec<StateNode>,
    symbols: Vec<SymbolNode>,
    layers: Vec<Layer>,
}

impl ops::Index<StateNodeId> for Gss {
    type Output = StateNode;

    fn index(&self, id: StateNodeId) -> &StateNode {
        &self.states[id.index()]
    }
}

impl ops::IndexMut<StateNodeId> for Gss {
    fn index_mut(&mut self, id: StateNodeId) -> &mut StateNode {
        &mut self.states[id.index()]
    }
}

impl ops::Index<SymbolNodeId> for Gss {
    type Output = SymbolNode;

    fn index(&self, id: SymbolNodeId) -> &SymbolNode {
        &self.symbols[id.index()]
    }
}

impl ops::IndexMut<SymbolNodeId> for Gss {
    fn index_mut(&mut self, id: SymbolNodeId) -> &mut SymbolNode {
        &mut self.symbols[id.index()]
    }
}

impl Gss {
    /// Creates a stack holding only the shared start node.
    pub fn new(num_words: usize, start_state: StateId) -> Self {
        let mut gss = Self {
            states: Vec::new(),
            symbols: Vec::new(),
            layers: vec![Layer::default(); num_words],
        };
        gss.states.push(StateNode {
            state: start_state,
            word: SHARED,
            children: SmallVec::new(),
            active: false,
            removed: false,
        });
        gss
    }

    pub fn start_node(&self) -> StateNodeId {
        StateNodeId(0)
    }

    pub fn layer(&self, word: usize) -> &Layer {
        &self.layers[word]
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn num_state_nodes(&self) -> usize {
        self.states.len()
    }

    pub fn num_symbol_nodes(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol_nodes(&self) -> impl Iterator<Item = (SymbolNodeId, &SymbolNode)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, n)| (SymbolNodeId(i as u32), n))
    }

    pub fn find_state(&self, word: usize, state: StateId) -> Option<StateNodeId> {
        self.layers[word].find(state)
    }

    /// Returns the node for `state` at `word`, and whether it was created.
    ///
    /// A removed node is revived, since the caller is about to give it a
    /// live child.
    pub fn add_state(&mut self, word: usize, state: StateId) -> (StateNodeId, bool) {
        if let Some(id) = self.layers[word].find(state) {
            self[id].removed = false;
            return (id, false);
        }
        let id = StateNodeId(self.states.len() as u32);
        self.states.push(StateNode {
            state,
            word,
            children: SmallVec::new(),
            active: false,
            removed: false,
        });
        let layer = &mut self.layers[word];
        layer.by_state.insert(state, id);
        layer.nodes.push(id);
        (id, true)
    }

    /// Creates a symbol node for `span` under `parent`, above `child`.
    pub fn add_symbol(
        &mut self,
        parent: StateNodeId,
        span: SpanId,
        symbol: SymbolId,
        child: StateNodeId,
    ) -> SymbolNodeId {
        let id = SymbolNodeId(self.symbols.len() as u32);
        let word = self[parent].word;
        self.symbols.push(SymbolNode {
            span,
            symbol,
            word,
            children: smallvec![child],
            derivations: Vec::new(),
            removed: false,
        });
        self[parent].children.push(id);
        id
    }

    /// Records `id` as produced by a reduction at its word.
    pub fn mark_reduced(&mut self, id: SymbolNodeId) {
        let word = self[id].word;
        self.layers[word].reduced.push(id);
    }

    /// Adds `child` below `node`, returning whether it is new.
    pub fn link(&mut self, node: SymbolNodeId, child: StateNodeId) -> bool {
        let children = &mut self[node].children;
        if children.contains(&child) {
            return false;
        }
        children.push(child);
        true
    }

    /// Live child of `parent` labeled with exactly `span`.
    pub fn find_span(&self, parent: StateNodeId, span: SpanId) -> Option<SymbolNodeId> {
        self[parent]
            .children
            .iter()
            .copied()
            .find(|&n| !self[n].removed && self[n].span == span)
    }

    /// Live child of `parent` whose span is interchangeable with `span`.
    pub fn find_equivalent(&self, parent: StateNodeId, span: SpanId, spans: &SpanStore) -> Option<SymbolNodeId> {
        let span = &spans[span];
        self[parent]
            .children
            .iter()
            .copied()
            .find(|&n| !self[n].removed && spans[self[n].span].equivalent(span))
    }

    /// Adds a derivation unless an identical one is present.
    pub fn add_derivation(&mut self, node: SymbolNodeId, rule: RuleId, children: &[SymbolNodeId]) -> bool {
        let derivations = &mut self[node].derivations;
        if derivations
            .iter()
            .any(|d| d.rule == rule && d.children.as_slice() == children)
        {
            return false;
        }
        derivations.push(ParsingChildrenSet {
            rule,
            children: children.into(),
        });
        true
    }

    /// Enumerates the paths of `length` symbol nodes going down from
    /// `anchor`, the first hop restricted to `via` if given.
    pub fn paths(&self, anchor: SymbolNodeId, length: usize, via: Option<StateNodeId>) -> WalkPaths {
        WalkPaths {
            length,
            via,
            fresh: true,
            path: smallvec![anchor],
            cursors: smallvec![(0, 0)],
        }
    }

    /// Removes nodes left without support: state nodes at `from` or later
    /// whose children are all removed, and symbol nodes whose child states
    /// are all removed. Returns the number of nodes removed.
    pub fn sweep(&mut self, from: usize) -> usize {
        let mut removed = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for word in from..self.layers.len() {
                for i in 0..self.layers[word].nodes.len() {
                    let id = self.layers[word].nodes[i];
                    if self[id].removed || self[id].children.is_empty() {
                        continue;
                    }
                    if self[id].children.iter().all(|&c| self[c].removed) {
                        self[id].removed = true;
                        removed += 1;
                        changed = true;
                    }
                }
            }
            for i in 0..self.symbols.len() {
                let node = &self.symbols[i];
                if node.removed || node.word < from || node.word == SHARED {
                    continue;
                }
                if node.children.iter().all(|&c| self[c].removed) {
                    self.symbols[i].removed = true;
                    removed += 1;
                    changed = true;
                }
            }
        }
        removed
    }
}

/// Depth-first path enumeration with an explicit stack.
///
/// Since every symbol node has a single parent state node, a path is
/// fully described by its symbol nodes.
pub struct WalkPaths {
    length: usize,
    via: Option<StateNodeId>,
    fresh: bool,
    path: SmallVec<[SymbolNodeId; 4]>,
    /// Per path position: next child state, and next symbol node of it.
    cursors: SmallVec<[(usize, usize); 4]>,
}

impl WalkPaths {
    pub fn next(&mut self, gss: &Gss) -> Option<&[SymbolNodeId]> {
        if self.fresh {
            self.fresh = false;
            if self.path.len() == self.length {
                return Some(self.path.as_slice());
            }
        } else {
            // Resume below the path yielded last
            self.path.pop();
            self.cursors.pop();
        }
        while let Some(&node) = self.path.last() {
            let depth = self.path.len() - 1;
            let via = if depth == 0 { self.via } else { None };
            match next_child(gss, node, &mut self.cursors[depth], via) {
                Some(child) => {
                    self.path.push(child);
                    self.cursors.push((0, 0));
                    if self.path.len() == self.length {
                        return Some(self.path.as_slice());
                    }
                }
                None => {
                    self.path.pop();
                    self.cursors.pop();
                }
            }
        }
        None
    }
}

fn next_child(
    gss: &Gss,
    node: SymbolNodeId,
    cursor: &mut (usize, usize),
    via: Option<StateNodeId>,
) -> Option<SymbolNodeId> {
    let states = &gss[node].children;
    while let Some(&state) = states.get(cursor.0) {
        if via.map_or(true, |v| v == state) && !gss[state].removed {
            while let Some(&child) = gss[state].children.get(cursor.1) {
                cursor.1 += 1;
                if !gss[child].removed {
                    return Some(child);
                }
            }
        }
        cursor.0 += 1;
        cursor.1 = 0;
    }
    None
}
