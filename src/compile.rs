//! Grammar compilation: everything the parser needs, computed once.
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::bit_set::BitSet;
use crate::error::GrammarError;
use crate::grammar::{Grammar, Rule, Synthesized};
use crate::lr0::Lr0Automaton;
use crate::predicate::PredicateNetwork;
use crate::prefix::PrefixAutomaton;
use crate::sets::{FirstK, FirstSets, FollowSets};
use crate::table::{GlrTable, SparseTable};
use crate::{RuleId, SymbolId};

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Prefix length of the viability filter.
    pub first_k: usize,
    /// Minimum number of categorical predicates on one accessor for them
    /// to be dispatched through the automaton.
    pub automaton_threshold: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            first_k: 2,
            automaton_threshold: 3,
        }
    }
}

/// An immutable compiled grammar, shareable between parsers.
#[derive(Debug)]
pub struct CompiledGrammar {
    grammar: Grammar,
    first: FirstSets,
    follow: FollowSets,
    firstk: FirstK,
    num_lr0_states: usize,
    table: GlrTable,
    prefix: PrefixAutomaton,
    network: PredicateNetwork,
    /// Nonterminals having at least one greedy rule.
    greedy: BitSet,
    synthesized_by_base: HashMap<SymbolId, SmallVec<[Synthesized; 2]>>,
    names: Vec<Arc<str>>,
}

impl CompiledGrammar {
    pub fn compile(grammar: &Grammar, options: &CompileOptions) -> Result<Self, GrammarError> {
        if grammar.rules().is_empty() {
            return Err(GrammarError::NoProductions);
        }
        let grammar = grammar.clone();

        let first = FirstSets::compute(&grammar);
        let follow = FollowSets::compute(&grammar, &first);
        let firstk = FirstK::compute(&grammar, options.first_k);
        log::debug!("FIRST sets converged after {} passes", first.passes());

        let (num_lr0_states, table) = {
            let lr0 = Lr0Automaton::new(&grammar);
            let sparse = SparseTable::from_automaton(&grammar, &lr0, &follow);
            let table = sparse.pack();
            log::debug!(
                "GLR table: {} states, {} cells packed into {} slots ({} distinct)",
                lr0.num_states(),
                sparse.len(),
                table.len(),
                table.num_cells()
            );
            (lr0.num_states(), table)
        };

        let prefix = PrefixAutomaton::new(&firstk, grammar.start());
        log::debug!(
            "prefix automaton: {} states for k = {}",
            prefix.num_states(),
            firstk.k()
        );

        let network = PredicateNetwork::compile(grammar.predicates().clone(), options.automaton_threshold);

        let greedy = grammar
            .rules()
            .iter()
            .filter(|r| r.greedy)
            .map(|r| r.lhs)
            .collect();
        let mut synthesized_by_base: HashMap<SymbolId, SmallVec<[Synthesized; 2]>> = HashMap::new();
        for &s in grammar.synthesized() {
            synthesized_by_base.entry(s.base).or_default().push(s);
        }
        let names = grammar.symbols().map(|(_, s)| s.name.clone()).collect();

        Ok(Self {
            grammar,
            first,
            follow,
            firstk,
            num_lr0_states,
            table,
            prefix,
            network,
            greedy,
            synthesized_by_base,
            names,
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.grammar.rule(id)
    }

    pub fn start(&self) -> SymbolId {
        self.grammar.start()
    }

    pub fn first(&self) -> &FirstSets {
        &self.first
    }

    pub fn follow(&self) -> &FollowSets {
        &self.follow
    }

    pub fn first_k(&self) -> &FirstK {
        &self.firstk
    }

    pub fn num_states(&self) -> usize {
        self.num_lr0_states
    }

    pub fn table(&self) -> &GlrTable {
        &self.table
    }

    pub fn prefix(&self) -> &PrefixAutomaton {
        &self.prefix
    }

    pub fn network(&self) -> &PredicateNetwork {
        &self.network
    }

    pub fn is_greedy(&self, symbol: SymbolId) -> bool {
        self.greedy.contains(symbol)
    }

    pub fn greedy_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.greedy.iter()
    }

    pub fn is_output(&self, symbol: SymbolId) -> bool {
        self.grammar.is_output(symbol)
    }

    /// Synthesized terminals derived from spans of `base`.
    pub fn synthesized_from(&self, base: SymbolId) -> &[Synthesized] {
        self.synthesized_by_base
            .get(&base)
            .map_or(&[][..], |v| v.as_slice())
    }

    /// Shared name of `symbol`, for span type names.
    pub fn type_name(&self, symbol: SymbolId) -> &Arc<str> {
        &self.names[symbol as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::predicate::{Accessor, Predicate};
    use crate::START_STATE;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn compiles_and_is_shareable() {
        assert_send_sync::<CompiledGrammar>();

        let mut b = GrammarBuilder::new();
        b.terminal("Token").start("Np").unwrap();
        let cap = b.predicate(Predicate::eq(Accessor::feature("cap"), true));
        b.synthesize("Cap", "Token", cap);
        b.rule("Np", ["Cap", "Np"]).greedy(true);
        b.rule("Np", ["Cap"]).greedy(true);
        b.rule("Other", ["Token"]);
        let g = b.build().unwrap();
        let compiled = CompiledGrammar::compile(&g, &CompileOptions::default()).unwrap();

        let np = g.lookup("Np").unwrap();
        let token = g.lookup("Token").unwrap();
        assert!(compiled.is_greedy(np));
        assert!(!compiled.is_greedy(g.lookup("Other").unwrap()));
        assert_eq!(compiled.synthesized_from(token).len(), 1);
        assert!(compiled.synthesized_from(np).is_empty());
        assert_eq!(&**compiled.type_name(np), "Np");
        let cap_symbol = g.lookup("Cap").unwrap();
        assert!(compiled.table().goto(START_STATE, cap_symbol).is_some());
        assert!(compiled.table().goto(START_STATE, token).is_none());
    }
}
