//! The GLR driver.
//!
//! Input spans are grouped into words, maximal runs sharing a start
//! offset, followed by a virtual end-of-input word. Each word runs the
//! actor and reducer to a fixpoint, then the shifter moves every pending
//! shift to the first word starting at or after the shifted span's end.
use hashbrown::{HashMap, HashSet};
use smallvec::{smallvec, SmallVec};
use std::{iter, mem};

use crate::action::{ActionHost, ParseContext};
use crate::bit_set::BitSet;
use crate::compile::CompiledGrammar;
use crate::error::{ActionError, ParseError};
use crate::grammar::Synthesized;
use crate::gss::{Gss, ParsingChildrenSet, StateNodeId, SymbolNodeId};
use crate::predicate::eval::{EvalStats, PredicateEvaluator};
use crate::span::{Document, InputSpan, SpanStore, SymbolSpan};
use crate::{RuleId, SpanId, StateId, SymbolId, EOF, EPSILON, NO_SYMBOL, START_STATE};

#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Symbol nodes one word's reductions may create before the rest of
    /// that word's reductions are dropped.
    pub max_symbol_nodes_per_word: usize,
    /// Run the greedy filter after every word.
    pub greedy: bool,
    /// Only start fresh parses at words passing the prefix filter.
    pub use_prefix_filter: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_symbol_nodes_per_word: 4096,
            greedy: true,
            use_prefix_filter: true,
        }
    }
}

/// Reduction counters per rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReductionStats {
    pub attempts: Vec<u64>,
    pub successes: Vec<u64>,
}

impl ReductionStats {
    pub fn new(num_rules: usize) -> Self {
        Self {
            attempts: vec![0; num_rules],
            successes: vec![0; num_rules],
        }
    }

    pub fn total_attempts(&self) -> u64 {
        self.attempts.iter().sum()
    }

    pub fn total_successes(&self) -> u64 {
        self.successes.iter().sum()
    }

    fn merge(&mut self, other: &ReductionStats) {
        for (a, b) in self.attempts.iter_mut().zip(&other.attempts) {
            *a += b;
        }
        for (a, b) in self.successes.iter_mut().zip(&other.successes) {
            *a += b;
        }
    }
}

#[derive(Clone, Debug)]
struct Word {
    start: usize,
    /// Parseable input spans starting here.
    spans: Vec<SpanId>,
}

/// Pending reduction.
#[derive(Clone, Copy, Debug)]
struct Reduction {
    rule: RuleId,
    /// Symbol node matched by the last right-hand side symbol.
    anchor: SymbolNodeId,
    /// Only paths whose first step down from `anchor` is this node.
    via: Option<StateNodeId>,
}

/// Pending shift.
#[derive(Clone, Copy, Debug)]
struct Shift {
    /// GSS node to which the shift is to be applied.
    from: StateNodeId,
    span: SpanId,
    /// Label of the GSS node which must be created as the parent of `from`.
    goto: StateId,
}

type Memo = HashMap<SmallVec<[SpanId; 4]>, Option<SpanId>>;

pub struct Parser<'g> {
    grammar: &'g CompiledGrammar,
    config: ParserConfig,
    document: Document,
    spans: SpanStore,
    /// All input span ids in input order.
    input: Vec<SpanId>,
    words: Vec<Word>,
    viable: BitSet,
    gss: Gss,
    evaluator: PredicateEvaluator<'g>,
    synthesized: HashMap<(SpanId, SymbolId), Option<SpanId>>,
    /// Lookahead spans of the current word.
    candidates: Vec<SpanId>,
    active: Vec<StateNodeId>,
    /// The queue of reduction operations.
    reductions: Vec<Reduction>,
    /// The queue of shift operations.
    shifts: Vec<Shift>,
    performed: HashSet<(RuleId, SymbolNodeId, Option<StateNodeId>)>,
    /// Outcome of every reduction attempted per rule, keyed by the
    /// right-hand side spans.
    memo: Vec<Memo>,
    roots: Vec<SymbolNodeId>,
    position: usize,
    started: bool,
    capped: bool,
    current: ReductionStats,
    word_stats: Vec<ReductionStats>,
    totals: ReductionStats,
}

impl<'g> Parser<'g> {
    pub fn new(grammar: &'g CompiledGrammar, config: ParserConfig) -> Self {
        let num_rules = grammar.grammar().rules().len();
        Self {
            grammar,
            config,
            document: Document::default(),
            spans: SpanStore::new(),
            input: Vec::new(),
            words: Vec::new(),
            viable: BitSet::new(),
            gss: Gss::new(1, START_STATE),
            evaluator: PredicateEvaluator::new(grammar.network()),
            synthesized: HashMap::new(),
            candidates: Vec::new(),
            active: Vec::new(),
            reductions: Vec::new(),
            shifts: Vec::new(),
            performed: HashSet::new(),
            memo: vec![Memo::new(); num_rules],
            roots: Vec::new(),
            position: 0,
            started: false,
            capped: false,
            current: ReductionStats::new(num_rules),
            word_stats: Vec::new(),
            totals: ReductionStats::new(num_rules),
        }
    }

    /// Drops everything from the previous parse.
    pub fn clear(&mut self) {
        let num_rules = self.memo.len();
        self.document = Document::default();
        self.spans.clear();
        self.input.clear();
        self.words.clear();
        self.viable = BitSet::new();
        self.gss = Gss::new(1, START_STATE);
        self.evaluator.clear();
        self.synthesized.clear();
        self.candidates.clear();
        self.active.clear();
        self.reductions.clear();
        self.shifts.clear();
        self.performed.clear();
        self.memo.iter_mut().for_each(HashMap::clear);
        self.roots.clear();
        self.position = 0;
        self.started = false;
        self.capped = false;
        self.current = ReductionStats::new(num_rules);
        self.word_stats.clear();
        self.totals = ReductionStats::new(num_rules);
    }

    /// Loads a document and its input spans, ready for [`Parser::step`].
    ///
    /// Spans whose type is not a terminal of the grammar are kept, for
    /// context predicates, but never parsed.
    pub fn start(&mut self, document: Document, input: impl IntoIterator<Item = InputSpan>) {
        self.clear();
        self.document = document;
        let grammar = self.grammar;
        let g = grammar.grammar();
        for span in input {
            let symbol = g
                .lookup(&span.type_name)
                .filter(|&s| !g.is_nonterminal(s) && s != EOF && s != EPSILON)
                .unwrap_or(NO_SYMBOL);
            let type_name = if symbol == NO_SYMBOL {
                span.type_name.as_str().into()
            } else {
                grammar.type_name(symbol).clone()
            };
            let end = span.end.max(span.start);
            let mut s = SymbolSpan::new(self.spans.next_id(), symbol, type_name, span.start, end);
            s.features = span.features;
            let id = self.spans.push(s);
            self.input.push(id);
        }
        let spans = &self.spans;
        self.input
            .sort_by(|&a, &b| spans[a].input_order(&spans[b]).then(a.cmp(&b)));

        for &id in &self.input {
            let span = &self.spans[id];
            if span.is_ignored() {
                continue;
            }
            match self.words.last_mut() {
                Some(word) if word.start == span.start => word.spans.push(id),
                _ => self.words.push(Word {
                    start: span.start,
                    spans: vec![id],
                }),
            }
        }

        self.viable = if self.config.use_prefix_filter {
            let edges: Vec<Vec<(SymbolId, usize)>> = (0..self.words.len())
                .map(|i| {
                    let mut out = Vec::new();
                    for &id in &self.words[i].spans {
                        let span = &self.spans[id];
                        let next = self.next_word(i, span.end);
                        out.push((span.symbol, next));
                        // Optimistic: synthesized predicates are not tested here
                        for synth in self.grammar.synthesized_from(span.symbol) {
                            out.push((synth.symbol, next));
                        }
                    }
                    out
                })
                .collect();
            self.grammar.prefix().viable(&edges)
        } else {
            (0..self.words.len() as u32).collect()
        };

        self.gss = Gss::new(self.words.len() + 1, START_STATE);
        self.started = true;
        log::debug!(
            "{} input spans in {} words, {} viable",
            self.input.len(),
            self.words.len(),
            self.viable.len()
        );
    }

    /// Processes one word. Returns whether any words remain.
    pub fn step(&mut self, host: &mut dyn ActionHost) -> Result<bool, ParseError> {
        if !self.started {
            return Err(ParseError::NotStarted);
        }
        if self.is_finished() {
            return Ok(false);
        }
        self.process_word(self.position, host)?;
        self.position += 1;
        Ok(!self.is_finished())
    }

    /// Parses `input` to completion, returning the accepted symbol nodes.
    pub fn parse(
        &mut self,
        document: Document,
        input: impl IntoIterator<Item = InputSpan>,
        host: &mut dyn ActionHost,
    ) -> Result<&[SymbolNodeId], ParseError> {
        self.start(document, input);
        while self.step(host)? {}
        Ok(&self.roots)
    }

    /// Index of the next word to process; the end-of-input word is
    /// `num_words()`.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    pub fn is_finished(&self) -> bool {
        self.position > self.words.len()
    }

    /// Symbol nodes whose span is of the start symbol.
    pub fn roots(&self) -> &[SymbolNodeId] {
        &self.roots
    }

    pub fn gss(&self) -> &Gss {
        &self.gss
    }

    pub fn spans(&self) -> &SpanStore {
        &self.spans
    }

    pub fn spans_mut(&mut self) -> &mut SpanStore {
        &mut self.spans
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn span_of(&self, node: SymbolNodeId) -> &SymbolSpan {
        &self.spans[self.gss[node].span]
    }

    /// Alternative derivations of `node`; empty for input spans.
    pub fn forest_derivations(&self, node: SymbolNodeId) -> &[ParsingChildrenSet] {
        &self.gss[node].derivations
    }

    /// Counters of every processed word, in order.
    pub fn word_stats(&self) -> &[ReductionStats] {
        &self.word_stats
    }

    pub fn stats(&self) -> &ReductionStats {
        &self.totals
    }

    pub fn predicate_stats(&self) -> EvalStats {
        self.evaluator.stats()
    }

    /// First word after `word` starting at or after `end`.
    fn next_word(&self, word: usize, end: usize) -> usize {
        let rest = &self.words[word + 1..];
        word + 1 + rest.partition_point(|w| w.start < end)
    }

    fn process_word(&mut self, word: usize, host: &mut dyn ActionHost) -> Result<(), ParseError> {
        let at_end = word == self.words.len();
        self.capped = false;
        self.collect_candidates(word, host)?;

        self.active.clear();
        for i in 0..self.gss.layer(word).nodes.len() {
            let v = self.gss.layer(word).nodes[i];
            if !self.gss[v].removed {
                self.gss[v].active = true;
                self.active.push(v);
            }
        }
        if !at_end && self.viable.contains(word as u32) {
            let v = self.gss.start_node();
            self.gss[v].active = true;
            self.active.push(v);
        }
        log::debug!(
            "word {}: {} lookahead spans, {} active stacks",
            word,
            self.candidates.len(),
            self.active.len()
        );

        loop {
            if let Some(v) = self.active.pop() {
                self.actor(v);
            } else if let Some(reduction) = self.reductions.pop() {
                self.reducer(word, reduction, host)?;
            } else {
                break;
            }
        }

        self.shifter(word);
        if self.config.greedy {
            crate::greedy::apply(self.grammar, &mut self.gss, &self.spans, word, &mut self.roots);
        }
        self.performed.clear();

        let stats = mem::replace(&mut self.current, ReductionStats::new(self.memo.len()));
        self.totals.merge(&stats);
        self.word_stats.push(stats);
        Ok(())
    }

    /// Gathers the spans starting at `word`, synthesized terminals
    /// included.
    fn collect_candidates(&mut self, word: usize, host: &mut dyn ActionHost) -> Result<(), ParseError> {
        self.candidates.clear();
        if word == self.words.len() {
            return Ok(());
        }
        for i in 0..self.words[word].spans.len() {
            let base = self.words[word].spans[i];
            self.candidates.push(base);
            let grammar = self.grammar;
            for synth in grammar.synthesized_from(self.spans[base].symbol) {
                if let Some(id) = self.synthesize(base, synth, host)? {
                    self.candidates.push(id);
                }
            }
        }
        Ok(())
    }

    fn synthesize(
        &mut self,
        base: SpanId,
        synth: &Synthesized,
        host: &mut dyn ActionHost,
    ) -> Result<Option<SpanId>, ParseError> {
        if let Some(&known) = self.synthesized.get(&(base, synth.symbol)) {
            return Ok(known);
        }
        let ctx = ParseContext {
            document: &self.document,
            spans: &self.spans,
            input: &self.input,
        };
        let holds = self
            .evaluator
            .test(synth.predicate, &self.spans[base], &ctx, host)
            .map_err(|source| ParseError::Predicate { span: base, source })?;
        let result = if holds {
            let b = &self.spans[base];
            let mut span = SymbolSpan::new(
                self.spans.next_id(),
                synth.symbol,
                self.grammar.type_name(synth.symbol).clone(),
                b.start,
                b.end,
            );
            span.features = b.features.clone();
            span.head = base;
            span.weight = b.weight;
            Some(self.spans.push(span))
        } else {
            None
        };
        self.synthesized.insert((base, synth.symbol), result);
        Ok(result)
    }

    /// Distinct rules reduced from `state` under any lookahead of the
    /// current word.
    fn lookahead_rules(&self, state: StateId) -> SmallVec<[RuleId; 4]> {
        let table = self.grammar.table();
        let mut rules = SmallVec::new();
        let symbols = self
            .candidates
            .iter()
            .map(|&s| self.spans[s].symbol)
            .chain(iter::once(EOF));
        for symbol in symbols {
            for &rule in &table.get(state, symbol).reduces {
                if !rules.contains(&rule) {
                    rules.push(rule);
                }
            }
        }
        rules
    }

    fn queue_reduction(&mut self, rule: RuleId, anchor: SymbolNodeId, via: Option<StateNodeId>) {
        if self.performed.insert((rule, anchor, via)) {
            self.reductions.push(Reduction { rule, anchor, via });
        }
    }

    fn actor(&mut self, v: StateNodeId) {
        self.gss[v].active = false;
        let state = self.gss[v].state;
        let table = self.grammar.table();
        for &span in &self.candidates {
            if let Some(goto) = table.get(state, self.spans[span].symbol).shift {
                self.shifts.push(Shift { from: v, span, goto });
            }
        }
        for rule in self.lookahead_rules(state) {
            for i in 0..self.gss[v].children.len() {
                let anchor = self.gss[v].children[i];
                if !self.gss[anchor].removed {
                    self.queue_reduction(rule, anchor, None);
                }
            }
        }
    }

    fn reducer(&mut self, word: usize, reduction: Reduction, host: &mut dyn ActionHost) -> Result<(), ParseError> {
        if self.capped {
            return Ok(());
        }
        let Reduction { rule, anchor, via } = reduction;
        let length = self.grammar.rule(rule).len();

        let mut found: Vec<SmallVec<[SymbolNodeId; 4]>> = Vec::new();
        let mut paths = self.gss.paths(anchor, length, via);
        while let Some(path) = paths.next(&self.gss) {
            // Paths run right to left
            found.push(path.iter().rev().copied().collect());
        }

        for rhs in found {
            let first = rhs[0];
            let targets: SmallVec<[StateNodeId; 2]> = match via {
                Some(u) if length == 1 => smallvec![u],
                _ => self.gss[first].children.clone(),
            };
            if let Some(span) = self.reduce_one_path(rule, &rhs, host)? {
                for u in targets {
                    if !self.gss[u].removed {
                        self.attach(word, u, rule, span, &rhs);
                    }
                }
            }
            if self.capped {
                break;
            }
        }
        Ok(())
    }

    /// Tests predicates, consults the memo, and otherwise runs the action
    /// host to produce the span of one reduction.
    fn reduce_one_path(
        &mut self,
        rule: RuleId,
        rhs: &[SymbolNodeId],
        host: &mut dyn ActionHost,
    ) -> Result<Option<SpanId>, ParseError> {
        let grammar = self.grammar;
        let r = grammar.rule(rule);
        self.current.attempts[rule as usize] += 1;
        let ids: SmallVec<[SpanId; 4]> = rhs.iter().map(|&n| self.gss[n].span).collect();

        let ctx = ParseContext {
            document: &self.document,
            spans: &self.spans,
            input: &self.input,
        };
        for (rs, &id) in r.rhs.iter().zip(&ids) {
            if let Some(p) = rs.predicate {
                let holds = self
                    .evaluator
                    .test(p, &self.spans[id], &ctx, host)
                    .map_err(|source| ParseError::Predicate { span: id, source })?;
                if !holds {
                    return Ok(None);
                }
            }
        }

        if let Some(&known) = self.memo[rule as usize].get(&ids) {
            if known.is_some() {
                self.current.successes[rule as usize] += 1;
            }
            return Ok(known);
        }

        let (first, last) = match (ids.first(), ids.last()) {
            (Some(&first), Some(&last)) => (&self.spans[first], &self.spans[last]),
            _ => return Ok(None),
        };
        let mut target = SymbolSpan::new(
            self.spans.next_id(),
            r.lhs,
            grammar.type_name(r.lhs).clone(),
            first.start,
            last.end.max(first.start),
        );
        target.head = ids.get(r.root_index).copied().unwrap_or(first.id);
        target.weight = r.weight * ids.iter().map(|&s| self.spans[s].weight).product::<f64>();

        let outcome = {
            let children: SmallVec<[&SymbolSpan; 4]> = ids.iter().map(|&s| &self.spans[s]).collect();
            host.execute(&ctx, r, &mut target, &children)
        };
        let result = match outcome {
            Ok(true) => {
                let id = self.spans.push(target);
                log::trace!(
                    "reduced {} to span {} [{}, {})",
                    grammar.grammar().display_rule(rule),
                    id,
                    self.spans[id].start,
                    self.spans[id].end
                );
                self.current.successes[rule as usize] += 1;
                Some(id)
            }
            Ok(false) => None,
            Err(ActionError::Rejected(reason)) => {
                log::warn!(
                    "action of rule {} ({}) rejected: {}",
                    rule,
                    grammar.grammar().display_rule(rule),
                    reason
                );
                None
            }
            Err(source) => {
                return Err(ParseError::Action {
                    rule,
                    lhs: r.lhs,
                    source,
                })
            }
        };
        self.memo[rule as usize].insert(ids, result);
        Ok(result)
    }

    /// Pushes the reduced `span` onto the stack `u`.
    fn attach(&mut self, word: usize, u: StateNodeId, rule: RuleId, span: SpanId, rhs: &[SymbolNodeId]) {
        let grammar = self.grammar;
        let lhs = grammar.rule(rule).lhs;
        let goto = match grammar.table().goto(self.gss[u].state, lhs) {
            Some(goto) => goto,
            None => return,
        };

        // Local ambiguity packing
        if let Some(w) = self.gss.find_state(word, goto) {
            if let Some(z) = self.gss.find_equivalent(w, span, &self.spans) {
                self.gss.add_derivation(z, rule, rhs);
                if self.gss.link(z, u) {
                    // New stack below an existing node
                    for r in self.lookahead_rules(goto) {
                        self.queue_reduction(r, z, Some(u));
                    }
                }
                return;
            }
        }

        if self.gss.layer(word).reduced.len() >= self.config.max_symbol_nodes_per_word {
            if !self.capped {
                log::warn!(
                    "word {}: more than {} symbol nodes, dropping {} pending reductions",
                    word,
                    self.config.max_symbol_nodes_per_word,
                    self.reductions.len()
                );
                self.capped = true;
            }
            self.reductions.clear();
            return;
        }

        let (w, _) = self.gss.add_state(word, goto);
        let z = self.gss.add_symbol(w, span, lhs, u);
        self.gss.add_derivation(z, rule, rhs);
        self.gss.mark_reduced(z);
        if !self.gss[w].active {
            // Either new, or already acted on and missing this edge
            self.gss[w].active = true;
            self.active.push(w);
        }
        if lhs == grammar.start() {
            self.roots.push(z);
        }
    }

    fn shifter(&mut self, word: usize) {
        for Shift { from, span, goto } in mem::take(&mut self.shifts) {
            if self.gss[from].removed {
                continue;
            }
            let dest = self.next_word(word, self.spans[span].end);
            let (w, _) = self.gss.add_state(dest, goto);
            match self.gss.find_span(w, span) {
                Some(z) => {
                    self.gss.link(z, from);
                }
                None => {
                    let symbol = self.spans[span].symbol;
                    self.gss.add_symbol(w, span, symbol, from);
                }
            }
        }
    }
}

impl std::ops::Index<SymbolNodeId> for Parser<'_> {
    type Output = SymbolSpan;

    fn index(&self, node: SymbolNodeId) -> &SymbolSpan {
        self.span_of(node)
    }
}
