//! Flattened BNF grammars over span types.
//!
//! Names that appear on the left-hand side of some rule are nonterminals;
//! every other name must be declared with [`GrammarBuilder::terminal`] (or
//! [`GrammarBuilder::synthesize`]) and denotes an input span type.
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bit_set::BitSet;
use crate::error::GrammarError;
use crate::predicate::{Predicate, PredicateAlphabet};
use crate::{PredicateId, RuleId, SymbolId, EOF, EPSILON, NO_SYMBOL, ROOT};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: Arc<str>,
    pub nonterminal: bool,
}

/// One right-hand side position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RhsSymbol {
    pub symbol: SymbolId,
    /// Must hold on the span matched here for the rule to reduce.
    pub predicate: Option<PredicateId>,
    /// Binding name used by actions.
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub id: RuleId,
    pub lhs: SymbolId,
    pub rhs: Vec<RhsSymbol>,
    /// Child whose features and head the produced span inherits.
    pub root_index: usize,
    pub weight: f64,
    pub greedy: bool,
}

impl Rule {
    pub fn len(&self) -> usize {
        self.rhs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rhs.is_empty()
    }

    /// Number of alternating symbol and state nodes spanned in the GSS by
    /// one reduction of this rule, counting both end states.
    pub fn reduction_path_size(&self) -> usize {
        2 * self.rhs.len() + 1
    }

    pub fn symbols(&self) -> impl DoubleEndedIterator<Item = SymbolId> + ExactSizeIterator + '_ {
        self.rhs.iter().map(|s| s.symbol)
    }

    /// Whether this is the rule standing for an empty right-hand side.
    pub fn is_epsilon(&self) -> bool {
        matches!(&*self.rhs, [RhsSymbol { symbol: EPSILON, .. }])
    }
}

/// A terminal produced from spans of `base` type on which `predicate`
/// holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Synthesized {
    pub symbol: SymbolId,
    pub base: SymbolId,
    pub predicate: PredicateId,
}

#[derive(Clone, Debug)]
pub struct Grammar {
    symbols: Vec<SymbolInfo>,
    names: HashMap<Arc<str>, SymbolId>,
    rules: Vec<Rule>,
    /// `S' → start $`, numbered after the user rules.
    root_rule: Rule,
    by_lhs: Vec<Vec<RuleId>>,
    start: SymbolId,
    predicates: PredicateAlphabet,
    synthesized: Vec<Synthesized>,
    outputs: BitSet,
}

impl Grammar {
    pub fn builder() -> GrammarBuilder {
        GrammarBuilder::new()
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol(&self, id: SymbolId) -> &SymbolInfo {
        &self.symbols[id as usize]
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.symbols[id as usize].name
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.names.get(name).copied()
    }

    pub fn is_nonterminal(&self, id: SymbolId) -> bool {
        self.symbols
            .get(id as usize)
            .map_or(false, |s| s.nonterminal)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &SymbolInfo)> {
        self.symbols.iter().enumerate().map(|(i, s)| (i as SymbolId, s))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        if id as usize == self.rules.len() {
            &self.root_rule
        } else {
            &self.rules[id as usize]
        }
    }

    pub fn root_rule(&self) -> &Rule {
        &self.root_rule
    }

    /// User rules followed by the augmented root rule.
    pub fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().chain(std::iter::once(&self.root_rule))
    }

    /// Rules with `lhs` on the left-hand side.
    pub fn rules_for(&self, lhs: SymbolId) -> impl Iterator<Item = &Rule> {
        self.by_lhs[lhs as usize].iter().map(move |&r| self.rule(r))
    }

    pub fn start(&self) -> SymbolId {
        self.start
    }

    pub fn predicates(&self) -> &PredicateAlphabet {
        &self.predicates
    }

    pub fn synthesized(&self) -> &[Synthesized] {
        &self.synthesized
    }

    /// Whether spans of this symbol are meant to become output annotations.
    pub fn is_output(&self, id: SymbolId) -> bool {
        self.outputs.contains(id)
    }

    pub fn display_rule(&self, id: RuleId) -> impl fmt::Display + '_ {
        DisplayRule {
            grammar: self,
            rule: self.rule(id),
        }
    }
}

struct DisplayRule<'a> {
    grammar: &'a Grammar,
    rule: &'a Rule,
}

impl fmt::Display for DisplayRule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} →", self.grammar.name(self.rule.lhs))?;
        self.rule
            .symbols()
            .try_for_each(|s| write!(f, " {}", self.grammar.name(s)))
    }
}

/// A right-hand side element as written by the grammar author.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    name: String,
    predicate: Option<PredicateId>,
    label: Option<String>,
}

/// Shorthand for a bare right-hand side element.
pub fn sym(name: impl Into<String>) -> Element {
    Element {
        name: name.into(),
        predicate: None,
        label: None,
    }
}

impl Element {
    pub fn when(mut self, predicate: PredicateId) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<&str> for Element {
    fn from(name: &str) -> Self {
        sym(name)
    }
}

#[derive(Clone, Debug)]
struct RawRule {
    lhs: String,
    rhs: Vec<Element>,
    root: usize,
    weight: Option<f64>,
    greedy: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct GrammarBuilder {
    terminals: Vec<String>,
    rules: Vec<RawRule>,
    predicates: PredicateAlphabet,
    start: Option<String>,
    default_greedy: Option<bool>,
    default_weight: Option<f64>,
    synthesized: Vec<(String, String, PredicateId)>,
    outputs: Vec<String>,
}

/// Handle to a rule just added, for setting its attributes.
pub struct RuleRef<'b> {
    builder: &'b mut GrammarBuilder,
    index: usize,
}

impl RuleRef<'_> {
    pub fn id(&self) -> RuleId {
        self.index as RuleId
    }

    pub fn weight(self, weight: f64) -> Self {
        self.builder.rules[self.index].weight = Some(weight);
        self
    }

    pub fn greedy(self, greedy: bool) -> Self {
        self.builder.rules[self.index].greedy = Some(greedy);
        self
    }

    /// Sets the child whose features the produced span inherits.
    pub fn root(self, index: usize) -> Self {
        self.builder.rules[self.index].root = index;
        self
    }
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an input span type.
    pub fn terminal(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.terminals.contains(&name) {
            self.terminals.push(name);
        }
        self
    }

    pub fn predicate(&mut self, predicate: Predicate) -> PredicateId {
        self.predicates.intern(predicate)
    }

    /// Adds `lhs → rhs`. An empty `rhs` stands for `lhs → ε`.
    pub fn rule<I>(&mut self, lhs: impl Into<String>, rhs: I) -> RuleRef<'_>
    where
        I: IntoIterator,
        I::Item: Into<Element>,
    {
        self.rules.push(RawRule {
            lhs: lhs.into(),
            rhs: rhs.into_iter().map(Into::into).collect(),
            root: 0,
            weight: None,
            greedy: None,
        });
        RuleRef {
            index: self.rules.len() - 1,
            builder: self,
        }
    }

    pub fn start(&mut self, name: impl Into<String>) -> Result<&mut Self, GrammarError> {
        set_once(&mut self.start, name.into(), "start")?;
        Ok(self)
    }

    pub fn default_greedy(&mut self, greedy: bool) -> Result<&mut Self, GrammarError> {
        set_once(&mut self.default_greedy, greedy, "default_greedy")?;
        Ok(self)
    }

    pub fn default_weight(&mut self, weight: f64) -> Result<&mut Self, GrammarError> {
        set_once(&mut self.default_weight, weight, "default_weight")?;
        Ok(self)
    }

    /// Declares terminal `name`, present wherever a `base` span satisfies
    /// `predicate`.
    pub fn synthesize(
        &mut self,
        name: impl Into<String>,
        base: impl Into<String>,
        predicate: PredicateId,
    ) -> &mut Self {
        self.synthesized.push((name.into(), base.into(), predicate));
        self
    }

    pub fn mark_output(&mut self, name: impl Into<String>) -> &mut Self {
        self.outputs.push(name.into());
        self
    }

    pub fn build(self) -> Result<Grammar, GrammarError> {
        if self.rules.is_empty() {
            return Err(GrammarError::NoProductions);
        }
        let start_name = self.start.ok_or(GrammarError::MissingStart)?;

        let mut symbols = Vec::new();
        let mut names = HashMap::new();
        let mut add = |name: &str, nonterminal: bool| -> Result<SymbolId, GrammarError> {
            if let Some(&id) = names.get(name) {
                let info: &SymbolInfo = &symbols[id as usize];
                return if info.nonterminal == nonterminal && id > ROOT {
                    Ok(id)
                } else {
                    Err(GrammarError::ConflictingSymbol(name.to_owned()))
                };
            }
            if symbols.len() >= NO_SYMBOL as usize {
                return Err(GrammarError::TooManySymbols(symbols.len()));
            }
            let id = symbols.len() as SymbolId;
            let name: Arc<str> = Arc::from(name);
            symbols.push(SymbolInfo {
                name: name.clone(),
                nonterminal,
            });
            names.insert(name, id);
            Ok(id)
        };
        for (name, nonterminal) in [("$", false), ("ε", false), ("S'", true)] {
            add(name, nonterminal)?;
        }

        for raw in &self.rules {
            if self.terminals.contains(&raw.lhs) || self.synthesized.iter().any(|(n, ..)| *n == raw.lhs) {
                return Err(GrammarError::TerminalLhs(raw.lhs.clone()));
            }
            add(raw.lhs.as_str(), true)?;
        }
        for name in &self.terminals {
            add(name.as_str(), false)?;
        }
        let mut synthesized = Vec::with_capacity(self.synthesized.len());
        for (name, base, predicate) in &self.synthesized {
            if name == base || !self.terminals.contains(base) {
                return Err(GrammarError::InvalidSynthesized(name.clone()));
            }
            if *predicate as usize >= self.predicates.len() {
                return Err(GrammarError::UndefinedPredicate(*predicate));
            }
            let base = add(base.as_str(), false)?;
            let symbol = add(name.as_str(), false)?;
            synthesized.push(Synthesized {
                symbol,
                base,
                predicate: *predicate,
            });
        }
        drop(add);

        for (id, _) in self.predicates.iter() {
            if let Some(&bad) = self
                .predicates
                .operands(id)
                .iter()
                .find(|&&p| p as usize >= self.predicates.len())
            {
                return Err(GrammarError::UndefinedPredicate(bad));
            }
        }

        let default_weight = self.default_weight.unwrap_or(1.0);
        let default_greedy = self.default_greedy.unwrap_or(false);
        let mut rules = Vec::with_capacity(self.rules.len());
        let mut by_lhs = vec![Vec::new(); symbols.len()];
        for (i, raw) in self.rules.into_iter().enumerate() {
            let id = i as RuleId;
            if raw.root >= raw.rhs.len().max(1) {
                return Err(GrammarError::RootIndexOutOfRange {
                    rule: id,
                    index: raw.root,
                    len: raw.rhs.len(),
                });
            }
            let mut rhs = Vec::with_capacity(raw.rhs.len().max(1));
            for element in raw.rhs {
                let symbol = *names
                    .get(element.name.as_str())
                    .ok_or_else(|| GrammarError::UndefinedSymbol(element.name.clone()))?;
                if let Some(p) = element.predicate {
                    if p as usize >= self.predicates.len() {
                        return Err(GrammarError::UndefinedPredicate(p));
                    }
                }
                rhs.push(RhsSymbol {
                    symbol,
                    predicate: element.predicate,
                    label: element.label,
                });
            }
            if rhs.is_empty() {
                rhs.push(RhsSymbol {
                    symbol: EPSILON,
                    predicate: None,
                    label: None,
                });
            }
            let lhs = names[raw.lhs.as_str()];
            by_lhs[lhs as usize].push(id);
            rules.push(Rule {
                id,
                lhs,
                rhs,
                root_index: raw.root,
                weight: raw.weight.unwrap_or(default_weight),
                greedy: raw.greedy.unwrap_or(default_greedy),
            });
        }

        let start = *names
            .get(start_name.as_str())
            .ok_or_else(|| GrammarError::UndefinedSymbol(start_name.clone()))?;
        if !symbols[start as usize].nonterminal || start <= ROOT {
            return Err(GrammarError::StartNotNonterminal(start_name));
        }

        let mut outputs = BitSet::with_len(symbols.len());
        for name in &self.outputs {
            let id = *names
                .get(name.as_str())
                .ok_or_else(|| GrammarError::UndefinedSymbol(name.clone()))?;
            outputs.insert(id);
        }

        let root_rule = Rule {
            id: rules.len() as RuleId,
            lhs: ROOT,
            rhs: [start, EOF]
                .into_iter()
                .map(|symbol| RhsSymbol {
                    symbol,
                    predicate: None,
                    label: None,
                })
                .collect(),
            root_index: 0,
            weight: 1.0,
            greedy: false,
        };
        by_lhs[ROOT as usize].push(root_rule.id);

        log::debug!(
            "grammar: {} symbols, {} rules, {} predicates, start `{}`",
            symbols.len(),
            rules.len(),
            self.predicates.len(),
            start_name
        );

        Ok(Grammar {
            symbols,
            names,
            rules,
            root_rule,
            by_lhs,
            start,
            predicates: self.predicates,
            synthesized,
            outputs,
        })
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, option: &'static str) -> Result<(), GrammarError> {
    if slot.is_some() {
        return Err(GrammarError::DuplicateOption(option));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Accessor;

    #[test]
    fn builds_symbols_and_rules() {
        let mut b = GrammarBuilder::new();
        b.terminal("Token");
        let hello = b.predicate(Predicate::eq(Accessor::feature("string"), "hello"));
        b.start("Greeting").unwrap();
        let r = b
            .rule("Greeting", [sym("Token").when(hello).label("first"), sym("Token")])
            .root(1)
            .weight(0.5)
            .id();
        b.rule("Empty", Vec::<&str>::new());
        b.mark_output("Greeting");
        let g = b.build().unwrap();

        let greeting = g.lookup("Greeting").unwrap();
        let token = g.lookup("Token").unwrap();
        assert!(g.is_nonterminal(greeting));
        assert!(!g.is_nonterminal(token));
        assert_eq!(g.start(), greeting);
        assert!(g.is_output(greeting));
        assert!(!g.is_output(token));

        let rule = g.rule(r);
        assert_eq!(rule.reduction_path_size(), 5);
        assert_eq!(rule.root_index, 1);
        assert_eq!(rule.weight, 0.5);
        assert_eq!(rule.rhs[0].predicate, Some(hello));
        assert_eq!(rule.rhs[0].label.as_deref(), Some("first"));
        assert_eq!(g.display_rule(r).to_string(), "Greeting → Token Token");

        let empty = g.rules_for(g.lookup("Empty").unwrap()).next().unwrap();
        assert!(empty.is_epsilon());
        assert_eq!(g.display_rule(g.root_rule().id).to_string(), "S' → Greeting $");
    }

    #[test]
    fn rejects_bad_grammars() {
        assert_eq!(GrammarBuilder::new().build().unwrap_err(), GrammarError::NoProductions);

        let mut b = GrammarBuilder::new();
        b.rule("S", ["a"]);
        assert_eq!(b.build().unwrap_err(), GrammarError::MissingStart);

        let mut b = GrammarBuilder::new();
        b.start("S").unwrap();
        assert_eq!(
            b.start("T").unwrap_err(),
            GrammarError::DuplicateOption("start")
        );
        b.rule("S", ["a"]);
        assert_eq!(b.build().unwrap_err(), GrammarError::UndefinedSymbol("a".into()));

        let mut b = GrammarBuilder::new();
        b.terminal("a").start("a").unwrap();
        b.rule("S", ["a"]);
        assert_eq!(b.build().unwrap_err(), GrammarError::StartNotNonterminal("a".into()));

        let mut b = GrammarBuilder::new();
        b.terminal("a").start("S").unwrap();
        b.rule("a", ["a"]);
        assert_eq!(b.build().unwrap_err(), GrammarError::TerminalLhs("a".into()));

        let mut b = GrammarBuilder::new();
        b.terminal("a").start("S").unwrap();
        b.rule("S", ["a"]).root(1);
        assert!(matches!(
            b.build().unwrap_err(),
            GrammarError::RootIndexOutOfRange { index: 1, len: 1, .. }
        ));

        let mut b = GrammarBuilder::new();
        b.terminal("a").start("S").unwrap();
        b.rule("S", [sym("a").when(7)]);
        assert_eq!(b.build().unwrap_err(), GrammarError::UndefinedPredicate(7));
    }

    #[test]
    fn synthesized_terminals() {
        let mut b = GrammarBuilder::new();
        b.terminal("Token").start("S").unwrap();
        let p = b.predicate(Predicate::eq(Accessor::Text, "hi"));
        b.synthesize("Hi", "Token", p);
        b.rule("S", ["Hi"]);
        let g = b.build().unwrap();
        let hi = g.lookup("Hi").unwrap();
        assert_eq!(
            g.synthesized(),
            [Synthesized {
                symbol: hi,
                base: g.lookup("Token").unwrap(),
                predicate: p,
            }]
        );

        let mut b = GrammarBuilder::new();
        b.terminal("Token").start("S").unwrap();
        b.synthesize("Hi", "Missing", p);
        b.rule("S", ["Hi"]);
        assert_eq!(b.build().unwrap_err(), GrammarError::InvalidSynthesized("Hi".into()));
    }
}
