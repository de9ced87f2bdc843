//! Cached predicate evaluation.
use super::{ContextKind, Predicate, PredicateNetwork};
use crate::action::{ActionHost, ParseContext};
use crate::error::ActionError;
use crate::span::SymbolSpan;
use crate::{PredicateId, SpanId};

const COMPUTED: u64 = 0b01;
const VALUE: u64 = 0b10;
const ENTRIES_PER_WORD: usize = (u64::BITS / 2) as usize;

/// Two bits per `(predicate, span)`: computed, and value.
///
/// Rows are per span and grow as spans are created; entries are never
/// invalidated since spans are immutable once committed.
#[derive(Clone, Debug, Default)]
pub struct PredicateCache {
    width: usize,
    bits: Vec<u64>,
}

impl PredicateCache {
    pub fn new(num_predicates: usize) -> Self {
        Self {
            width: num_predicates,
            bits: Vec::new(),
        }
    }

    fn position(&self, predicate: PredicateId, span: SpanId) -> (usize, u32) {
        let i = span as usize * self.width + predicate as usize;
        (i / ENTRIES_PER_WORD, (i % ENTRIES_PER_WORD) as u32 * 2)
    }

    pub fn get(&self, predicate: PredicateId, span: SpanId) -> Option<bool> {
        let (word, shift) = self.position(predicate, span);
        let entry = self.bits.get(word).map_or(0, |w| w >> shift);
        (entry & COMPUTED != 0).then(|| entry & VALUE != 0)
    }

    pub fn set(&mut self, predicate: PredicateId, span: SpanId, value: bool) {
        let (word, shift) = self.position(predicate, span);
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let entry = COMPUTED | if value { VALUE } else { 0 };
        self.bits[word] = self.bits[word] & !(0b11 << shift) | entry << shift;
    }

    /// Records `value` unless the entry is already known.
    fn imply(&mut self, predicate: PredicateId, span: SpanId, value: bool) -> bool {
        if self.get(predicate, span).is_some() {
            return false;
        }
        self.set(predicate, span, value);
        true
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

/// Evaluation counters, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Predicates actually evaluated.
    pub evaluated: u64,
    pub cache_hits: u64,
    /// Entries filled by implications or the automaton.
    pub implied: u64,
}

pub struct PredicateEvaluator<'g> {
    network: &'g PredicateNetwork,
    cache: PredicateCache,
    stats: EvalStats,
}

impl<'g> PredicateEvaluator<'g> {
    pub fn new(network: &'g PredicateNetwork) -> Self {
        Self {
            network,
            cache: PredicateCache::new(network.len()),
            stats: EvalStats::default(),
        }
    }

    pub fn cached(&self, predicate: PredicateId, span: SpanId) -> Option<bool> {
        self.cache.get(predicate, span)
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.stats = EvalStats::default();
    }

    /// Tests `predicate` on `span`, consulting and filling the cache.
    ///
    /// Only [`ActionError::Fatal`] from a predicate function is returned;
    /// a rejection counts as false.
    pub fn test(
        &mut self,
        predicate: PredicateId,
        span: &SymbolSpan,
        ctx: &ParseContext<'_>,
        host: &mut dyn ActionHost,
    ) -> Result<bool, ActionError> {
        if let Some(value) = self.cache.get(predicate, span.id) {
            self.stats.cache_hits += 1;
            return Ok(value);
        }

        let network = self.network;
        let implications = network.implications(predicate);
        if let Some(group) = implications.automaton {
            self.dispatch(group, span, ctx);
            if let Some(value) = self.cache.get(predicate, span.id) {
                return Ok(value);
            }
        }

        self.stats.evaluated += 1;
        let value = self.compute(predicate, span, ctx, host)?;
        self.cache.set(predicate, span.id, value);

        let entailed = if value {
            &implications.when_true
        } else {
            &implications.when_false
        };
        for &p in &entailed.also_true {
            self.stats.implied += self.cache.imply(p, span.id, true) as u64;
        }
        for &p in &entailed.also_false {
            self.stats.implied += self.cache.imply(p, span.id, false) as u64;
        }
        Ok(value)
    }

    /// Settles every member of an automaton group for `span` at once.
    fn dispatch(&mut self, group: u32, span: &SymbolSpan, ctx: &ParseContext<'_>) {
        let network = self.network;
        let value = network.group_accessor(group).read(span, ctx.document);
        let holding = network.walk(group, value.as_deref());
        self.stats.evaluated += 1;
        for &m in network.group_members(group) {
            let truth = holding.binary_search(&m).is_ok();
            self.stats.implied += self.cache.imply(m, span.id, truth) as u64;
        }
    }

    fn compute(
        &mut self,
        predicate: PredicateId,
        span: &SymbolSpan,
        ctx: &ParseContext<'_>,
        host: &mut dyn ActionHost,
    ) -> Result<bool, ActionError> {
        let network = self.network;
        let p = &network.predicates()[predicate];
        if let Some(value) = p.eval_local(span, ctx.document) {
            return Ok(value);
        }
        match p {
            Predicate::Not(inner) => Ok(!self.test(*inner, span, ctx, host)?),
            Predicate::And(xs) => {
                for &x in xs {
                    if !self.test(x, span, ctx, host)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(xs) => {
                for &x in xs {
                    if self.test(x, span, ctx, host)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Context { kind, inner } => {
                // Input is sorted by start; siblings of interest start no
                // earlier than the span, except for `Within`.
                let input = ctx.input;
                let spans = ctx.spans;
                let (from, to) = match kind {
                    ContextKind::Within => (0, input.partition_point(|&s| spans[s].start <= span.start)),
                    _ => {
                        let from = input.partition_point(|&s| spans[s].start < span.start);
                        let to = input.partition_point(|&s| spans[s].start <= span.end);
                        (from, to.max(from))
                    }
                };
                for &s in &input[from..to] {
                    let sibling = &spans[s];
                    if sibling.id != span.id && kind.admits(span, sibling) && self.test(*inner, sibling, ctx, host)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Custom(name) => match host.test(name, ctx, span) {
                Ok(value) => Ok(value),
                Err(ActionError::Rejected(reason)) => {
                    log::warn!("predicate function `{}` failed on span {}: {}", name, span.id, reason);
                    Ok(false)
                }
                Err(fatal) => Err(fatal),
            },
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionTable, DefaultActions};
    use crate::predicate::{Accessor, PredicateAlphabet};
    use crate::span::{Document, SpanStore};
    use std::sync::Arc;

    fn token(store: &mut SpanStore, ty: &str, start: usize, end: usize, string: &str) -> SpanId {
        let mut span = SymbolSpan::new(0, 3, Arc::from(ty), start, end);
        span.features.insert("string".into(), string.into());
        store.push(span)
    }

    #[test]
    fn cache_bits() {
        let mut cache = PredicateCache::new(3);
        assert_eq!(cache.get(2, 40), None);
        cache.set(2, 40, true);
        cache.set(1, 40, false);
        assert_eq!(cache.get(2, 40), Some(true));
        assert_eq!(cache.get(1, 40), Some(false));
        assert_eq!(cache.get(0, 40), None);
        cache.set(2, 40, false);
        assert_eq!(cache.get(2, 40), Some(false));
    }

    #[test]
    fn implications_fill_siblings() {
        let mut alphabet = PredicateAlphabet::new();
        let a = alphabet.intern(Predicate::eq(Accessor::feature("string"), "a"));
        let b = alphabet.intern(Predicate::eq(Accessor::feature("string"), "b"));
        let network = PredicateNetwork::compile(alphabet, usize::MAX);

        let doc = Document::new("a");
        let mut store = SpanStore::new();
        let s = token(&mut store, "Token", 0, 1, "a");
        let ctx = ParseContext {
            document: &doc,
            spans: &store,
            input: &[s],
        };
        let mut eval = PredicateEvaluator::new(&network);
        assert!(eval.test(a, &store[s], &ctx, &mut DefaultActions).unwrap());
        assert_eq!(eval.cached(b, s), Some(false));
        assert!(!eval.test(b, &store[s], &ctx, &mut DefaultActions).unwrap());
        assert_eq!(eval.stats().evaluated, 1);
        assert_eq!(eval.stats().cache_hits, 1);
    }

    #[test]
    fn automaton_settles_group() {
        let mut alphabet = PredicateAlphabet::new();
        let ids: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|v| alphabet.intern(Predicate::eq(Accessor::feature("string"), *v)))
            .collect();
        let network = PredicateNetwork::compile(alphabet, 2);

        let doc = Document::new("c");
        let mut store = SpanStore::new();
        let s = token(&mut store, "Token", 0, 1, "c");
        let ctx = ParseContext {
            document: &doc,
            spans: &store,
            input: &[s],
        };
        let mut eval = PredicateEvaluator::new(&network);
        assert!(!eval.test(ids[0], &store[s], &ctx, &mut DefaultActions).unwrap());
        for (&id, expected) in ids.iter().zip([false, false, true, false]) {
            assert_eq!(eval.cached(id, s), Some(expected));
        }
        assert_eq!(eval.stats().evaluated, 1);
    }

    #[test]
    fn context_predicates() {
        let mut alphabet = PredicateAlphabet::new();
        let is_title = alphabet.intern(Predicate::eq(Accessor::Type, "Title"));
        let starts = alphabet.intern(Predicate::Context {
            kind: ContextKind::StartsWith,
            inner: is_title,
        });
        let within = alphabet.intern(Predicate::Context {
            kind: ContextKind::Within,
            inner: is_title,
        });
        let network = PredicateNetwork::compile(alphabet, usize::MAX);

        let doc = Document::new("Dr Who is here");
        let mut store = SpanStore::new();
        let title = token(&mut store, "Title", 0, 2, "Dr");
        let name = token(&mut store, "Name", 0, 6, "Dr Who");
        let verb = token(&mut store, "Token", 7, 9, "is");
        let mut input = vec![title, name, verb];
        input.sort_by(|&x, &y| store[x].input_order(&store[y]));
        let ctx = ParseContext {
            document: &doc,
            spans: &store,
            input: &input,
        };
        let mut eval = PredicateEvaluator::new(&network);
        assert!(eval.test(starts, &store[name], &ctx, &mut DefaultActions).unwrap());
        assert!(!eval.test(starts, &store[verb], &ctx, &mut DefaultActions).unwrap());
        assert!(!eval.test(starts, &store[title], &ctx, &mut DefaultActions).unwrap());
        // the only enclosing sibling is a Name
        assert!(!eval.test(within, &store[title], &ctx, &mut DefaultActions).unwrap());
    }

    #[test]
    fn predicate_functions() {
        let mut alphabet = PredicateAlphabet::new();
        let capital = alphabet.intern(Predicate::Custom("capital".into()));
        let broken = alphabet.intern(Predicate::Custom("broken".into()));
        let missing = alphabet.intern(Predicate::Custom("missing".into()));
        let network = PredicateNetwork::compile(alphabet, usize::MAX);

        let doc = Document::new("Paris");
        let mut store = SpanStore::new();
        let s = token(&mut store, "Token", 0, 5, "Paris");
        let ctx = ParseContext {
            document: &doc,
            spans: &store,
            input: &[s],
        };
        let mut host = ActionTable::new();
        host.on_test("capital", |_, span| Ok(span.feature("string").and_then(|v| v.as_str()) == Some("Paris")))
            .on_test("broken", |_, _| Err(ActionError::Fatal("gazetteer unavailable".into())));

        let mut eval = PredicateEvaluator::new(&network);
        assert_eq!(eval.test(capital, &store[s], &ctx, &mut host), Ok(true));
        // Unknown functions reject, which reads as false
        assert_eq!(eval.test(missing, &store[s], &ctx, &mut host), Ok(false));
        assert_eq!(
            eval.test(broken, &store[s], &ctx, &mut host),
            Err(ActionError::Fatal("gazetteer unavailable".into()))
        );
        assert_eq!(eval.cached(broken, s), None);
    }
}
