//! Boolean predicates over spans.
//!
//! Predicates are interned into a [`PredicateAlphabet`]; composite
//! predicates refer to their operands by id, so that shared
//! sub-expressions are evaluated and cached once per span.
use hashbrown::HashSet;
use regex::Regex;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::{fmt, ops};

use crate::alphabet::Alphabet;
use crate::span::{Document, SymbolSpan, Value};
use crate::PredicateId;

pub mod eval;
pub mod network;

pub use eval::{PredicateCache, PredicateEvaluator};
pub use network::{CategoricalAutomaton, Implications, PredicateNetwork};

/// What part of a span a predicate looks at.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Accessor {
    Feature(String),
    /// The document text covered by the span.
    Text,
    /// The span's type name.
    Type,
    Start,
    End,
    Length,
}

impl Accessor {
    pub fn feature(name: impl Into<String>) -> Self {
        Accessor::Feature(name.into())
    }

    pub fn read<'a>(&self, span: &'a SymbolSpan, document: &'a Document) -> Option<Cow<'a, Value>> {
        match self {
            Accessor::Feature(name) => span.feature(name).map(Cow::Borrowed),
            Accessor::Text => document
                .covered(span)
                .map(|s| Cow::Owned(Value::Str(s.to_owned()))),
            Accessor::Type => Some(Cow::Owned(Value::Str(span.type_name.to_string()))),
            Accessor::Start => Some(Cow::Owned(Value::Int(span.start as i64))),
            Accessor::End => Some(Cow::Owned(Value::Int(span.end as i64))),
            Accessor::Length => Some(Cow::Owned(Value::Int(span.len() as i64))),
        }
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Feature(name) => write!(f, "{}", name),
            Accessor::Text => write!(f, "@text"),
            Accessor::Type => write!(f, "@type"),
            Accessor::Start => write!(f, "@start"),
            Accessor::End => write!(f, "@end"),
            Accessor::Length => write!(f, "@length"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(self, actual: Option<&Value>, expected: &Value) -> bool {
        match self {
            CompareOp::Eq => actual == Some(expected),
            CompareOp::Ne => actual != Some(expected),
            op => actual
                .and_then(|a| a.compare(expected))
                .map_or(false, |ord| match op {
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Le => ord.is_le(),
                    CompareOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }),
        }
    }
}

/// A compiled regular expression compared by its source text.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    find: Regex,
    full: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_owned(),
            find: Regex::new(source)?,
            full: Regex::new(&format!("^(?:{})$", source))?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RegexMode {
    /// The whole value must match.
    Match,
    /// Some substring must match.
    Find,
}

/// Where a sibling span must lie relative to the tested span.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ContextKind {
    /// Sibling starts where the span starts and ends within it.
    StartsWith,
    /// Sibling ends where the span ends and starts within it.
    EndsWith,
    /// Sibling covers exactly the same offsets.
    Coextensive,
    /// Sibling lies within the span.
    Contains,
    /// Sibling encloses the span.
    Within,
}

impl ContextKind {
    pub fn admits(self, span: &SymbolSpan, sibling: &SymbolSpan) -> bool {
        match self {
            ContextKind::StartsWith => sibling.start == span.start && sibling.end <= span.end,
            ContextKind::EndsWith => sibling.end == span.end && sibling.start >= span.start,
            ContextKind::Coextensive => sibling.start == span.start && sibling.end == span.end,
            ContextKind::Contains => sibling.start >= span.start && sibling.end <= span.end,
            ContextKind::Within => sibling.start <= span.start && sibling.end >= span.end,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Predicate {
    Compare {
        accessor: Accessor,
        op: CompareOp,
        value: Value,
    },
    /// Case-insensitive string equality; `value` is stored lowercased.
    EqualIgnoreCase { accessor: Accessor, value: String },
    Regex {
        accessor: Accessor,
        pattern: Pattern,
        mode: RegexMode,
    },
    OneOf { accessor: Accessor, values: Vec<Value> },
    /// Some input span placed as `kind` describes satisfies `inner`.
    Context { kind: ContextKind, inner: PredicateId },
    /// Deferred to the action host by name.
    Custom(String),
    Not(PredicateId),
    And(SmallVec<[PredicateId; 4]>),
    Or(SmallVec<[PredicateId; 4]>),
}

impl Predicate {
    pub fn eq(accessor: Accessor, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            accessor,
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(accessor: Accessor, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            accessor,
            op: CompareOp::Ne,
            value: value.into(),
        }
    }

    pub fn compare(accessor: Accessor, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            accessor,
            op,
            value: value.into(),
        }
    }

    pub fn equal_ignore_case(accessor: Accessor, value: &str) -> Self {
        Predicate::EqualIgnoreCase {
            accessor,
            value: value.to_lowercase(),
        }
    }

    pub fn regex(accessor: Accessor, source: &str, mode: RegexMode) -> Result<Self, regex::Error> {
        Ok(Predicate::Regex {
            accessor,
            pattern: Pattern::new(source)?,
            mode,
        })
    }

    pub fn one_of<V: Into<Value>>(accessor: Accessor, values: impl IntoIterator<Item = V>) -> Self {
        let mut seen = HashSet::new();
        let values: Vec<Value> = values
            .into_iter()
            .map(Into::into)
            .filter(|v: &Value| seen.insert(v.clone()))
            .collect();
        Predicate::OneOf { accessor, values }
    }

    /// Accessor of predicates whose truth depends on a single value
    /// equality, i.e. those that take part in implication and automaton
    /// dispatch.
    pub fn categorical_accessor(&self) -> Option<&Accessor> {
        match self {
            Predicate::Compare {
                accessor,
                op: CompareOp::Eq | CompareOp::Ne,
                ..
            }
            | Predicate::OneOf { accessor, .. } => Some(accessor),
            _ => None,
        }
    }

    /// Truth of a categorical predicate given the accessor's value.
    ///
    /// Returns `None` for predicates that are not categorical.
    pub fn categorical_truth(&self, value: Option<&Value>) -> Option<bool> {
        match self {
            Predicate::Compare {
                op: op @ (CompareOp::Eq | CompareOp::Ne),
                value: expected,
                ..
            } => Some(op.holds(value, expected)),
            Predicate::OneOf { values, .. } => Some(value.map_or(false, |v| values.contains(v))),
            _ => None,
        }
    }

    /// Evaluates predicates that only inspect the span itself.
    ///
    /// Returns `None` for predicates that need other predicates, sibling
    /// spans or the action host.
    pub fn eval_local(&self, span: &SymbolSpan, document: &Document) -> Option<bool> {
        Some(match self {
            Predicate::Compare {
                accessor,
                op,
                value,
            } => op.holds(accessor.read(span, document).as_deref(), value),
            Predicate::EqualIgnoreCase { accessor, value } => accessor
                .read(span, document)
                .as_deref()
                .and_then(Value::as_str)
                .map_or(false, |s| s.to_lowercase() == *value),
            Predicate::Regex {
                accessor,
                pattern,
                mode,
            } => accessor
                .read(span, document)
                .as_deref()
                .and_then(Value::as_str)
                .map_or(false, |s| match mode {
                    RegexMode::Match => pattern.full.is_match(s),
                    RegexMode::Find => pattern.find.is_match(s),
                }),
            Predicate::OneOf { accessor, values } => accessor
                .read(span, document)
                .map_or(false, |v| values.contains(&*v)),
            _ => return None,
        })
    }
}

/// Interning table of predicates, indexed by [`PredicateId`].
#[derive(Clone, Debug, Default)]
pub struct PredicateAlphabet(Alphabet<Predicate>);

impl PredicateAlphabet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, predicate: Predicate) -> PredicateId {
        self.0.intern(predicate)
    }

    pub fn get(&self, id: PredicateId) -> Option<&Predicate> {
        self.0.resolve(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PredicateId, &Predicate)> {
        self.0.iter()
    }

    /// Ids referenced as operands by `id`.
    pub fn operands(&self, id: PredicateId) -> &[PredicateId] {
        match self.get(id) {
            Some(Predicate::Context { inner, .. } | Predicate::Not(inner)) => std::slice::from_ref(inner),
            Some(Predicate::And(xs) | Predicate::Or(xs)) => xs,
            _ => &[],
        }
    }
}

impl ops::Index<PredicateId> for PredicateAlphabet {
    type Output = Predicate;

    fn index(&self, id: PredicateId) -> &Predicate {
        &self.0[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn token(text: &str) -> SymbolSpan {
        let mut span = SymbolSpan::new(0, 3, Arc::from("Token"), 0, text.len());
        span.features.insert("string".into(), text.into());
        span
    }

    #[test]
    fn interning_dedups_structurally() {
        let mut alphabet = PredicateAlphabet::new();
        let a = alphabet.intern(Predicate::eq(Accessor::feature("string"), "a"));
        let b = alphabet.intern(Predicate::eq(Accessor::feature("string"), "b"));
        assert_ne!(a, b);
        assert_eq!(alphabet.intern(Predicate::eq(Accessor::feature("string"), "a")), a);
        let r1 = alphabet.intern(Predicate::regex(Accessor::Text, "[0-9]+", RegexMode::Match).unwrap());
        let r2 = alphabet.intern(Predicate::regex(Accessor::Text, "[0-9]+", RegexMode::Match).unwrap());
        assert_eq!(r1, r2);
        let or = alphabet.intern(Predicate::Or([a, b].into_iter().collect()));
        assert_eq!(alphabet.operands(or), [a, b]);

        let set = alphabet.intern(Predicate::one_of(Accessor::Type, ["a", "b", "a"]));
        assert_eq!(alphabet.intern(Predicate::one_of(Accessor::Type, ["a", "b"])), set);
    }

    #[test]
    fn local_evaluation() {
        let doc = Document::new("Hello");
        let span = token("Hello");
        let eval = |p: Predicate| p.eval_local(&span, &doc);
        assert_eq!(eval(Predicate::eq(Accessor::feature("string"), "Hello")), Some(true));
        assert_eq!(eval(Predicate::ne(Accessor::feature("missing"), "x")), Some(true));
        assert_eq!(eval(Predicate::eq(Accessor::feature("missing"), "x")), Some(false));
        assert_eq!(eval(Predicate::equal_ignore_case(Accessor::Text, "HELLO")), Some(true));
        assert_eq!(
            eval(Predicate::compare(Accessor::Length, CompareOp::Ge, 5i64)),
            Some(true)
        );
        assert_eq!(
            eval(Predicate::compare(Accessor::Length, CompareOp::Lt, "5")),
            Some(false)
        );
        assert_eq!(
            eval(Predicate::regex(Accessor::Text, "ell", RegexMode::Find).unwrap()),
            Some(true)
        );
        assert_eq!(
            eval(Predicate::regex(Accessor::Text, "ell", RegexMode::Match).unwrap()),
            Some(false)
        );
        assert_eq!(
            eval(Predicate::one_of(Accessor::Type, ["Word", "Token"])),
            Some(true)
        );
        assert_eq!(eval(Predicate::Not(0)), None);
    }
}
