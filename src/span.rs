//! Spans, the unit of both parser input and output.
use hashbrown::HashMap;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::{SpanId, SymbolId, NO_SYMBOL};

/// Feature value stored on a span.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// Orders two values of the same kind; values of different kinds are
    /// incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub type Features = HashMap<String, Value>;

/// Opaque payload attached by the output-conversion layer.
pub type SpanData = Arc<dyn Any + Send + Sync>;

/// A typed region of the document.
#[derive(Clone)]
pub struct SymbolSpan {
    pub id: SpanId,
    /// Grammar symbol, or [`NO_SYMBOL`] for spans the grammar ignores.
    pub symbol: SymbolId,
    pub type_name: Arc<str>,
    pub start: usize,
    pub end: usize,
    pub features: Features,
    /// Span whose features this one inherits by default; itself unless
    /// produced by a reduction.
    pub head: SpanId,
    pub weight: f64,
    data: Option<SpanData>,
}

impl SymbolSpan {
    pub fn new(id: SpanId, symbol: SymbolId, type_name: Arc<str>, start: usize, end: usize) -> Self {
        Self {
            id,
            symbol,
            type_name,
            start,
            end,
            features: Features::new(),
            head: id,
            weight: 1.0,
            data: None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.symbol == NO_SYMBOL
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn feature(&self, key: &str) -> Option<&Value> {
        self.features.get(key)
    }

    pub fn data(&self) -> Option<&SpanData> {
        self.data.as_ref()
    }

    /// Whether two spans are interchangeable in the parse forest.
    ///
    /// This is the local ambiguity packing test and deliberately ignores
    /// `id`.
    pub fn equivalent(&self, other: &SymbolSpan) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.symbol == other.symbol
            && self.head == other.head
            && self.weight == other.weight
            && self.features == other.features
    }

    /// Ordering of input spans: start ascending, end descending, symbol.
    pub fn input_order(&self, other: &SymbolSpan) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(other.end.cmp(&self.end))
            .then(self.symbol.cmp(&other.symbol))
    }
}

impl fmt::Debug for SymbolSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolSpan")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("range", &(self.start..self.end))
            .field("head", &self.head)
            .field("weight", &self.weight)
            .field("features", &self.features)
            .finish()
    }
}

/// Owner of every span created during one parse.
///
/// Span ids are indices into the store and are handed out monotonically.
#[derive(Debug, Default)]
pub struct SpanStore {
    spans: Vec<SymbolSpan>,
}

impl SpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next committed span will receive.
    pub fn next_id(&self) -> SpanId {
        self.spans.len() as SpanId
    }

    /// Commits `span`, overwriting its id with the next free one.
    pub fn push(&mut self, mut span: SymbolSpan) -> SpanId {
        let id = self.next_id();
        if span.head == span.id {
            span.head = id;
        }
        span.id = id;
        self.spans.push(span);
        id
    }

    pub fn get(&self, id: SpanId) -> Option<&SymbolSpan> {
        self.spans.get(id as usize)
    }

    /// Follows the head chain `n` times starting at `id`.
    pub fn nth_head(&self, id: SpanId, n: usize) -> Option<&SymbolSpan> {
        let mut span = self.get(id)?;
        for _ in 0..n {
            span = self.get(span.head)?;
        }
        Some(span)
    }

    /// Attaches an opaque payload. The parser itself never writes this slot.
    pub fn set_data(&mut self, id: SpanId, data: SpanData) -> bool {
        match self.spans.get_mut(id as usize) {
            Some(span) => {
                span.data = Some(data);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolSpan> {
        self.spans.iter()
    }

    pub fn clear(&mut self) {
        self.spans.clear();
    }
}

impl std::ops::Index<SpanId> for SpanStore {
    type Output = SymbolSpan;

    fn index(&self, id: SpanId) -> &SymbolSpan {
        &self.spans[id as usize]
    }
}

/// An externally supplied span, before it is bound to grammar symbols.
#[derive(Clone, Debug)]
pub struct InputSpan {
    pub type_name: String,
    pub start: usize,
    pub end: usize,
    pub features: Features,
}

impl InputSpan {
    pub fn new(type_name: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            type_name: type_name.into(),
            start,
            end,
            features: Features::new(),
        }
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.features.insert(key.into(), value.into());
        self
    }
}

/// The text being annotated together with document-level features.
#[derive(Clone, Debug, Default)]
pub struct Document {
    pub text: String,
    pub features: Features,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            features: Features::new(),
        }
    }

    /// Text covered by `span`, if its offsets fall on character boundaries.
    pub fn covered(&self, span: &SymbolSpan) -> Option<&str> {
        self.text.get(span.start..span.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(store: &mut SpanStore, start: usize, end: usize) -> SpanId {
        store.push(SymbolSpan::new(0, 3, "Token".into(), start, end))
    }

    #[test]
    fn head_chain() {
        let mut store = SpanStore::new();
        let a = span(&mut store, 0, 5);
        let mut b = SymbolSpan::new(store.next_id(), 4, "Np".into(), 0, 5);
        b.head = a;
        let b = store.push(b);
        assert_eq!(store[a].head, a);
        assert_eq!(store.nth_head(b, 0).map(|s| s.id), Some(b));
        assert_eq!(store.nth_head(b, 1).map(|s| s.id), Some(a));
        assert_eq!(store.nth_head(b, 5).map(|s| s.id), Some(a));
    }

    #[test]
    fn equivalence_ignores_id() {
        let mut store = SpanStore::new();
        let a = span(&mut store, 0, 5);
        let b = span(&mut store, 0, 5);
        // distinct heads
        assert!(!store[a].equivalent(&store[b]));
        let mut c = store[a].clone();
        c.id = 99;
        assert!(store[a].equivalent(&c));
        c.features.insert("k".into(), 1.into());
        assert!(!store[a].equivalent(&c));
    }

    #[test]
    fn data_slot() {
        let mut store = SpanStore::new();
        let a = span(&mut store, 0, 1);
        assert!(store[a].data().is_none());
        assert!(store.set_data(a, Arc::new(7u32)));
        let data = store[a].data().and_then(|d| d.downcast_ref::<u32>());
        assert_eq!(data, Some(&7));
    }
}
