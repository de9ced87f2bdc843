//! Generalized LR parsing over typed text spans.
//!
//! The input is a lattice of spans, possibly overlapping, produced by
//! earlier annotators. A [`CompiledGrammar`] drives a [`Parser`] that
//! derives every span the grammar's productions allow, packing locally
//! ambiguous derivations and resolving greedy conflicts as it goes.
//!
//! ```
//! use spanglr::{CompileOptions, CompiledGrammar, DefaultActions, Document, GrammarBuilder,
//!     InputSpan, Parser, ParserConfig};
//!
//! let mut b = GrammarBuilder::new();
//! b.terminal("Token").start("Greeting").unwrap();
//! b.rule("Greeting", ["Token", "Token"]);
//! let grammar = CompiledGrammar::compile(&b.build().unwrap(), &CompileOptions::default()).unwrap();
//!
//! let mut parser = Parser::new(&grammar, ParserConfig::default());
//! let input = [InputSpan::new("Token", 0, 5), InputSpan::new("Token", 6, 11)];
//! let roots = parser.parse(Document::new("hello world"), input, &mut DefaultActions).unwrap();
//! assert_eq!(roots.len(), 1);
//! ```

pub mod action;
pub mod alphabet;
pub mod bit_set;
pub mod compile;
pub mod error;
pub mod grammar;
pub mod greedy;
pub mod gss;
pub mod lr0;
pub mod parser;
pub mod predicate;
pub mod prefix;
pub mod sets;
pub mod span;
pub mod table;

pub use action::{ActionHost, ActionTable, DefaultActions, ParseContext};
pub use compile::{CompileOptions, CompiledGrammar};
pub use error::{ActionError, GrammarError, ParseError};
pub use grammar::{sym, Grammar, GrammarBuilder, Rule};
pub use gss::{ParsingChildrenSet, StateNodeId, SymbolNodeId};
pub use parser::{Parser, ParserConfig, ReductionStats};
pub use predicate::{Accessor, CompareOp, ContextKind, Predicate, RegexMode};
pub use span::{Document, Features, InputSpan, SpanStore, SymbolSpan, Value};

pub type SymbolId = u32;
pub type RuleId = u32;
pub type StateId = usize;
pub type SpanId = u32;
pub type PredicateId = u32;

/// End of input, `$`.
pub const EOF: SymbolId = 0;
/// The empty string marker, `ε`.
pub const EPSILON: SymbolId = 1;
/// The augmented start symbol `S'`.
pub const ROOT: SymbolId = 2;
/// Symbol of spans the grammar does not know.
pub const NO_SYMBOL: SymbolId = SymbolId::MAX;

/// State of the closure of `S' → • Start $`.
pub const START_STATE: StateId = 0;
