use crate::{RuleId, SpanId, SymbolId};

/// Failures detected while building or compiling a grammar.
///
/// These are always reported before any parsing starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("grammar has no productions")]
    NoProductions,

    #[error("no start symbol was set")]
    MissingStart,

    #[error("start symbol `{0}` is not a nonterminal")]
    StartNotNonterminal(String),

    #[error("symbol `{0}` is used but never declared")]
    UndefinedSymbol(String),

    #[error("symbol `{0}` is declared both as terminal and nonterminal")]
    ConflictingSymbol(String),

    #[error("terminal `{0}` cannot be the left-hand side of a production")]
    TerminalLhs(String),

    #[error("root index {index} is out of range for rule {rule} with {len} right-hand symbols")]
    RootIndexOutOfRange { rule: RuleId, index: usize, len: usize },

    #[error("option `{0}` is set more than once")]
    DuplicateOption(&'static str),

    #[error("predicate {0} is referenced but not defined")]
    UndefinedPredicate(u32),

    #[error("synthesized terminal `{0}` must be a terminal distinct from its base type")]
    InvalidSynthesized(String),

    #[error("too many symbols ({0})")]
    TooManySymbols(usize),
}

/// Errors raised by an [`ActionHost`](crate::ActionHost).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The reduction is rejected; parsing continues without it.
    #[error("action rejected: {0}")]
    Rejected(String),

    /// Unrecoverable, aborts the parse.
    #[error("fatal action error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("parser has no input; call `start` first")]
    NotStarted,

    #[error("action for rule {rule} (lhs {lhs}) failed")]
    Action {
        rule: RuleId,
        lhs: SymbolId,
        #[source]
        source: ActionError,
    },

    #[error("predicate function failed on span {span}")]
    Predicate {
        span: SpanId,
        #[source]
        source: ActionError,
    },
}
