//! The callback contract between the parser and whatever executes
//! reduction actions and named predicate functions.
use hashbrown::HashMap;

use crate::error::ActionError;
use crate::grammar::Rule;
use crate::span::{Document, SpanStore, SymbolSpan};
use crate::{RuleId, SpanId};

/// Read-only view of the parse handed to hosts and predicates.
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    pub document: &'a Document,
    pub spans: &'a SpanStore,
    /// Every input span, parseable or not, in input order.
    pub input: &'a [SpanId],
}

impl<'a> ParseContext<'a> {
    pub fn text(&self) -> &'a str {
        &self.document.text
    }
}

/// Copies the features of the rule's root child onto `target`.
pub fn inherit_features(rule: &Rule, target: &mut SymbolSpan, rhs: &[&SymbolSpan]) {
    if let Some(root) = rhs.get(rule.root_index) {
        target.features = root.features.clone();
    }
}

pub trait ActionHost {
    /// Runs the action of `rule`, which is about to produce `target` from
    /// `rhs`.
    ///
    /// Returning `Ok(false)` or [`ActionError::Rejected`] rejects this
    /// reduction for good: the outcome is memoized for the same children.
    fn execute(
        &mut self,
        ctx: &ParseContext<'_>,
        rule: &Rule,
        target: &mut SymbolSpan,
        rhs: &[&SymbolSpan],
    ) -> Result<bool, ActionError> {
        let _ = ctx;
        inherit_features(rule, target, rhs);
        Ok(true)
    }

    /// Evaluates the named predicate function on `span`.
    fn test(&mut self, name: &str, ctx: &ParseContext<'_>, span: &SymbolSpan) -> Result<bool, ActionError> {
        let _ = (ctx, span);
        Err(ActionError::Rejected(format!("no predicate function `{}`", name)))
    }
}

/// Host with no actions: features are inherited and named predicates fail.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultActions;

impl ActionHost for DefaultActions {}

type ReduceFn =
    Box<dyn FnMut(&ParseContext<'_>, &Rule, &mut SymbolSpan, &[&SymbolSpan]) -> Result<bool, ActionError>>;
type TestFn = Box<dyn FnMut(&ParseContext<'_>, &SymbolSpan) -> Result<bool, ActionError>>;

/// Closures registered per rule id and per predicate name.
///
/// Rules without a registered closure fall back to [`inherit_features`].
#[derive(Default)]
pub struct ActionTable {
    actions: HashMap<RuleId, ReduceFn>,
    tests: HashMap<String, TestFn>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_reduce<F>(&mut self, rule: RuleId, f: F) -> &mut Self
    where
        F: FnMut(&ParseContext<'_>, &Rule, &mut SymbolSpan, &[&SymbolSpan]) -> Result<bool, ActionError> + 'static,
    {
        self.actions.insert(rule, Box::new(f));
        self
    }

    pub fn on_test<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: FnMut(&ParseContext<'_>, &SymbolSpan) -> Result<bool, ActionError> + 'static,
    {
        self.tests.insert(name.into(), Box::new(f));
        self
    }
}

impl ActionHost for ActionTable {
    fn execute(
        &mut self,
        ctx: &ParseContext<'_>,
        rule: &Rule,
        target: &mut SymbolSpan,
        rhs: &[&SymbolSpan],
    ) -> Result<bool, ActionError> {
        match self.actions.get_mut(&rule.id) {
            Some(f) => f(ctx, rule, target, rhs),
            None => {
                inherit_features(rule, target, rhs);
                Ok(true)
            }
        }
    }

    fn test(&mut self, name: &str, ctx: &ParseContext<'_>, span: &SymbolSpan) -> Result<bool, ActionError> {
        match self.tests.get_mut(name) {
            Some(f) => f(ctx, span),
            None => Err(ActionError::Rejected(format!("no predicate function `{}`", name))),
        }
    }
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTable")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("tests", &self.tests.keys().collect::<Vec<_>>())
            .finish()
    }
}
