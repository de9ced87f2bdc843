//! Static relations between categorical predicates.
//!
//! Equality-like predicates over the same accessor are mutually
//! dependent: once `string == "a"` is known to hold, `string == "b"` is
//! known not to. The network records those entailments per predicate and,
//! for accessors tested by many predicates, a small automaton mapping
//! `(accessor, value)` straight to the set of predicates that hold.
use hashbrown::HashMap;

use super::{Accessor, CompareOp, Predicate, PredicateAlphabet};
use crate::alphabet::Alphabet;
use crate::span::Value;
use crate::PredicateId;

pub type AccessorId = u32;
pub type ValueId = u32;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entailed {
    pub also_true: Vec<PredicateId>,
    pub also_false: Vec<PredicateId>,
}

impl Entailed {
    fn is_empty(&self) -> bool {
        self.also_true.is_empty() && self.also_false.is_empty()
    }
}

/// What else is known once a predicate has been evaluated.
#[derive(Clone, Debug, Default)]
pub struct Implications {
    pub when_true: Entailed,
    pub when_false: Entailed,
    /// Automaton group dispatching this predicate's accessor, if any.
    pub automaton: Option<u32>,
}

#[derive(Clone, Debug)]
struct Group {
    accessor: AccessorId,
    /// Sorted.
    members: Vec<PredicateId>,
    /// Final state when the accessor yields no value.
    missing: u32,
    /// Final state for a value no member mentions.
    other: u32,
}

/// Two-level automaton: accessor group, then value, to a final state
/// listing the group members that hold.
#[derive(Clone, Debug, Default)]
pub struct CategoricalAutomaton {
    groups: Vec<Group>,
    transitions: HashMap<(AccessorId, ValueId), u32>,
    finals: Vec<Vec<PredicateId>>,
    final_ids: HashMap<Vec<PredicateId>, u32>,
}

impl CategoricalAutomaton {
    fn add_final(&mut self, holding: Vec<PredicateId>) -> u32 {
        let finals = &mut self.finals;
        *self.final_ids.entry(holding).or_insert_with_key(|holding| {
            finals.push(holding.clone());
            finals.len() as u32 - 1
        })
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_states(&self) -> usize {
        self.groups.len() + self.finals.len()
    }
}

#[derive(Clone, Debug)]
pub struct PredicateNetwork {
    predicates: PredicateAlphabet,
    accessors: Alphabet<Accessor>,
    values: Alphabet<Value>,
    records: Vec<Implications>,
    automaton: CategoricalAutomaton,
}

impl PredicateNetwork {
    /// Derives implications for every categorical predicate; accessors
    /// with at least `automaton_threshold` of them also get an automaton
    /// group.
    pub fn compile(predicates: PredicateAlphabet, automaton_threshold: usize) -> Self {
        let mut accessors = Alphabet::new();
        let mut values = Alphabet::new();
        let mut groups: Vec<(AccessorId, Vec<PredicateId>)> = Vec::new();
        for (id, predicate) in predicates.iter() {
            let accessor = match predicate.categorical_accessor() {
                Some(accessor) => accessors.intern(accessor.clone()),
                None => continue,
            };
            match groups.iter_mut().find(|(a, _)| *a == accessor) {
                Some((_, members)) => members.push(id),
                None => groups.push((accessor, vec![id])),
            }
            match predicate {
                Predicate::Compare { value, .. } => {
                    values.intern(value.clone());
                }
                Predicate::OneOf { values: vs, .. } => {
                    for v in vs {
                        values.intern(v.clone());
                    }
                }
                _ => {}
            }
        }

        let mut records = vec![Implications::default(); predicates.len()];
        let mut automaton = CategoricalAutomaton::default();
        for (accessor, members) in groups {
            for &id in &members {
                let (when_true, when_false) = entailments(&predicates, &members, id);
                records[id as usize].when_true = when_true;
                records[id as usize].when_false = when_false;
            }

            if members.len() < automaton_threshold.max(1) {
                continue;
            }
            let holding = |value: Option<&Value>| -> Vec<PredicateId> {
                members
                    .iter()
                    .copied()
                    .filter(|&m| predicates[m].categorical_truth(value) == Some(true))
                    .collect()
            };
            let missing = automaton.add_final(holding(None));
            // Ne holds, Eq and OneOf do not, for any value no member names.
            let other = automaton.add_final(
                members
                    .iter()
                    .copied()
                    .filter(|&m| matches!(&predicates[m], Predicate::Compare { op: CompareOp::Ne, .. }))
                    .collect(),
            );
            let mut mentioned: Vec<&Value> = Vec::new();
            for &m in &members {
                match &predicates[m] {
                    Predicate::Compare { value, .. } => mentioned.push(value),
                    Predicate::OneOf { values, .. } => mentioned.extend(values),
                    _ => {}
                }
            }
            for value in mentioned {
                let value_id = values.intern(value.clone());
                let target = automaton.add_final(holding(Some(value)));
                automaton.transitions.insert((accessor, value_id), target);
            }
            let group = automaton.groups.len() as u32;
            for &m in &members {
                records[m as usize].automaton = Some(group);
            }
            automaton.groups.push(Group {
                accessor,
                members,
                missing,
                other,
            });
        }

        log::debug!(
            "predicate network: {} predicates, {} accessors, {} automaton groups, {} final states",
            predicates.len(),
            accessors.len(),
            automaton.groups.len(),
            automaton.finals.len()
        );

        Self {
            predicates,
            accessors,
            values,
            records,
            automaton,
        }
    }

    pub fn predicates(&self) -> &PredicateAlphabet {
        &self.predicates
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn implications(&self, id: PredicateId) -> &Implications {
        &self.records[id as usize]
    }

    pub fn automaton(&self) -> &CategoricalAutomaton {
        &self.automaton
    }

    /// Accessor dispatched by an automaton group.
    pub fn group_accessor(&self, group: u32) -> &Accessor {
        &self.accessors[self.automaton.groups[group as usize].accessor]
    }

    pub fn group_members(&self, group: u32) -> &[PredicateId] {
        &self.automaton.groups[group as usize].members
    }

    /// Walks `group` with the accessor's value, returning the sorted
    /// members that hold for it.
    pub fn walk(&self, group: u32, value: Option<&Value>) -> &[PredicateId] {
        let g = &self.automaton.groups[group as usize];
        let state = match value {
            None => g.missing,
            Some(value) => self
                .values
                .get(value)
                .and_then(|v| self.automaton.transitions.get(&(g.accessor, v)))
                .copied()
                .unwrap_or(g.other),
        };
        &self.automaton.finals[state as usize]
    }
}

/// What evaluating `id` to true and to false tells about the other
/// members of its accessor group.
fn entailments(predicates: &PredicateAlphabet, members: &[PredicateId], id: PredicateId) -> (Entailed, Entailed) {
    // Knowing the exact value settles every member.
    let by_value = |value: &Value| {
        let mut entailed = Entailed::default();
        for &m in members.iter().filter(|&&m| m != id) {
            match predicates[m].categorical_truth(Some(value)) {
                Some(true) => entailed.also_true.push(m),
                Some(false) => entailed.also_false.push(m),
                None => {}
            }
        }
        entailed
    };
    // Knowing the value is none of `excluded` (or missing) settles only
    // members naming nothing but excluded values.
    let excluding = |excluded: &[Value]| {
        let mut entailed = Entailed::default();
        for &m in members.iter().filter(|&&m| m != id) {
            match &predicates[m] {
                Predicate::Compare { op, value, .. } if excluded.contains(value) => match op {
                    CompareOp::Eq => entailed.also_false.push(m),
                    _ => entailed.also_true.push(m),
                },
                Predicate::OneOf { values, .. } if values.iter().all(|v| excluded.contains(v)) => {
                    entailed.also_false.push(m)
                }
                _ => {}
            }
        }
        entailed
    };

    match &predicates[id] {
        Predicate::Compare { op: CompareOp::Eq, value, .. } => {
            (by_value(value), excluding(std::slice::from_ref(value)))
        }
        Predicate::Compare { value, .. } => (excluding(std::slice::from_ref(value)), by_value(value)),
        Predicate::OneOf { values, .. } => {
            // The value is one of `values`, but which one is unknown:
            // only members outside the set are settled.
            let mut when_true = Entailed::default();
            for &m in members.iter().filter(|&&m| m != id) {
                match &predicates[m] {
                    Predicate::Compare { op, value, .. } if !values.contains(value) => match op {
                        CompareOp::Eq => when_true.also_false.push(m),
                        _ => when_true.also_true.push(m),
                    },
                    _ => {}
                }
            }
            (when_true, excluding(values))
        }
        _ => (Entailed::default(), Entailed::default()),
    }
}

impl Implications {
    pub fn is_empty(&self) -> bool {
        self.when_true.is_empty() && self.when_false.is_empty() && self.automaton.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string() -> Accessor {
        Accessor::feature("string")
    }

    #[test]
    fn equality_implications() {
        let mut alphabet = PredicateAlphabet::new();
        let a = alphabet.intern(Predicate::eq(string(), "a"));
        let b = alphabet.intern(Predicate::eq(string(), "b"));
        let not_a = alphabet.intern(Predicate::ne(string(), "a"));
        let ab = alphabet.intern(Predicate::one_of(string(), ["a", "b"]));
        let other = alphabet.intern(Predicate::eq(Accessor::Type, "a"));
        let network = PredicateNetwork::compile(alphabet, usize::MAX);

        let imp = network.implications(a);
        assert_eq!(imp.when_true.also_true, [ab]);
        assert_eq!(imp.when_true.also_false, [b, not_a]);
        assert_eq!(imp.when_false.also_true, [not_a]);
        assert!(imp.when_false.also_false.is_empty());
        assert!(imp.automaton.is_none());

        let imp = network.implications(not_a);
        assert_eq!(imp.when_true.also_false, [a]);
        assert_eq!(imp.when_false.also_true, [a, ab]);
        assert_eq!(imp.when_false.also_false, [b]);

        let imp = network.implications(ab);
        assert!(imp.when_true.also_true.is_empty());
        assert_eq!(imp.when_false.also_false, [a, b]);
        assert_eq!(imp.when_false.also_true, [not_a]);

        assert!(network.implications(other).is_empty());
    }

    #[test]
    fn automaton_walk() {
        let mut alphabet = PredicateAlphabet::new();
        let a = alphabet.intern(Predicate::eq(string(), "a"));
        let b = alphabet.intern(Predicate::eq(string(), "b"));
        let not_b = alphabet.intern(Predicate::ne(string(), "b"));
        let network = PredicateNetwork::compile(alphabet, 3);

        let group = network.implications(a).automaton.unwrap();
        assert_eq!(network.implications(not_b).automaton, Some(group));
        assert_eq!(network.group_accessor(group), &string());
        assert_eq!(network.group_members(group), [a, b, not_b]);
        assert_eq!(network.walk(group, Some(&"a".into())), [a, not_b]);
        assert_eq!(network.walk(group, Some(&"b".into())), [b]);
        assert_eq!(network.walk(group, Some(&"zzz".into())), [not_b]);
        assert_eq!(network.walk(group, None), [not_b]);
    }
}
