//! Greedy disambiguation.
//!
//! For each nonterminal having greedy rules, the span reduced at a word
//! that starts first, then extends furthest, wins. Every other span of the
//! same type that overlaps the winner without starting before it is
//! removed, together with whatever it alone supported.
use hashbrown::{HashMap, HashSet};
use std::cmp::Ordering;

use crate::compile::CompiledGrammar;
use crate::gss::{Gss, SymbolNodeId};
use crate::span::{SpanStore, SymbolSpan};
use crate::SymbolId;

/// Winner order: earliest start, longest, heaviest, oldest.
fn rank(a: &SymbolSpan, b: &SymbolSpan) -> Ordering {
    a.start
        .cmp(&b.start)
        .then(b.end.cmp(&a.end))
        .then(b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal))
        .then(a.id.cmp(&b.id))
}

fn loses_to(span: &SymbolSpan, winner: &SymbolSpan) -> bool {
    let overlaps = span.start < winner.end && winner.start < span.end;
    let coextensive = span.start == winner.start && span.end == winner.end;
    overlaps && !coextensive && span.start >= winner.start
}

/// Filters the nodes reduced at `word`. Returns the number of nodes removed.
pub fn apply(
    grammar: &CompiledGrammar,
    gss: &mut Gss,
    spans: &SpanStore,
    word: usize,
    roots: &mut Vec<SymbolNodeId>,
) -> usize {
    let mut winners: HashMap<SymbolId, SymbolNodeId> = HashMap::new();
    for &id in &gss.layer(word).reduced {
        let node = &gss[id];
        if node.removed || !grammar.is_greedy(node.symbol) {
            continue;
        }
        if !node.derivations.iter().any(|d| grammar.rule(d.rule).greedy) {
            continue;
        }
        winners
            .entry(node.symbol)
            .and_modify(|best| {
                if rank(&spans[gss[id].span], &spans[gss[*best].span]) == Ordering::Less {
                    *best = id;
                }
            })
            .or_insert(id);
    }
    if winners.is_empty() {
        return 0;
    }

    let mut removed = 0;
    let losers: Vec<SymbolNodeId> = gss
        .symbol_nodes()
        .filter(|(id, node)| {
            !node.removed
                && winners.get(&node.symbol).map_or(false, |&winner| {
                    *id != winner && loses_to(&spans[node.span], &spans[gss[winner].span])
                })
        })
        .map(|(id, _)| id)
        .collect();
    let mut from = word;
    let mut dead: HashSet<SymbolNodeId> = HashSet::new();
    for id in losers {
        log::trace!(
            "greedy: dropping {} [{}, {})",
            spans[gss[id].span].type_name,
            spans[gss[id].span].start,
            spans[gss[id].span].end
        );
        gss[id].removed = true;
        from = from.min(gss[id].word);
        dead.insert(id);
        removed += 1;
    }

    // Derivations through nodes dropped here die, in whatever layer they
    // live, unless they build a winner out of its own shorter prefix.
    // Derivations through nodes dropped by earlier passes are left alone.
    let dependents: Vec<SymbolNodeId> = gss
        .symbol_nodes()
        .filter(|(_, node)| !node.removed && node.word >= from && !node.derivations.is_empty())
        .map(|(id, _)| id)
        .collect();
    let mut changed = !dead.is_empty();
    while changed {
        changed = false;
        for &id in &dependents {
            if gss[id].removed {
                continue;
            }
            let symbol = gss[id].symbol;
            let start = spans[gss[id].span].start;
            let exempt_start = winners.get(&symbol).map(|&w| spans[gss[w].span].start);
            let mut derivations = std::mem::take(&mut gss[id].derivations);
            let before = derivations.len();
            derivations.retain(|d| {
                let exempt = exempt_start == Some(start) && grammar.rule(d.rule).greedy;
                exempt || d.children.iter().all(|c| !dead.contains(c))
            });
            if derivations.len() != before {
                changed = true;
            }
            if derivations.is_empty() {
                log::trace!("greedy: {} lost every derivation", spans[gss[id].span].type_name);
                gss[id].removed = true;
                from = from.min(gss[id].word);
                dead.insert(id);
                removed += 1;
                changed = true;
            } else {
                gss[id].derivations = derivations;
            }
        }
    }

    removed += gss.sweep(from);
    roots.retain(|&r| !gss[r].removed);
    log::debug!("greedy: {} nodes removed at word {}", removed, word);
    removed
}

#[cfg(test)]
mod tests {
    use crate::action::DefaultActions;
    use crate::compile::{CompileOptions, CompiledGrammar};
    use crate::grammar::GrammarBuilder;
    use crate::parser::{Parser, ParserConfig};
    use crate::span::{Document, InputSpan};

    fn noun_phrases() -> CompiledGrammar {
        let mut b = GrammarBuilder::new();
        b.terminal("Word").start("Np").unwrap();
        b.rule("Np", ["Word"]).greedy(true);
        b.rule("Np", ["Np", "Word"]).greedy(true);
        let g = b.build().unwrap();
        CompiledGrammar::compile(&g, &CompileOptions::default()).unwrap()
    }

    fn input() -> Vec<InputSpan> {
        vec![InputSpan::new("Word", 0, 3), InputSpan::new("Word", 4, 5)]
    }

    fn root_ranges(parser: &Parser<'_>) -> Vec<(usize, usize)> {
        let mut out: Vec<_> = parser
            .roots()
            .iter()
            .map(|&r| (parser[r].start, parser[r].end))
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn longest_span_wins() {
        let compiled = noun_phrases();
        let mut parser = Parser::new(&compiled, ParserConfig::default());
        parser
            .parse(Document::new("big dog"), input(), &mut DefaultActions)
            .unwrap();
        assert_eq!(root_ranges(&parser), [(0, 5)]);

        let removed: Vec<_> = parser
            .gss()
            .symbol_nodes()
            .filter(|(_, n)| n.removed)
            .map(|(id, _)| (parser[id].start, parser[id].end))
            .collect();
        assert!(removed.contains(&(0, 3)));
        assert!(removed.contains(&(4, 5)));

        // The winner keeps its derivation through the removed prefix
        let root = parser.roots()[0];
        assert_eq!(parser.forest_derivations(root).len(), 1);
    }

    #[test]
    fn disabled_keeps_everything() {
        let compiled = noun_phrases();
        let config = ParserConfig {
            greedy: false,
            ..ParserConfig::default()
        };
        let mut parser = Parser::new(&compiled, config);
        parser
            .parse(Document::new("big dog"), input(), &mut DefaultActions)
            .unwrap();
        assert_eq!(root_ranges(&parser), [(0, 3), (0, 5), (4, 5)]);
    }

    fn live_ranges(parser: &Parser<'_>, type_name: &str) -> Vec<(usize, usize)> {
        let mut out: Vec<_> = parser
            .gss()
            .symbol_nodes()
            .filter(|&(id, n)| !n.removed && &*parser[id].type_name == type_name)
            .map(|(id, _)| (parser[id].start, parser[id].end))
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn dependents_of_losers_are_removed() {
        let mut b = GrammarBuilder::new();
        b.terminal("Word").start("S").unwrap();
        b.rule("S", ["Np"]);
        b.rule("Np", ["Word"]).greedy(true);
        b.rule("Np", ["Np", "Word"]).greedy(true);
        let compiled = CompiledGrammar::compile(&b.build().unwrap(), &CompileOptions::default()).unwrap();

        let mut parser = Parser::new(&compiled, ParserConfig::default());
        parser
            .parse(Document::new("big dog"), input(), &mut DefaultActions)
            .unwrap();
        // S[0,3] was reduced a word earlier than the winner Np[0,5]
        assert_eq!(root_ranges(&parser), [(0, 5)]);
        assert_eq!(live_ranges(&parser, "S"), [(0, 5)]);
        assert_eq!(live_ranges(&parser, "Np"), [(0, 5)]);
    }

    #[test]
    fn policies_apply_per_type() {
        let mut b = GrammarBuilder::new();
        b.terminal("Word").terminal("Verb").start("S").unwrap();
        b.rule("S", ["Np"]);
        b.rule("S", ["Vp"]);
        b.rule("Np", ["Word"]).greedy(true);
        b.rule("Np", ["Np", "Word"]).greedy(true);
        b.rule("Vp", ["Verb"]).greedy(true);
        b.rule("Vp", ["Vp", "Verb"]).greedy(true);
        let compiled = CompiledGrammar::compile(&b.build().unwrap(), &CompileOptions::default()).unwrap();

        let mut input = input();
        input.push(InputSpan::new("Verb", 0, 3));
        input.push(InputSpan::new("Verb", 4, 5));
        let mut parser = Parser::new(&compiled, ParserConfig::default());
        parser
            .parse(Document::new("run fast"), input, &mut DefaultActions)
            .unwrap();
        assert_eq!(live_ranges(&parser, "Np"), [(0, 5)]);
        assert_eq!(live_ranges(&parser, "Vp"), [(0, 5)]);
        // One root per type, heads differ
        assert_eq!(root_ranges(&parser), [(0, 5), (0, 5)]);
    }
}
