// Property-based tests for clause parsing.
//
// Two properties:
// 1. Clause order does not matter: any permutation of a clause set with no
//    repeated scalar clauses parses to the same lists and scalar values.
// 2. Repeating a list clause is the same as writing one longer list.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use pdc::clause_parser::{parse_clauses, ClauseParseOptions};
use pdc::clauses::{ClauseMask, ClauseSet};
use pdc::directive::DirectiveKind;
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn parse(text: &str, mask: ClauseMask) -> ClauseSet {
    parse_clauses(text, 0..text.len(), mask, ClauseParseOptions::default())
        .unwrap_or_else(|e| panic!("{text:?}: {}", e.message))
}

/// Span-free view of a clause set.
fn shape(cs: &ClauseSet) -> Vec<String> {
    let mut out: Vec<String> = cs
        .lists()
        .map(|(class, entries)| {
            let names: Vec<&str> = entries.iter().map(|e| e.name.name.as_str()).collect();
            format!("{class:?}: {}", names.join(","))
        })
        .collect();
    let scalars = [
        ("if", cs.if_expr.as_ref()),
        ("num_threads", cs.num_threads.as_ref()),
        ("chunk", cs.chunk_size.as_ref()),
        ("collapse", cs.collapse_expr.as_ref()),
    ];
    for (name, expr) in scalars {
        if let Some(e) = expr {
            out.push(format!("{name}: {e}"));
        }
    }
    out.push(format!("schedule: {:?}", cs.schedule));
    out.push(format!("default: {:?}", cs.default_sharing));
    out.push(format!("ordered: {}", cs.ordered));
    out
}

/// Join clauses with a separator chosen per position.
fn join(clauses: &[&str], commas: &[bool]) -> String {
    let mut text = String::from(" ");
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            text.push_str(if commas[i % commas.len()] { ", " } else { " " });
        }
        text.push_str(clause);
    }
    text
}

const PARALLEL_DO_CLAUSES: [&str; 9] = [
    "private(a, b)",
    "shared(s)",
    "firstprivate(f)",
    "lastprivate(l)",
    "reduction(+:r)",
    "if(n > 1)",
    "num_threads(4)",
    "schedule(dynamic, 8)",
    "default(shared)",
];

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn clause_order_is_irrelevant(
        order in Just(PARALLEL_DO_CLAUSES.to_vec()).prop_shuffle(),
        commas in prop::collection::vec(any::<bool>(), 1..8),
    ) {
        let mask = DirectiveKind::ParallelDo.clause_mask();
        let reference = parse(&join(&PARALLEL_DO_CLAUSES, &[true]), mask);
        let shuffled = parse(&join(&order, &commas), mask);
        prop_assert_eq!(shape(&shuffled), shape(&reference));
    }

    #[test]
    fn repeated_list_clause_equals_one_list(
        names in prop::sample::subsequence(vec!["a", "b", "c", "d", "e", "f"], 1..=6),
        split in 1usize..6,
    ) {
        let mask = DirectiveKind::Parallel.clause_mask();
        let split = split.min(names.len());
        let pieces: Vec<String> = names
            .chunks(split)
            .map(|chunk| format!("private({})", chunk.join(", ")))
            .collect();
        let pieces: Vec<&str> = pieces.iter().map(String::as_str).collect();
        let repeated = parse(&join(&pieces, &[false]), mask);
        let single = parse(&format!(" private({})", names.join(", ")), mask);
        prop_assert_eq!(shape(&repeated), shape(&single));
    }
}
