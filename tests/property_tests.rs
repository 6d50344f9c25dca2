//! Property-based tests for the dependency sorter.

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;

use flash_core::transfer::{DependencyMap, DependencySorter};

fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("t{}", i)).collect()
}

/// Arbitrary references between `n` tables, cycles and self-references included
fn any_graph() -> impl Strategy<Value = (Vec<String>, DependencyMap)> {
    (1usize..12).prop_flat_map(|n| {
        prop::collection::vec((0..n, 0..n), 0..(n * 2)).prop_map(move |edges| {
            let tables = names(n);
            let mut deps: DependencyMap = HashMap::new();
            for (from, to) in edges {
                deps.entry(tables[from].clone()).or_default().insert(tables[to].clone());
            }
            (tables, deps)
        })
    })
}

/// References only point at lower-numbered tables; input order is shuffled
fn acyclic_graph() -> impl Strategy<Value = (Vec<String>, DependencyMap)> {
    (2usize..12).prop_flat_map(|n| {
        let edges = prop::collection::vec((1..n, 0usize..100), 0..(n * 2));
        (Just(names(n)).prop_shuffle(), edges).prop_map(move |(shuffled, edges)| {
            let mut deps: DependencyMap = HashMap::new();
            for (from, pick) in edges {
                let to = pick % from;
                deps.entry(format!("t{}", from))
                    .or_default()
                    .insert(format!("t{}", to));
            }
            (shuffled, deps)
        })
    })
}

proptest! {
    #[test]
    fn order_is_a_permutation_of_input((tables, deps) in any_graph()) {
        let outcome = DependencySorter::sort(&tables, &deps);

        let mut sorted = outcome.order.clone();
        sorted.sort();
        let mut expected = tables.clone();
        expected.sort();
        prop_assert_eq!(sorted, expected);

        let unresolved: BTreeSet<&String> = outcome.unresolved.iter().collect();
        prop_assert_eq!(unresolved.len(), outcome.unresolved.len());
        prop_assert!(outcome.order.ends_with(&outcome.unresolved));
    }

    #[test]
    fn referenced_tables_come_first((tables, deps) in acyclic_graph()) {
        let outcome = DependencySorter::sort(&tables, &deps);
        prop_assert!(outcome.is_complete());

        let position: HashMap<&str, usize> = outcome
            .order
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();
        for (table, refs) in &deps {
            for referenced in refs {
                prop_assert!(
                    position[referenced.as_str()] < position[table.as_str()],
                    "{} must precede {}",
                    referenced,
                    table
                );
            }
        }
    }

    #[test]
    fn sort_is_deterministic((tables, deps) in any_graph()) {
        prop_assert_eq!(
            DependencySorter::sort(&tables, &deps),
            DependencySorter::sort(&tables, &deps)
        );
    }
}

#[test]
fn independent_tables_keep_input_order() {
    let tables = vec!["b".to_string(), "a".to_string(), "c".to_string()];
    let outcome = DependencySorter::sort(&tables, &DependencyMap::new());
    assert_eq!(outcome.order, tables);
}
