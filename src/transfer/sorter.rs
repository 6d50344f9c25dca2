//! Dependency Sorter
//!
//! Orders tables so every referenced table comes before the tables that
//! reference it. Cycles cannot be ordered; their members are appended in
//! input order and reported as unresolved.

use crate::models::schema::{referenced_tables, SchemaTable};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::warn;

/// Result of a dependency sort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOutcome {
    /// Every input table exactly once
    pub order: Vec<String>,
    /// Tables left over by the cycle fallback, in input order
    pub unresolved: Vec<String>,
}

impl SortOutcome {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Table name -> tables it references
pub type DependencyMap = HashMap<String, BTreeSet<String>>;

pub struct DependencySorter;

impl DependencySorter {
    /// Kahn-style topological order, stable with respect to input order.
    ///
    /// Self-references and references to tables outside `tables` are ignored.
    pub fn sort(tables: &[String], deps: &DependencyMap) -> SortOutcome {
        let in_set: HashSet<&str> = tables.iter().map(String::as_str).collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut unique: Vec<&str> = Vec::with_capacity(tables.len());

        for table in tables {
            if !seen.insert(table.as_str()) {
                continue;
            }
            unique.push(table.as_str());

            let refs = deps
                .get(table)
                .into_iter()
                .flatten()
                .map(String::as_str)
                .filter(|r| *r != table.as_str() && in_set.contains(r));

            let mut count = 0;
            for referenced in refs {
                dependents.entry(referenced).or_default().push(table.as_str());
                count += 1;
            }
            in_degree.insert(table.as_str(), count);
        }

        let mut queue: VecDeque<&str> = unique.iter().copied().filter(|t| in_degree[t] == 0).collect();
        let mut order: Vec<String> = Vec::with_capacity(unique.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while let Some(table) = queue.pop_front() {
            order.push(table.to_string());
            placed.insert(table);

            for dependent in dependents.get(table).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        let unresolved: Vec<String> = unique
            .iter()
            .filter(|t| !placed.contains(*t))
            .map(|t| t.to_string())
            .collect();

        if !unresolved.is_empty() {
            warn!(
                "Circular foreign keys among {:?}; appending them in original order",
                unresolved
            );
            order.extend(unresolved.iter().cloned());
        }

        SortOutcome { order, unresolved }
    }

    /// Sort live tables by their foreign keys
    pub fn sort_tables(tables: &[SchemaTable]) -> SortOutcome {
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let deps: DependencyMap = tables
            .iter()
            .map(|t| (t.name.clone(), referenced_tables(&t.columns)))
            .collect();
        Self::sort(&names, &deps)
    }
}
