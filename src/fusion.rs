//! Rank fusion: merge per-strategy candidates into one ranked list.
//!
//! This is the only place with cross-strategy semantics. Each candidate's
//! raw score is scaled by its strategy weight; candidates for the same
//! schema element collapse into one record that keeps the maximum weighted
//! score and the union of contributing strategies. Ordering is fully
//! deterministic: weighted score descending, then identity key ascending.

use std::collections::{BTreeSet, HashMap};

use crate::config::WeightsConfig;
use crate::models::{Candidate, FusedResult, SchemaElement, Strategy};

struct Group {
    element: SchemaElement,
    weighted: f64,
    strategies: BTreeSet<Strategy>,
}

/// Fuse strategy outputs into at most `max_results` ranked results.
pub fn fuse(
    per_strategy: &HashMap<Strategy, Vec<Candidate>>,
    weights: &WeightsConfig,
    max_results: usize,
) -> Vec<FusedResult> {
    let mut groups: HashMap<String, Group> = HashMap::new();

    for (strategy, candidates) in per_strategy {
        let weight = weights.for_strategy(*strategy);

        for candidate in candidates {
            let weighted = candidate.raw_score.clamp(0.0, 1.0) * weight;
            let identity = candidate.element.identity();

            match groups.get_mut(&identity) {
                Some(group) => {
                    // Keep the payload of the best-scoring hit; a weaker
                    // duplicate still counts as a contributing strategy.
                    if weighted > group.weighted {
                        group.weighted = weighted;
                        group.element = candidate.element.clone();
                    }
                    group.strategies.insert(*strategy);
                }
                None => {
                    let mut strategies = BTreeSet::new();
                    strategies.insert(*strategy);
                    groups.insert(
                        identity,
                        Group {
                            element: candidate.element.clone(),
                            weighted,
                            strategies,
                        },
                    );
                }
            }
        }
    }

    let mut ranked: Vec<(String, Group)> = groups.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.weighted
            .partial_cmp(&a.1.weighted)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(max_results);

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, (identity, group))| FusedResult {
            identity,
            element: group.element,
            confidence: (group.weighted * 1000.0).round() / 1000.0,
            strategies: group.strategies.into_iter().collect(),
            rank: i + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: &str) -> SchemaElement {
        SchemaElement::Table {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
        }
    }

    fn candidate(id: &str, raw_score: f64, strategy: Strategy) -> Candidate {
        Candidate {
            element: table(id),
            raw_score,
            strategy,
        }
    }

    fn weights() -> WeightsConfig {
        WeightsConfig::default()
    }

    #[test]
    fn test_empty_input() {
        let per_strategy = HashMap::new();
        assert!(fuse(&per_strategy, &weights(), 20).is_empty());

        let mut with_empty_lists = HashMap::new();
        with_empty_lists.insert(Strategy::Exact, Vec::new());
        with_empty_lists.insert(Strategy::Fuzzy, Vec::new());
        assert!(fuse(&with_empty_lists, &weights(), 20).is_empty());
    }

    #[test]
    fn test_duplicate_keeps_max_and_unions_strategies() {
        // exact weight 1.0 × raw 0.9 = 0.9; fuzzy weight 0.6 × raw 1.0 = 0.6
        let mut per_strategy = HashMap::new();
        per_strategy.insert(Strategy::Exact, vec![candidate("t1", 0.9, Strategy::Exact)]);
        per_strategy.insert(Strategy::Fuzzy, vec![candidate("t1", 1.0, Strategy::Fuzzy)]);

        let results = fuse(&per_strategy, &weights(), 20);
        assert_eq!(results.len(), 1);
        assert!((results[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(
            results[0].strategies,
            vec![Strategy::Exact, Strategy::Fuzzy]
        );
    }

    #[test]
    fn test_idempotent_ordering() {
        let mut per_strategy = HashMap::new();
        per_strategy.insert(
            Strategy::Semantic,
            vec![
                candidate("b", 0.8, Strategy::Semantic),
                candidate("a", 0.8, Strategy::Semantic),
                candidate("c", 0.5, Strategy::Semantic),
            ],
        );
        per_strategy.insert(
            Strategy::Keyword,
            vec![candidate("c", 0.9, Strategy::Keyword)],
        );

        let first = fuse(&per_strategy, &weights(), 20);
        let second = fuse(&per_strategy, &weights(), 20);

        let order_first: Vec<&str> = first.iter().map(|r| r.identity.as_str()).collect();
        let order_second: Vec<&str> = second.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(order_first, order_second);

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.rank, b.rank);
        }
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let mut per_strategy = HashMap::new();
        per_strategy.insert(
            Strategy::Exact,
            vec![
                candidate("zeta", 0.8, Strategy::Exact),
                candidate("alpha", 0.8, Strategy::Exact),
            ],
        );

        let results = fuse(&per_strategy, &weights(), 20);
        assert_eq!(results[0].identity, "table:alpha");
        assert_eq!(results[1].identity, "table:zeta");
    }

    #[test]
    fn test_rank_sequence_and_truncation() {
        let mut per_strategy = HashMap::new();
        per_strategy.insert(
            Strategy::Exact,
            (0..10)
                .map(|i| candidate(&format!("t{}", i), 1.0 - i as f64 * 0.05, Strategy::Exact))
                .collect::<Vec<_>>(),
        );

        let results = fuse(&per_strategy, &weights(), 4);
        assert_eq!(results.len(), 4);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.rank, i + 1);
        }
    }

    #[test]
    fn test_confidence_rounded_to_three_decimals() {
        let mut per_strategy = HashMap::new();
        per_strategy.insert(
            Strategy::Fuzzy,
            vec![candidate("t1", 0.7777, Strategy::Fuzzy)],
        );

        let results = fuse(&per_strategy, &weights(), 20);
        // 0.7777 × 0.6 = 0.46662 → 0.467
        assert!((results[0].confidence - 0.467).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_ordering_across_strategies() {
        let mut per_strategy = HashMap::new();
        per_strategy.insert(
            Strategy::Fuzzy,
            vec![candidate("fuzzy_hit", 1.0, Strategy::Fuzzy)],
        );
        per_strategy.insert(
            Strategy::Exact,
            vec![candidate("exact_hit", 0.8, Strategy::Exact)],
        );

        // exact: 0.8 × 1.0 = 0.8 beats fuzzy: 1.0 × 0.6 = 0.6
        let results = fuse(&per_strategy, &weights(), 20);
        assert_eq!(results[0].identity, "table:exact_hit");
    }
}
