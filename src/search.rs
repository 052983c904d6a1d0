//! The four search strategies and the fused entry points.
//!
//! Each strategy independently maps a text fragment to scored candidates:
//!
//! - **semantic** — cosine similarity over the project's ready dense indexes
//! - **keyword** — tf-idf similarity over the ready sparse indexes, with a
//!   direct substring pass over the metadata store when none exist
//! - **fuzzy** — normalized edit-distance over element names
//! - **exact** — case-insensitive containment over element names
//!
//! Strategies share no scoring assumptions and may run concurrently; a
//! strategy that cannot run (no indexes, broken files) degrades to an empty
//! list. Only empty query text is an error, and only at the fused entry
//! points.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::cache::{IndexCache, LoadedIndex};
use crate::config::Config;
use crate::encoder::EncoderCache;
use crate::error::EngineError;
use crate::fusion::fuse;
use crate::index_store;
use crate::metadata;
use crate::models::{
    Candidate, EntityHint, FusedResult, IndexKind, SchemaElement, Strategy, TargetType,
};
use crate::text::similarity_ratio;

/// Borrowed view of everything the strategy runners need.
#[derive(Clone, Copy)]
pub struct SearchContext<'a> {
    pub pool: &'a SqlitePool,
    pub config: &'a Config,
    pub encoders: &'a EncoderCache,
    pub indexes: &'a IndexCache,
}

/// Run all strategies concurrently and fuse their candidates.
///
/// An empty result list is a valid outcome ("no confident match"); only
/// empty query text is rejected.
pub async fn search_entities(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Result<Vec<FusedResult>, EngineError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::Validation(
            "query text must not be empty".to_string(),
        ));
    }

    let (semantic, keyword, fuzzy, exact) = tokio::join!(
        semantic_search(ctx, project_id, text, hint),
        keyword_search(ctx, project_id, text, hint),
        fuzzy_search(ctx, project_id, text, hint),
        exact_search(ctx, project_id, text, hint),
    );

    let mut per_strategy = HashMap::new();
    per_strategy.insert(Strategy::Semantic, semantic);
    per_strategy.insert(Strategy::Keyword, keyword);
    per_strategy.insert(Strategy::Fuzzy, fuzzy);
    per_strategy.insert(Strategy::Exact, exact);

    Ok(fuse(
        &per_strategy,
        &ctx.config.search.weights,
        ctx.config.search.max_results,
    ))
}

/// Run one strategy and return its raw candidates.
pub async fn search_by_strategy(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    strategy: Strategy,
) -> Result<Vec<Candidate>, EngineError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::Validation(
            "query text must not be empty".to_string(),
        ));
    }

    let hint = EntityHint::Unknown;
    let candidates = match strategy {
        Strategy::Semantic => semantic_search(ctx, project_id, text, hint).await,
        Strategy::Keyword => keyword_search(ctx, project_id, text, hint).await,
        Strategy::Fuzzy => fuzzy_search(ctx, project_id, text, hint).await,
        Strategy::Exact => exact_search(ctx, project_id, text, hint).await,
    };

    Ok(candidates)
}

// ============ Semantic strategy ============

pub async fn semantic_search(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Vec<Candidate> {
    match run_semantic(ctx, project_id, text, hint).await {
        Ok(candidates) => candidates,
        Err(e) => {
            eprintln!("Warning: semantic search failed: {}", e);
            Vec::new()
        }
    }
}

async fn run_semantic(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Result<Vec<Candidate>, EngineError> {
    let descriptors = index_store::list_ready(ctx.pool, project_id, IndexKind::Dense).await?;
    let top_k = ctx.config.search.semantic_top_k;
    let query_batch = [text.to_string()];

    let mut query_vectors: HashMap<String, Vec<f32>> = HashMap::new();
    let mut candidates = Vec::new();

    for descriptor in descriptors {
        if !hint.wants(descriptor.target_type) {
            continue;
        }
        let Some(model) = descriptor.model_id.clone() else {
            continue;
        };

        let loaded = match ctx.indexes.get_or_load(&descriptor).await {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("Warning: could not load index {}: {}", descriptor.id, e);
                continue;
            }
        };
        let LoadedIndex::Dense(index) = &*loaded else {
            continue;
        };

        // One query embedding per model, shared across that model's indexes
        let query_vec = match query_vectors.get(&model) {
            Some(vec) => vec.clone(),
            None => {
                let encoder = ctx.encoders.get_or_load(&model).await?;
                let mut encoded = encoder
                    .encode(&query_batch)
                    .await
                    .map_err(EngineError::Other)?;
                let vec = encoded
                    .pop()
                    .ok_or_else(|| EngineError::Other(anyhow::anyhow!("empty encoder output")))?;
                query_vectors.insert(model.clone(), vec.clone());
                vec
            }
        };

        for (element, score) in index.search(&query_vec, top_k) {
            candidates.push(Candidate {
                element,
                raw_score: score,
                strategy: Strategy::Semantic,
            });
        }
    }

    Ok(candidates)
}

// ============ Keyword strategy ============

pub async fn keyword_search(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Vec<Candidate> {
    match run_keyword(ctx, project_id, text, hint).await {
        Ok(candidates) => candidates,
        Err(e) => {
            eprintln!("Warning: keyword search failed: {}", e);
            Vec::new()
        }
    }
}

async fn run_keyword(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Result<Vec<Candidate>, EngineError> {
    let descriptors = index_store::list_ready(ctx.pool, project_id, IndexKind::Sparse).await?;
    let in_scope: Vec<_> = descriptors
        .into_iter()
        .filter(|d| hint.wants(d.target_type))
        .collect();

    // No sparse index to consult: degrade to direct containment matching
    if in_scope.is_empty() {
        return simple_keyword_search(ctx.pool, project_id, text, hint).await;
    }

    let top_k = ctx.config.search.keyword_top_k;
    let mut candidates = Vec::new();

    for descriptor in in_scope {
        let loaded = match ctx.indexes.get_or_load(&descriptor).await {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("Warning: could not load index {}: {}", descriptor.id, e);
                continue;
            }
        };
        let LoadedIndex::Sparse(index) = &*loaded else {
            continue;
        };

        for (element, score) in index.search(text, top_k) {
            candidates.push(Candidate {
                element,
                raw_score: score,
                strategy: Strategy::Keyword,
            });
        }
    }

    Ok(candidates)
}

/// Substring containment over the metadata store, used when the project
/// has no sparse index yet. Exact name match scores 1.0, containment 0.8.
async fn simple_keyword_search(
    pool: &SqlitePool,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Result<Vec<Candidate>, EngineError> {
    let query = text.to_lowercase();
    let mut candidates = Vec::new();

    if hint.wants(TargetType::Tables) || hint.wants(TargetType::Columns) {
        let tables = metadata::list_tables(pool, project_id).await?;

        for table in &tables {
            if hint.wants(TargetType::Tables) && table.name.to_lowercase().contains(&query) {
                let score = if query == table.name.to_lowercase() {
                    1.0
                } else {
                    0.8
                };
                candidates.push(Candidate {
                    element: SchemaElement::Table {
                        id: table.id.clone(),
                        name: table.name.clone(),
                        description: table.description.clone(),
                    },
                    raw_score: score,
                    strategy: Strategy::Keyword,
                });
            }

            if hint.wants(TargetType::Columns) {
                for column in &table.columns {
                    if column.name.to_lowercase().contains(&query) {
                        let score = if query == column.name.to_lowercase() {
                            1.0
                        } else {
                            0.8
                        };
                        candidates.push(Candidate {
                            element: SchemaElement::Column {
                                table_id: table.id.clone(),
                                table_name: table.name.clone(),
                                column_name: column.name.clone(),
                                data_type: column.data_type.clone(),
                            },
                            raw_score: score,
                            strategy: Strategy::Keyword,
                        });
                    }
                }
            }
        }
    }

    if hint.wants(TargetType::Dictionary) {
        let entries = metadata::list_glossary_terms(pool, project_id).await?;

        for entry in entries {
            let term_lower = entry.term.to_lowercase();
            let in_definition = entry
                .definition
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&query));

            if term_lower.contains(&query) || in_definition {
                let score = if query == term_lower { 1.0 } else { 0.8 };
                candidates.push(Candidate {
                    element: SchemaElement::GlossaryTerm {
                        id: entry.id,
                        term: entry.term,
                        definition: entry.definition,
                        aliases: entry.aliases,
                    },
                    raw_score: score,
                    strategy: Strategy::Keyword,
                });
            }
        }
    }

    Ok(candidates)
}

// ============ Fuzzy strategy ============

pub async fn fuzzy_search(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Vec<Candidate> {
    match run_fuzzy(ctx, project_id, text, hint).await {
        Ok(candidates) => candidates,
        Err(e) => {
            eprintln!("Warning: fuzzy search failed: {}", e);
            Vec::new()
        }
    }
}

async fn run_fuzzy(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Result<Vec<Candidate>, EngineError> {
    let threshold = ctx.config.search.fuzzy_threshold;
    let limit = ctx.config.search.fuzzy_limit;
    let mut candidates = Vec::new();

    let needs_tables = hint.wants(TargetType::Tables);
    let needs_columns = hint.wants(TargetType::Columns);

    if needs_tables || needs_columns {
        let tables = metadata::list_tables(ctx.pool, project_id).await?;

        if needs_tables {
            let scored = tables.iter().filter_map(|table| {
                let ratio = similarity_ratio(text, &table.name);
                (ratio >= threshold).then(|| Candidate {
                    element: SchemaElement::Table {
                        id: table.id.clone(),
                        name: table.name.clone(),
                        description: table.description.clone(),
                    },
                    raw_score: ratio,
                    strategy: Strategy::Fuzzy,
                })
            });
            candidates.extend(top_n(scored, limit));
        }

        if needs_columns {
            let scored = tables.iter().flat_map(|table| {
                table.columns.iter().filter_map(|column| {
                    let qualified = format!("{}.{}", table.name, column.name);
                    let ratio = similarity_ratio(text, &qualified)
                        .max(similarity_ratio(text, &column.name));
                    (ratio >= threshold).then(|| Candidate {
                        element: SchemaElement::Column {
                            table_id: table.id.clone(),
                            table_name: table.name.clone(),
                            column_name: column.name.clone(),
                            data_type: column.data_type.clone(),
                        },
                        raw_score: ratio,
                        strategy: Strategy::Fuzzy,
                    })
                })
            });
            candidates.extend(top_n(scored, limit));
        }
    }

    if hint.wants(TargetType::Dictionary) {
        let entries = metadata::list_glossary_terms(ctx.pool, project_id).await?;
        let scored = entries.iter().filter_map(|entry| {
            let ratio = similarity_ratio(text, &entry.term);
            (ratio >= threshold).then(|| Candidate {
                element: SchemaElement::GlossaryTerm {
                    id: entry.id.clone(),
                    term: entry.term.clone(),
                    definition: entry.definition.clone(),
                    aliases: entry.aliases.clone(),
                },
                raw_score: ratio,
                strategy: Strategy::Fuzzy,
            })
        });
        candidates.extend(top_n(scored, limit));
    }

    Ok(candidates)
}

/// Best `n` candidates by score; stable, so equal scores keep store order.
fn top_n(scored: impl Iterator<Item = Candidate>, n: usize) -> Vec<Candidate> {
    let mut all: Vec<Candidate> = scored.collect();
    all.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    all.truncate(n);
    all
}

// ============ Exact strategy ============

pub async fn exact_search(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Vec<Candidate> {
    match run_exact(ctx, project_id, text, hint).await {
        Ok(candidates) => candidates,
        Err(e) => {
            eprintln!("Warning: exact search failed: {}", e);
            Vec::new()
        }
    }
}

fn contains_either(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

async fn run_exact(
    ctx: SearchContext<'_>,
    project_id: &str,
    text: &str,
    hint: EntityHint,
) -> Result<Vec<Candidate>, EngineError> {
    let query = text.to_lowercase();
    let mut candidates = Vec::new();

    let needs_tables = hint.wants(TargetType::Tables);
    let needs_columns = hint.wants(TargetType::Columns);

    if needs_tables || needs_columns {
        let tables = metadata::list_tables(ctx.pool, project_id).await?;

        for table in &tables {
            let name = table.name.to_lowercase();
            if needs_tables && contains_either(&name, &query) {
                let score = if name == query { 1.0 } else { 0.8 };
                candidates.push(Candidate {
                    element: SchemaElement::Table {
                        id: table.id.clone(),
                        name: table.name.clone(),
                        description: table.description.clone(),
                    },
                    raw_score: score,
                    strategy: Strategy::Exact,
                });
            }

            if needs_columns {
                for column in &table.columns {
                    let qualified = format!("{}.{}", table.name, column.name).to_lowercase();
                    if contains_either(&qualified, &query) {
                        let score = if qualified == query { 1.0 } else { 0.8 };
                        candidates.push(Candidate {
                            element: SchemaElement::Column {
                                table_id: table.id.clone(),
                                table_name: table.name.clone(),
                                column_name: column.name.clone(),
                                data_type: column.data_type.clone(),
                            },
                            raw_score: score,
                            strategy: Strategy::Exact,
                        });
                    }
                }
            }
        }
    }

    if hint.wants(TargetType::Dictionary) {
        let entries = metadata::list_glossary_terms(ctx.pool, project_id).await?;

        for entry in entries {
            let term = entry.term.to_lowercase();

            let score = if contains_either(&term, &query) {
                Some(if term == query { 1.0 } else { 0.8 })
            } else if let Some(alias) = entry
                .aliases
                .iter()
                .find(|a| contains_either(&a.to_lowercase(), &query))
            {
                Some(if alias.to_lowercase() == query { 0.9 } else { 0.7 })
            } else if entry
                .definition
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&query))
            {
                // Hit inside free text, weaker than a name hit
                Some(0.7)
            } else {
                None
            };

            if let Some(raw_score) = score {
                candidates.push(Candidate {
                    element: SchemaElement::GlossaryTerm {
                        id: entry.id,
                        term: entry.term,
                        definition: entry.definition,
                        aliases: entry.aliases,
                    },
                    raw_score,
                    strategy: Strategy::Exact,
                });
            }
        }
    }

    Ok(candidates)
}
