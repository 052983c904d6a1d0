//! Sparse term-weighted index over schema-element text.
//!
//! A small TF-IDF vectorizer (unigrams plus optional n-grams, smoothed
//! inverse document frequency, L2-normalized rows) with an exhaustive
//! cosine scan. Rows are aligned with a metadata array of
//! [`SchemaElement`]s, persisted the same way as the dense index: main file
//! plus sibling `.meta.json`, cross-checked on load.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::dense::meta_path;
use crate::error::EngineError;
use crate::models::SchemaElement;
use crate::text::tokenize;

/// Term-weighting vectorizer fitted over the indexed corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    ngram_max: usize,
}

impl TfidfVectorizer {
    /// Fit over the corpus: build the vocabulary (capped at `max_features`
    /// terms, highest document frequency first) and the idf table.
    pub fn fit(texts: &[String], max_features: usize, ngram_max: usize) -> Self {
        let ngram_max = ngram_max.max(1);
        let mut df: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let mut seen: Vec<&String> = Vec::new();
            let features = extract_features(text, ngram_max);
            for feature in &features {
                if !seen.contains(&feature) {
                    seen.push(feature);
                }
            }
            for feature in seen {
                *df.entry(feature.clone()).or_insert(0) += 1;
            }
        }

        // Deterministic vocabulary: document frequency desc, term asc
        let mut terms: Vec<(String, usize)> = df.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(max_features);

        let n_docs = texts.len() as f32;
        let mut vocabulary = HashMap::with_capacity(terms.len());
        let mut idf = Vec::with_capacity(terms.len());
        for (i, (term, doc_freq)) in terms.into_iter().enumerate() {
            vocabulary.insert(term, i);
            // Smoothed idf, never zero
            idf.push(((1.0 + n_docs) / (1.0 + doc_freq as f32)).ln() + 1.0);
        }

        Self {
            vocabulary,
            idf,
            ngram_max,
        }
    }

    /// L2-normalized sparse tf-idf vector, term indexes ascending.
    pub fn transform(&self, text: &str) -> Vec<(usize, f32)> {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        for feature in extract_features(text, self.ngram_max) {
            if let Some(&idx) = self.vocabulary.get(&feature) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut row: Vec<(usize, f32)> = counts
            .into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();
        row.sort_by_key(|(idx, _)| *idx);

        let norm: f32 = row.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for (_, v) in row.iter_mut() {
                *v /= norm;
            }
        }

        row
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Unigrams plus space-joined n-grams up to `ngram_max`.
fn extract_features(text: &str, ngram_max: usize) -> Vec<String> {
    let terms = tokenize(text);
    let mut features = Vec::with_capacity(terms.len() * ngram_max);

    for n in 1..=ngram_max {
        if terms.len() < n {
            break;
        }
        for window in terms.windows(n) {
            features.push(window.join(" "));
        }
    }

    features
}

fn sparse_dot(a: &[(usize, f32)], b: &[(usize, f32)]) -> f32 {
    let mut sum = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

#[derive(Serialize, Deserialize)]
struct SparseIndexFile {
    vectorizer: TfidfVectorizer,
    rows: Vec<Vec<(usize, f32)>>,
}

pub struct SparseIndex {
    vectorizer: TfidfVectorizer,
    rows: Vec<Vec<(usize, f32)>>,
    elements: Vec<SchemaElement>,
}

impl SparseIndex {
    /// Fit a vectorizer over `texts` and build the document rows.
    pub fn fit(
        texts: &[String],
        elements: Vec<SchemaElement>,
        max_features: usize,
        ngram_max: usize,
    ) -> Result<Self, EngineError> {
        if texts.len() != elements.len() {
            return Err(EngineError::Persistence(format!(
                "row count {} does not match metadata count {}",
                texts.len(),
                elements.len()
            )));
        }

        let vectorizer = TfidfVectorizer::fit(texts, max_features, ngram_max);
        let rows = texts.iter().map(|t| vectorizer.transform(t)).collect();

        Ok(Self {
            vectorizer,
            rows,
            elements,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Top-`top_k` elements by cosine similarity. Zero-similarity rows are
    /// dropped; ties keep insertion order; `top_k == 0` yields nothing.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(SchemaElement, f64)> {
        if top_k == 0 || self.rows.is_empty() {
            return Vec::new();
        }

        let query_vec = self.vectorizer.transform(query);
        if query_vec.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let score = sparse_dot(&query_vec, row).clamp(0.0, 1.0) as f64;
                (score > 0.0).then_some((i, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| (self.elements[i].clone(), score))
            .collect()
    }

    /// Persist vectorizer and rows to `path`, metadata to the sibling meta
    /// file, each through a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = SparseIndexFile {
            vectorizer: self.vectorizer.clone(),
            rows: self.rows.clone(),
        };

        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec(&file)?;
        if let Err(e) = std::fs::write(&tmp, &json) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        std::fs::rename(&tmp, path)?;

        let meta = meta_path(path);
        let meta_tmp = meta.with_extension("tmp");
        let json = serde_json::to_vec(&self.elements)?;
        if let Err(e) = std::fs::write(&meta_tmp, &json) {
            let _ = std::fs::remove_file(&meta_tmp);
            return Err(e.into());
        }
        std::fs::rename(&meta_tmp, &meta)?;

        Ok(())
    }

    /// Load a persisted index, cross-checking row count against the
    /// metadata array.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read(path)?;
        let file: SparseIndexFile = serde_json::from_slice(&json)?;

        let meta = meta_path(path);
        let json = std::fs::read(&meta)?;
        let elements: Vec<SchemaElement> = serde_json::from_slice(&json)?;

        if elements.len() != file.rows.len() {
            return Err(EngineError::Persistence(format!(
                "index {} has {} rows but {} metadata entries",
                path.display(),
                file.rows.len(),
                elements.len()
            )));
        }

        Ok(Self {
            vectorizer: file.vectorizer,
            rows: file.rows,
            elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str) -> SchemaElement {
        SchemaElement::Table {
            id: name.to_string(),
            name: name.to_string(),
            description: None,
        }
    }

    fn corpus() -> (Vec<String>, Vec<SchemaElement>) {
        let texts = vec![
            "orders order id customer id total".to_string(),
            "customers id name".to_string(),
            "monthly revenue report".to_string(),
        ];
        let elements = vec![element("orders"), element("customers"), element("revenue")];
        (texts, elements)
    }

    #[test]
    fn test_fit_and_search() {
        let (texts, elements) = corpus();
        let index = SparseIndex::fit(&texts, elements, 10_000, 2).unwrap();

        let results = index.search("customer total", 3);
        assert!(!results.is_empty());
        assert_eq!(results[0].0.label(), "orders");
        for (_, score) in &results {
            assert!((0.0..=1.0).contains(score));
        }
    }

    #[test]
    fn test_zero_similarity_dropped() {
        let (texts, elements) = corpus();
        let index = SparseIndex::fit(&texts, elements, 10_000, 2).unwrap();
        assert!(index.search("zebra", 5).is_empty());
    }

    #[test]
    fn test_top_k_zero() {
        let (texts, elements) = corpus();
        let index = SparseIndex::fit(&texts, elements, 10_000, 2).unwrap();
        assert!(index.search("orders", 0).is_empty());
    }

    #[test]
    fn test_max_features_caps_vocabulary() {
        let (texts, elements) = corpus();
        let index = SparseIndex::fit(&texts, elements, 4, 1).unwrap();
        assert!(index.vectorizer.vocabulary_len() <= 4);
    }

    #[test]
    fn test_identical_text_scores_one() {
        let texts = vec!["orders total".to_string(), "shipping weight".to_string()];
        let elements = vec![element("a"), element("b")];
        let index = SparseIndex::fit(&texts, elements, 10_000, 2).unwrap();

        let results = index.search("orders total", 2);
        assert_eq!(results[0].0.label(), "a");
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse_test.idx.json");

        let (texts, elements) = corpus();
        let index = SparseIndex::fit(&texts, elements, 10_000, 2).unwrap();
        index.save(&path).unwrap();

        let loaded = SparseIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        let results = loaded.search("customer total", 1);
        assert_eq!(results[0].0.label(), "orders");
    }
}
