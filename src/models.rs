//! Core data models used throughout Schema Scout.
//!
//! These types represent the schema elements a query fragment can resolve
//! to, the per-project index descriptors, and the candidates/results that
//! flow through the search strategies and rank fusion.

use serde::{Deserialize, Serialize};

/// A table, column, or glossary term that a query fragment might refer to.
///
/// This is the single candidate currency of the whole engine: index
/// metadata arrays, strategy candidates, and fused results all carry one of
/// these variants. The identity key from [`SchemaElement::identity`] is the
/// deduplication key for rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaElement {
    Table {
        id: String,
        name: String,
        description: Option<String>,
    },
    Column {
        table_id: String,
        table_name: String,
        column_name: String,
        data_type: Option<String>,
    },
    GlossaryTerm {
        id: String,
        term: String,
        definition: Option<String>,
        aliases: Vec<String>,
    },
}

impl SchemaElement {
    /// Stable identity key, unique per schema element within a project.
    pub fn identity(&self) -> String {
        match self {
            SchemaElement::Table { id, .. } => format!("table:{}", id),
            SchemaElement::Column {
                table_id,
                column_name,
                ..
            } => format!("column:{}:{}", table_id, column_name),
            SchemaElement::GlossaryTerm { id, .. } => format!("dict:{}", id),
        }
    }

    /// Primary display name: table name, `table.column`, or glossary term.
    pub fn label(&self) -> String {
        match self {
            SchemaElement::Table { name, .. } => name.clone(),
            SchemaElement::Column {
                table_name,
                column_name,
                ..
            } => format!("{}.{}", table_name, column_name),
            SchemaElement::GlossaryTerm { term, .. } => term.clone(),
        }
    }
}

/// What an index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Tables,
    Columns,
    Dictionary,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Tables => "tables",
            TargetType::Columns => "columns",
            TargetType::Dictionary => "dictionary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tables" => Some(TargetType::Tables),
            "columns" => Some(TargetType::Columns),
            "dictionary" => Some(TargetType::Dictionary),
            _ => None,
        }
    }
}

/// Index flavor: dense embedding vectors or sparse term-weighted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Dense,
    Sparse,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Dense => "dense",
            IndexKind::Sparse => "sparse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dense" => Some(IndexKind::Dense),
            "sparse" => Some(IndexKind::Sparse),
            _ => None,
        }
    }
}

/// Build lifecycle state of an index descriptor.
///
/// `pending → building → ready | error`. A rebuild moves a terminal
/// descriptor back to `building`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Pending,
    Building,
    Ready,
    Error,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Pending => "pending",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IndexState::Pending),
            "building" => Some(IndexState::Building),
            "ready" => Some(IndexState::Ready),
            "error" => Some(IndexState::Error),
            _ => None,
        }
    }
}

/// Sparse vectorizer settings captured when the index is created, so a
/// rebuild reproduces the original build even if the config file changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseSettings {
    pub max_features: usize,
    pub ngram_max: usize,
}

/// Persisted record describing one index's configuration and lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDescriptor {
    pub id: String,
    pub project_id: String,
    pub kind: IndexKind,
    pub target_type: TargetType,
    /// Table ids (for `tables`/`columns`) or glossary ids (for
    /// `dictionary`) this index covers. Empty means all.
    pub target_ids: Vec<String>,
    /// Encoder model id. Required for dense, absent for sparse.
    pub model_id: Option<String>,
    /// Vectorizer settings for sparse indexes, absent for dense.
    pub sparse_settings: Option<SparseSettings>,
    pub vector_count: i64,
    pub state: IndexState,
    pub build_progress: f64,
    pub error: Option<String>,
    pub storage_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    Semantic,
    Keyword,
    Fuzzy,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Exact => "exact",
            Strategy::Semantic => "semantic",
            Strategy::Keyword => "keyword",
            Strategy::Fuzzy => "fuzzy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Strategy::Exact),
            "semantic" => Some(Strategy::Semantic),
            "keyword" => Some(Strategy::Keyword),
            "fuzzy" => Some(Strategy::Fuzzy),
            _ => None,
        }
    }
}

/// Optional caller hint about what kind of element the text refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityHint {
    Table,
    Column,
    BusinessTerm,
    #[default]
    Unknown,
}

impl EntityHint {
    /// Lenient parse; anything unrecognized means no hint.
    pub fn parse(s: &str) -> Self {
        match s {
            "table" => EntityHint::Table,
            "column" => EntityHint::Column,
            "business_term" => EntityHint::BusinessTerm,
            _ => EntityHint::Unknown,
        }
    }

    /// Whether a given index target type is in scope for this hint.
    pub fn wants(&self, target: TargetType) -> bool {
        match self {
            EntityHint::Unknown => true,
            EntityHint::Table => target == TargetType::Tables,
            EntityHint::Column => target == TargetType::Columns,
            EntityHint::BusinessTerm => target == TargetType::Dictionary,
        }
    }
}

/// Output of a single strategy for one element. Strategy-local score in
/// [0.0, 1.0]; cross-strategy semantics live in the fusion step only.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub element: SchemaElement,
    pub raw_score: f64,
    pub strategy: Strategy,
}

/// Final fused search result.
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub identity: String,
    pub element: SchemaElement,
    /// Weighted score rounded to three decimals, in [0.0, 1.0].
    pub confidence: f64,
    /// Strategies that found this element, in a fixed order.
    pub strategies: Vec<Strategy>,
    /// 1-based position in the fused ranking.
    pub rank: usize,
}

/// Table row read from the metadata store.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<ColumnMeta>,
    pub row_count: Option<i64>,
}

/// Column entry within a table's stored schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub sample_values: Vec<String>,
}

/// Glossary entry read from the metadata store.
#[derive(Debug, Clone)]
pub struct GlossaryEntry {
    pub id: String,
    pub term: String,
    pub definition: Option<String>,
    pub aliases: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keys() {
        let table = SchemaElement::Table {
            id: "t1".into(),
            name: "orders".into(),
            description: None,
        };
        let column = SchemaElement::Column {
            table_id: "t1".into(),
            table_name: "orders".into(),
            column_name: "total".into(),
            data_type: Some("REAL".into()),
        };
        let term = SchemaElement::GlossaryTerm {
            id: "g1".into(),
            term: "revenue".into(),
            definition: None,
            aliases: vec![],
        };
        assert_eq!(table.identity(), "table:t1");
        assert_eq!(column.identity(), "column:t1:total");
        assert_eq!(term.identity(), "dict:g1");
    }

    #[test]
    fn test_labels() {
        let column = SchemaElement::Column {
            table_id: "t1".into(),
            table_name: "orders".into(),
            column_name: "total".into(),
            data_type: None,
        };
        assert_eq!(column.label(), "orders.total");
    }

    #[test]
    fn test_hint_scope() {
        assert!(EntityHint::Unknown.wants(TargetType::Tables));
        assert!(EntityHint::Unknown.wants(TargetType::Dictionary));
        assert!(EntityHint::Table.wants(TargetType::Tables));
        assert!(!EntityHint::Table.wants(TargetType::Columns));
        assert!(EntityHint::BusinessTerm.wants(TargetType::Dictionary));
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            IndexState::Pending,
            IndexState::Building,
            IndexState::Ready,
            IndexState::Error,
        ] {
            assert_eq!(IndexState::parse(state.as_str()), Some(state));
        }
        assert_eq!(IndexState::parse("bogus"), None);
    }
}
