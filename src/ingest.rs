//! Project manifest import.
//!
//! Schema Scout does not parse data files itself; callers describe a
//! project's tables and glossary in a JSON manifest and import it here.
//! Imports are upserts keyed by `(project_id, name)`, so re-importing an
//! updated manifest refreshes descriptions, columns, and aliases without
//! changing element ids that existing indexes reference.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use crate::models::{ColumnMeta, GlossaryEntry, TableMeta};

#[derive(Debug, Deserialize)]
pub struct ProjectManifest {
    pub project_id: String,
    #[serde(default)]
    pub tables: Vec<ManifestTable>,
    #[serde(default)]
    pub glossary: Vec<ManifestTerm>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestTable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub row_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestTerm {
    pub term: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub tables: u64,
    pub glossary_terms: u64,
}

pub fn load_manifest(path: &Path) -> Result<ProjectManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let manifest: ProjectManifest =
        serde_json::from_str(&content).with_context(|| "Failed to parse manifest JSON")?;

    if manifest.project_id.trim().is_empty() {
        anyhow::bail!("manifest project_id must not be empty");
    }

    Ok(manifest)
}

pub async fn import_manifest(
    pool: &SqlitePool,
    manifest: &ProjectManifest,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for table in &manifest.tables {
        let meta = TableMeta {
            id: Uuid::new_v4().to_string(),
            name: table.name.clone(),
            description: table.description.clone(),
            columns: table.columns.clone(),
            row_count: table.row_count,
        };
        upsert_table(pool, &manifest.project_id, &meta).await?;
        summary.tables += 1;
    }

    for term in &manifest.glossary {
        let entry = GlossaryEntry {
            id: Uuid::new_v4().to_string(),
            term: term.term.clone(),
            definition: term.definition.clone(),
            aliases: term.aliases.clone(),
        };
        upsert_glossary_term(pool, &manifest.project_id, &entry).await?;
        summary.glossary_terms += 1;
    }

    Ok(summary)
}

/// Insert or refresh one table. On name conflict the stored id is kept so
/// existing index metadata stays valid.
pub async fn upsert_table(pool: &SqlitePool, project_id: &str, table: &TableMeta) -> Result<()> {
    let schema_json = serde_json::to_string(&serde_json::json!({ "columns": table.columns }))?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO data_tables
            (id, project_id, table_name, description, schema_json, row_count,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, table_name) DO UPDATE SET
            description = excluded.description,
            schema_json = excluded.schema_json,
            row_count = excluded.row_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&table.id)
    .bind(project_id)
    .bind(&table.name)
    .bind(&table.description)
    .bind(schema_json)
    .bind(table.row_count)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or refresh one glossary entry, keeping the stored id on conflict.
pub async fn upsert_glossary_term(
    pool: &SqlitePool,
    project_id: &str,
    entry: &GlossaryEntry,
) -> Result<()> {
    let aliases_json = serde_json::to_string(&entry.aliases)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO glossary_terms
            (id, project_id, term, definition, aliases_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, term) DO UPDATE SET
            definition = excluded.definition,
            aliases_json = excluded.aliases_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.id)
    .bind(project_id)
    .bind(&entry.term)
    .bind(&entry.definition)
    .bind(aliases_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata, migrate};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn sample_manifest() -> ProjectManifest {
        serde_json::from_value(serde_json::json!({
            "project_id": "p1",
            "tables": [
                {
                    "name": "orders",
                    "description": "Customer orders",
                    "columns": [
                        {"name": "order_id", "type": "INTEGER"},
                        {"name": "total", "type": "REAL", "sample_values": ["19.99"]}
                    ]
                }
            ],
            "glossary": [
                {"term": "revenue", "definition": "Total sales amount", "aliases": ["sales"]}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_import_and_read_back() {
        let pool = test_pool().await;
        let summary = import_manifest(&pool, &sample_manifest()).await.unwrap();
        assert_eq!(summary.tables, 1);
        assert_eq!(summary.glossary_terms, 1);

        let tables = metadata::list_tables(&pool, "p1").await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[0].columns[1].sample_values, vec!["19.99"]);

        let terms = metadata::list_glossary_terms(&pool, "p1").await.unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].aliases, vec!["sales"]);
    }

    #[tokio::test]
    async fn test_reimport_keeps_table_id() {
        let pool = test_pool().await;
        import_manifest(&pool, &sample_manifest()).await.unwrap();
        let before = metadata::list_tables(&pool, "p1").await.unwrap();

        import_manifest(&pool, &sample_manifest()).await.unwrap();
        let after = metadata::list_tables(&pool, "p1").await.unwrap();

        assert_eq!(before[0].id, after[0].id);
        assert_eq!(after.len(), 1);
    }
}
