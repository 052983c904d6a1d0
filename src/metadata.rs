//! Read access to per-project schema metadata.
//!
//! The engine treats this as a queryable store: table definitions (with
//! their column schemas) and business-glossary entries. Writes happen only
//! through the manifest import in [`crate::ingest`].

use anyhow::Result;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::models::{ColumnMeta, GlossaryEntry, TableMeta};

#[derive(Deserialize)]
struct TableSchemaJson {
    #[serde(default)]
    columns: Vec<ColumnMeta>,
}

fn parse_columns(schema_json: &str) -> Vec<ColumnMeta> {
    serde_json::from_str::<TableSchemaJson>(schema_json)
        .map(|s| s.columns)
        .unwrap_or_default()
}

fn row_to_table(row: &sqlx::sqlite::SqliteRow) -> TableMeta {
    let schema_json: String = row.get("schema_json");
    TableMeta {
        id: row.get("id"),
        name: row.get("table_name"),
        description: row.get("description"),
        columns: parse_columns(&schema_json),
        row_count: row.get("row_count"),
    }
}

pub async fn list_tables(pool: &SqlitePool, project_id: &str) -> Result<Vec<TableMeta>> {
    let rows = sqlx::query(
        r#"
        SELECT id, table_name, description, schema_json, row_count
        FROM data_tables
        WHERE project_id = ?
        ORDER BY table_name
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_table).collect())
}

/// Fetch a subset of tables by id. An empty `ids` slice means all tables.
pub async fn list_tables_by_ids(
    pool: &SqlitePool,
    project_id: &str,
    ids: &[String],
) -> Result<Vec<TableMeta>> {
    if ids.is_empty() {
        return list_tables(pool, project_id).await;
    }

    let all = list_tables(pool, project_id).await?;
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    Ok(all
        .into_iter()
        .filter(|t| wanted.contains(t.id.as_str()))
        .collect())
}

pub async fn list_glossary_terms(
    pool: &SqlitePool,
    project_id: &str,
) -> Result<Vec<GlossaryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, term, definition, aliases_json
        FROM glossary_terms
        WHERE project_id = ?
        ORDER BY term
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let entries = rows
        .iter()
        .map(|row| {
            let aliases_json: String = row.get("aliases_json");
            GlossaryEntry {
                id: row.get("id"),
                term: row.get("term"),
                definition: row.get("definition"),
                aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
            }
        })
        .collect();

    Ok(entries)
}

/// Fetch a subset of glossary entries by id. Empty `ids` means all.
pub async fn list_glossary_terms_by_ids(
    pool: &SqlitePool,
    project_id: &str,
    ids: &[String],
) -> Result<Vec<GlossaryEntry>> {
    let all = list_glossary_terms(pool, project_id).await?;
    if ids.is_empty() {
        return Ok(all);
    }

    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    Ok(all
        .into_iter()
        .filter(|e| wanted.contains(e.id.as_str()))
        .collect())
}

/// Ids from `ids` that do not exist as tables of this project.
pub async fn missing_table_ids(
    pool: &SqlitePool,
    project_id: &str,
    ids: &[String],
) -> Result<Vec<String>> {
    let known: HashSet<String> = list_tables(pool, project_id)
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();
    Ok(ids.iter().filter(|id| !known.contains(*id)).cloned().collect())
}

/// Ids from `ids` that do not exist as glossary entries of this project.
pub async fn missing_glossary_ids(
    pool: &SqlitePool,
    project_id: &str,
    ids: &[String],
) -> Result<Vec<String>> {
    let known: HashSet<String> = list_glossary_terms(pool, project_id)
        .await?
        .into_iter()
        .map(|e| e.id)
        .collect();
    Ok(ids.iter().filter(|id| !known.contains(*id)).cloned().collect())
}
