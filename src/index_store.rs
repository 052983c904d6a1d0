//! Persistence for index descriptors.
//!
//! Descriptor rows live in the `search_indexes` table. State transitions
//! that start a build go through [`try_begin_build`], a single-statement
//! check-and-set: it only succeeds when no build is in flight, which is
//! what enforces the one-build-per-descriptor rule across workers.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{IndexDescriptor, IndexKind, IndexState, SparseSettings, TargetType};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn row_to_descriptor(row: &sqlx::sqlite::SqliteRow) -> Result<IndexDescriptor> {
    let kind: String = row.get("kind");
    let target_type: String = row.get("target_type");
    let state: String = row.get("state");
    let target_ids_json: String = row.get("target_ids_json");
    let build_config_json: Option<String> = row.get("build_config_json");

    Ok(IndexDescriptor {
        id: row.get("id"),
        project_id: row.get("project_id"),
        kind: IndexKind::parse(&kind)
            .ok_or_else(|| anyhow::anyhow!("unknown index kind: {}", kind))?,
        target_type: TargetType::parse(&target_type)
            .ok_or_else(|| anyhow::anyhow!("unknown target type: {}", target_type))?,
        target_ids: serde_json::from_str(&target_ids_json).unwrap_or_default(),
        model_id: row.get("model_id"),
        sparse_settings: build_config_json
            .as_deref()
            .and_then(|json| serde_json::from_str::<SparseSettings>(json).ok()),
        vector_count: row.get("vector_count"),
        state: IndexState::parse(&state)
            .ok_or_else(|| anyhow::anyhow!("unknown index state: {}", state))?,
        build_progress: row.get("build_progress"),
        error: row.get("error"),
        storage_path: row.get("storage_path"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn insert(pool: &SqlitePool, descriptor: &IndexDescriptor) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO search_indexes
            (id, project_id, kind, target_type, target_ids_json, model_id,
             build_config_json, vector_count, state, build_progress, error,
             storage_path, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&descriptor.id)
    .bind(&descriptor.project_id)
    .bind(descriptor.kind.as_str())
    .bind(descriptor.target_type.as_str())
    .bind(serde_json::to_string(&descriptor.target_ids)?)
    .bind(&descriptor.model_id)
    .bind(
        descriptor
            .sparse_settings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(descriptor.vector_count)
    .bind(descriptor.state.as_str())
    .bind(descriptor.build_progress)
    .bind(&descriptor.error)
    .bind(&descriptor.storage_path)
    .bind(descriptor.created_at)
    .bind(descriptor.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<IndexDescriptor>> {
    let row = sqlx::query("SELECT * FROM search_indexes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_descriptor).transpose()
}

pub async fn list_for_project(
    pool: &SqlitePool,
    project_id: &str,
) -> Result<Vec<IndexDescriptor>> {
    let rows = sqlx::query(
        "SELECT * FROM search_indexes WHERE project_id = ? ORDER BY created_at, id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_descriptor).collect()
}

/// Ready indexes of one kind for a project, in creation order.
pub async fn list_ready(
    pool: &SqlitePool,
    project_id: &str,
    kind: IndexKind,
) -> Result<Vec<IndexDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM search_indexes
        WHERE project_id = ? AND kind = ? AND state = 'ready'
        ORDER BY created_at, id
        "#,
    )
    .bind(project_id)
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_descriptor).collect()
}

/// Atomically move a descriptor into `building`.
///
/// Returns `false` when the descriptor is already building (or does not
/// exist); callers turn that into a conflict error. Resets progress and
/// clears any previous error message.
pub async fn try_begin_build(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE search_indexes
        SET state = 'building', build_progress = 0.0, error = NULL, updated_at = ?
        WHERE id = ? AND state != 'building'
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn set_progress(pool: &SqlitePool, id: &str, progress: f64) -> Result<()> {
    sqlx::query("UPDATE search_indexes SET build_progress = ?, updated_at = ? WHERE id = ?")
        .bind(progress.clamp(0.0, 100.0))
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn mark_ready(
    pool: &SqlitePool,
    id: &str,
    vector_count: i64,
    storage_path: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE search_indexes
        SET state = 'ready', vector_count = ?, storage_path = ?,
            build_progress = 100.0, error = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(vector_count)
    .bind(storage_path)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_error(pool: &SqlitePool, id: &str, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE search_indexes SET state = 'error', error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(message)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}
