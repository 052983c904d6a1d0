use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Project table metadata (schema stored as JSON, one row per table)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_tables (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            table_name TEXT NOT NULL,
            description TEXT,
            schema_json TEXT NOT NULL DEFAULT '{"columns":[]}',
            row_count INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, table_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Business glossary
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS glossary_terms (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            term TEXT NOT NULL,
            definition TEXT,
            aliases_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, term)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index descriptors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_indexes (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_ids_json TEXT NOT NULL DEFAULT '[]',
            model_id TEXT,
            build_config_json TEXT,
            vector_count INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'pending',
            build_progress REAL NOT NULL DEFAULT 0.0,
            error TEXT,
            storage_path TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_data_tables_project ON data_tables(project_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_glossary_terms_project ON glossary_terms(project_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_search_indexes_project ON search_indexes(project_id, state)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
