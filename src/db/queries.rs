use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::models::record::{Patch, TargetRecord};

fn into_record(row: &sqlx::postgres::PgRow) -> Result<TargetRecord, sqlx::Error> {
    let key: String = row.try_get("key")?;
    let data: Value = row.try_get("data")?;
    let fields = match data {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    Ok(TargetRecord { key, fields })
}

/// Fetch one ordered page of documents strictly after `after_key`.
///
/// Keys compare byte-wise (`COLLATE "C"`) so the order does not depend on
/// the database locale.
pub async fn get_page(
    pool: &PgPool,
    collection: &str,
    after_key: Option<&str>,
    limit: i64,
) -> Result<Vec<TargetRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT key, data
        FROM documents
        WHERE collection = $1
          AND ($2::text IS NULL OR key COLLATE "C" > $2::text COLLATE "C")
        ORDER BY key COLLATE "C" ASC
        LIMIT $3
        "#,
    )
    .bind(collection)
    .bind(after_key)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(into_record).collect()
}

/// Get a document by key
pub async fn get_document(
    pool: &PgPool,
    collection: &str,
    key: &str,
) -> Result<Option<TargetRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT key, data
        FROM documents
        WHERE collection = $1 AND key = $2
        "#,
    )
    .bind(collection)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(into_record).transpose()
}

/// Shallow-merge `patch` into a document. Returns false if no row matched.
pub async fn patch_document(
    pool: &PgPool,
    collection: &str,
    key: &str,
    patch: &Patch,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET data = data || $3,
            updated_at = NOW()
        WHERE collection = $1 AND key = $2
        "#,
    )
    .bind(collection)
    .bind(key)
    .bind(Value::Object(patch.clone()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert or replace a document (seeding and tests)
pub async fn upsert_document(
    pool: &PgPool,
    collection: &str,
    record: &TargetRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO documents (collection, key, data)
        VALUES ($1, $2, $3)
        ON CONFLICT (collection, key)
        DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
        "#,
    )
    .bind(collection)
    .bind(&record.key)
    .bind(Value::Object(record.fields.clone()))
    .execute(pool)
    .await?;

    Ok(())
}
