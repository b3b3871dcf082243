use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::error::AppResult;

#[derive(Debug, Clone, FromRow)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

pub async fn get(pool: &SqlitePool, key: &str) -> AppResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value)
}

/// Reads several keys with a single statement, so the result is one snapshot.
pub async fn get_many(pool: &SqlitePool, keys: &[&str]) -> AppResult<Vec<KeyValue>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!("SELECT key, value FROM kv_store WHERE key IN ({})", placeholders);

    let mut query = sqlx::query_as::<_, KeyValue>(&sql);
    for key in keys {
        query = query.bind(*key);
    }
    Ok(query.fetch_all(pool).await?)
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    upsert(&mut tx, key, value).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn upsert(tx: &mut Transaction<'_, Sqlite>, key: &str, value: &str) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn get_in(tx: &mut Transaction<'_, Sqlite>, key: &str) -> AppResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(value)
}
