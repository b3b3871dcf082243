use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Sqlite,
};

use crate::error::AppResult;
use crate::models::{EntitlementDecision, PersistedEntitlement};

// Declare submodules
pub mod entitlement;
pub mod kv;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        // Create database if it doesn't exist
        let db_exists = Sqlite::database_exists(&db_url)
            .await
            .context("Failed to check if database exists")?;
        if !db_exists {
            info!("Creating database at {}", path.display());
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePool::connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        run_schema(&pool).await.context("Failed to run database schema")?;

        info!("Database initialized successfully");

        Ok(Database { pool })
    }

    /// A private in-memory database. One connection, so every query sees
    /// the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        run_schema(&pool).await.context("Failed to run database schema")?;

        Ok(Database { pool })
    }

    // --- Key-value Delegates ---

    pub async fn get_value(&self, key: &str) -> AppResult<Option<String>> {
        kv::get(&self.pool, key).await
    }

    pub async fn set_value(&self, key: &str, value: &str) -> AppResult<()> {
        kv::set(&self.pool, key, value).await
    }

    // --- Entitlement Delegates ---

    pub async fn get_entitlement(&self) -> AppResult<PersistedEntitlement> {
        entitlement::get(&self.pool).await
    }

    pub async fn put_entitlement(
        &self,
        decision: &EntitlementDecision,
        sticky_activation: bool,
    ) -> AppResult<PersistedEntitlement> {
        entitlement::put(&self.pool, decision, sticky_activation).await
    }
}

async fn run_schema(pool: &SqlitePool) -> Result<()> {
    let schema = include_str!("schema.sql");

    let mut current_statement = String::new();
    for line in schema.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }

        current_statement.push_str(line);
        current_statement.push('\n');

        if trimmed.ends_with(';') {
            sqlx::query(&current_statement).execute(pool).await?;
            current_statement.clear();
        }
    }
    Ok(())
}
