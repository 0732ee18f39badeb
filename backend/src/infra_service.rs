// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use sqlx::{Executor, PgPool};
use thiserror::Error;

use crate::{errors::StorageError, settings::DatabaseSettings};

#[derive(Debug, Error)]
pub enum ServiceCreationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for ServiceCreationError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(StorageError::from(e))
    }
}

/// Shared bootstrap for anything backed by the GLKDC Postgres schema:
/// connect (creating the database if absent), migrate, then hand the pool
/// to the implementor's own `initialize`.
#[async_trait]
pub trait InfraService: Sized {
    async fn new(database_settings: &DatabaseSettings) -> Result<Self, ServiceCreationError> {
        let connection =
            PgPool::connect(&database_settings.connection_string_without_database()).await?;

        let db_name = database_settings.name.as_str();
        let db_exists = sqlx::query!(
            "select exists (
                SELECT datname FROM pg_catalog.pg_database WHERE datname = $1
            )",
            db_name,
        )
        .fetch_one(&connection)
        .await?;

        if !db_exists.exists.unwrap_or(false) {
            connection
                .execute(format!(r#"CREATE DATABASE "{}";"#, db_name).as_str())
                .await?;
        }

        tracing::info!(db_name, "created database");

        let db_pool = PgPool::connect(&database_settings.connection_string()).await?;

        Self::new_from_pool(db_pool).await
    }

    async fn new_from_pool(db_pool: PgPool) -> Result<Self, ServiceCreationError> {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("migrations applied");

        Self::initialize(db_pool).await
    }

    async fn initialize(db_pool: PgPool) -> Result<Self, ServiceCreationError>;
}
