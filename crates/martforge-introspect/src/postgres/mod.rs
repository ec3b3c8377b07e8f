use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::debug;

use martforge_core::{Error, Result};

use crate::adapter::{ExportedKey, RowSource, SchemaScope, SourceIntrospector};
use crate::options::IntrospectOptions;

mod queries;

pub use queries::quote_ident;

/// Adapter for PostgreSQL sources. Every call acquires its own pooled
/// connection and returns it when the call finishes, on success or error.
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
    opts: IntrospectOptions,
}

impl PostgresAdapter {
    /// Create a new adapter using a pre-configured pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_options(pool, IntrospectOptions::default())
    }

    pub fn with_options(pool: PgPool, opts: IntrospectOptions) -> Self {
        Self { pool, opts }
    }

    async fn connection(&self) -> Result<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|err| Error::Db(err.to_string()))
    }
}

#[async_trait]
impl SourceIntrospector for PostgresAdapter {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn list_tables(&self, scope: &SchemaScope) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let tables = queries::list_tables(&mut conn, &scope.schema, &self.opts.relkinds()).await?;
        debug!(schema = %scope.schema, tables = tables.len(), "listed tables");
        Ok(tables)
    }

    async fn list_columns(&self, scope: &SchemaScope, table: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        queries::list_columns(&mut conn, &scope.schema, table).await
    }

    async fn list_primary_key(&self, scope: &SchemaScope, table: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        queries::list_primary_key(&mut conn, &scope.schema, table).await
    }

    async fn list_exported_keys(
        &self,
        scope: &SchemaScope,
        table: &str,
    ) -> Result<Vec<ExportedKey>> {
        let mut conn = self.connection().await?;
        queries::list_exported_keys(&mut conn, &scope.schema, table).await
    }
}

#[async_trait]
impl RowSource for PostgresAdapter {
    async fn first_rows(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let mut conn = self.connection().await?;
        queries::first_rows(&mut conn, &scope.schema, table, columns, limit).await
    }

    async fn distinct_values(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let mut conn = self.connection().await?;
        queries::distinct_values(&mut conn, &scope.schema, table, columns, limit).await
    }
}
