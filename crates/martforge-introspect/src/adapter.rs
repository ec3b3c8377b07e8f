use async_trait::async_trait;

use martforge_core::Result;

/// Database schema (and optional catalog) a call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaScope {
    pub catalog: Option<String>,
    pub schema: String,
}

impl SchemaScope {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: schema.into(),
        }
    }

    pub fn with_catalog(mut self, catalog: Option<String>) -> Self {
        self.catalog = catalog;
        self
    }
}

/// One column of a foreign key that references a table's primary key.
///
/// A multi-column foreign key appears as several rows sharing the same
/// referencing table, with `key_seq` counting from 1 in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedKey {
    pub fk_schema: String,
    pub fk_table: String,
    pub fk_column: String,
    pub pk_column: String,
    pub key_seq: u16,
}

/// Relational metadata listing, as needed by schema synchronization.
#[async_trait]
pub trait SourceIntrospector: Send + Sync {
    /// Returns the engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    /// Tables and views of a database schema, by name.
    async fn list_tables(&self, scope: &SchemaScope) -> Result<Vec<String>>;

    /// Column names of a table in ordinal order.
    async fn list_columns(&self, scope: &SchemaScope, table: &str) -> Result<Vec<String>>;

    /// Primary-key column names in key order; empty when the table has none.
    async fn list_primary_key(&self, scope: &SchemaScope, table: &str) -> Result<Vec<String>>;

    /// Foreign keys, in any schema, whose target is this table's primary key.
    async fn list_exported_keys(&self, scope: &SchemaScope, table: &str)
    -> Result<Vec<ExportedKey>>;
}

/// Bounded row reads used to populate partition tables. Values are
/// rendered as text; SQL NULL becomes `None`.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// First `limit` rows of the given columns.
    async fn first_rows(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Vec<Option<String>>>>;

    /// Distinct combinations of the given columns, at most `limit` of them,
    /// in ascending order.
    async fn distinct_values(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Vec<Option<String>>>>;
}
