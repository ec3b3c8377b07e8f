//! In-memory source used to drive synchronization and partition loading
//! without a database.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use martforge_core::{Error, Result};

use crate::adapter::{ExportedKey, RowSource, SchemaScope, SourceIntrospector};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MemoryTable {
    columns: Vec<String>,
    primary_key: Vec<String>,
    foreign_keys: Vec<MemoryForeignKey>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemoryForeignKey {
    columns: Vec<String>,
    target_schema: String,
    target_table: String,
    target_columns: Vec<String>,
}

/// Tables, keys and rows held in memory, keyed by database schema.
///
/// Builder methods consume and return the source; the `drop_*`/`set_*`
/// methods mutate it in place so a test can change the source between
/// synchronizations.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    schemas: BTreeMap<String, BTreeMap<String, MemoryTable>>,
    failure: Option<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn table_mut(&mut self, schema: &str, table: &str) -> &mut MemoryTable {
        self.schemas
            .entry(schema.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
    }

    fn find(&self, scope: &SchemaScope, table: &str) -> Result<&MemoryTable> {
        self.check()?;
        self.schemas
            .get(&scope.schema)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| Error::Db(format!("relation \"{}.{table}\" does not exist", scope.schema)))
    }

    fn check(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(Error::Db(message.clone())),
            None => Ok(()),
        }
    }

    pub fn with_table(mut self, schema: &str, table: &str, columns: &[&str]) -> Self {
        self.table_mut(schema, table).columns = strings(columns);
        self
    }

    pub fn with_primary_key(mut self, schema: &str, table: &str, columns: &[&str]) -> Self {
        self.set_primary_key(schema, table, columns);
        self
    }

    pub fn with_foreign_key(
        mut self,
        schema: &str,
        table: &str,
        columns: &[&str],
        target: (&str, &str),
        target_columns: &[&str],
    ) -> Self {
        self.table_mut(schema, table)
            .foreign_keys
            .push(MemoryForeignKey {
                columns: strings(columns),
                target_schema: target.0.to_string(),
                target_table: target.1.to_string(),
                target_columns: strings(target_columns),
            });
        self
    }

    /// Rows in column order; `None` is SQL NULL.
    pub fn with_rows(mut self, schema: &str, table: &str, rows: Vec<Vec<Option<&str>>>) -> Self {
        self.table_mut(schema, table).rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|value| value.map(str::to_string)).collect())
            .collect();
        self
    }

    /// Make every subsequent call fail with a database error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn set_primary_key(&mut self, schema: &str, table: &str, columns: &[&str]) {
        self.table_mut(schema, table).primary_key = strings(columns);
    }

    pub fn drop_table(&mut self, schema: &str, table: &str) {
        if let Some(tables) = self.schemas.get_mut(schema) {
            tables.remove(table);
        }
    }

    /// Remove a column, and every key of the table using it.
    pub fn drop_column(&mut self, schema: &str, table: &str, column: &str) {
        let entry = self.table_mut(schema, table);
        entry.columns.retain(|candidate| candidate != column);
        if entry.primary_key.iter().any(|candidate| candidate == column) {
            entry.primary_key.clear();
        }
        entry
            .foreign_keys
            .retain(|fk| !fk.columns.iter().any(|candidate| candidate == column));
    }

    pub fn drop_foreign_keys(&mut self, schema: &str, table: &str) {
        self.table_mut(schema, table).foreign_keys.clear();
    }
}

#[async_trait]
impl SourceIntrospector for MemorySource {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn list_tables(&self, scope: &SchemaScope) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .schemas
            .get(&scope.schema)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_columns(&self, scope: &SchemaScope, table: &str) -> Result<Vec<String>> {
        Ok(self.find(scope, table)?.columns.clone())
    }

    async fn list_primary_key(&self, scope: &SchemaScope, table: &str) -> Result<Vec<String>> {
        Ok(self.find(scope, table)?.primary_key.clone())
    }

    async fn list_exported_keys(
        &self,
        scope: &SchemaScope,
        table: &str,
    ) -> Result<Vec<ExportedKey>> {
        let target = self.find(scope, table)?;
        let mut exported = Vec::new();
        for (fk_schema, tables) in &self.schemas {
            for (fk_table, candidate) in tables {
                for fk in &candidate.foreign_keys {
                    let references = fk.target_schema == scope.schema
                        && fk.target_table == table
                        && fk.target_columns == target.primary_key;
                    if !references {
                        continue;
                    }
                    for (index, (fk_column, pk_column)) in
                        fk.columns.iter().zip(&fk.target_columns).enumerate()
                    {
                        exported.push(ExportedKey {
                            fk_schema: fk_schema.clone(),
                            fk_table: fk_table.clone(),
                            fk_column: fk_column.clone(),
                            pk_column: pk_column.clone(),
                            key_seq: u16::try_from(index + 1).unwrap_or(u16::MAX),
                        });
                    }
                }
            }
        }
        Ok(exported)
    }
}

impl MemorySource {
    fn project(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Option<String>>>> {
        let source = self.find(scope, table)?;
        let positions = columns
            .iter()
            .map(|column| {
                source
                    .columns
                    .iter()
                    .position(|candidate| candidate == column)
                    .ok_or_else(|| {
                        Error::Db(format!("column \"{column}\" of \"{table}\" does not exist"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(source
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|position| row.get(*position).cloned().flatten())
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn first_rows(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let mut rows = self.project(scope, table, columns)?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn distinct_values(
        &self,
        scope: &SchemaScope,
        table: &str,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let distinct: BTreeSet<Vec<Option<String>>> =
            self.project(scope, table, columns)?.into_iter().collect();
        Ok(distinct.into_iter().take(limit).collect())
    }
}
