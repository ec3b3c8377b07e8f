//! Partition tables, their rows, and their applications to datasets.
//!
//! A partition table is a named, ordered selection of columns whose rows
//! multiply generation: each row applied to a relation yields one compounded
//! branch, prefixed by the row's value in the application's name column.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Mart, SchemaId, TableId};
use crate::status::DatasetTableType;

/// Maximum number of rows fetched for a partition table unless overridden.
pub const DEFAULT_ROW_LIMIT: usize = 1000;

/// Where partition rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSource {
    /// Distinct values of the selected columns of a source table.
    SourceTable {
        database_schema: String,
        table: String,
    },
    /// Rows of a dataset's main table as materialized in `database_schema`.
    Dataset {
        dataset: SchemaId,
        database_schema: String,
    },
}

impl PartitionSource {
    /// Database schema and table the rows are read from.
    pub fn location<'a>(&'a self, mart: &'a Mart) -> (&'a str, &'a str) {
        match self {
            PartitionSource::SourceTable {
                database_schema,
                table,
            } => (database_schema.as_str(), table.as_str()),
            PartitionSource::Dataset {
                dataset,
                database_schema,
            } => (database_schema.as_str(), mart.schema(*dataset).name()),
        }
    }
}

/// One row of a partition table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionRow {
    values: BTreeMap<String, Option<String>>,
}

impl PartitionRow {
    pub fn new<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(column, value)| (column.into(), value))
                .collect(),
        }
    }

    pub fn value_for(&self, column: &str) -> Option<&str> {
        self.values.get(column)?.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct PartitionTable {
    pub(crate) name: String,
    pub(crate) source: PartitionSource,
    pub(crate) available: Vec<String>,
    pub(crate) selected: Vec<String>,
    pub row_limit: usize,
    rows: Option<Vec<PartitionRow>>,
}

impl PartitionTable {
    fn new(
        name: String,
        source: PartitionSource,
        available: Vec<String>,
        selected: Vec<String>,
    ) -> Result<Self> {
        check_selection(&name, &available, &selected)?;
        Ok(Self {
            name,
            source,
            available,
            selected,
            row_limit: DEFAULT_ROW_LIMIT,
            rows: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &PartitionSource {
        &self.source
    }

    pub fn available_columns(&self) -> &[String] {
        &self.available
    }

    pub fn selected_columns(&self) -> &[String] {
        &self.selected
    }

    /// Change the selection. Cached rows are discarded.
    pub fn select_columns(&mut self, selected: Vec<String>) -> Result<()> {
        check_selection(&self.name, &self.available, &selected)?;
        self.selected = selected;
        self.rows = None;
        Ok(())
    }

    /// Cached rows, if they were loaded since the last invalidation.
    pub fn rows(&self) -> Option<&[PartitionRow]> {
        self.rows.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.rows.is_some()
    }

    pub fn set_rows(&mut self, mut rows: Vec<PartitionRow>) {
        rows.truncate(self.row_limit);
        debug!(partition = %self.name, rows = rows.len(), "partition rows cached");
        self.rows = Some(rows);
    }

    pub fn invalidate_rows(&mut self) {
        self.rows = None;
    }
}

fn check_selection(name: &str, available: &[String], selected: &[String]) -> Result<()> {
    if selected.is_empty() {
        return Err(Error::partition(format!(
            "partition table '{name}' needs at least one selected column"
        )));
    }
    let mut seen = BTreeSet::new();
    for column in selected {
        if !available.contains(column) {
            return Err(Error::partition(format!(
                "partition table '{name}' has no column '{column}'"
            )));
        }
        if !seen.insert(column.as_str()) {
            return Err(Error::partition(format!(
                "partition table '{name}' selects '{column}' twice"
            )));
        }
    }
    Ok(())
}

/// What a partition application is bound to.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplicationTarget {
    /// Every main table of the dataset.
    Dataset { dataset: SchemaId },
    /// One generated table, by name.
    DatasetTable { dataset: SchemaId, table: String },
}

impl ApplicationTarget {
    pub fn dataset(&self) -> SchemaId {
        match self {
            ApplicationTarget::Dataset { dataset }
            | ApplicationTarget::DatasetTable { dataset, .. } => *dataset,
        }
    }
}

/// Per-relation settings of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApplicationRow {
    /// Partition column whose value restricts each branch.
    pub partition_column: String,
    /// Relation (by stable name) to compound. `None` applies to the table
    /// itself.
    pub relation: Option<String>,
    /// Partition column whose value prefixes each branch.
    pub name_column: String,
    /// Number of partition rows used; zero uses all of them.
    pub compound: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionApplication {
    pub partition_table: String,
    pub target: ApplicationTarget,
    pub rows: Vec<ApplicationRow>,
}

impl PartitionApplication {
    pub fn row_for_relation(&self, relation: &str) -> Option<&ApplicationRow> {
        self.rows
            .iter()
            .find(|row| row.relation.as_deref() == Some(relation))
    }

    /// Copy bound to another dataset, with generated-table names remapped.
    pub fn retarget(&self, dataset: SchemaId, remap: &dyn Fn(&str) -> String) -> Self {
        let target = match &self.target {
            ApplicationTarget::Dataset { .. } => ApplicationTarget::Dataset { dataset },
            ApplicationTarget::DatasetTable { table, .. } => ApplicationTarget::DatasetTable {
                dataset,
                table: remap(table),
            },
        };
        Self {
            partition_table: self.partition_table.clone(),
            target,
            rows: self.rows.clone(),
        }
    }
}

/// Partition tables by name, applications by target. Entries referring to a
/// dataset are removed explicitly when it is dropped.
#[derive(Debug, Clone, Default)]
pub struct PartitionRegistry {
    tables: BTreeMap<String, PartitionTable>,
    applications: BTreeMap<ApplicationTarget, PartitionApplication>,
}

impl PartitionRegistry {
    pub fn table(&self, name: &str) -> Option<&PartitionTable> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut PartitionTable> {
        self.tables.get_mut(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &PartitionTable> {
        self.tables.values()
    }

    pub fn application(&self, target: &ApplicationTarget) -> Option<&PartitionApplication> {
        self.applications.get(target)
    }

    pub fn applications(&self) -> impl Iterator<Item = &PartitionApplication> {
        self.applications.values()
    }

    pub fn applications_for(
        &self,
        dataset: SchemaId,
    ) -> impl Iterator<Item = &PartitionApplication> + '_ {
        self.applications
            .values()
            .filter(move |application| application.target.dataset() == dataset)
    }

    /// Whether any application uses the named partition table.
    pub fn is_applied(&self, name: &str) -> bool {
        self.applications
            .values()
            .any(|application| application.partition_table == name)
    }

    pub(crate) fn insert_table(&mut self, table: PartitionTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub(crate) fn insert_application(&mut self, application: PartitionApplication) {
        self.applications
            .insert(application.target.clone(), application);
    }

    /// Drop applications targeting the dataset and partition tables backed
    /// by it.
    pub(crate) fn forget_dataset(&mut self, dataset: SchemaId) {
        self.applications
            .retain(|target, _| target.dataset() != dataset);
        let backed: Vec<String> = self
            .tables
            .values()
            .filter(|table| {
                matches!(&table.source, PartitionSource::Dataset { dataset: owner, .. } if *owner == dataset)
            })
            .map(|table| table.name.clone())
            .collect();
        for name in backed {
            self.tables.remove(&name);
            self.applications
                .retain(|_, application| application.partition_table != name);
        }
    }
}

impl Mart {
    /// Register a partition table over the distinct values of a source
    /// table's columns.
    pub fn add_source_partition_table(
        &mut self,
        name: impl Into<String>,
        table: TableId,
        selected: Vec<String>,
    ) -> Result<()> {
        let name = name.into();
        if self.partitions.table(&name).is_some() {
            return Err(Error::partition(format!(
                "partition table '{name}' already exists"
            )));
        }
        let source_table = self
            .get_table(table)
            .ok_or_else(|| Error::partition(format!("unknown table {table}")))?;
        let settings = self.source_settings(source_table.schema()).map_err(|_| {
            Error::partition(format!(
                "'{}' is not a source table",
                self.qualified_table_name(table)
            ))
        })?;
        let available = source_table
            .columns()
            .map(|column| self.column(column).name().to_string())
            .collect();
        let source = PartitionSource::SourceTable {
            database_schema: settings.database_schema.clone(),
            table: source_table.name().to_string(),
        };
        let partition = PartitionTable::new(name, source, available, selected)?;
        self.partitions.insert_table(partition);
        Ok(())
    }

    /// Turn a generated dataset into a partition table named after it. Fails
    /// without side effects when the dataset has no main table or the
    /// selection is invalid.
    pub fn convert_dataset_to_partition_table(
        &mut self,
        dataset: SchemaId,
        selected: Vec<String>,
        database_schema: impl Into<String>,
    ) -> Result<()> {
        let schema = self
            .get_schema(dataset)
            .ok_or_else(|| Error::partition(format!("unknown dataset {dataset}")))?;
        let name = schema.name().to_string();
        let info = schema
            .as_dataset()
            .ok_or_else(|| Error::partition(format!("'{name}' is not a dataset")))?;
        if info.is_partition_table() {
            return Err(Error::partition(format!(
                "'{name}' is already a partition table"
            )));
        }
        if self.partitions.table(&name).is_some() {
            return Err(Error::partition(format!(
                "partition table '{name}' already exists"
            )));
        }
        let main = schema
            .table_id(&name)
            .filter(|table| self.table(*table).table_type() == Some(DatasetTableType::Main))
            .ok_or_else(|| {
                Error::partition(format!("dataset '{name}' has not been generated"))
            })?;
        let available = self
            .table(main)
            .columns()
            .map(|column| self.column(column).modified_name().to_string())
            .collect();
        let source = PartitionSource::Dataset {
            dataset,
            database_schema: database_schema.into(),
        };
        let partition = PartitionTable::new(name.clone(), source, available, selected)?;

        self.partitions.insert_table(partition);
        self.dataset_mut(dataset)?.partition_table = true;
        debug!(dataset = %name, "dataset converted to partition table");
        Ok(())
    }

    /// Revert a partition table to an ordinary dataset. Fails while any
    /// application still uses it.
    pub fn convert_partition_table_to_dataset(&mut self, dataset: SchemaId) -> Result<()> {
        let schema = self
            .get_schema(dataset)
            .ok_or_else(|| Error::partition(format!("unknown dataset {dataset}")))?;
        let name = schema.name().to_string();
        let is_partition = schema
            .as_dataset()
            .is_some_and(|info| info.is_partition_table());
        if !is_partition {
            return Err(Error::partition(format!(
                "'{name}' is not a partition table"
            )));
        }
        if self.partitions.is_applied(&name) {
            return Err(Error::partition(format!(
                "partition table '{name}' is still applied"
            )));
        }

        self.partitions.tables.remove(&name);
        self.dataset_mut(dataset)?.partition_table = false;
        debug!(dataset = %name, "partition table converted to dataset");
        Ok(())
    }

    /// Bind a partition table to a dataset or dataset table. Datasets that
    /// were never generated queue the application until their first
    /// generation.
    pub fn apply_partition_table(&mut self, application: PartitionApplication) -> Result<()> {
        let partition = self
            .partitions
            .table(&application.partition_table)
            .ok_or_else(|| {
                Error::partition(format!(
                    "unknown partition table '{}'",
                    application.partition_table
                ))
            })?;
        let dataset = application.target.dataset();
        self.dataset(dataset)?;
        if let PartitionSource::Dataset { dataset: owner, .. } = &partition.source {
            if *owner == dataset {
                return Err(Error::partition(format!(
                    "partition table '{}' cannot be applied to itself",
                    partition.name
                )));
            }
        }
        if application.rows.is_empty() {
            return Err(Error::validation("partition application has no rows"));
        }
        for row in &application.rows {
            for column in [&row.partition_column, &row.name_column] {
                if !partition.selected.contains(column) {
                    return Err(Error::validation(format!(
                        "partition table '{}' does not select '{column}'",
                        partition.name
                    )));
                }
            }
            if let Some(relation) = &row.relation {
                if self.find_relation_by_name(relation).is_none() {
                    return Err(Error::validation(format!("unknown relation '{relation}'")));
                }
            }
        }

        let generated = self.schema(dataset).table_count() > 0;
        if let ApplicationTarget::DatasetTable { table, .. } = &application.target {
            if generated && self.find_table(dataset, table).is_none() {
                return Err(Error::validation(format!(
                    "dataset '{}' has no table '{table}'",
                    self.schema(dataset).name()
                )));
            }
        }

        if generated {
            self.partitions.insert_application(application);
        } else {
            self.dataset_mut(dataset)?
                .pending_applications
                .push(application);
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    pub fn remove_partition_application(
        &mut self,
        target: &ApplicationTarget,
    ) -> Result<PartitionApplication> {
        let removed = self
            .partitions
            .applications
            .remove(target)
            .ok_or_else(|| Error::partition("no partition application for target"))?;
        self.mark_dirty(target.dataset());
        Ok(removed)
    }

    /// Application in effect for a generated table: one bound to the table
    /// itself, else the dataset-wide one for main tables.
    pub fn application_for_table(
        &self,
        dataset: SchemaId,
        table: TableId,
    ) -> Option<&PartitionApplication> {
        let generated = self.table(table);
        let exact = ApplicationTarget::DatasetTable {
            dataset,
            table: generated.name().to_string(),
        };
        self.partitions.application(&exact).or_else(|| {
            generated
                .table_type()
                .filter(|kind| kind.is_main())
                .and_then(|_| {
                    self.partitions
                        .application(&ApplicationTarget::Dataset { dataset })
                })
        })
    }
}
