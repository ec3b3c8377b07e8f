use std::collections::BTreeMap;

use crate::definitions::ExpressionDefinition;
use crate::mods::Mods;
use crate::partition::PartitionApplication;
use crate::status::OptimiserType;

use super::{SchemaId, TableId};

/// A source schema or a dataset (derived mart schema).
#[derive(Debug, Clone)]
pub struct Schema {
    pub(crate) id: SchemaId,
    pub(crate) name: String,
    pub(crate) unique_id: u32,
    pub(crate) tables: BTreeMap<String, TableId>,
    pub masked: bool,
    pub kind: SchemaKind,
    pub(crate) dirty: bool,
}

impl Schema {
    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Monotonic id used when building generated column names.
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Tables ordered by name.
    pub fn tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables.values().copied()
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables.get(name).copied()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self.kind, SchemaKind::Dataset(_))
    }

    pub fn as_source(&self) -> Option<&SourceSettings> {
        match &self.kind {
            SchemaKind::Source(settings) => Some(settings),
            SchemaKind::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match &self.kind {
            SchemaKind::Dataset(dataset) => Some(dataset),
            SchemaKind::Source(_) => None,
        }
    }

    pub fn as_dataset_mut(&mut self) -> Option<&mut Dataset> {
        match &mut self.kind {
            SchemaKind::Dataset(dataset) => Some(dataset),
            SchemaKind::Source(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SchemaKind {
    Source(SourceSettings),
    Dataset(Dataset),
}

/// Where a source schema lives and how its keys are discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Database schema to introspect when no partitions are configured.
    pub database_schema: String,
    pub catalog: Option<String>,
    /// Infer foreign keys (and missing primary keys) from column names
    /// instead of source metadata.
    pub key_guessing: bool,
    /// Database schema name -> partition prefix. When non-empty the source
    /// schema is the union of these database schemas.
    pub partitions: BTreeMap<String, String>,
}

impl SourceSettings {
    pub fn new(database_schema: impl Into<String>) -> Self {
        Self {
            database_schema: database_schema.into(),
            catalog: None,
            key_guessing: false,
            partitions: BTreeMap::new(),
        }
    }

    pub fn with_key_guessing(mut self, key_guessing: bool) -> Self {
        self.key_guessing = key_guessing;
        self
    }

    pub fn with_partition(
        mut self,
        database_schema: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.partitions
            .insert(database_schema.into(), prefix.into());
        self
    }

    /// Database schemas to introspect, each with its partition prefix.
    pub fn database_schemas(&self) -> Vec<(String, Option<String>)> {
        if self.partitions.is_empty() {
            vec![(self.database_schema.clone(), None)]
        } else {
            self.partitions
                .iter()
                .map(|(schema, prefix)| (schema.clone(), Some(prefix.clone())))
                .collect()
        }
    }
}

/// Dataset-specific state of a schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub(crate) central_table: TableId,
    pub mods: Mods,
    pub optimiser: OptimiserType,
    pub invisible: bool,
    /// When false the compiler never creates dimension tables.
    pub make_dimensions: bool,
    pub(crate) partition_table: bool,
    /// Expression columns to realize on the next generation, then forget.
    pub pending_expressions: Vec<PendingExpression>,
    /// Partition applications to realize on the next generation, then forget.
    pub pending_applications: Vec<PartitionApplication>,
}

impl Dataset {
    pub(crate) fn new(central_table: TableId) -> Self {
        Self {
            central_table,
            mods: Mods::new(),
            optimiser: OptimiserType::None,
            invisible: false,
            make_dimensions: true,
            partition_table: false,
            pending_expressions: Vec::new(),
            pending_applications: Vec::new(),
        }
    }

    pub fn central_table(&self) -> TableId {
        self.central_table
    }

    pub fn is_partition_table(&self) -> bool {
        self.partition_table
    }
}

/// An expression column queued for first-time realization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExpression {
    /// Generated table name the column belongs to.
    pub table: String,
    /// Column name, used as its internal and visible name.
    pub column: String,
    pub definition: ExpressionDefinition,
}
