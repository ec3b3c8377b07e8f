use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::status::DatasetTableType;
use crate::transform::TransformationChain;

use super::{ColumnId, KeyId, RelationId, SchemaId, TableId};

/// A source table or a generated dataset table.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) id: TableId,
    pub(crate) schema: SchemaId,
    pub(crate) name: String,
    pub(crate) unique_id: u32,
    pub(crate) columns: IndexMap<String, ColumnId>,
    pub(crate) primary_key: Option<KeyId>,
    pub(crate) foreign_keys: BTreeSet<KeyId>,
    pub masked: bool,
    /// Partition prefixes this table was found in. Empty means all.
    pub in_partitions: BTreeSet<String>,
    /// Present on dataset tables only.
    pub generated: Option<DatasetTableInfo>,
}

impl Table {
    pub(crate) fn new(id: TableId, schema: SchemaId, name: String, unique_id: u32) -> Self {
        Self {
            id,
            schema,
            name,
            unique_id,
            columns: IndexMap::new(),
            primary_key: None,
            foreign_keys: BTreeSet::new(),
            masked: false,
            in_partitions: BTreeSet::new(),
            generated: None,
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn schema(&self) -> SchemaId {
        self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> impl ExactSizeIterator<Item = ColumnId> + '_ {
        self.columns.values().copied()
    }

    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.columns.get(name).copied()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn primary_key(&self) -> Option<KeyId> {
        self.primary_key
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = KeyId> + '_ {
        self.foreign_keys.iter().copied()
    }

    /// Primary key first, then foreign keys.
    pub fn keys(&self) -> impl Iterator<Item = KeyId> + '_ {
        self.primary_key.into_iter().chain(self.foreign_keys())
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    pub fn table_type(&self) -> Option<DatasetTableType> {
        self.generated.as_ref().map(|info| info.table_type)
    }

    /// True when the table exists in the given partition (or in all of them).
    pub fn in_partition(&self, prefix: &str) -> bool {
        self.in_partitions.is_empty() || self.in_partitions.contains(prefix)
    }
}

/// Generation metadata of a dataset table.
#[derive(Debug, Clone)]
pub struct DatasetTableInfo {
    pub table_type: DatasetTableType,
    pub parent: Option<TableId>,
    /// Source table the transformation starts from.
    pub focus_table: TableId,
    /// Relation followed from the parent to reach the focus table.
    pub focus_relation: Option<RelationId>,
    pub focus_iteration: usize,
    pub chain: TransformationChain,
}

impl DatasetTableInfo {
    pub fn new(table_type: DatasetTableType, focus_table: TableId) -> Self {
        Self {
            table_type,
            parent: None,
            focus_table,
            focus_relation: None,
            focus_iteration: 0,
            chain: TransformationChain::default(),
        }
    }
}
