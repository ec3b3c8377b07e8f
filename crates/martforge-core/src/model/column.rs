use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::definitions::ExpressionDefinition;
use crate::status::ComponentStatus;

use super::{ColumnId, RelationId, TableId};

/// A source or generated column. Identity (table, name) never changes; only
/// flags mutate.
#[derive(Debug, Clone)]
pub struct Column {
    pub(crate) id: ColumnId,
    pub(crate) table: TableId,
    pub(crate) name: String,
    pub status: ComponentStatus,
    /// Partition prefixes this column was found in. Empty means all.
    pub in_partitions: BTreeSet<String>,
    /// Present on dataset columns only.
    pub generated: Option<DatasetColumn>,
}

impl Column {
    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Source name, or the internal name of a generated column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Visible name: the modified name of a generated column, otherwise the
    /// column name.
    pub fn modified_name(&self) -> &str {
        self.generated
            .as_ref()
            .map(|generated| generated.modified_name.as_str())
            .unwrap_or(&self.name)
    }

    pub fn in_partition(&self, prefix: &str) -> bool {
        self.in_partitions.is_empty() || self.in_partitions.contains(prefix)
    }
}

/// Generated column payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetColumn {
    pub kind: DatasetColumnKind,
    pub modified_name: String,
    /// Part of a source key; survives pruning even when masked.
    pub key_dependency: bool,
    /// Referenced by an expression column; survives pruning even when masked.
    pub expression_dependency: bool,
    pub masked: bool,
}

impl DatasetColumn {
    pub fn new(kind: DatasetColumnKind, modified_name: impl Into<String>) -> Self {
        Self {
            kind,
            modified_name: modified_name.into(),
            key_dependency: false,
            expression_dependency: false,
            masked: false,
        }
    }

    pub fn is_required(&self) -> bool {
        self.key_dependency || self.expression_dependency
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetColumnKind {
    /// Mirrors one source column.
    Wrapped { source: ColumnId },
    /// Delegates to a column on the parent generated table.
    Inherited { parent: ColumnId },
    /// Computed from other columns of the same table.
    Expression(ExpressionDefinition),
    /// One half of the id/name pair produced by unrolling a relation.
    Unrolled {
        relation: RelationId,
        role: UnrolledRole,
    },
}

impl DatasetColumnKind {
    pub fn label(&self) -> &'static str {
        match self {
            DatasetColumnKind::Wrapped { .. } => "wrapped",
            DatasetColumnKind::Inherited { .. } => "inherited",
            DatasetColumnKind::Expression(_) => "expression",
            DatasetColumnKind::Unrolled { .. } => "unrolled",
        }
    }

    pub fn is_inherited(&self) -> bool {
        matches!(self, DatasetColumnKind::Inherited { .. })
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, DatasetColumnKind::Expression(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrolledRole {
    Id,
    Name,
}
