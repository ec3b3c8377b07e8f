use std::collections::BTreeSet;

use crate::status::{Cardinality, ComponentStatus, KeyKind};

use super::{ColumnId, KeyId, RelationId, TableId};

/// Primary or foreign key: an ordered tuple of columns on one table.
///
/// Keys compare structurally through [`Key::same_columns`]: the same columns
/// in the same order.
#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) id: KeyId,
    pub(crate) table: TableId,
    pub(crate) kind: KeyKind,
    pub(crate) columns: Vec<ColumnId>,
    pub status: ComponentStatus,
    pub(crate) relations: BTreeSet<RelationId>,
}

impl Key {
    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.kind == KeyKind::Primary
    }

    pub fn columns(&self) -> &[ColumnId] {
        &self.columns
    }

    pub fn relations(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.relations.iter().copied()
    }

    pub fn same_columns(&self, columns: &[ColumnId]) -> bool {
        self.columns == columns
    }

    pub fn contains(&self, column: ColumnId) -> bool {
        self.columns.contains(&column)
    }
}

/// Link between two keys on distinct tables. The first key is the "one" end
/// (normally a primary key), the second key the referencing end.
#[derive(Debug, Clone)]
pub struct Relation {
    pub(crate) id: RelationId,
    pub(crate) first_key: KeyId,
    pub(crate) second_key: KeyId,
    pub cardinality: Cardinality,
    /// Cardinality reported by the source when the user changed it.
    pub original_cardinality: Option<Cardinality>,
    pub status: ComponentStatus,
}

impl Relation {
    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn first_key(&self) -> KeyId {
        self.first_key
    }

    pub fn second_key(&self) -> KeyId {
        self.second_key
    }

    pub fn other_key(&self, key: KeyId) -> Option<KeyId> {
        if key == self.first_key {
            Some(self.second_key)
        } else if key == self.second_key {
            Some(self.first_key)
        } else {
            None
        }
    }

    pub fn involves(&self, key: KeyId) -> bool {
        key == self.first_key || key == self.second_key
    }

    pub fn is_one_to_one(&self) -> bool {
        self.cardinality == Cardinality::One
    }

    pub fn is_one_to_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn is_many_to_many(&self) -> bool {
        self.cardinality == Cardinality::ManyToMany
    }
}
