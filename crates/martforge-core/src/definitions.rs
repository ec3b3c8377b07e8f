//! Structural policy definitions stored as Modification Store payloads.
//!
//! Each definition is a plain value object: cloning one is how a dataset
//! replica gets an independent copy.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Walk a relation up to `count` times, one branch per iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompoundDefinition {
    pub count: usize,
    /// Whether the DDL generator may build the branches in parallel.
    #[serde(default)]
    pub parallel: bool,
}

impl CompoundDefinition {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            parallel: false,
        }
    }
}

/// Extra join condition on a relation. Aliases map expression placeholders to
/// source column names on the first-key table (`left`) or second-key table
/// (`right`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RelationRestriction {
    pub expression: String,
    #[serde(default)]
    pub left_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub right_aliases: BTreeMap<String, String>,
    /// Hard restrictions use an inner join instead of a left join.
    #[serde(default)]
    pub hard: bool,
}

/// Row filter applied when a source table is selected or joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableRestriction {
    pub expression: String,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// Replace a recursive 1:M relation with a synthesized id/name column pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnrollDefinition {
    /// Column on the one-end table providing the unrolled name.
    pub name_column: String,
    #[serde(default)]
    pub reversed: bool,
}

/// Walk back towards an ancestor over the same relation, distinguished by an
/// optional column on the many-end table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoopbackDefinition {
    #[serde(default)]
    pub differentiator: Option<String>,
}

/// Computed column over other columns of the same generated table.
///
/// Aliases map expression placeholders to column (internal) names of the
/// owning generated table, which may themselves be expression columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionDefinition {
    pub expression: String,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub group_by: bool,
}

impl ExpressionDefinition {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            aliases: BTreeMap::new(),
            group_by: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>, column: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), column.into());
        self
    }

    pub fn grouped(mut self) -> Self {
        self.group_by = true;
        self
    }
}
