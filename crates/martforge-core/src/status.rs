use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of keys, relations and columns.
///
/// Variants are declared in ascending precedence so the derived ordering gives
/// `Handmade > Inferred > Modified > InferredIncorrect`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Inference found this component but the user marked it wrong. The
    /// compiler never follows it and inference never re-promotes it.
    InferredIncorrect,
    /// Inferred, then edited by the user (e.g. a changed cardinality).
    Modified,
    /// Found by synchronization or key inference.
    Inferred,
    /// Asserted by the user; never removed or demoted by inference.
    Handmade,
}

impl ComponentStatus {
    pub fn is_handmade(self) -> bool {
        self == ComponentStatus::Handmade
    }

    pub fn is_incorrect(self) -> bool {
        self == ComponentStatus::InferredIncorrect
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComponentStatus::InferredIncorrect => "inferred_incorrect",
            ComponentStatus::Modified => "modified",
            ComponentStatus::Inferred => "inferred",
            ComponentStatus::Handmade => "handmade",
        };
        f.write_str(label)
    }
}

/// Cardinality of a relation, read from the first (primary) key towards the
/// second (foreign) key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// 1:1, the foreign key is itself unique.
    One,
    /// 1:M, the usual foreign key.
    Many,
    /// M:M, both ends may repeat.
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Cardinality::One => "1:1",
            Cardinality::Many => "1:M",
            Cardinality::ManyToMany => "M:M",
        };
        f.write_str(label)
    }
}

/// Whether a key is the table's primary key or one of its foreign keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Primary,
    Foreign,
}

/// Role of a generated table within a dataset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DatasetTableType {
    Main,
    MainSubclass,
    Dimension,
}

impl DatasetTableType {
    pub fn is_main(self) -> bool {
        matches!(self, DatasetTableType::Main | DatasetTableType::MainSubclass)
    }
}

impl fmt::Display for DatasetTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DatasetTableType::Main => "main",
            DatasetTableType::MainSubclass => "main_subclass",
            DatasetTableType::Dimension => "dimension",
        };
        f.write_str(label)
    }
}

/// How the external DDL generator should expose "has dimension rows" flags on
/// main tables. The compiler only records the choice.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OptimiserType {
    #[default]
    None,
    ColumnInherit,
    ColumnBoolInherit,
    ColumnBoolNullInherit,
    TableInherit,
    TableBoolInherit,
    TableBoolNullInherit,
}

impl OptimiserType {
    pub fn uses_tables(self) -> bool {
        matches!(
            self,
            OptimiserType::TableInherit
                | OptimiserType::TableBoolInherit
                | OptimiserType::TableBoolNullInherit
        )
    }
}
