//! Core contracts for martforge.
//!
//! This crate holds the entity model (schemas, tables, columns, keys,
//! relations) in a single arena, the per-dataset Modification Store, the
//! transformation unit chains that describe generated tables, partition
//! tables, and the shared error type.

pub mod definitions;
pub mod error;
pub mod graph;
pub mod model;
pub mod mods;
pub mod partition;
pub mod policy;
pub mod status;
pub mod transform;
pub mod validation;

pub use definitions::{
    CompoundDefinition, ExpressionDefinition, LoopbackDefinition, RelationRestriction,
    TableRestriction, UnrollDefinition,
};
pub use error::{Error, Result};
pub use graph::{RelationGraphReport, RelationGraphSummary, build_relation_graph_report};
pub use model::{
    Column, ColumnId, Dataset, DatasetColumn, DatasetColumnKind, DatasetTableInfo, Key, KeyId,
    Mart, NAME_SEPARATOR, PendingExpression, Relation, RelationId, Schema, SchemaId, SchemaKind,
    SourceSettings, Table, TableId, UnrolledRole,
};
pub use mods::{DATASET_WIDE, ModProperty, ModValue, Mods, TABLE_ENTITY};
pub use partition::{
    ApplicationRow, ApplicationTarget, DEFAULT_ROW_LIMIT, PartitionApplication, PartitionRegistry,
    PartitionRow, PartitionSource, PartitionTable,
};
pub use policy::restriction_entity;
pub use status::{Cardinality, ComponentStatus, DatasetTableType, KeyKind, OptimiserType};
pub use transform::{
    ExpressionUnit, JoinTable, PartitionBinding, SelectFromTable, TransformationChain, TransformationUnit,
    UnrollTable,
};
pub use validation::validate_mart;
