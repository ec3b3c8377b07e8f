//! Serializable view of a generated dataset, the contract handed to DDL
//! generators.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use martforge_core::{
    ColumnId, DatasetColumnKind, DatasetTableType, Error, ExpressionDefinition, Mart,
    OptimiserType, PartitionApplication, Result, SchemaId, TableId, TransformationUnit,
};

/// Contract version of the summary format.
pub const SUMMARY_VERSION: &str = "0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DatasetSummary {
    pub summary_version: String,
    pub name: String,
    /// Qualified name of the source table the dataset is rooted at.
    pub central_table: String,
    pub optimiser: OptimiserType,
    pub invisible: bool,
    pub partition_table: bool,
    /// Generated tables ordered by name.
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableSummary {
    pub name: String,
    pub table_type: DatasetTableType,
    pub parent: Option<String>,
    pub focus_table: String,
    pub focus_relation: Option<String>,
    pub iteration: usize,
    pub masked: bool,
    /// Visible names of the primary-key columns.
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeySummary>,
    pub columns: Vec<ColumnSummary>,
    pub units: Vec<UnitSummary>,
    /// Partition application in effect for the table.
    pub partition: Option<PartitionApplication>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForeignKeySummary {
    pub columns: Vec<String>,
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSummary {
    pub internal: String,
    pub visible: String,
    /// `wrapped`, `inherited`, `expression` or `unrolled`.
    pub kind: String,
    /// Qualified source column for wrapped columns, parent column for
    /// inherited ones.
    pub source: Option<String>,
    pub masked: bool,
    pub indexed: bool,
    pub key_dependency: bool,
    pub expression_dependency: bool,
    pub expression: Option<ExpressionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnitSummary {
    /// `select`, `join`, `skip`, `unroll` or `expression`.
    pub kind: String,
    pub table: Option<String>,
    pub relation: Option<String>,
    pub iteration: Option<usize>,
    /// Internal names of the columns the unit introduces.
    pub columns: Vec<String>,
    pub restriction: Option<String>,
    pub partition_value: Option<String>,
}

/// Describe every generated table of `dataset`.
pub fn summarize_dataset(mart: &Mart, dataset: SchemaId) -> Result<DatasetSummary> {
    let central = mart.central_table(dataset)?;
    let info = mart.dataset(dataset)?;
    let schema = mart.schema(dataset);
    let tables = schema
        .tables()
        .map(|table| summarize_table(mart, dataset, table))
        .collect::<Result<Vec<_>>>()?;
    Ok(DatasetSummary {
        summary_version: SUMMARY_VERSION.to_string(),
        name: schema.name().to_string(),
        central_table: mart.qualified_table_name(central),
        optimiser: info.optimiser,
        invisible: info.invisible,
        partition_table: info.is_partition_table(),
        tables,
    })
}

fn summarize_table(mart: &Mart, dataset: SchemaId, table: TableId) -> Result<TableSummary> {
    let generated = mart.table(table);
    let info = generated.generated.as_ref().ok_or_else(|| {
        Error::invariant(format!("dataset table '{}' has no generation info", generated.name()))
    })?;
    let mods = &mart.dataset(dataset)?.mods;
    let visible = |columns: &[ColumnId]| -> Vec<String> {
        columns
            .iter()
            .map(|column| mart.column(*column).modified_name().to_string())
            .collect()
    };

    let primary_key = generated
        .primary_key()
        .map(|key| visible(mart.key(key).columns()))
        .unwrap_or_default();
    let foreign_keys = generated
        .foreign_keys()
        .map(|key| {
            let references = mart
                .key(key)
                .relations()
                .filter_map(|relation| mart.relation(relation).other_key(key))
                .map(|other| mart.table(mart.key(other).table()).name().to_string())
                .collect();
            ForeignKeySummary {
                columns: visible(mart.key(key).columns()),
                references,
            }
        })
        .collect();

    let columns = generated
        .columns()
        .map(|column| {
            let column = mart.column(column);
            let payload = column.generated.as_ref();
            let kind = payload.map(|payload| &payload.kind);
            ColumnSummary {
                internal: column.name().to_string(),
                visible: column.modified_name().to_string(),
                kind: kind.map_or("source", DatasetColumnKind::label).to_string(),
                source: kind.and_then(|kind| match kind {
                    DatasetColumnKind::Wrapped { source } => {
                        let source = mart.column(*source);
                        Some(format!(
                            "{}.{}",
                            mart.qualified_table_name(source.table()),
                            source.name()
                        ))
                    }
                    DatasetColumnKind::Inherited { parent } => {
                        Some(mart.column(*parent).name().to_string())
                    }
                    _ => None,
                }),
                masked: payload.is_some_and(|payload| payload.masked),
                indexed: mods.is_column_indexed(generated.name(), column.name()),
                key_dependency: payload.is_some_and(|payload| payload.key_dependency),
                expression_dependency: payload.is_some_and(|payload| payload.expression_dependency),
                expression: kind.and_then(|kind| match kind {
                    DatasetColumnKind::Expression(definition) => Some(definition.clone()),
                    _ => None,
                }),
            }
        })
        .collect();

    let units = info
        .chain
        .units()
        .iter()
        .map(|unit| summarize_unit(mart, unit))
        .collect();

    Ok(TableSummary {
        name: generated.name().to_string(),
        table_type: info.table_type,
        parent: info
            .parent
            .map(|parent| mart.table(parent).name().to_string()),
        focus_table: mart.qualified_table_name(info.focus_table),
        focus_relation: info
            .focus_relation
            .map(|relation| mart.relation_name(relation)),
        iteration: info.focus_iteration,
        masked: generated.masked,
        primary_key,
        foreign_keys,
        columns,
        units,
        partition: mart.application_for_table(dataset, table).cloned(),
    })
}

fn summarize_unit(mart: &Mart, unit: &TransformationUnit) -> UnitSummary {
    let columns = unit
        .new_columns()
        .into_iter()
        .map(|column| mart.column(column).name().to_string())
        .collect();
    let mut summary = UnitSummary {
        kind: unit.label().to_string(),
        table: unit.table().map(|table| table_label(mart, table)),
        relation: None,
        iteration: None,
        columns,
        restriction: None,
        partition_value: None,
    };
    match unit {
        TransformationUnit::SelectFromTable(select) => {
            summary.restriction = select
                .restriction
                .as_ref()
                .map(|restriction| restriction.expression.clone());
        }
        TransformationUnit::JoinTable(join) | TransformationUnit::SkipTable(join) => {
            summary.relation = join.relation.map(|relation| mart.relation_name(relation));
            summary.iteration = Some(join.iteration);
            summary.restriction = join
                .relation_restriction
                .as_ref()
                .map(|restriction| restriction.expression.clone())
                .or_else(|| {
                    join.table_restriction
                        .as_ref()
                        .map(|restriction| restriction.expression.clone())
                });
            summary.partition_value = join
                .partition
                .as_ref()
                .and_then(|binding| binding.value.clone());
        }
        TransformationUnit::UnrollTable(unroll) => {
            summary.relation = Some(mart.relation_name(unroll.relation));
        }
        TransformationUnit::Expression(_) => {}
    }
    summary
}

/// Source tables by qualified name, generated tables by their own name.
fn table_label(mart: &Mart, table: TableId) -> String {
    let found = mart.table(table);
    if found.is_generated() {
        found.name().to_string()
    } else {
        mart.qualified_table_name(table)
    }
}
